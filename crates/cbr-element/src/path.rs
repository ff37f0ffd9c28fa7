//! Slash-separated element paths
//!
//! Provides [`ElementPath`] for naming an element inside a tree, e.g.
//! `forum/discussions/discussion/posts/post`.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::error::StructureError;

/// Path of element names from a tree root
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElementPath(Vec<String>);

impl ElementPath {
    /// Path from owned segments
    #[inline]
    #[must_use]
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// Path of one segment
    #[inline]
    #[must_use]
    pub fn single(segment: impl Into<String>) -> Self {
        Self(vec![segment.into()])
    }

    /// Segments
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Number of segments
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the path has no segments
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Last segment
    #[inline]
    #[must_use]
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Path extended by one segment
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut next = self.0.clone();
        next.push(segment.into());
        Self(next)
    }

    /// Whether `self` is a strict ancestor of `other`
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        self.0.len() < other.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// Segments of `self` below `ancestor`, if `ancestor` is one
    #[must_use]
    pub fn relative_to(&self, ancestor: &Self) -> Option<&[String]> {
        ancestor
            .is_ancestor_of(self)
            .then(|| &self.0[ancestor.0.len()..])
    }
}

impl Display for ElementPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

impl FromStr for ElementPath {
    type Err = StructureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments: Vec<String> = s.split('/').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(StructureError::InvalidName(s.to_string()));
        }
        Ok(Self(segments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let p: ElementPath = "forum/discussions/discussion".parse().unwrap();
        assert_eq!(p.len(), 3);
        assert_eq!(p.to_string(), "forum/discussions/discussion");
        assert!("forum//x".parse::<ElementPath>().is_err());
    }

    #[test]
    fn relative_segments() {
        let parent: ElementPath = "forum".parse().unwrap();
        let child: ElementPath = "forum/discussions/discussion".parse().unwrap();
        assert_eq!(child.relative_to(&parent).unwrap(), ["discussions", "discussion"]);
        assert!(parent.relative_to(&child).is_none());
        assert!(parent.relative_to(&parent).is_none());
    }
}

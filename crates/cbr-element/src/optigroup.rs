//! Optigroup alternatives
//!
//! An optigroup is a plugin slot: at most one of its registered
//! [`Alternative`]s fills it, picked by a [`Selector`] the owning task
//! supplies. Alternatives are tried in registration order and the first one
//! that applies wins.

use crate::context::ProcessContext;
use crate::element::Element;
use crate::error::StructureError;
use std::fmt::Debug;
use std::sync::Arc;

/// Picks the selector string for an optigroup, e.g. an activity's module name
pub type Selector = Arc<dyn Fn(&ProcessContext) -> Option<String> + Send + Sync>;

/// One candidate sub-structure of an optigroup
pub trait Alternative: Send + Sync + Debug {
    /// Registration name, unique within a set
    fn name(&self) -> &str;

    /// Whether this alternative serves `selector`
    fn applies(&self, selector: &str) -> bool {
        self.name() == selector
    }

    /// Fresh, unfilled element tree for this alternative
    ///
    /// # Errors
    /// Returns error if the alternative's tree is malformed
    fn element(&self) -> Result<Element, StructureError>;
}

/// Ordered collection of alternatives
#[derive(Debug, Default, Clone)]
pub struct AlternativeSet {
    items: Vec<Arc<dyn Alternative>>,
}

impl AlternativeSet {
    /// Empty set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an alternative
    ///
    /// # Errors
    /// [`StructureError::DuplicateAlternative`] if the name is taken
    pub fn register(&mut self, alternative: Arc<dyn Alternative>) -> Result<(), StructureError> {
        if self.contains(alternative.name()) {
            return Err(StructureError::DuplicateAlternative(
                alternative.name().to_string(),
            ));
        }
        self.items.push(alternative);
        Ok(())
    }

    /// Builder form of [`register`](Self::register)
    ///
    /// # Errors
    /// See [`register`](Self::register)
    pub fn with(mut self, alternative: Arc<dyn Alternative>) -> Result<Self, StructureError> {
        self.register(alternative)?;
        Ok(self)
    }

    /// First alternative that applies to `selector`
    #[must_use]
    pub fn select(&self, selector: &str) -> Option<&Arc<dyn Alternative>> {
        self.items.iter().find(|a| a.applies(selector))
    }

    /// Whether an alternative with this name is registered
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.items.iter().any(|a| a.name() == name)
    }

    /// Registered names in order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.items.iter().map(|a| a.name()).collect()
    }

    /// Number of alternatives
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the set is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Alternative>> {
        self.items.iter()
    }
}

/// Alternative backed by a tree-building closure
pub struct FnAlternative {
    name: String,
    build: Box<dyn Fn() -> Result<Element, StructureError> + Send + Sync>,
}

impl FnAlternative {
    /// Alternative `name` whose tree comes from `build`
    pub fn new<F>(name: impl Into<String>, build: F) -> Self
    where
        F: Fn() -> Result<Element, StructureError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            build: Box::new(build),
        }
    }
}

impl Debug for FnAlternative {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnAlternative").field("name", &self.name).finish()
    }
}

impl Alternative for FnAlternative {
    fn name(&self) -> &str {
        &self.name
    }

    fn element(&self) -> Result<Element, StructureError> {
        (self.build)()
    }
}

/// Selector always returning `value`
#[must_use]
pub fn fixed_selector(value: impl Into<String>) -> Selector {
    let value = value.into();
    Arc::new(move |_| Some(value.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alt(name: &str) -> Arc<dyn Alternative> {
        let owned = name.to_string();
        Arc::new(FnAlternative::new(name, move || {
            Element::composite(owned.clone(), vec![Element::scalar("value")])
        }))
    }

    #[test]
    fn first_match_wins() {
        let set = AlternativeSet::new().with(alt("topics")).unwrap().with(alt("weeks")).unwrap();
        assert_eq!(set.select("weeks").unwrap().name(), "weeks");
        assert!(set.select("grid").is_none());
        assert_eq!(set.names(), ["topics", "weeks"]);
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut set = AlternativeSet::new();
        set.register(alt("topics")).unwrap();
        assert_eq!(
            set.register(alt("topics")).unwrap_err(),
            StructureError::DuplicateAlternative("topics".to_string())
        );
    }
}

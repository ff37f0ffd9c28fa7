//! Flat source records
//!
//! A [`Record`] is one database row as the engine sees it: field name to
//! optional text. Values stay text end to end; typed reads are helpers for
//! callers that own the casting.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One row: field name → text value (`None` is SQL `NULL`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    fields: IndexMap<String, Option<String>>,
}

impl Record {
    /// Empty record
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set a text field
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl ToString) -> Self {
        self.fields.insert(field.into(), Some(value.to_string()));
        self
    }

    /// Builder: set a null field
    #[must_use]
    pub fn with_null(mut self, field: impl Into<String>) -> Self {
        self.fields.insert(field.into(), None);
        self
    }

    /// Set a field, keeping its original position if it already exists
    pub fn set(&mut self, field: impl Into<String>, value: Option<String>) {
        self.fields.insert(field.into(), value);
    }

    /// Text value; `None` when absent or null
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_deref())
    }

    /// Raw slot: `None` when absent, `Some(None)` when null
    #[must_use]
    pub fn slot(&self, field: &str) -> Option<Option<&str>> {
        self.fields.get(field).map(|v| v.as_deref())
    }

    /// Parse a field as an integer id
    #[must_use]
    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(|v| v.trim().parse().ok())
    }

    /// The `id` field
    #[inline]
    #[must_use]
    pub fn id(&self) -> Option<i64> {
        self.get_i64("id")
    }

    /// Whether the field is present (null counts as present)
    #[inline]
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Remove a field, preserving the order of the rest
    pub fn remove(&mut self, field: &str) -> Option<Option<String>> {
        self.fields.shift_remove(field)
    }

    /// Fields in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    /// Number of fields
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether there are no fields
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Option<String>)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, Option<String>)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_and_absent_differ() {
        let r = Record::new().with("name", "Intro").with_null("idnumber");
        assert_eq!(r.slot("name"), Some(Some("Intro")));
        assert_eq!(r.slot("idnumber"), Some(None));
        assert_eq!(r.slot("missing"), None);
        assert!(r.contains("idnumber"));
        assert_eq!(r.get("idnumber"), None);
    }

    #[test]
    fn typed_reads() {
        let r = Record::new().with("id", 10).with("course", " 4 ");
        assert_eq!(r.id(), Some(10));
        assert_eq!(r.get_i64("course"), Some(4));
    }

    #[test]
    fn remove_keeps_order() {
        let mut r = Record::new().with("a", 1).with("b", 2).with("c", 3);
        r.remove("b");
        let keys: Vec<_> = r.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["a", "c"]);
    }
}

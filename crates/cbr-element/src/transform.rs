//! Value transforms
//!
//! A transform rewrites a scalar's raw value before it is stored. Transforms
//! are looked up by `(parent element, field)` in a [`TransformRegistry`] once,
//! when a tree is bound, never per value.

use crate::context::ProcessContext;
use crate::error::StructureError;
use crate::record::Record;
use base64::Engine;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Boxed error raised by a transform
pub type TransformError = Box<dyn std::error::Error + Send + Sync>;

/// Input to a transform
#[derive(Debug)]
pub struct TransformInput<'a> {
    /// Name of the composite holding the scalar
    pub parent: &'a str,
    /// Scalar name
    pub field: &'a str,
    /// Raw value (`None` is null)
    pub raw: Option<&'a str>,
    /// Full record being filled, when the value comes from one
    pub record: Option<&'a Record>,
    /// Operation context
    pub ctx: &'a ProcessContext,
}

/// What to do with the transformed value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutcome {
    /// Store this value (`None` stores null)
    Store(Option<String>),
    /// Leave the scalar absent
    Suppress,
}

/// Rewrites a raw value before storage
pub trait ValueTransform: Send + Sync + Debug {
    /// Transform one value
    ///
    /// # Errors
    /// Transform-specific; the caller decides whether it is fatal
    fn apply(&self, input: &TransformInput<'_>) -> Result<TransformOutcome, TransformError>;
}

/// `(parent, field)` → transform
#[derive(Debug, Default, Clone)]
pub struct TransformRegistry {
    entries: HashMap<(String, String), Arc<dyn ValueTransform>>,
}

impl TransformRegistry {
    /// Empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transform for `parent/field`
    ///
    /// # Errors
    /// [`StructureError::DuplicateTransform`] if one is already registered
    pub fn register(
        &mut self,
        parent: &str,
        field: &str,
        transform: Arc<dyn ValueTransform>,
    ) -> Result<(), StructureError> {
        let key = (parent.to_string(), field.to_string());
        if self.entries.contains_key(&key) {
            return Err(StructureError::DuplicateTransform {
                parent: parent.to_string(),
                field: field.to_string(),
            });
        }
        self.entries.insert(key, transform);
        Ok(())
    }

    /// Transform for `parent/field`
    #[must_use]
    pub fn get(&self, parent: &str, field: &str) -> Option<Arc<dyn ValueTransform>> {
        self.entries
            .get(&(parent.to_string(), field.to_string()))
            .cloned()
    }

    /// Number of registered transforms
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Encodes values as standard base64
#[derive(Debug, Default, Clone, Copy)]
pub struct Base64Transform;

impl ValueTransform for Base64Transform {
    fn apply(&self, input: &TransformInput<'_>) -> Result<TransformOutcome, TransformError> {
        Ok(TransformOutcome::Store(
            input
                .raw
                .map(|v| base64::engine::general_purpose::STANDARD.encode(v)),
        ))
    }
}

/// Replacement rule for an anonymized field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anonymize {
    /// `<prefix><id>`
    Prefixed(String),
    /// `anon<id>@<domain>`
    Email(String),
    /// Empty string
    Blank,
    /// Null
    Null,
}

/// Replaces personal data when the context asks for anonymization
///
/// The record's `id` keeps replacements unique per row. Without
/// anonymization the raw value passes through untouched.
#[derive(Debug, Clone)]
pub struct AnonymizeTransform {
    rule: Anonymize,
}

impl AnonymizeTransform {
    /// Transform applying `rule`
    #[inline]
    #[must_use]
    pub fn new(rule: Anonymize) -> Self {
        Self { rule }
    }
}

impl ValueTransform for AnonymizeTransform {
    fn apply(&self, input: &TransformInput<'_>) -> Result<TransformOutcome, TransformError> {
        if !input.ctx.anonymize() {
            return Ok(TransformOutcome::Store(input.raw.map(str::to_string)));
        }
        let id = input.record.and_then(Record::id).unwrap_or_default();
        let value = match &self.rule {
            Anonymize::Prefixed(prefix) => Some(format!("{prefix}{id}")),
            Anonymize::Email(domain) => Some(format!("anon{id}@{domain}")),
            Anonymize::Blank => Some(String::new()),
            Anonymize::Null => None,
        };
        Ok(TransformOutcome::Store(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(raw: Option<&'a str>, record: Option<&'a Record>, ctx: &'a ProcessContext) -> TransformInput<'a> {
        TransformInput {
            parent: "user",
            field: "email",
            raw,
            record,
            ctx,
        }
    }

    #[test]
    fn registry_rejects_duplicates() {
        let mut reg = TransformRegistry::new();
        reg.register("page", "content", Arc::new(Base64Transform)).unwrap();
        let err = reg.register("page", "content", Arc::new(Base64Transform)).unwrap_err();
        assert!(matches!(err, StructureError::DuplicateTransform { .. }));
        assert!(reg.get("page", "content").is_some());
        assert!(reg.get("page", "intro").is_none());
    }

    #[test]
    fn base64_encodes() {
        let ctx = ProcessContext::detached();
        let out = Base64Transform.apply(&input(Some("hi"), None, &ctx)).unwrap();
        assert_eq!(out, TransformOutcome::Store(Some("aGk=".to_string())));
    }

    #[test]
    fn anonymize_only_when_enabled() {
        let record = Record::new().with("id", 7).with("email", "ada@example.org");
        let t = AnonymizeTransform::new(Anonymize::Email("doesntexist.invalid".to_string()));

        let plain = ProcessContext::detached();
        let out = t.apply(&input(Some("ada@example.org"), Some(&record), &plain)).unwrap();
        assert_eq!(out, TransformOutcome::Store(Some("ada@example.org".to_string())));

        let anon = ProcessContext::detached().with_anonymize(true);
        let out = t.apply(&input(Some("ada@example.org"), Some(&record), &anon)).unwrap();
        assert_eq!(out, TransformOutcome::Store(Some("anon7@doesntexist.invalid".to_string())));
    }
}

//! Per-operation processing context
//!
//! Everything an element tree needs to know about the running operation is
//! passed in explicitly through [`ProcessContext`]; trees hold no ambient
//! state and can be built and walked outside any operation.

/// Which way data is flowing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Site → archive
    Backup,
    /// Archive → site
    Restore,
}

/// Explicit context handed to `fill_values`, `process` and transforms
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessContext {
    operation_id: String,
    direction: Direction,
    anonymize: bool,
}

impl ProcessContext {
    /// Context for an operation
    #[must_use]
    pub fn new(operation_id: impl Into<String>, direction: Direction) -> Self {
        Self {
            operation_id: operation_id.into(),
            direction,
            anonymize: false,
        }
    }

    /// Context for standalone use (tests, tooling)
    #[must_use]
    pub fn detached() -> Self {
        Self::new("detached", Direction::Backup)
    }

    /// Enable or disable anonymizing transforms
    #[must_use]
    pub fn with_anonymize(mut self, anonymize: bool) -> Self {
        self.anonymize = anonymize;
        self
    }

    /// Id of the running operation
    #[inline]
    #[must_use]
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    /// Data flow direction
    #[inline]
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Whether personal data must be anonymized
    #[inline]
    #[must_use]
    pub fn anonymize(&self) -> bool {
        self.anonymize
    }
}

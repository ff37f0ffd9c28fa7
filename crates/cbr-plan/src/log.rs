//! Operation log returned to the caller

use serde::{Deserialize, Serialize};

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Progress notes
    Info,
    /// Recoverable problem
    Warning,
    /// Operation-ending problem
    Error,
}

/// One operator-facing log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Severity
    pub level: LogLevel,
    /// Taxonomy tag, e.g. `MissingFileError`
    pub kind: String,
    /// Task the entry belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    /// Human-readable text
    pub message: String,
}

/// Accumulated warnings and errors of one operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationLog {
    entries: Vec<LogEntry>,
}

impl OperationLog {
    /// Empty log
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry
    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    /// Append an info entry
    pub fn info(&mut self, task: Option<&str>, message: impl Into<String>) {
        self.push_level(LogLevel::Info, "Info", task, message.into());
    }

    /// Append a warning and emit it through `tracing`
    pub fn warn(&mut self, kind: &str, task: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(kind, task, "{message}");
        self.push_level(LogLevel::Warning, kind, task, message);
    }

    /// Append an error and emit it through `tracing`
    pub fn error(&mut self, kind: &str, task: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(kind, task, "{message}");
        self.push_level(LogLevel::Error, kind, task, message);
    }

    fn push_level(&mut self, level: LogLevel, kind: &str, task: Option<&str>, message: String) {
        self.entries.push(LogEntry {
            level,
            kind: kind.to_string(),
            task: task.map(str::to_string),
            message,
        });
    }

    /// All entries in order
    #[must_use]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Warning entries
    pub fn warnings(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(|e| e.level == LogLevel::Warning)
    }

    /// Error entries
    pub fn errors(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(|e| e.level == LogLevel::Error)
    }

    /// Number of entries tagged `kind` at any level
    #[must_use]
    pub fn count_kind(&self, kind: &str) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was logged
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Extend<LogEntry> for OperationLog {
    fn extend<T: IntoIterator<Item = LogEntry>>(&mut self, iter: T) {
        self.entries.extend(iter);
    }
}

impl IntoIterator for OperationLog {
    type Item = LogEntry;
    type IntoIter = std::vec::IntoIter<LogEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_and_kinds() {
        let mut log = OperationLog::new();
        log.info(None, "started");
        log.warn("MissingFileError", Some("activity_14"), "blob abc123 missing");
        log.error("ConflictError", None, "duplicate mapping");
        assert_eq!(log.len(), 3);
        assert_eq!(log.warnings().count(), 1);
        assert_eq!(log.errors().count(), 1);
        assert_eq!(log.count_kind("MissingFileError"), 1);
    }

    #[test]
    fn merging_logs_keeps_order() {
        let mut earlier = OperationLog::new();
        earlier.warn("PlanError", None, "activity_12 skipped");
        let mut later = OperationLog::new();
        later.error("Cancelled", None, "cancelled");

        earlier.extend(later);
        let kinds: Vec<_> = earlier.into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, ["PlanError", "Cancelled"]);
    }

    #[test]
    fn serializes_without_empty_task() {
        let mut log = OperationLog::new();
        log.warn("PlanError", None, "skipped");
        let json = serde_json::to_string(&log).unwrap();
        assert!(!json.contains("task"));
        assert!(json.contains("\"warning\""));
    }
}

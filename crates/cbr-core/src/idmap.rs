//! Old-id → new-id translation table
//!
//! Rows are keyed by `(backupid, itemtype, olditemid)` and written at most
//! once per key. Every operation works in its own `backupid` namespace, so
//! concurrent operations never see each other's rows.

use crate::ids::BackupId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Second write for a key with a different new id
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("id map conflict for {itemtype} {olditemid} in {backupid}: already {existing}, attempted {attempted}")]
pub struct ConflictError {
    /// Operation
    pub backupid: BackupId,
    /// Item type
    pub itemtype: String,
    /// Old id
    pub olditemid: i64,
    /// Recorded new id
    pub existing: i64,
    /// Rejected new id
    pub attempted: i64,
}

/// Stored mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdMapping {
    /// New id; `0` for annotations made during backup
    pub newitemid: i64,
    /// Free-form payload attached by the writer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<serde_json::Value>,
}

type Key = (BackupId, String, i64);

/// Concurrent id-map table shared by every operation of an engine
#[derive(Debug, Default)]
pub struct IdMapStore {
    rows: DashMap<Key, IdMapping>,
}

impl IdMapStore {
    /// Empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `olditemid → newitemid`
    ///
    /// Repeating an identical mapping is a no-op.
    ///
    /// # Errors
    /// [`ConflictError`] when the key already maps to another id
    pub fn record(&self, backupid: BackupId, itemtype: &str, olditemid: i64, newitemid: i64) -> Result<(), ConflictError> {
        self.record_with_info(backupid, itemtype, olditemid, newitemid, None)
    }

    /// [`record`](Self::record) with a payload
    ///
    /// The payload of the first write is kept.
    ///
    /// # Errors
    /// See [`record`](Self::record)
    pub fn record_with_info(
        &self,
        backupid: BackupId,
        itemtype: &str,
        olditemid: i64,
        newitemid: i64,
        info: Option<serde_json::Value>,
    ) -> Result<(), ConflictError> {
        match self.rows.entry((backupid, itemtype.to_string(), olditemid)) {
            Entry::Occupied(existing) if existing.get().newitemid == newitemid => Ok(()),
            Entry::Occupied(existing) => Err(ConflictError {
                backupid,
                itemtype: itemtype.to_string(),
                olditemid,
                existing: existing.get().newitemid,
                attempted: newitemid,
            }),
            Entry::Vacant(slot) => {
                tracing::trace!(%backupid, itemtype, olditemid, newitemid, "id mapped");
                slot.insert(IdMapping { newitemid, info });
                Ok(())
            }
        }
    }

    /// New id for `olditemid`; `None` is an ordinary outcome
    #[must_use]
    pub fn lookup(&self, backupid: BackupId, itemtype: &str, olditemid: i64) -> Option<i64> {
        self.get(backupid, itemtype, olditemid).map(|m| m.newitemid)
    }

    /// Full mapping row
    #[must_use]
    pub fn get(&self, backupid: BackupId, itemtype: &str, olditemid: i64) -> Option<IdMapping> {
        self.rows
            .get(&(backupid, itemtype.to_string(), olditemid))
            .map(|r| r.value().clone())
    }

    /// Note that `olditemid` is referenced (backup side, `newitemid = 0`)
    ///
    /// Annotating an id that already has a row keeps that row.
    pub fn annotate(&self, backupid: BackupId, itemtype: &str, olditemid: i64) {
        self.rows
            .entry((backupid, itemtype.to_string(), olditemid))
            .or_insert(IdMapping {
                newitemid: 0,
                info: None,
            });
    }

    /// Annotated or mapped old ids of one type, ascending
    #[must_use]
    pub fn annotated(&self, backupid: BackupId, itemtype: &str) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .rows
            .iter()
            .filter(|r| r.key().0 == backupid && r.key().1 == itemtype)
            .map(|r| r.key().2)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Drop every row of an operation, returning how many were removed
    pub fn purge(&self, backupid: BackupId) -> usize {
        let before = self.rows.len();
        self.rows.retain(|key, _| key.0 != backupid);
        let removed = before.saturating_sub(self.rows.len());
        tracing::debug!(%backupid, removed, "purged id map");
        removed
    }

    /// Rows of one operation
    #[must_use]
    pub fn count(&self, backupid: BackupId) -> usize {
        self.rows.iter().filter(|r| r.key().0 == backupid).count()
    }

    /// Rows across all operations
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the store is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_record_is_noop() {
        let store = IdMapStore::new();
        let id = BackupId::generate();
        store.record(id, "activity", 10, 55).unwrap();
        store.record(id, "activity", 10, 55).unwrap();
        assert_eq!(store.lookup(id, "activity", 10), Some(55));
        assert_eq!(store.count(id), 1);
    }

    #[test]
    fn conflicting_record_fails() {
        let store = IdMapStore::new();
        let id = BackupId::generate();
        store.record(id, "activity", 10, 55).unwrap();
        let err = store.record(id, "activity", 10, 56).unwrap_err();
        assert_eq!(err.existing, 55);
        assert_eq!(err.attempted, 56);
        assert_eq!(store.lookup(id, "activity", 10), Some(55));
    }

    #[test]
    fn not_found_is_none() {
        let store = IdMapStore::new();
        assert_eq!(store.lookup(BackupId::generate(), "course", 1), None);
    }

    #[test]
    fn annotations_and_purge() {
        let store = IdMapStore::new();
        let a = BackupId::generate();
        let b = BackupId::generate();
        store.annotate(a, "user", 7);
        store.annotate(a, "user", 3);
        store.annotate(a, "user", 7);
        store.record(b, "user", 7, 70).unwrap();
        assert_eq!(store.annotated(a, "user"), [3, 7]);
        assert_eq!(store.lookup(a, "user", 7), Some(0));

        assert_eq!(store.purge(a), 2);
        assert!(store.annotated(a, "user").is_empty());
        assert_eq!(store.lookup(b, "user", 7), Some(70));
    }

    #[test]
    fn info_kept_from_first_write() {
        let store = IdMapStore::new();
        let id = BackupId::generate();
        store
            .record_with_info(id, "user", 1, 9, Some(serde_json::json!({"matched": "username"})))
            .unwrap();
        store.record(id, "user", 1, 9).unwrap();
        assert_eq!(store.get(id, "user", 1).unwrap().info.unwrap()["matched"], "username");
    }
}

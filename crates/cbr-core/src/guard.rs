//! Operation-scoped resources
//!
//! Every operation owns its id-map rows, possibly a lock on the target
//! course, and possibly a staging directory. [`OperationGuard`] releases all
//! of them exactly once, whether the operation finished, failed or was
//! dropped half way.

use crate::error::BackupError;
use crate::idmap::IdMapStore;
use crate::ids::BackupId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tempfile::TempDir;

/// Course locks held by running restores
#[derive(Debug, Default)]
pub struct OperationLocks {
    held: DashMap<i64, BackupId>,
}

impl OperationLocks {
    /// No locks held
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock `course` for `owner`; re-locking by the same owner succeeds
    ///
    /// # Errors
    /// [`BackupError::Locked`] when another operation holds the course
    pub fn acquire(&self, course: i64, owner: BackupId) -> Result<(), BackupError> {
        match self.held.entry(course) {
            Entry::Occupied(e) if *e.get() != owner => Err(BackupError::Locked(course)),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(e) => {
                e.insert(owner);
                Ok(())
            }
        }
    }

    /// Release `course` if `owner` holds it
    pub fn release(&self, course: i64, owner: BackupId) {
        self.held.remove_if(&course, |_, holder| *holder == owner);
    }

    /// Whether `course` is locked
    #[must_use]
    pub fn is_locked(&self, course: i64) -> bool {
        self.held.contains_key(&course)
    }
}

/// Releases one operation's resources
#[derive(Debug)]
pub struct OperationGuard {
    backupid: BackupId,
    idmap: Arc<IdMapStore>,
    locks: Arc<OperationLocks>,
    locked: Vec<i64>,
    staging: Option<TempDir>,
    released: bool,
}

impl OperationGuard {
    /// Guard for `backupid`'s rows in `idmap`
    #[must_use]
    pub fn new(backupid: BackupId, idmap: Arc<IdMapStore>, locks: Arc<OperationLocks>) -> Self {
        Self {
            backupid,
            idmap,
            locks,
            locked: Vec::new(),
            staging: None,
            released: false,
        }
    }

    /// Operation id
    #[inline]
    #[must_use]
    pub fn backupid(&self) -> BackupId {
        self.backupid
    }

    /// Lock `course` until release
    ///
    /// # Errors
    /// [`BackupError::Locked`] when another operation holds it
    pub fn lock(&mut self, course: i64) -> Result<(), BackupError> {
        self.locks.acquire(course, self.backupid)?;
        if !self.locked.contains(&course) {
            self.locked.push(course);
        }
        Ok(())
    }

    /// Take ownership of a staging directory, removed on release
    pub fn stage(&mut self, dir: TempDir) -> &TempDir {
        self.staging.insert(dir)
    }

    /// Staging directory, if any
    #[must_use]
    pub fn staging(&self) -> Option<&TempDir> {
        self.staging.as_ref()
    }

    /// Release everything now
    pub fn destroy(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let purged = self.idmap.purge(self.backupid);
        for course in self.locked.drain(..) {
            self.locks.release(course, self.backupid);
        }
        // a staged archive renamed into place leaves nothing to remove
        if let Some(dir) = self.staging.take().filter(|d| d.path().exists()) {
            if let Err(e) = dir.close() {
                tracing::warn!(backupid = %self.backupid, error = %e, "failed to remove staging directory");
            }
        }
        tracing::debug!(backupid = %self.backupid, purged, "operation resources released");
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(idmap: &Arc<IdMapStore>, locks: &Arc<OperationLocks>) -> OperationGuard {
        OperationGuard::new(BackupId::generate(), idmap.clone(), locks.clone())
    }

    #[test]
    fn destroy_purges_and_unlocks() {
        let idmap = Arc::new(IdMapStore::new());
        let locks = Arc::new(OperationLocks::new());
        let mut g = guard(&idmap, &locks);
        idmap.record(g.backupid(), "activity", 10, 55).unwrap();
        g.lock(7).unwrap();
        let staged = g.stage(tempfile::tempdir().unwrap()).path().to_path_buf();

        g.destroy();
        assert!(idmap.is_empty());
        assert!(!locks.is_locked(7));
        assert!(!staged.exists());
    }

    #[test]
    fn drop_releases_too() {
        let idmap = Arc::new(IdMapStore::new());
        let locks = Arc::new(OperationLocks::new());
        {
            let mut g = guard(&idmap, &locks);
            idmap.record(g.backupid(), "user", 1, 2).unwrap();
            g.lock(3).unwrap();
        }
        assert!(idmap.is_empty());
        assert!(!locks.is_locked(3));
    }

    #[test]
    fn second_operation_cannot_lock() {
        let idmap = Arc::new(IdMapStore::new());
        let locks = Arc::new(OperationLocks::new());
        let mut first = guard(&idmap, &locks);
        let mut second = guard(&idmap, &locks);
        first.lock(4).unwrap();
        assert!(matches!(second.lock(4), Err(BackupError::Locked(4))));
        first.destroy();
        second.lock(4).unwrap();
    }
}

//! Path keyed lock table guarding concurrent create and delete operations which target the
//! same volume path within this process.
//!
//! Operations of the same class share a path (reference counted) whereas create-class and
//! delete-class operations exclude each other.
use std::{collections::HashMap, sync::Mutex};
use tracing::trace;

/// The operation requesting a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum OpKind {
    CreateVolume,
    CreateSnapshot,
    DeleteVolume,
    DeleteSnapshot,
}

impl OpKind {
    fn is_delete(self) -> bool {
        matches!(self, Self::DeleteVolume | Self::DeleteSnapshot)
    }
}

#[derive(Debug, Default)]
struct PathLockEntry {
    creates: usize,
    deletes: usize,
}

/// The lock table.
#[derive(Debug, Default)]
pub struct PathLock {
    paths: Mutex<HashMap<String, PathLockEntry>>,
}

impl PathLock {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take `path` for `kind`.
    /// Returns `None` when the path is held by an operation of the opposite class.
    pub fn try_acquire(&self, path: &str, kind: OpKind) -> Option<PathLockGuard<'_>> {
        let mut paths = self.paths.lock().unwrap_or_else(|p| p.into_inner());
        let entry = paths.entry(path.to_string()).or_default();
        if kind.is_delete() {
            if entry.creates > 0 {
                trace!(path, %kind, creates = entry.creates, "Path is held by a create");
                return None;
            }
            entry.deletes += 1;
        } else {
            if entry.deletes > 0 {
                trace!(path, %kind, deletes = entry.deletes, "Path is held by a delete");
                return None;
            }
            entry.creates += 1;
        }
        Some(PathLockGuard {
            lock: self,
            path: path.to_string(),
            kind,
        })
    }

    /// Number of holders of `path` for the class of `kind`.
    pub fn holders(&self, path: &str, kind: OpKind) -> usize {
        let paths = self.paths.lock().unwrap_or_else(|p| p.into_inner());
        match paths.get(path) {
            Some(entry) if kind.is_delete() => entry.deletes,
            Some(entry) => entry.creates,
            None => 0,
        }
    }

    /// Whether no path is held.
    pub fn is_empty(&self) -> bool {
        self.paths
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_empty()
    }

    fn release(&self, path: &str, kind: OpKind) {
        let mut paths = self.paths.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(entry) = paths.get_mut(path) {
            let count = match kind.is_delete() {
                true => &mut entry.deletes,
                false => &mut entry.creates,
            };
            *count = count.saturating_sub(1);
            if entry.creates == 0 && entry.deletes == 0 {
                paths.remove(path);
            }
        }
    }
}

/// Holds a path in the [`PathLock`] until dropped.
#[derive(Debug)]
pub struct PathLockGuard<'a> {
    lock: &'a PathLock,
    path: String,
    kind: OpKind,
}

impl Drop for PathLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(&self.path, self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = "/ibm/fs1/volume-store/.volumes/pvc-1";

    #[test]
    fn creates_share_the_path() {
        let lock = PathLock::new();
        let first = lock.try_acquire(PATH, OpKind::CreateVolume).unwrap();
        let second = lock.try_acquire(PATH, OpKind::CreateSnapshot).unwrap();
        assert_eq!(lock.holders(PATH, OpKind::CreateVolume), 2);
        drop(first);
        assert_eq!(lock.holders(PATH, OpKind::CreateVolume), 1);
        drop(second);
        assert!(lock.is_empty());
    }

    #[test]
    fn delete_refused_while_create_held() {
        let lock = PathLock::new();
        let create = lock.try_acquire(PATH, OpKind::CreateVolume).unwrap();
        assert!(lock.try_acquire(PATH, OpKind::DeleteVolume).is_none());
        assert!(lock.try_acquire("/other", OpKind::DeleteVolume).is_some());
        drop(create);
        assert!(lock.try_acquire(PATH, OpKind::DeleteVolume).is_some());
    }

    #[test]
    fn create_refused_while_delete_held() {
        let lock = PathLock::new();
        let delete = lock.try_acquire(PATH, OpKind::DeleteVolume).unwrap();
        let other_delete = lock.try_acquire(PATH, OpKind::DeleteSnapshot).unwrap();
        assert!(lock.try_acquire(PATH, OpKind::CreateVolume).is_none());
        drop(delete);
        assert!(lock.try_acquire(PATH, OpKind::CreateSnapshot).is_none());
        drop(other_delete);
        assert!(lock.is_empty());
        assert!(lock.try_acquire(PATH, OpKind::CreateVolume).is_some());
    }
}

//! Volume Concurrency Limiter Module
//!
//! In general the Cluster Orchestrator (CO) is responsible for ensuring that there is no more
//! than one call “in-flight” per volume at a given time. However, in some circumstances, the
//! CO MAY lose state (for example when the CO crashes and restarts), and MAY issue multiple
//! calls simultaneously for the same volume. The plugin SHOULD handle this as gracefully as
//! possible. The error code ABORTED MAY be returned by the plugin in this case (see the Error
//! Scheme section for details).
//!
//! Create requests are keyed by volume name and carry the requested size: a retry asking for
//! the same size joins the request already in flight, whereas a request for a different size
//! is aborted.
use crate::store::Store;
use snafu::Snafu;
use std::sync::Arc;
use tracing::trace;

/// Volume concurrency limiter error variants.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum Error {
    #[snafu(display(
        "Existing Csi operation is in progress for volume: {} with size {} ({} requested)",
        name,
        inflight_size,
        size
    ))]
    OperationInProgress {
        name: String,
        inflight_size: u64,
        size: u64,
    },
}

impl From<Error> for tonic::Status {
    fn from(error: Error) -> Self {
        match error {
            Error::OperationInProgress { .. } => tonic::Status::aborted(error.to_string()),
        }
    }
}

/// An in-flight create request for a volume name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InflightEntry {
    /// Requested size in bytes.
    pub size: u64,
    /// Number of requests currently sharing the reservation.
    pub holders: u32,
}

/// The store used to track in-flight create requests.
pub type InflightStore = dyn Store<String, InflightEntry>;

/// This Operation guard is used to ensure that all in-flight requests for a given volume name
/// agree on the requested size, by taking a reservation for the volume's name.
/// When the last holder is dropped the reservation is returned.
pub struct VolumeOpGuard {
    store: Arc<InflightStore>,
    name: String,
}

impl std::fmt::Debug for VolumeOpGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeOpGuard")
            .field("name", &self.name)
            .finish()
    }
}

impl VolumeOpGuard {
    /// Tries to take a volume reservation and returns error if an existing
    /// operation with a different size is already in progress.
    pub fn new(store: Arc<InflightStore>, name: &str, size: u64) -> Result<Self, Error> {
        let key = name.to_string();
        loop {
            let current = store.get(&key);
            let next = match current {
                Some(entry) if entry.size != size => {
                    trace!(
                        volume.name = name,
                        inflight_size = entry.size,
                        size,
                        "Operation already exists for volume"
                    );
                    return Err(Error::OperationInProgress {
                        name: key,
                        inflight_size: entry.size,
                        size,
                    });
                }
                Some(entry) => InflightEntry {
                    size,
                    holders: entry.holders + 1,
                },
                None => InflightEntry { size, holders: 1 },
            };
            if store.compare_and_swap(&key, current.as_ref(), Some(next)) {
                trace!(volume.name = name, holders = next.holders, "New reservation");
                return Ok(Self { store, name: key });
            }
        }
    }
}

impl Drop for VolumeOpGuard {
    fn drop(&mut self) {
        loop {
            let current = self.store.get(&self.name);
            let next = match current {
                None => return,
                Some(entry) if entry.holders <= 1 => None,
                Some(entry) => Some(InflightEntry {
                    holders: entry.holders - 1,
                    ..entry
                }),
            };
            if self
                .store
                .compare_and_swap(&self.name, current.as_ref(), next)
            {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    fn store() -> (Arc<MemStore<String, InflightEntry>>, Arc<InflightStore>) {
        let mem = Arc::new(MemStore::new());
        let dyn_store: Arc<InflightStore> = mem.clone();
        (mem, dyn_store)
    }

    #[test]
    fn different_size_is_aborted() {
        let (mem, store) = store();
        let guard = VolumeOpGuard::new(store.clone(), "pvc-1", 10).unwrap();
        let error = VolumeOpGuard::new(store.clone(), "pvc-1", 20).unwrap_err();
        assert_eq!(tonic::Status::from(error).code(), tonic::Code::Aborted);
        drop(guard);
        assert!(mem.is_empty());
        let _guard = VolumeOpGuard::new(store, "pvc-1", 20).unwrap();
    }

    #[test]
    fn same_size_shares_reservation() {
        let (mem, store) = store();
        let first = VolumeOpGuard::new(store.clone(), "pvc-1", 10).unwrap();
        let second = VolumeOpGuard::new(store.clone(), "pvc-1", 10).unwrap();
        assert_eq!(
            mem.get(&"pvc-1".to_string()),
            Some(InflightEntry { size: 10, holders: 2 })
        );
        drop(first);
        assert_eq!(mem.get(&"pvc-1".to_string()).map(|e| e.holders), Some(1));
        drop(second);
        assert!(mem.is_empty());
    }

    #[test]
    fn names_are_independent() {
        let (mem, store) = store();
        let _a = VolumeOpGuard::new(store.clone(), "pvc-a", 10).unwrap();
        let _b = VolumeOpGuard::new(store, "pvc-b", 20).unwrap();
        assert_eq!(mem.len(), 2);
    }
}

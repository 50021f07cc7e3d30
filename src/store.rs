use std::sync::{Arc, RwLock};

use crate::error::QueryError;
use crate::models::Snapshot;

/// Holds the most recently published snapshot.
///
/// The lock only guards the pointer: `publish` swaps one `Arc` for another and
/// readers clone the `Arc` out, so a reader holds either the old snapshot or
/// the new one for as long as it likes.
#[derive(Clone, Default)]
pub struct SnapshotStore {
    current: Arc<RwLock<Option<Arc<Snapshot>>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the visible snapshot, returning the one it replaced.
    pub fn publish(&self, snapshot: Arc<Snapshot>) -> Option<Arc<Snapshot>> {
        let mut guard = self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.replace(snapshot)
    }

    pub fn current(&self) -> Result<Arc<Snapshot>, QueryError> {
        let guard = self.current.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.clone().ok_or(QueryError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.current().is_ok()
    }
}

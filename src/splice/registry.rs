//! Active splice operations keyed by channel id.
//!
//! The registry stores whatever it is given; state-machine rules live in the
//! orchestrator. Reads never wait on a channel lock, so status queries stay
//! responsive while a backend call for that channel is in flight.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::SpliceOperation;

#[derive(Debug, Default)]
pub struct OperationRegistry {
    operations: DashMap<String, SpliceOperation>,
    channel_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, channel_id: &str) -> Option<SpliceOperation> {
        self.operations.get(channel_id).map(|op| op.value().clone())
    }

    pub fn set(&self, operation: SpliceOperation) -> Option<SpliceOperation> {
        self.operations
            .insert(operation.channel_id.clone(), operation)
    }

    /// Applies `f` to the stored operation, if any, and returns its result.
    pub fn update<R>(
        &self,
        channel_id: &str,
        f: impl FnOnce(&mut SpliceOperation) -> R,
    ) -> Option<R> {
        self.operations
            .get_mut(channel_id)
            .map(|mut op| f(op.value_mut()))
    }

    pub fn remove(&self, channel_id: &str) -> Option<SpliceOperation> {
        let removed = self.operations.remove(channel_id).map(|(_, op)| op);
        self.release_channel(channel_id);
        removed
    }

    /// Removes the operation only if `predicate` holds for it.
    pub fn remove_if(
        &self,
        channel_id: &str,
        predicate: impl FnOnce(&SpliceOperation) -> bool,
    ) -> Option<SpliceOperation> {
        let removed = self
            .operations
            .remove_if(channel_id, |_, op| predicate(op))
            .map(|(_, op)| op);
        if removed.is_some() {
            self.release_channel(channel_id);
        }
        removed
    }

    pub fn clear(&self) {
        self.operations.clear();
        self.channel_locks
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn snapshot(&self) -> Vec<SpliceOperation> {
        let mut ops: Vec<_> = self
            .operations
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        ops.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        ops
    }

    /// Forgets the channel's lock once nobody holds or waits on it.
    pub fn release_channel(&self, channel_id: &str) {
        self.channel_locks
            .remove_if(channel_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Number of channels with a live lock entry.
    pub fn tracked_locks(&self) -> usize {
        self.channel_locks.len()
    }

    /// Serializes callers working on the same channel. Different channels
    /// never contend.
    pub async fn lock_channel(&self, channel_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .channel_locks
            .entry(channel_id.to_string())
            .or_default()
            .value()
            .clone();
        lock.lock_owned().await
    }
}

//! Snapshot-backed checkpoints.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use tokio::sync::{Mutex, OwnedMutexGuard};

use bastion_core::{
    traits::{CheckpointStore, TransactionalStore},
    types::{Checkpoint, CheckpointId},
    Error, Result,
};

struct LiveCheckpoint<I> {
    operation_id: String,
    image: I,
    /// Store lease, released once the checkpoint is consumed.
    _lease: OwnedMutexGuard<()>,
}

/// Operation slot reserved while `create` runs; freed unless kept.
struct Reservation<'a> {
    slots: &'a DashMap<String, CheckpointId>,
    operation_id: &'a str,
    kept: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.kept {
            self.slots.remove(self.operation_id);
        }
    }
}

/// Checkpoint store over any [`TransactionalStore`].
///
/// Holds at most one live checkpoint per operation ID. A checkpoint is
/// consumed by either `restore` or `discard`; a second call for the same ID
/// fails.
///
/// A live checkpoint leases the whole store: `create` waits until the
/// previous checkpoint is consumed, so mutating operations on one store run
/// one at a time and a restore never discards another operation's
/// committed writes.
pub struct SnapshotCheckpointStore<T: TransactionalStore> {
    store: Arc<T>,
    lease: Arc<Mutex<()>>,
    live: DashMap<CheckpointId, LiveCheckpoint<T::Image>>,
    by_operation: DashMap<String, CheckpointId>,
}

impl<T: TransactionalStore> SnapshotCheckpointStore<T> {
    pub fn new(store: Arc<T>) -> Self {
        Self {
            store,
            lease: Arc::new(Mutex::new(())),
            live: DashMap::new(),
            by_operation: DashMap::new(),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<T> {
        &self.store
    }

    /// Checkpoint currently held by an operation, if any.
    pub fn checkpoint_for(&self, operation_id: &str) -> Option<CheckpointId> {
        self.by_operation.get(operation_id).map(|r| r.value().clone())
    }

    fn take(&self, id: &CheckpointId) -> Option<LiveCheckpoint<T::Image>> {
        let (_, live) = self.live.remove(id)?;
        self.by_operation.remove(&live.operation_id);
        Some(live)
    }
}

#[async_trait]
impl<T> CheckpointStore for SnapshotCheckpointStore<T>
where
    T: TransactionalStore + 'static,
{
    async fn create(&self, operation_id: &str) -> Result<Checkpoint> {
        let id = CheckpointId::new();

        // Reserve the operation slot before waiting, without holding the
        // shard lock across the await.
        match self.by_operation.entry(operation_id.to_string()) {
            Entry::Occupied(existing) => {
                return Err(Error::checkpoint(format!(
                    "operation {} already holds checkpoint {}",
                    operation_id,
                    existing.get()
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(id.clone());
            }
        }
        let mut reservation = Reservation {
            slots: &self.by_operation,
            operation_id,
            kept: false,
        };

        let lease = match self.lease.clone().try_lock_owned() {
            Ok(lease) => lease,
            Err(_) => {
                tracing::debug!(operation_id = operation_id, "Waiting for the live checkpoint to be consumed");
                self.lease.clone().lock_owned().await
            }
        };

        let image = self
            .store
            .begin()
            .await
            .map_err(|e| Error::checkpoint(format!("failed to capture snapshot: {}", e)))?;

        let checkpoint = Checkpoint {
            id: id.clone(),
            operation_id: operation_id.to_string(),
            created_at: Utc::now(),
            snapshot_ref: self.store.describe(&image),
        };

        self.live.insert(
            id,
            LiveCheckpoint {
                operation_id: operation_id.to_string(),
                image,
                _lease: lease,
            },
        );
        reservation.kept = true;

        tracing::debug!(
            operation_id = operation_id,
            checkpoint_id = %checkpoint.id,
            snapshot = %checkpoint.snapshot_ref,
            "Checkpoint created"
        );

        Ok(checkpoint)
    }

    async fn restore(&self, id: &CheckpointId) -> Result<()> {
        let live = self.take(id).ok_or_else(|| {
            Error::integrity(format!("checkpoint {} is unknown or already consumed", id))
        })?;

        self.store
            .rollback(live.image)
            .await
            .map_err(|e| Error::integrity(format!("rollback of checkpoint {} failed: {}", id, e)))?;

        tracing::info!(
            operation_id = %live.operation_id,
            checkpoint_id = %id,
            "Checkpoint restored"
        );
        Ok(())
    }

    async fn discard(&self, id: &CheckpointId) -> Result<()> {
        let live = self.take(id).ok_or_else(|| {
            Error::checkpoint(format!("checkpoint {} is unknown or already consumed", id))
        })?;

        self.store.commit(live.image).await?;
        tracing::debug!(operation_id = %live.operation_id, checkpoint_id = %id, "Checkpoint discarded");
        Ok(())
    }

    async fn live(&self) -> usize {
        self.live.len()
    }
}

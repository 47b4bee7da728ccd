//! Shared mutable state behind the envelope.
//!
//! Rate-limit counters and checkpoint storage are the only state shared
//! between concurrently running operations. Both are reached through the
//! traits below so that deployments can back them with external stores.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::types::{Checkpoint, CheckpointId};

// =============================================================================
// Rate Limit Counters
// =============================================================================

/// Fixed-window request counter.
///
/// Implementations must perform increment-and-check as one atomic step so
/// that concurrent callers cannot both observe a free slot.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Count one request against `key`.
    ///
    /// Returns `true` if allowed, `false` if the window is exhausted. A
    /// rejected request does not consume a slot.
    async fn check_and_increment(&self, key: &str, limit: u32, window: Duration) -> Result<bool>;

    /// Remaining quota for `key` in the current window.
    async fn remaining(&self, key: &str, limit: u32, window: Duration) -> Result<u32>;

    /// Reset the counter for a key (for admin/testing).
    async fn reset(&self, key: &str) -> Result<()>;
}

// =============================================================================
// Transactional State
// =============================================================================

/// A store whose state can be captured and reinstated.
///
/// `begin` returns an image of the current state; `rollback` reinstates it;
/// `commit` releases it. Images should be cheap (structural sharing, version
/// numbers) since one is taken for every mutating operation.
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    type Image: Send + Sync + 'static;

    async fn begin(&self) -> Result<Self::Image>;

    async fn commit(&self, image: Self::Image) -> Result<()>;

    async fn rollback(&self, image: Self::Image) -> Result<()>;

    /// Short description of an image for `Checkpoint::snapshot_ref`.
    fn describe(&self, image: &Self::Image) -> String;
}

// =============================================================================
// Checkpoints
// =============================================================================

/// Checkpoint lifecycle: created at operation start, restored on failure or
/// discarded on success.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Take a checkpoint for an operation. Fails if the operation already
    /// holds a live checkpoint.
    async fn create(&self, operation_id: &str) -> Result<Checkpoint>;

    /// Reinstate the checkpointed state and consume the checkpoint.
    async fn restore(&self, id: &CheckpointId) -> Result<()>;

    /// Drop the checkpoint without restoring it.
    async fn discard(&self, id: &CheckpointId) -> Result<()>;

    /// Number of live checkpoints.
    async fn live(&self) -> usize;
}

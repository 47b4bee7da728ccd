//! State and bookkeeping stores for Bastion.
//!
//! This crate provides the in-process backends the executor relies on:
//! versioned state with cheap snapshots, checkpoints over any
//! transactional store, fixed-window rate limiting and idempotency claims.

pub mod checkpoint;
pub mod idempotency;
pub mod rate_limit;
pub mod versioned;

pub use checkpoint::SnapshotCheckpointStore;
pub use idempotency::{IdempotencyClaim, IdempotencyLookup, IdempotencyRecord, IdempotencyStore};
pub use rate_limit::FixedWindowRateLimiter;
pub use versioned::{StateImage, VersionedStore};

/// SHA-256 hex digest of a JSON value's canonical serialization.
pub fn hash_payload(value: &serde_json::Value) -> String {
    IdempotencyStore::hash_payload(value)
}

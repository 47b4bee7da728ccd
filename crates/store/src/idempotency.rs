//! Idempotency claims with second-caller-blocks semantics.
//!
//! The first caller for a key receives a claim and runs the work. Callers
//! arriving while the claim is held wait for it to finish: a completed claim
//! is replayed to them, a released claim (the first caller failed) lets the
//! next waiter claim the key itself.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::{mapref::entry::Entry, DashMap};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tokio::time::Instant;

use bastion_core::types::composite_key;

/// Stored outcome of a committed operation.
#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub request_hash: String,
    pub operation_id: String,
    pub result: Value,
    completed_at: Instant,
}

enum Slot {
    InFlight {
        request_hash: String,
        done: watch::Receiver<()>,
    },
    Completed(IdempotencyRecord),
}

/// Result of [`IdempotencyStore::claim`].
pub enum IdempotencyLookup {
    /// The caller owns the key and must run the work.
    Claimed(IdempotencyClaim),
    /// A previous call with the same payload committed.
    Replay(IdempotencyRecord),
    /// The key was used with a different payload.
    Conflict,
}

impl std::fmt::Debug for IdempotencyLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Claimed(claim) => f.debug_tuple("Claimed").field(&claim.key).finish(),
            Self::Replay(record) => f.debug_tuple("Replay").field(record).finish(),
            Self::Conflict => f.write_str("Conflict"),
        }
    }
}

/// Exclusive hold on an idempotency key. Released on drop unless completed.
pub struct IdempotencyClaim {
    records: Arc<DashMap<String, Slot>>,
    key: String,
    request_hash: String,
    done: Option<watch::Sender<()>>,
    completed: bool,
}

impl IdempotencyClaim {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Store the committed result and wake waiters.
    pub fn complete(mut self, operation_id: &str, result: Value) {
        self.records.insert(
            self.key.clone(),
            Slot::Completed(IdempotencyRecord {
                request_hash: self.request_hash.clone(),
                operation_id: operation_id.to_string(),
                result,
                completed_at: Instant::now(),
            }),
        );
        self.completed = true;
        // Waiters observe the closed channel only after the record is visible.
        self.done.take();
    }
}

impl Drop for IdempotencyClaim {
    fn drop(&mut self) {
        if !self.completed {
            self.records.remove(&self.key);
            tracing::debug!(key = %self.key, "Idempotency claim released");
        }
        self.done.take();
    }
}

/// In-memory idempotency store.
///
/// With a TTL set, expired records are swept from `claim` at most once per
/// TTL.
#[derive(Default)]
pub struct IdempotencyStore {
    records: Arc<DashMap<String, Slot>>,
    ttl: Option<Duration>,
    last_sweep: Mutex<Option<Instant>>,
}

impl IdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget completed records after `ttl`.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn scope_key(scope: &str, key: &str) -> String {
        composite_key(&[scope, key])
    }

    pub fn hash_payload(value: &Value) -> String {
        let bytes = serde_json::to_vec(value).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    fn expired(&self, record: &IdempotencyRecord) -> bool {
        self.ttl
            .map_or(false, |ttl| record.completed_at.elapsed() >= ttl)
    }

    /// Claim `key` within `scope`, waiting while another caller holds it.
    pub async fn claim(&self, scope: &str, key: &str, request_hash: &str) -> IdempotencyLookup {
        self.sweep_if_due();
        let composite = Self::scope_key(scope, key);
        loop {
            let mut waiter = match self.records.entry(composite.clone()) {
                Entry::Vacant(slot) => {
                    let (tx, rx) = watch::channel(());
                    slot.insert(Slot::InFlight {
                        request_hash: request_hash.to_string(),
                        done: rx,
                    });
                    return IdempotencyLookup::Claimed(self.new_claim(composite, request_hash, tx));
                }
                Entry::Occupied(mut slot) => match slot.get() {
                    Slot::Completed(record) if self.expired(record) => {
                        let (tx, rx) = watch::channel(());
                        slot.insert(Slot::InFlight {
                            request_hash: request_hash.to_string(),
                            done: rx,
                        });
                        return IdempotencyLookup::Claimed(self.new_claim(composite, request_hash, tx));
                    }
                    Slot::Completed(record) => {
                        return if record.request_hash == request_hash {
                            IdempotencyLookup::Replay(record.clone())
                        } else {
                            IdempotencyLookup::Conflict
                        };
                    }
                    Slot::InFlight { request_hash: held, done } => {
                        if held != request_hash {
                            return IdempotencyLookup::Conflict;
                        }
                        done.clone()
                    }
                },
            };

            tracing::debug!(key = %composite, "Waiting for in-flight idempotent operation");
            // Resolves once the holder's sender is dropped.
            let _ = waiter.changed().await;
        }
    }

    fn new_claim(&self, key: String, request_hash: &str, done: watch::Sender<()>) -> IdempotencyClaim {
        IdempotencyClaim {
            records: self.records.clone(),
            key,
            request_hash: request_hash.to_string(),
            done: Some(done),
            completed: false,
        }
    }

    /// Drop expired completed records.
    pub fn cleanup(&self) {
        if self.ttl.is_none() {
            return;
        }
        self.records.retain(|_, slot| match slot {
            Slot::Completed(record) => !self.expired(record),
            Slot::InFlight { .. } => true,
        });
    }

    fn sweep_if_due(&self) {
        let Some(ttl) = self.ttl else {
            return;
        };
        let Ok(mut last) = self.last_sweep.lock() else {
            return;
        };
        match *last {
            Some(at) if at.elapsed() < ttl => {}
            Some(_) => {
                self.cleanup();
                *last = Some(Instant::now());
            }
            None => *last = Some(Instant::now()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

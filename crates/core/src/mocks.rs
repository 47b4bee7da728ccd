//! Mock implementations of core traits for testing.
//!
//! Shared by the unit and integration tests of every crate in the workspace.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::{
    traits::{AuditLogStore, CheckpointStore, EscalationChannel},
    types::{AuditRecord, Checkpoint, CheckpointId, Escalation},
    Error, Result,
};

// =============================================================================
// Recording Checkpoint Store
// =============================================================================

/// Checkpoint store that counts calls and can be told to fail.
#[derive(Default)]
pub struct RecordingCheckpointStore {
    live: Mutex<HashMap<CheckpointId, String>>,
    creates: AtomicUsize,
    restores: AtomicUsize,
    discards: AtomicUsize,
    fail_create: bool,
    fail_restore: bool,
}

impl RecordingCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `create` fails with a checkpoint error.
    pub fn failing_create() -> Self {
        Self {
            fail_create: true,
            ..Self::default()
        }
    }

    /// Every `restore` fails with an integrity error.
    pub fn failing_restore() -> Self {
        Self {
            fail_restore: true,
            ..Self::default()
        }
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn restores(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }

    pub fn discards(&self) -> usize {
        self.discards.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckpointStore for RecordingCheckpointStore {
    async fn create(&self, operation_id: &str) -> Result<Checkpoint> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_create {
            return Err(Error::checkpoint("snapshot backend unavailable"));
        }
        let checkpoint = Checkpoint {
            id: CheckpointId::new(),
            operation_id: operation_id.to_string(),
            created_at: Utc::now(),
            snapshot_ref: "mock".to_string(),
        };
        self.live
            .lock()
            .await
            .insert(checkpoint.id.clone(), operation_id.to_string());
        Ok(checkpoint)
    }

    async fn restore(&self, id: &CheckpointId) -> Result<()> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        self.live.lock().await.remove(id);
        if self.fail_restore {
            return Err(Error::integrity("snapshot corrupted"));
        }
        Ok(())
    }

    async fn discard(&self, id: &CheckpointId) -> Result<()> {
        self.discards.fetch_add(1, Ordering::SeqCst);
        self.live.lock().await.remove(id);
        Ok(())
    }

    async fn live(&self) -> usize {
        self.live.lock().await.len()
    }
}

// =============================================================================
// Failing Audit Store
// =============================================================================

/// Audit store whose every append fails.
#[derive(Default)]
pub struct FailingAuditStore {
    attempts: AtomicUsize,
}

impl FailingAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuditLogStore for FailingAuditStore {
    async fn append(&self, _record: AuditRecord) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(Error::storage("audit database unreachable"))
    }
}

// =============================================================================
// Escalation Channels
// =============================================================================

/// Escalation channel that keeps every notification.
#[derive(Default)]
pub struct RecordingEscalationChannel {
    escalations: Mutex<Vec<Escalation>>,
}

impl RecordingEscalationChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn escalations(&self) -> Vec<Escalation> {
        self.escalations.lock().await.clone()
    }
}

#[async_trait]
impl EscalationChannel for RecordingEscalationChannel {
    async fn notify(&self, escalation: &Escalation) -> Result<()> {
        self.escalations.lock().await.push(escalation.clone());
        Ok(())
    }
}

/// Escalation channel that always fails.
#[derive(Default)]
pub struct FailingEscalationChannel {
    attempts: AtomicUsize,
}

impl FailingEscalationChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EscalationChannel for FailingEscalationChannel {
    async fn notify(&self, _escalation: &Escalation) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(Error::Escalation("pager unreachable".to_string()))
    }
}

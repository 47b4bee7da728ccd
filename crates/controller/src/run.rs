//! Per-run bookkeeping: identity, lifecycle, checkpoint and idempotency holds.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use bastion_core::{
    types::{AuditContext, Checkpoint, CheckpointId, EscalationReason, OperationMeta, OperationState, SecurityContext},
    Classification, Error,
};
use bastion_governance::capture_snapshot;
use bastion_store::{hash_payload, IdempotencyClaim};

use crate::executor::{FailureReport, Shared};
use crate::state::StateTracker;

/// Who ran what; copied into every record a run produces.
#[derive(Debug, Clone)]
pub(crate) struct RunIdentity {
    pub operation_id: String,
    pub operation_type: String,
    pub principal: Option<String>,
    pub request_metadata: BTreeMap<String, String>,
    pub payload_digest: String,
}

impl RunIdentity {
    pub fn audit_context(&self, duration: Duration) -> AuditContext {
        AuditContext {
            request_metadata: self.request_metadata.clone(),
            payload_digest: Some(self.payload_digest.clone()),
            duration_ms: Some(duration.as_millis() as u64),
            ..Default::default()
        }
    }

    /// Context for failure records, with process state attached.
    pub fn failure_context(&self, duration: Duration, rolled_back: bool, escalated: bool) -> AuditContext {
        AuditContext {
            system: capture_snapshot(),
            rolled_back,
            escalated,
            ..self.audit_context(duration)
        }
    }
}

/// Live checkpoint of a run.
///
/// Dropping an armed guard (the execute future was dropped mid-flight)
/// restores the checkpoint on the current runtime and records the run as
/// cancelled; once `commit` is called, dropping it discards the checkpoint
/// instead. `disarm` hands the checkpoint back for a normal commit or
/// rollback.
pub(crate) struct CheckpointGuard {
    shared: Arc<Shared>,
    identity: RunIdentity,
    started: Instant,
    checkpoint: Option<Checkpoint>,
    committed: bool,
}

impl CheckpointGuard {
    pub fn new(shared: Arc<Shared>, identity: RunIdentity, started: Instant, checkpoint: Checkpoint) -> Self {
        Self {
            shared,
            identity,
            started,
            checkpoint: Some(checkpoint),
            committed: false,
        }
    }

    pub fn commit(&mut self) {
        self.committed = true;
    }

    pub fn id(&self) -> Option<&CheckpointId> {
        self.checkpoint.as_ref().map(|c| &c.id)
    }

    pub fn disarm(&mut self) -> Option<Checkpoint> {
        self.checkpoint.take()
    }
}

impl Drop for CheckpointGuard {
    fn drop(&mut self) {
        let Some(checkpoint) = self.checkpoint.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) if self.committed => {
                let shared = self.shared.clone();
                let operation_id = self.identity.operation_id.clone();
                handle.spawn(async move {
                    if let Err(e) = shared.checkpoints.discard(&checkpoint.id).await {
                        tracing::warn!(
                            operation_id = %operation_id,
                            checkpoint_id = %checkpoint.id,
                            error = %e,
                            "Failed to discard checkpoint of a dropped commit"
                        );
                    }
                });
            }
            Ok(handle) => {
                let shared = self.shared.clone();
                let identity = self.identity.clone();
                let started = self.started;
                handle.spawn(async move {
                    abandon(shared, identity, started, checkpoint).await;
                });
            }
            Err(_) => tracing::error!(
                operation_id = %self.identity.operation_id,
                checkpoint_id = %checkpoint.id,
                "Operation abandoned outside a Tokio runtime; checkpoint left live"
            ),
        }
    }
}

async fn abandon(shared: Arc<Shared>, identity: RunIdentity, started: Instant, checkpoint: Checkpoint) {
    tracing::warn!(
        operation_id = %identity.operation_id,
        checkpoint_id = %checkpoint.id,
        "Execution dropped mid-flight, restoring checkpoint"
    );

    let cause = Error::Cancelled("execution future dropped".to_string());
    let classification = shared.classification.classify(cause.kind());

    let rollback_error = shared
        .checkpoints
        .restore(&checkpoint.id)
        .await
        .err()
        .map(|e| e.to_string());

    let mut reasons = Vec::new();
    if classification == Classification::Critical {
        reasons.push(EscalationReason::Critical);
    }
    if let Some(detail) = &rollback_error {
        reasons.push(EscalationReason::RollbackFailed { detail: detail.clone() });
    }

    let terminal = if !reasons.is_empty() {
        OperationState::Escalated
    } else {
        OperationState::RolledBack
    };

    shared
        .report_failure(
            &identity,
            FailureReport {
                cause: &cause,
                classification,
                terminal,
                rolled_back: rollback_error.is_none(),
                reasons,
                duration: started.elapsed(),
                rollback_error: rollback_error.as_deref(),
            },
        )
        .await;
}

/// State of one `execute` call.
pub(crate) struct OperationRun {
    pub identity: RunIdentity,
    pub required_capabilities: BTreeSet<String>,
    pub idempotency_key: Option<String>,
    pub tracker: StateTracker,
    pub started: Instant,
    pub checkpoint: Option<CheckpointGuard>,
    pub claim: Option<IdempotencyClaim>,
    /// Set once the run committed, replayed, or had its failure handled.
    pub consumed: bool,
    /// Terminal state and classification of a handled failure.
    pub failure: Option<(OperationState, Classification, Option<String>)>,
}

impl OperationRun {
    pub fn new(meta: OperationMeta, ctx: Option<&SecurityContext>, payload: &serde_json::Value) -> Self {
        Self {
            identity: RunIdentity {
                operation_id: meta.id,
                operation_type: meta.operation_type,
                principal: ctx.map(|c| c.principal.clone()),
                request_metadata: ctx.map(|c| c.request_metadata.clone()).unwrap_or_default(),
                payload_digest: hash_payload(payload),
            },
            required_capabilities: meta.required_capabilities,
            idempotency_key: meta.idempotency_key,
            tracker: StateTracker::new(),
            started: Instant::now(),
            checkpoint: None,
            claim: None,
            consumed: false,
            failure: None,
        }
    }

    pub fn operation_id(&self) -> &str {
        &self.identity.operation_id
    }

    pub fn operation_type(&self) -> &str {
        &self.identity.operation_type
    }

    pub fn arm(&mut self, shared: Arc<Shared>, checkpoint: Checkpoint) {
        self.checkpoint = Some(CheckpointGuard::new(shared, self.identity.clone(), self.started, checkpoint));
    }

    /// ID of the live checkpoint, if the run holds one.
    pub fn checkpoint_id(&self) -> Option<CheckpointId> {
        self.checkpoint.as_ref().and_then(|g| g.id().cloned())
    }

    pub fn disarm(&mut self) -> Option<Checkpoint> {
        self.checkpoint.as_mut().and_then(|g| g.disarm())
    }

    /// Mark the live checkpoint as committed: a drop now discards it.
    pub fn commit_checkpoint(&mut self) {
        if let Some(guard) = self.checkpoint.as_mut() {
            guard.commit();
        }
    }
}

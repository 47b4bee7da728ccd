//! The protected operation executor.
//!
//! Every call walks the lifecycle
//! `Created → PreValidated → Authorized → CheckpointTaken → Executing →
//! ResultValidated → Committed`. Any error diverts the run into failure
//! handling, which restores the checkpoint, escalates when required, and
//! writes exactly one failure record.

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;

use bastion_core::{
    config::{EscalationConfig, ExecutorConfig},
    traits::{AccessGuard, AccessRequest, AuditSink, CheckpointStore, EscalationChannel, MetricsRecorder, Validator},
    types::{
        AuditError, AuditRecord, AuditStatus, Escalation, EscalationReason, MetricOutcome, MetricSample, Operation,
        composite_key, OperationState, SecurityContext,
    },
    Classification, ClassificationPolicy, Error, ErrorKind, OperationCatalog, OperationProfile, Result,
};
use bastion_store::{IdempotencyLookup, IdempotencyStore};

use crate::cancel::CancelSignal;
use crate::failure_window::FailureWindow;
use crate::run::{OperationRun, RunIdentity};

// =============================================================================
// Public Types
// =============================================================================

/// Per-call execution options.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Overrides the profile and configured deadlines.
    pub deadline: Option<Duration>,
    pub cancel: Option<CancelSignal>,
}

impl ExecuteOptions {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// A committed (or replayed) operation.
#[derive(Debug, Clone)]
pub struct Outcome<R> {
    pub operation_id: String,
    pub value: R,
    /// States the run passed through.
    pub states: Vec<OperationState>,
    /// The value was replayed from an earlier commit with the same
    /// idempotency key; no work ran.
    pub replayed: bool,
    pub duration: Duration,
}

/// The single error surfaced for a failed operation.
#[derive(Debug, thiserror::Error)]
#[error("operation {operation_id} ({operation_type}) ended {terminal_state}: {cause}")]
pub struct OperationFailed {
    pub operation_id: String,
    pub operation_type: String,
    pub classification: Classification,
    pub terminal_state: OperationState,
    pub states: Vec<OperationState>,
    #[source]
    pub cause: Error,
    /// Set when restoring the checkpoint failed as well.
    pub rollback_error: Option<String>,
}

impl OperationFailed {
    /// The executor never retries; callers may for retryable failures.
    pub fn is_retryable(&self) -> bool {
        self.classification == Classification::Retryable
    }

    pub fn kind(&self) -> ErrorKind {
        self.cause.kind()
    }
}

// =============================================================================
// Shared Components
// =============================================================================

/// Collaborators shared by an executor and the runs it spawns.
pub(crate) struct Shared {
    pub executor: ExecutorConfig,
    pub escalation_config: EscalationConfig,
    pub catalog: OperationCatalog,
    pub validator: Arc<dyn Validator>,
    pub guard: Arc<dyn AccessGuard>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub audit: Arc<dyn AuditSink>,
    pub metrics: Arc<dyn MetricsRecorder>,
    pub escalation: Arc<dyn EscalationChannel>,
    pub classification: ClassificationPolicy,
    pub idempotency: IdempotencyStore,
    pub failures: FailureWindow,
}

/// Everything needed to close out a failed run.
pub(crate) struct FailureReport<'a> {
    pub cause: &'a Error,
    pub classification: Classification,
    pub terminal: OperationState,
    pub rolled_back: bool,
    pub reasons: Vec<EscalationReason>,
    pub duration: Duration,
    pub rollback_error: Option<&'a str>,
}

impl Shared {
    /// Failure record, escalation, and metrics for a failed run.
    pub async fn report_failure(&self, identity: &RunIdentity, report: FailureReport<'_>) {
        let escalated = !report.reasons.is_empty();
        let error = AuditError::from_error(report.cause, report.classification);

        let mut record = AuditRecord::new(&identity.operation_id, &identity.operation_type, AuditStatus::Failure)
            .with_terminal_state(report.terminal)
            .with_context(identity.failure_context(report.duration, report.rolled_back, escalated))
            .with_error(error.clone());
        if let Some(principal) = &identity.principal {
            record = record.with_principal(principal);
        }
        if let Some(rollback_error) = report.rollback_error {
            record = record.with_detail(json!({ "rollback_error": rollback_error }));
        }
        let record_id = record.id.clone();
        self.audit.record(record).await;

        if escalated {
            let escalation = Escalation {
                operation_id: identity.operation_id.clone(),
                operation_type: identity.operation_type.clone(),
                principal: identity.principal.clone(),
                reasons: report.reasons,
                error,
                audit_record_id: record_id,
                timestamp: chrono::Utc::now(),
            };
            if let Err(e) = self.escalation.notify(&escalation).await {
                tracing::error!(
                    operation_id = %identity.operation_id,
                    error = %e,
                    "Escalation channel failed; escalation recorded in audit only"
                );
            }
        }

        self.observe(identity, report.duration, MetricOutcome::Failure).await;
    }

    /// Feed the metrics recorder; a threshold breach becomes a performance alert.
    pub async fn observe(&self, identity: &RunIdentity, duration: Duration, outcome: MetricOutcome) {
        let sample = MetricSample::new(&identity.operation_type, duration.as_millis() as u64, outcome);
        let Some(breach) = self.metrics.record(&sample) else {
            return;
        };

        let record = AuditRecord::new(&identity.operation_id, &identity.operation_type, AuditStatus::PerformanceAlert)
            .with_detail(json!({
                "exceeded": breach.exceeded,
                "snapshot": breach.snapshot,
            }));
        self.audit.record(record).await;
    }
}

// =============================================================================
// Executor
// =============================================================================

enum Driven<R> {
    Committed(R),
    Replayed(R),
}

/// Guarded unit-of-work executor.
///
/// Cheap to clone; clones share every collaborator.
#[derive(Clone)]
pub struct OperationExecutor {
    shared: Arc<Shared>,
}

impl OperationExecutor {
    pub(crate) fn from_shared(shared: Shared) -> Self {
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn catalog(&self) -> &OperationCatalog {
        &self.shared.catalog
    }

    /// Checkpoints currently held by in-flight operations.
    pub async fn live_checkpoints(&self) -> usize {
        self.shared.checkpoints.live().await
    }

    /// Run `work` for `operation` with default options.
    pub async fn execute<R, F, Fut>(
        &self,
        operation: Operation,
        ctx: Option<&SecurityContext>,
        work: F,
    ) -> std::result::Result<Outcome<R>, OperationFailed>
    where
        F: FnOnce(Value) -> Fut + Send,
        Fut: Future<Output = Result<R>> + Send,
        R: Serialize + DeserializeOwned + Send,
    {
        self.execute_with(operation, ctx, ExecuteOptions::default(), work).await
    }

    /// Run `work` for `operation` inside the protected envelope.
    ///
    /// `work` receives the payload and runs at most once. Its result is
    /// serialized for result validation and idempotent replay.
    pub async fn execute_with<R, F, Fut>(
        &self,
        operation: Operation,
        ctx: Option<&SecurityContext>,
        options: ExecuteOptions,
        work: F,
    ) -> std::result::Result<Outcome<R>, OperationFailed>
    where
        F: FnOnce(Value) -> Fut + Send,
        Fut: Future<Output = Result<R>> + Send,
        R: Serialize + DeserializeOwned + Send,
    {
        let (meta, payload) = operation.into_parts();
        let mut run = OperationRun::new(meta, ctx, &payload);

        tracing::debug!(
            operation_id = run.operation_id(),
            operation_type = run.operation_type(),
            principal = ctx.map(|c| c.principal.as_str()).unwrap_or("<none>"),
            "Executing operation"
        );

        match self.drive(&mut run, ctx, payload, options, work).await {
            Ok(driven) => {
                let (value, replayed) = match driven {
                    Driven::Committed(value) => (value, false),
                    Driven::Replayed(value) => (value, true),
                };
                Ok(Outcome {
                    operation_id: run.identity.operation_id.clone(),
                    value,
                    states: run.tracker.history().to_vec(),
                    replayed,
                    duration: run.started.elapsed(),
                })
            }
            Err(cause) => Err(self.handle_failure(&mut run, cause).await),
        }
    }

    fn profile_for(&self, operation_type: &str) -> Result<Cow<'_, OperationProfile>> {
        match self.shared.catalog.get(operation_type) {
            Some(profile) => Ok(Cow::Borrowed(profile)),
            None if self.shared.executor.require_registered_types => Err(Error::validation(
                "operation_type",
                format!("unknown operation type '{}'", operation_type),
            )),
            None => Ok(Cow::Owned(OperationProfile::new(operation_type))),
        }
    }

    async fn drive<R, F, Fut>(
        &self,
        run: &mut OperationRun,
        ctx: Option<&SecurityContext>,
        payload: Value,
        options: ExecuteOptions,
        work: F,
    ) -> Result<Driven<R>>
    where
        F: FnOnce(Value) -> Fut + Send,
        Fut: Future<Output = Result<R>> + Send,
        R: Serialize + DeserializeOwned + Send,
    {
        let shared = &self.shared;

        // Created → PreValidated
        let profile = self.profile_for(run.operation_type())?;
        let checked = shared.validator.validate(&payload, &profile.input_rules);
        if !checked.is_ok() {
            return Err(Error::Validation {
                fields: checked.into_errors(),
            });
        }
        run.tracker.advance(OperationState::PreValidated)?;

        // PreValidated → Authorized
        let mut capabilities = run.required_capabilities.clone();
        capabilities.extend(profile.required_capabilities.iter().cloned());
        let request = AccessRequest {
            operation_id: &run.identity.operation_id,
            operation_type: &run.identity.operation_type,
            capabilities: &capabilities,
            rate_limit: profile.rate_limit,
        };
        shared.guard.check(ctx, &request).await?;
        run.tracker.advance(OperationState::Authorized)?;

        let deadline = options
            .deadline
            .or_else(|| profile.deadline_ms.map(Duration::from_millis))
            .or_else(|| shared.executor.default_deadline_ms.map(Duration::from_millis))
            .map(|limit| (run.started + limit, limit));
        let cancel = options.cancel.as_ref();

        // Duplicate submissions wait here for the first one to finish.
        if let Some(key) = run.idempotency_key.clone() {
            let scope = composite_key(&[
                run.identity.principal.as_deref().unwrap_or("anonymous"),
                run.identity.operation_type.as_str(),
            ]);
            let lookup = guarded(
                shared.idempotency.claim(&scope, &key, &run.identity.payload_digest),
                deadline,
                cancel,
            )
            .await?;
            match lookup {
                IdempotencyLookup::Claimed(claim) => run.claim = Some(claim),
                IdempotencyLookup::Replay(record) => {
                    let value = serde_json::from_value(record.result)?;
                    run.consumed = true;
                    tracing::info!(
                        operation_id = run.operation_id(),
                        original_operation_id = %record.operation_id,
                        "Replaying idempotent result"
                    );

                    let mut audit = AuditRecord::new(run.operation_id(), run.operation_type(), AuditStatus::Success)
                        .with_context(run.identity.audit_context(run.started.elapsed()))
                        .with_detail(json!({
                            "replayed": true,
                            "original_operation_id": record.operation_id,
                        }));
                    if let Some(principal) = &run.identity.principal {
                        audit = audit.with_principal(principal);
                    }
                    shared.audit.record(audit).await;
                    return Ok(Driven::Replayed(value));
                }
                IdempotencyLookup::Conflict => {
                    return Err(Error::validation(
                        "idempotency_key",
                        "key was already used with a different payload",
                    ));
                }
            }
        }

        // Authorized → CheckpointTaken
        if profile.mutating {
            // Waits while another operation holds the store's checkpoint.
            let checkpoint = guarded(shared.checkpoints.create(run.operation_id()), deadline, cancel)
                .await?
                .map_err(|e| match e {
                    Error::Checkpoint(_) => e,
                    other => Error::checkpoint(other.to_string()),
                })?;
            run.arm(shared.clone(), checkpoint);
            run.tracker.advance(OperationState::CheckpointTaken)?;
        }

        // → Executing → ResultValidated
        run.tracker.advance(OperationState::Executing)?;
        let value = guarded(work(payload), deadline, cancel).await?.map_err(work_error)?;

        let result = serde_json::to_value(&value)?;
        let checked = shared.validator.validate_result(&result, &profile.result_rules);
        if !checked.is_ok() {
            return Err(Error::ResultValidation {
                fields: checked.into_errors(),
            });
        }
        run.tracker.advance(OperationState::ResultValidated)?;

        // ResultValidated → Committed. Mark the checkpoint committed and
        // complete the claim before any await: a caller dropped past this
        // point has committed.
        run.tracker.advance(OperationState::Committed)?;
        run.consumed = true;
        run.commit_checkpoint();
        if let Some(claim) = run.claim.take() {
            claim.complete(&run.identity.operation_id, result);
        }

        if let Some(id) = run.checkpoint_id() {
            if let Err(e) = shared.checkpoints.discard(&id).await {
                tracing::warn!(
                    operation_id = run.operation_id(),
                    checkpoint_id = %id,
                    error = %e,
                    "Failed to discard checkpoint after commit"
                );
            }
            run.disarm();
        }

        let duration = run.started.elapsed();
        let mut record = AuditRecord::new(run.operation_id(), run.operation_type(), AuditStatus::Success)
            .with_terminal_state(OperationState::Committed)
            .with_context(run.identity.audit_context(duration));
        if let Some(principal) = &run.identity.principal {
            record = record.with_principal(principal);
        }
        shared.audit.record(record).await;
        shared.observe(&run.identity, duration, MetricOutcome::Success).await;

        tracing::info!(
            operation_id = run.operation_id(),
            operation_type = run.operation_type(),
            duration_ms = duration.as_millis() as u64,
            "Operation committed"
        );
        Ok(Driven::Committed(value))
    }

    /// Close out a failed run. Runs its side effects at most once per run.
    pub(crate) async fn handle_failure(&self, run: &mut OperationRun, cause: Error) -> OperationFailed {
        let shared = &self.shared;
        let classification = shared.classification.classify(cause.kind());

        if run.consumed {
            let (terminal_state, classification, rollback_error) = run
                .failure
                .clone()
                .unwrap_or((run.tracker.current(), classification, None));
            return OperationFailed {
                operation_id: run.identity.operation_id.clone(),
                operation_type: run.identity.operation_type.clone(),
                classification,
                terminal_state,
                states: run.tracker.history().to_vec(),
                cause,
                rollback_error,
            };
        }
        run.consumed = true;
        run.tracker.fail();

        // Restore while the guard is still armed, so a drop mid-restore is
        // still covered.
        let mut rollback_error = None;
        if let Some(id) = run.checkpoint_id() {
            match shared.checkpoints.restore(&id).await {
                Ok(()) => {
                    if let Err(e) = run.tracker.advance(OperationState::RolledBack) {
                        tracing::error!(error = %e, "Rollback transition rejected");
                    }
                }
                Err(e) => rollback_error = Some(e.to_string()),
            }
            run.disarm();
        }

        let mut reasons = Vec::new();
        if classification == Classification::Critical {
            reasons.push(EscalationReason::Critical);
        }
        if let Some(detail) = &rollback_error {
            reasons.push(EscalationReason::RollbackFailed { detail: detail.clone() });
        }
        if let Some(threshold) = shared.escalation_config.failure_threshold {
            let failures = shared.failures.record(run.operation_type());
            if failures >= threshold {
                reasons.push(EscalationReason::FrequentFailures {
                    failures,
                    window_secs: shared.failures.window().as_secs(),
                });
            }
        }
        if !reasons.is_empty() {
            if let Err(e) = run.tracker.advance(OperationState::Escalated) {
                tracing::error!(error = %e, "Escalation transition rejected");
            }
        }

        let terminal_state = run.tracker.current();
        tracing::warn!(
            operation_id = run.operation_id(),
            operation_type = run.operation_type(),
            kind = %cause.kind(),
            classification = classification.as_str(),
            terminal_state = %terminal_state,
            "Operation failed: {}",
            cause
        );

        shared
            .report_failure(
                &run.identity,
                FailureReport {
                    cause: &cause,
                    classification,
                    terminal: terminal_state,
                    rolled_back: run.tracker.reached(OperationState::RolledBack),
                    reasons,
                    duration: run.started.elapsed(),
                    rollback_error: rollback_error.as_deref(),
                },
            )
            .await;

        // Releasing the claim lets a waiting duplicate proceed on its own.
        run.claim.take();
        run.failure = Some((terminal_state, classification, rollback_error.clone()));

        OperationFailed {
            operation_id: run.identity.operation_id.clone(),
            operation_type: run.identity.operation_type.clone(),
            classification,
            terminal_state,
            states: run.tracker.history().to_vec(),
            cause,
            rollback_error,
        }
    }
}

/// Errors returned by the unit of work surface as `Execution`, except the
/// kinds that must keep their meaning.
fn work_error(error: Error) -> Error {
    match error {
        Error::Execution(_) | Error::Integrity(_) | Error::SecurityViolation(_) => error,
        other => Error::execution(other.to_string()),
    }
}

/// Race `fut` against the deadline and the cancel signal.
async fn guarded<T>(
    fut: impl Future<Output = T>,
    deadline: Option<(Instant, Duration)>,
    cancel: Option<&CancelSignal>,
) -> Result<T> {
    let expired = async {
        match deadline {
            Some((at, _)) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };
    let cancelled = async {
        match cancel {
            Some(signal) => signal.cancelled().await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;
        _ = cancelled => Err(Error::Cancelled("operation cancelled by caller".to_string())),
        _ = expired => Err(Error::Timeout(format!(
            "deadline of {}ms exceeded",
            deadline.map(|(_, limit)| limit.as_millis()).unwrap_or_default()
        ))),
        value = fut => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExecutorBuilder;
    use bastion_core::mocks::{RecordingCheckpointStore, RecordingEscalationChannel};
    use bastion_governance::{InMemoryAuditStore, ResilientAuditSink};

    fn executor() -> (OperationExecutor, Arc<RecordingCheckpointStore>, Arc<InMemoryAuditStore>, Arc<RecordingEscalationChannel>) {
        let checkpoints = Arc::new(RecordingCheckpointStore::new());
        let audit = Arc::new(InMemoryAuditStore::new());
        let escalation = Arc::new(RecordingEscalationChannel::new());
        let executor = ExecutorBuilder::new()
            .with_catalog(OperationCatalog::new().with(OperationProfile::new("content.create")))
            .with_checkpoints(checkpoints.clone())
            .with_audit(Arc::new(ResilientAuditSink::new(audit.clone())))
            .with_escalation(escalation.clone())
            .build();
        (executor, checkpoints, audit, escalation)
    }

    #[test]
    fn test_work_error_mapping() {
        assert!(matches!(work_error(Error::storage("db down")), Error::Execution(_)));
        assert!(matches!(work_error(Error::integrity("torn")), Error::Integrity(_)));
        assert!(matches!(work_error(Error::security_violation("x")), Error::SecurityViolation(_)));
    }

    #[tokio::test]
    async fn test_failure_handling_is_idempotent() {
        let (executor, checkpoints, audit, escalation) = executor();
        let shared = executor.shared.clone();

        let op = Operation::new("content.create", json!({}));
        let (meta, payload) = op.into_parts();
        let mut run = OperationRun::new(meta, None, &payload);
        run.tracker.advance(OperationState::PreValidated).unwrap();
        run.tracker.advance(OperationState::Authorized).unwrap();
        let checkpoint = shared.checkpoints.create(run.operation_id()).await.unwrap();
        run.arm(shared.clone(), checkpoint);
        run.tracker.advance(OperationState::CheckpointTaken).unwrap();

        let first = executor
            .handle_failure(&mut run, Error::integrity("ledger mismatch"))
            .await;
        assert_eq!(first.terminal_state, OperationState::Escalated);
        assert_eq!(first.classification, Classification::Critical);

        let second = executor
            .handle_failure(&mut run, Error::integrity("ledger mismatch"))
            .await;
        assert_eq!(second.terminal_state, OperationState::Escalated);

        assert_eq!(checkpoints.restores(), 1);
        assert_eq!(escalation.escalations().await.len(), 1);
        assert_eq!(audit.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_type_rejected_before_authorization() {
        let (executor, checkpoints, audit, _) = executor();
        let err = executor
            .execute(Operation::new("content.delete", json!({})), None, |_| async { Ok(json!(null)) })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.terminal_state, OperationState::Failed);
        assert_eq!(err.states, vec![OperationState::Created, OperationState::Failed]);
        assert_eq!(checkpoints.creates(), 0);
        assert_eq!(audit.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guarded_deadline() {
        let deadline = Some((Instant::now() + Duration::from_millis(50), Duration::from_millis(50)));
        let err = guarded(tokio::time::sleep(Duration::from_secs(1)), deadline, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(guarded(async { 7 }, None, None).await.unwrap(), 7);
    }
}

//! Builder for OperationExecutor.

use std::sync::Arc;
use std::time::Duration;

use bastion_core::{
    traits::{
        AccessGuard, AuditSink, CheckpointStore, EscalationChannel, MetricsRecorder, RateLimitStore, TokenVerifier,
        Validator,
    },
    BastionConfig, OperationCatalog,
};
use bastion_governance::{
    CapabilityGuard, InMemoryAuditStore, LogEscalationChannel, RateLimitPolicy, ResilientAuditSink, RuleValidator,
    WindowedMetricsRecorder,
};
use bastion_store::{FixedWindowRateLimiter, IdempotencyStore, SnapshotCheckpointStore, VersionedStore};

use crate::executor::{OperationExecutor, Shared};
use crate::failure_window::FailureWindow;

/// Builder for constructing an OperationExecutor.
///
/// Every collaborator is optional; missing ones fall back to the in-process
/// implementations (in-memory audit, fixed-window limiter, snapshot
/// checkpoints over a fresh `VersionedStore`, log escalation).
pub struct ExecutorBuilder {
    config: BastionConfig,
    catalog: OperationCatalog,
    validator: Option<Arc<dyn Validator>>,
    guard: Option<Arc<dyn AccessGuard>>,
    rate_limiter: Option<Arc<dyn RateLimitStore>>,
    verifier: Option<Arc<dyn TokenVerifier>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    audit: Option<Arc<dyn AuditSink>>,
    metrics: Option<Arc<dyn MetricsRecorder>>,
    escalation: Option<Arc<dyn EscalationChannel>>,
    idempotency_ttl: Option<Duration>,
}

impl ExecutorBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: BastionConfig::default(),
            catalog: OperationCatalog::new(),
            validator: None,
            guard: None,
            rate_limiter: None,
            verifier: None,
            checkpoints: None,
            audit: None,
            metrics: None,
            escalation: None,
            idempotency_ttl: None,
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: BastionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the operation catalog.
    pub fn with_catalog(mut self, catalog: OperationCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Replace the access guard entirely. Rate limiter and verifier settings
    /// only apply to the default guard.
    pub fn with_guard(mut self, guard: Arc<dyn AccessGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimitStore>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    /// Checkpoint `state` through snapshots.
    pub fn with_state(mut self, state: Arc<VersionedStore>) -> Self {
        self.checkpoints = Some(Arc::new(SnapshotCheckpointStore::new(state)));
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_escalation(mut self, escalation: Arc<dyn EscalationChannel>) -> Self {
        self.escalation = Some(escalation);
        self
    }

    /// Forget committed idempotency results after `ttl`.
    pub fn with_idempotency_ttl(mut self, ttl: Duration) -> Self {
        self.idempotency_ttl = Some(ttl);
        self
    }

    /// Build the executor.
    pub fn build(self) -> OperationExecutor {
        let config = self.config;

        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(ResilientAuditSink::new(Arc::new(InMemoryAuditStore::new()))));

        let guard = match self.guard {
            Some(guard) => guard,
            None => {
                let limiter = self
                    .rate_limiter
                    .unwrap_or_else(|| Arc::new(FixedWindowRateLimiter::new()));
                let mut guard = CapabilityGuard::new(limiter, audit.clone())
                    .with_policy(RateLimitPolicy::from_config(&config.rate_limit))
                    .with_classification(config.classification.clone());
                if let Some(verifier) = self.verifier {
                    guard = guard.with_verifier(verifier);
                }
                Arc::new(guard)
            }
        };

        let checkpoints = self
            .checkpoints
            .unwrap_or_else(|| Arc::new(SnapshotCheckpointStore::new(Arc::new(VersionedStore::new()))));

        let mut idempotency = IdempotencyStore::new();
        if let Some(ttl) = self.idempotency_ttl {
            idempotency = idempotency.with_ttl(ttl);
        }

        tracing::debug!(
            operation_types = self.catalog.len(),
            require_registered_types = config.executor.require_registered_types,
            "Operation executor built"
        );

        OperationExecutor::from_shared(Shared {
            failures: FailureWindow::new(Duration::from_secs(config.escalation.failure_window_secs)),
            validator: self.validator.unwrap_or_else(|| Arc::new(RuleValidator::new())),
            guard,
            checkpoints,
            audit,
            metrics: self
                .metrics
                .unwrap_or_else(|| Arc::new(WindowedMetricsRecorder::new(config.metrics.clone()))),
            escalation: self.escalation.unwrap_or_else(|| Arc::new(LogEscalationChannel)),
            classification: config.classification.clone(),
            idempotency,
            catalog: self.catalog,
            executor: config.executor,
            escalation_config: config.escalation,
        })
    }
}

impl Default for ExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

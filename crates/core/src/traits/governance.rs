//! Guard traits: validation, access control, audit, metrics, escalation.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::types::{
    AuditRecord, Escalation, MetricSample, MetricSnapshot, RuleSet, SecurityContext,
    ThresholdBreach, ValidationResult,
};

// =============================================================================
// Validation
// =============================================================================

/// Structural and business validation of payloads and results.
pub trait Validator: Send + Sync {
    /// Validate an operation payload before execution.
    fn validate(&self, payload: &Value, rules: &RuleSet) -> ValidationResult;

    /// Validate the result of a unit of work.
    fn validate_result(&self, result: &Value, rules: &RuleSet) -> ValidationResult {
        self.validate(result, rules)
    }
}

// =============================================================================
// Access Control
// =============================================================================

/// What an operation asks of the access guard.
#[derive(Debug, Clone)]
pub struct AccessRequest<'a> {
    pub operation_id: &'a str,
    pub operation_type: &'a str,
    /// Union of operation and profile capabilities.
    pub capabilities: &'a BTreeSet<String>,
    /// Max requests per window; `None` disables the rate limit.
    pub rate_limit: Option<u32>,
}

/// Permission and rate-limit gate. Fails closed.
#[async_trait]
pub trait AccessGuard: Send + Sync {
    /// Returns `Ok(())` only if the context may run the operation now.
    ///
    /// Denials are audited before this returns.
    async fn check(&self, ctx: Option<&SecurityContext>, request: &AccessRequest<'_>) -> Result<()>;
}

/// Identity resolved from a credential.
#[derive(Debug, Clone, Default)]
pub struct VerifiedIdentity {
    pub principal: String,
    /// Capabilities the identity provider asserts for the token.
    pub capabilities: BTreeSet<String>,
}

/// Connector to an identity provider (IAM, OIDC, session table).
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Resolve a token to an identity; an unknown token is an error.
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity>;
}

// =============================================================================
// Audit
// =============================================================================

/// Infallible audit entry point used by the executor.
///
/// Internal failures are diverted to a fallback channel and never reach the
/// caller, so an audit outage cannot mask an operation's outcome.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord);
}

/// Append-only audit persistence. No update or delete exists.
#[async_trait]
pub trait AuditLogStore: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<()>;
}

// =============================================================================
// Metrics
// =============================================================================

/// Timing and outcome aggregation per operation type.
pub trait MetricsRecorder: Send + Sync {
    /// Record a sample. Returns a breach when the type enters the breached state.
    fn record(&self, sample: &MetricSample) -> Option<ThresholdBreach>;

    /// Whether the current window of `operation_type` exceeds a threshold.
    fn exceeds_threshold(&self, operation_type: &str) -> bool;

    /// Aggregate of the current window.
    fn snapshot(&self, operation_type: &str) -> MetricSnapshot;
}

// =============================================================================
// Escalation
// =============================================================================

/// Out-of-band notification channel for critical failures.
#[async_trait]
pub trait EscalationChannel: Send + Sync {
    async fn notify(&self, escalation: &Escalation) -> Result<()>;
}

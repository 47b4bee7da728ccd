use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::AuditError;

/// Why an operation was escalated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// The failure was classified critical.
    Critical,
    /// Restoring the checkpoint failed; state may be inconsistent.
    RollbackFailed { detail: String },
    /// The operation type failed too often within the configured window.
    FrequentFailures { failures: usize, window_secs: u64 },
}

/// Out-of-band notification about a failed operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub operation_id: String,
    pub operation_type: String,
    pub principal: Option<String>,
    pub reasons: Vec<EscalationReason>,
    pub error: AuditError,
    /// ID of the failure audit record.
    pub audit_record_id: String,
    pub timestamp: DateTime<Utc>,
}

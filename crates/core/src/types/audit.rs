use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::Classification;
use crate::error::{Error, ErrorKind};
use crate::types::OperationState;

/// Version of the persisted [`AuditRecord`] shape.
pub const AUDIT_SCHEMA_VERSION: u16 = 1;

/// Outcome recorded by an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Failure,
    /// Denied access, rate limit hit, or another security-relevant event.
    SecurityAlert,
    /// A metrics threshold was breached.
    PerformanceAlert,
}

/// Error details attached to failure records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AuditError {
    pub message: String,
    pub kind: ErrorKind,
    pub classification: Classification,
}

impl AuditError {
    pub fn from_error(error: &Error, classification: Classification) -> Self {
        Self {
            message: error.to_string(),
            kind: error.kind(),
            classification,
        }
    }
}

/// Process state captured when a record is written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SystemSnapshot {
    pub captured_at: Option<DateTime<Utc>>,
    pub pid: Option<u32>,
    /// Resident memory of the process, in bytes.
    pub rss_bytes: Option<u64>,
    /// Time since the process started, in milliseconds.
    pub uptime_ms: Option<u64>,
}

/// Context attached to every audit record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AuditContext {
    /// Request metadata from the security context.
    #[serde(default)]
    pub request_metadata: BTreeMap<String, String>,
    /// SHA-256 of the payload; the payload itself is never logged.
    pub payload_digest: Option<String>,
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub system: SystemSnapshot,
    #[serde(default)]
    pub rolled_back: bool,
    #[serde(default)]
    pub escalated: bool,
    /// Free-form details (denial reason, breached threshold).
    pub detail: Option<serde_json::Value>,
}

/// A single append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AuditRecord {
    pub schema_version: u16,
    /// Unique record ID.
    pub id: String,
    pub operation_id: String,
    pub operation_type: String,
    pub principal: Option<String>,
    pub status: AuditStatus,
    /// Terminal lifecycle state, when the record closes an operation.
    pub terminal_state: Option<OperationState>,
    #[serde(default)]
    pub context: AuditContext,
    pub timestamp: DateTime<Utc>,
    pub error: Option<AuditError>,
    /// Hash of the previous record (set by chaining stores).
    pub previous_hash: Option<String>,
    /// Hash of this record (set by chaining stores).
    pub hash: Option<String>,
}

impl AuditRecord {
    pub fn new(
        operation_id: impl Into<String>,
        operation_type: impl Into<String>,
        status: AuditStatus,
    ) -> Self {
        Self {
            schema_version: AUDIT_SCHEMA_VERSION,
            id: Uuid::new_v4().to_string(),
            operation_id: operation_id.into(),
            operation_type: operation_type.into(),
            principal: None,
            status,
            terminal_state: None,
            context: AuditContext::default(),
            timestamp: Utc::now(),
            error: None,
            previous_hash: None,
            hash: None,
        }
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn with_terminal_state(mut self, state: OperationState) -> Self {
        self.terminal_state = Some(state);
        self
    }

    pub fn with_context(mut self, context: AuditContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_error(mut self, error: AuditError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.context.detail = Some(detail);
        self
    }

    /// JSON Schema of the record, for downstream log processors.
    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(AuditRecord)
    }
}

/// Filter for querying audit stores.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub operation_id: Option<String>,
    pub operation_type: Option<String>,
    pub principal: Option<String>,
    pub status: Option<AuditStatus>,
    pub error_kind: Option<ErrorKind>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.operation_id.as_ref().map_or(true, |id| &record.operation_id == id)
            && self.operation_type.as_ref().map_or(true, |t| &record.operation_type == t)
            && self
                .principal
                .as_ref()
                .map_or(true, |p| record.principal.as_ref() == Some(p))
            && self.status.map_or(true, |s| record.status == s)
            && self
                .error_kind
                .map_or(true, |k| record.error.as_ref().map(|e| e.kind) == Some(k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serialization() {
        let err = Error::RateLimited { key: "k".into(), limit: 2, window_secs: 60 };
        let record = AuditRecord::new("op-1", "content.create", AuditStatus::Failure)
            .with_principal("alice")
            .with_terminal_state(OperationState::Failed)
            .with_error(AuditError::from_error(&err, Classification::Retryable));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["terminal_state"], "failed");
        assert_eq!(json["error"]["kind"], "rate_limit");
        assert_eq!(json["error"]["classification"], "retryable");
        assert_eq!(json["schema_version"], 1);

        let parsed: AuditRecord = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_filter() {
        let record = AuditRecord::new("op-1", "content.create", AuditStatus::Success).with_principal("alice");
        assert!(AuditFilter::default().matches(&record));
        assert!(AuditFilter { principal: Some("alice".into()), ..Default::default() }.matches(&record));
        assert!(!AuditFilter { status: Some(AuditStatus::Failure), ..Default::default() }.matches(&record));
        assert!(!AuditFilter { error_kind: Some(ErrorKind::Timeout), ..Default::default() }.matches(&record));
    }

    #[test]
    fn test_schema_names_fields() {
        let schema = serde_json::to_value(AuditRecord::json_schema()).unwrap();
        let props = &schema["properties"];
        assert!(props.get("operation_id").is_some());
        assert!(props.get("status").is_some());
    }
}

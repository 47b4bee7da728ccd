//! Error types for Bastion.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use thiserror::Error;

/// Result type alias using Bastion's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Field-level violations keyed by dot path.
pub type FieldErrors = BTreeMap<String, String>;

/// Core error type for Bastion.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Pre-check Errors
    // =========================================================================
    #[error("Validation failed: {}", describe_fields(.fields))]
    Validation { fields: FieldErrors },

    #[error("Authorization denied: {0}")]
    Authorization(String),

    #[error("Rate limit exceeded for {key}: {limit} per {window_secs}s")]
    RateLimited {
        key: String,
        limit: u32,
        window_secs: u64,
    },

    #[error("Security violation: {0}")]
    SecurityViolation(String),

    // =========================================================================
    // Execution Errors
    // =========================================================================
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Result validation failed: {}", describe_fields(.fields))]
    ResultValidation { fields: FieldErrors },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Integrity failure: {0}")]
    Integrity(String),

    #[error("Escalation failed: {0}")]
    Escalation(String),

    // =========================================================================
    // Infrastructure Errors
    // =========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn describe_fields(fields: &FieldErrors) -> String {
    fields
        .iter()
        .map(|(field, reason)| {
            if field.is_empty() {
                reason.clone()
            } else {
                format!("{}: {}", field, reason)
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Discriminant of [`Error`], used for classification and audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authorization,
    RateLimit,
    SecurityViolation,
    Checkpoint,
    Execution,
    ResultValidation,
    Timeout,
    Cancelled,
    Integrity,
    Escalation,
    Storage,
    Configuration,
    Internal,
}

impl ErrorKind {
    /// Stable snake_case label, used as a metrics/audit tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Authorization => "authorization",
            Self::RateLimit => "rate_limit",
            Self::SecurityViolation => "security_violation",
            Self::Checkpoint => "checkpoint",
            Self::Execution => "execution",
            Self::ResultValidation => "result_validation",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Integrity => "integrity",
            Self::Escalation => "escalation",
            Self::Storage => "storage",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Create a validation error for a single field.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut fields = FieldErrors::new();
        fields.insert(field.into(), reason.into());
        Self::Validation { fields }
    }

    /// Create an authorization error.
    pub fn authorization(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    /// Create a security violation error.
    pub fn security_violation(msg: impl Into<String>) -> Self {
        Self::SecurityViolation(msg.into())
    }

    /// Create a checkpoint error.
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    /// Create an execution error.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Create an integrity error.
    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Authorization(_) => ErrorKind::Authorization,
            Self::RateLimited { .. } => ErrorKind::RateLimit,
            Self::SecurityViolation(_) => ErrorKind::SecurityViolation,
            Self::Checkpoint(_) => ErrorKind::Checkpoint,
            Self::Execution(_) => ErrorKind::Execution,
            Self::ResultValidation { .. } => ErrorKind::ResultValidation,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Integrity(_) => ErrorKind::Integrity,
            Self::Escalation(_) => ErrorKind::Escalation,
            Self::Storage(_) | Self::Io(_) => ErrorKind::Storage,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Serialization(_) | Self::Internal(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Self::Configuration(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Configuration(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_lists_fields() {
        let mut fields = FieldErrors::new();
        fields.insert("title".into(), "is required".into());
        fields.insert("slug".into(), "must match pattern".into());
        let err = Error::Validation { fields };
        assert_eq!(
            err.to_string(),
            "Validation failed: slug: must match pattern; title: is required"
        );
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::authorization("x").kind(), ErrorKind::Authorization);
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert_eq!(Error::from(io).kind(), ErrorKind::Storage);
        assert_eq!(Error::from(anyhow::anyhow!("boom")).kind(), ErrorKind::Internal);
        assert_eq!(
            Error::RateLimited { key: "k".into(), limit: 1, window_secs: 60 }.kind(),
            ErrorKind::RateLimit
        );
    }
}

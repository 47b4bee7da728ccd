//! Failure classification.
//!
//! Maps an [`ErrorKind`] to the guidance a caller receives: whether a retry
//! makes sense, and whether the failure must be escalated out-of-band.

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Classification of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Transient; the caller may retry.
    Retryable,
    /// Security or integrity failure; always escalated.
    Critical,
    /// Permanent for this request; retrying will not help.
    Ordinary,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retryable => "retryable",
            Self::Critical => "critical",
            Self::Ordinary => "ordinary",
        }
    }
}

/// Error-kind to classification table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassificationPolicy {
    /// Per-kind overrides applied on top of the defaults.
    #[serde(default)]
    pub overrides: HashMap<ErrorKind, Classification>,
}

impl ClassificationPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the classification of one kind.
    pub fn with_override(mut self, kind: ErrorKind, classification: Classification) -> Self {
        self.overrides.insert(kind, classification);
        self
    }

    /// Classify an error kind.
    pub fn classify(&self, kind: ErrorKind) -> Classification {
        if let Some(c) = self.overrides.get(&kind) {
            return *c;
        }
        default_classification(kind)
    }
}

fn default_classification(kind: ErrorKind) -> Classification {
    match kind {
        ErrorKind::RateLimit | ErrorKind::Timeout | ErrorKind::Checkpoint | ErrorKind::Storage => {
            Classification::Retryable
        }
        ErrorKind::SecurityViolation | ErrorKind::Integrity => Classification::Critical,
        _ => Classification::Ordinary,
    }
}

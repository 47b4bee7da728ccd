use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Version of the persisted [`MetricSample`] shape.
pub const METRIC_SCHEMA_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MetricOutcome {
    Success,
    Failure,
}

impl MetricOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// One timed execution of an operation type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MetricSample {
    pub schema_version: u16,
    pub operation_type: String,
    pub duration_ms: u64,
    pub outcome: MetricOutcome,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    pub fn new(operation_type: impl Into<String>, duration_ms: u64, outcome: MetricOutcome) -> Self {
        Self {
            schema_version: METRIC_SCHEMA_VERSION,
            operation_type: operation_type.into(),
            duration_ms,
            outcome,
            timestamp: Utc::now(),
        }
    }

    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(MetricSample)
    }
}

/// Aggregate over the current window of one operation type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub samples: usize,
    pub failures: usize,
    pub avg_duration_ms: f64,
    pub max_duration_ms: u64,
}

impl MetricSnapshot {
    pub fn failure_rate(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.failures as f64 / self.samples as f64
        }
    }
}

/// Reported when an operation type enters the breached state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBreach {
    pub operation_type: String,
    pub snapshot: MetricSnapshot,
    /// Which thresholds were exceeded ("avg_duration_ms", "failure_rate").
    pub exceeded: Vec<String>,
}

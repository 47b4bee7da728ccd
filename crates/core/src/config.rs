use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::classify::ClassificationPolicy;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct BastionConfig {
    pub executor: ExecutorConfig,
    pub rate_limit: RateLimitConfig,
    pub metrics: MetricsConfig,
    pub audit: AuditConfig,
    pub escalation: EscalationConfig,
    pub classification: ClassificationPolicy,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Deadline applied when neither the call nor the profile sets one.
    pub default_deadline_ms: Option<u64>,
    /// Reject operation types missing from the catalog.
    pub require_registered_types: bool,
    /// YAML operation catalog to load at startup.
    pub catalog_path: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_deadline_ms: None,
            require_registered_types: true,
            catalog_path: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    /// Applied to profiles without their own limit; `None` means unlimited.
    pub default_max: Option<u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            default_max: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct MetricsConfig {
    pub window_secs: u64,
    /// Samples required before thresholds are evaluated.
    pub min_samples: usize,
    pub max_avg_duration_ms: Option<u64>,
    pub max_failure_rate: Option<f64>,
    /// Install the Prometheus recorder at startup.
    pub prometheus: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_secs: 300,
            min_samples: 10,
            max_avg_duration_ms: Some(5_000),
            max_failure_rate: Some(0.5),
            prometheus: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct AuditConfig {
    /// Hash-chained JSONL audit log; in-memory when unset.
    pub log_path: Option<String>,
    /// Local file for records the primary store rejected; stderr when unset.
    pub fallback_path: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct EscalationConfig {
    /// Escalate any failure once a type fails this often within the window.
    pub failure_threshold: Option<usize>,
    pub failure_window_secs: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            failure_threshold: None,
            failure_window_secs: 300,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
}

impl BastionConfig {
    /// Load from `config/` in the working directory plus the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load `default`, `{BASTION_ENV}` and `local` from `dir`, then the
    /// environment (`BASTION__RATE_LIMIT__WINDOW_SECS=30`).
    pub fn load_from(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        let env = std::env::var("BASTION_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(Config::try_from(&BastionConfig::default())?)
            .add_source(File::from(dir.join("default")).required(false))
            .add_source(File::from(dir.join(&env)).required(false))
            .add_source(File::from(dir.join("local")).required(false))
            .add_source(Environment::with_prefix("BASTION").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

//! Governance layer for Bastion.
//!
//! This crate provides:
//! - Rule-driven validation of payloads and results
//! - Capability and rate-limit access control
//! - Token verification connectors
//! - Append-only audit logging with a resilient fallback
//! - Windowed operation metrics and Prometheus export
//! - Escalation channels
//! - Tracing setup

pub mod audit;
pub mod escalation;
pub mod guard;
pub mod metrics;
pub mod rbac;
pub mod system;
pub mod tracing_layer;
pub mod validation;

pub use audit::{chain_hash, FallbackChannel, InMemoryAuditStore, JsonlAuditStore, ResilientAuditSink, GENESIS_HASH};
pub use escalation::{BroadcastEscalationChannel, LogEscalationChannel};
pub use guard::{CapabilityGuard, RateLimitPolicy};
pub use metrics::{setup_metrics_recorder, track_operation, WindowedMetricsRecorder};
pub use rbac::StaticTokenVerifier;
pub use system::capture_snapshot;
pub use tracing_layer::configure_tracing;
pub use validation::{CustomCheck, RuleValidator};

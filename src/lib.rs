//! Bastion - protected operation envelope.
//!
//! Runs a caller's unit of work inside validation, authorization,
//! checkpoint/rollback and audit. This crate re-exports the layers and
//! wires an [`OperationExecutor`] from a [`BastionConfig`].

use std::sync::Arc;

use anyhow::Context;

pub use bastion_controller::{
    CancelCoordinator, CancelSignal, ExecuteOptions, ExecutorBuilder, OperationExecutor, OperationFailed, Outcome,
};
pub use bastion_core::{
    BastionConfig, Classification, ClassificationPolicy, Error, ErrorKind, OperationCatalog, OperationProfile, Result,
};
pub use bastion_core::types;
pub use bastion_governance::{
    configure_tracing, FallbackChannel, InMemoryAuditStore, JsonlAuditStore, ResilientAuditSink, RuleValidator,
    StaticTokenVerifier,
};
pub use bastion_store::{SnapshotCheckpointStore, VersionedStore};

use bastion_core::traits::AuditLogStore;
use metrics_exporter_prometheus::PrometheusHandle;

/// An executor wired from configuration, plus the handles behind it.
pub struct Bastion {
    pub executor: OperationExecutor,
    /// State the executor checkpoints.
    pub state: Arc<VersionedStore>,
    /// Set when `metrics.prometheus` is enabled.
    pub prometheus: Option<PrometheusHandle>,
}

/// Install tracing as configured under `logging`.
pub fn init_tracing(config: &BastionConfig) -> anyhow::Result<()> {
    configure_tracing(config.logging.json)?;
    Ok(())
}

/// Build an executor over a fresh [`VersionedStore`].
pub async fn build_executor(config: &BastionConfig) -> anyhow::Result<Bastion> {
    build_executor_with_state(config, Arc::new(VersionedStore::new())).await
}

/// Build an executor checkpointing `state`.
///
/// Uses a hash-chained JSONL audit log when `audit.log_path` is set and
/// loads the catalog from `executor.catalog_path`.
pub async fn build_executor_with_state(config: &BastionConfig, state: Arc<VersionedStore>) -> anyhow::Result<Bastion> {
    let primary: Arc<dyn AuditLogStore> = match &config.audit.log_path {
        Some(path) => {
            tracing::info!(path = %path, "Opening JSONL audit log");
            Arc::new(
                JsonlAuditStore::open(path)
                    .await
                    .with_context(|| format!("failed to open audit log {}", path))?,
            )
        }
        None => {
            tracing::info!("Using in-memory audit store");
            Arc::new(InMemoryAuditStore::new())
        }
    };

    let fallback = match &config.audit.fallback_path {
        Some(path) => FallbackChannel::File(path.into()),
        None => FallbackChannel::Log,
    };
    let audit = Arc::new(ResilientAuditSink::new(primary).with_fallback(fallback));

    let catalog = match &config.executor.catalog_path {
        Some(path) => OperationCatalog::load(path).with_context(|| format!("failed to load catalog {}", path))?,
        None => OperationCatalog::new(),
    };
    tracing::info!(operation_types = catalog.len(), "Operation catalog loaded");

    let prometheus = if config.metrics.prometheus {
        Some(bastion_governance::setup_metrics_recorder()?)
    } else {
        None
    };

    let executor = ExecutorBuilder::new()
        .with_config(config.clone())
        .with_catalog(catalog)
        .with_state(state.clone())
        .with_audit(audit)
        .build();

    Ok(Bastion {
        executor,
        state,
        prometheus,
    })
}

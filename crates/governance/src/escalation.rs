//! Out-of-band escalation channels.

use async_trait::async_trait;
use tokio::sync::broadcast;

use bastion_core::{traits::EscalationChannel, types::Escalation, Error, Result};

// =============================================================================
// Broadcast Channel
// =============================================================================

/// Publishes escalations to in-process subscribers (pager bridge, dashboard).
///
/// Publishing with no live subscriber is an error so the caller can log that
/// nobody was told.
pub struct BroadcastEscalationChannel {
    tx: broadcast::Sender<Escalation>,
}

impl BroadcastEscalationChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Escalation> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEscalationChannel {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EscalationChannel for BroadcastEscalationChannel {
    async fn notify(&self, escalation: &Escalation) -> Result<()> {
        let delivered = self
            .tx
            .send(escalation.clone())
            .map_err(|_| Error::Escalation("no escalation subscribers".to_string()))?;
        tracing::debug!(
            operation_id = %escalation.operation_id,
            subscribers = delivered,
            "Escalation published"
        );
        Ok(())
    }
}

// =============================================================================
// Log Channel
// =============================================================================

/// Writes escalations to the log at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEscalationChannel;

#[async_trait]
impl EscalationChannel for LogEscalationChannel {
    async fn notify(&self, escalation: &Escalation) -> Result<()> {
        tracing::error!(
            target: "bastion::escalation",
            operation_id = %escalation.operation_id,
            operation_type = %escalation.operation_type,
            principal = escalation.principal.as_deref().unwrap_or("<none>"),
            audit_record_id = %escalation.audit_record_id,
            reasons = ?escalation.reasons,
            "ESCALATION: {}",
            escalation.error.message
        );
        Ok(())
    }
}

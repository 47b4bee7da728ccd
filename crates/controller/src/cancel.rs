//! Cooperative cancellation of an in-flight operation.

use tokio::sync::watch;

/// Cancellation signal that can be cloned and awaited.
///
/// Unlike a broadcast, a signal obtained after cancellation still observes it.
#[derive(Clone, Debug)]
pub struct CancelSignal {
    receiver: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait until cancellation is requested. Never resolves if the
    /// coordinator is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Owner side of a [`CancelSignal`].
#[derive(Debug)]
pub struct CancelCoordinator {
    sender: watch::Sender<bool>,
}

impl CancelCoordinator {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

impl Default for CancelCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_after_cancel_is_observed() {
        let coordinator = CancelCoordinator::new();
        coordinator.cancel();
        let signal = coordinator.signal();
        assert!(signal.is_cancelled());
        signal.cancelled().await;
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let coordinator = CancelCoordinator::new();
        let signal = coordinator.signal();
        let waiter = tokio::spawn(async move { signal.cancelled().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        coordinator.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_coordinator_never_cancels() {
        let coordinator = CancelCoordinator::new();
        let signal = coordinator.signal();
        drop(coordinator);
        assert!(tokio::time::timeout(Duration::from_secs(5), signal.cancelled()).await.is_err());
    }
}

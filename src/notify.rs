use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error)]
#[error("results notification failed: {0}")]
pub struct NotifyError(pub String);

/// Tells whoever caches aggregates for display that a poll's votes changed.
/// Best effort: the ledger stays the source of truth either way.
#[async_trait]
pub trait ResultsNotifier: Send + Sync {
    async fn results_changed(&self, poll_id: &str) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsChanged {
    pub poll_id: String,
}

/// In-process fan-out over a broadcast channel. Having no subscribers is fine.
pub struct BroadcastNotifier {
    sender: broadcast::Sender<ResultsChanged>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResultsChanged> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl ResultsNotifier for BroadcastNotifier {
    async fn results_changed(&self, poll_id: &str) -> Result<(), NotifyError> {
        // send only fails when nobody is listening
        let _ = self.sender.send(ResultsChanged {
            poll_id: poll_id.to_string(),
        });
        Ok(())
    }
}

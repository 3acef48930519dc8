use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::progress::ProgressMessage;

/// Identifier assigned to each subscriber of a thread's room.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberId(String);

impl SubscriberId {
    /// Generate a fresh subscriber id.
    #[must_use]
    pub fn fresh() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Abstraction over an output target that consumes progress messages.
///
/// A slow or failed delivery does not stall the pipeline: the broadcaster
/// bounds each delivery and drops the observer on failure.
#[async_trait]
pub trait Observer: Send + Sync {
    async fn notify(&self, message: ProgressMessage) -> Result<(), ObserverError>;
}

/// Delivery failure reported by an observer.
#[derive(Debug, Error, Diagnostic)]
pub enum ObserverError {
    /// The observer's receiving side is gone.
    #[error("observer channel closed")]
    #[diagnostic(code(draftloom::broadcast::closed))]
    Closed,
}

/// Observer backed by a tokio mpsc channel (useful for bridging progress
/// into a WebSocket handler or a test).
pub struct ChannelObserver {
    sender: mpsc::Sender<ProgressMessage>,
}

impl ChannelObserver {
    #[must_use]
    pub fn new(sender: mpsc::Sender<ProgressMessage>) -> Self {
        Self { sender }
    }

    /// Build an observer together with its receiving side.
    #[must_use]
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<ProgressMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl Observer for ChannelObserver {
    async fn notify(&self, message: ProgressMessage) -> Result<(), ObserverError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| ObserverError::Closed)
    }
}

use async_trait::async_trait;
use thiserror::Error;

/// Terminal result of a single push. The transport owns timeout detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Positive acknowledgment carrying the server's reply payload.
    Ok(String),
    /// Negative acknowledgment carrying the server's failure payload.
    Rejected(String),
    TimedOut,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistent bidirectional channel to the server.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// Sends `payload` under `event` and waits for an ack, a rejection, or a
    /// timeout.
    async fn push(&self, event: &str, payload: String) -> PushOutcome;
}

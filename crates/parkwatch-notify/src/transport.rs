//! Transport trait

use async_trait::async_trait;
use parkwatch_api::{NotificationChannel, NotificationPayload};
use thiserror::Error;

/// Errors from a delivery attempt
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Message rejected: {0}")]
    Rejected(String),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Transport misconfigured: {0}")]
    Config(String),

    #[error("No transport for channel {0:?}")]
    NoTransport(NotificationChannel),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// One delivery channel. Implementations are opaque to the dispatcher:
/// a call either delivers the message or reports why it did not.
#[async_trait]
pub trait Transport: Send + Sync {
    fn channel(&self) -> NotificationChannel;

    async fn deliver(&self, recipient: &str, payload: &NotificationPayload) -> TransportResult<()>;
}

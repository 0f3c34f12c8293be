//! Error types for the event/webhook core.

use thiserror::Error;

/// Errors raised by the event core.
#[derive(Debug, Error)]
pub enum EventError {
    /// Inbound webhook rejected before any write. Never retried by us; the
    /// provider's own retry mechanism may resend.
    #[error("webhook signature verification failed")]
    SignatureInvalid,

    /// The durable queue could not accept a job. The webhook row already
    /// exists at this point, so the recovery sweep can re-enqueue it.
    #[error("job queue unavailable: {0}")]
    QueueUnavailable(String),

    /// A domain processor failed while applying a webhook's effect. Recorded
    /// on the webhook row and re-thrown so the queue schedules a retry.
    #[error("processor failure: {0}")]
    Processor(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl From<sqlx::Error> for EventError {
    fn from(e: sqlx::Error) -> Self {
        EventError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for EventError {
    fn from(e: serde_json::Error) -> Self {
        EventError::InvalidPayload(e.to_string())
    }
}

pub type EventResult<T> = Result<T, EventError>;

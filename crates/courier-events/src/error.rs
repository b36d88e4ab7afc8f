//! Event bus error types.

use std::time::Duration;

use courier_storage::StorageError;
use thiserror::Error;

/// Failure inside a single subscriber.
///
/// Asynchronous subscribers never surface this to the emitter; it is logged
/// and isolated. A synchronous subscriber failing aborts the dispatch and is
/// wrapped in [`BusError::Handler`].
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler reported a failure.
    #[error("{0}")]
    Failed(String),

    /// The handler did not finish within the configured timeout.
    #[error("handler timed out after {0:?}")]
    Timeout(Duration),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Create a failure from any displayable error.
    pub fn failed(message: impl std::fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Failed(format!("invalid payload: {e}"))
    }
}

/// Errors returned by the event bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// A subscriber descriptor was rejected at registration time.
    #[error("invalid subscriber registration: {0}")]
    Registration(String),

    /// An emitted event name is malformed.
    #[error("invalid event name: {0}")]
    InvalidEvent(String),

    /// The delivery transport (durable queue) could not be reached.
    #[error("event delivery failed: {0}")]
    Delivery(#[from] StorageError),

    /// A synchronous subscriber failed and aborted the dispatch.
    #[error("subscriber '{subscriber}' failed on '{event}': {source}")]
    Handler {
        /// Identifier of the failing subscriber.
        subscriber: String,
        /// Event being dispatched.
        event: String,
        /// Underlying handler failure.
        #[source]
        source: HandlerError,
    },

    /// Another offline consumer holds the lock for this queue.
    #[error("offline consumer '{0}' is already running")]
    ConsumerBusy(String),
}

impl BusError {
    /// Whether the error is a transport failure the caller may retry.
    #[must_use]
    pub fn is_delivery(&self) -> bool {
        matches!(self, Self::Delivery(_))
    }
}

/// Result type for event bus operations.
pub type BusResult<T> = Result<T, BusError>;

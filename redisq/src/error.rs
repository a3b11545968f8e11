use std::time::Duration;

use thiserror::Error;

use crate::ItemId;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors surfaced by the queue engine and its backends
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    /// Wire record is missing `id` or `payload`
    #[error("Invalid item: {0}")]
    InvalidItem(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A handler returned without settling its claimed item
    #[error("Dangling item: {id} was neither acknowledged nor failed by its handler")]
    DanglingItem { id: ItemId },

    #[error("Processing of {id} exceeded {timeout:?}")]
    ProcessingTimeout { id: ItemId, timeout: Duration },

    #[error("No item became available within {0:?}")]
    WaitTimeout(Duration),

    #[error("Item {id} has already been settled")]
    AlreadySettled { id: ItemId },

    /// The claim was reclaimed (and possibly re-delivered) before it was settled
    #[error("Claim on {id} was lost to the reclaimer")]
    ClaimLost { id: ItemId },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Engine shutdown")]
    Shutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Store failures are transient from the engine's point of view
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        Self::Store(err.to_string())
    }
}

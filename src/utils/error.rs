//! Error types for the message store.
//!
//! Only persistence failures and malformed arguments are errors. A missing
//! record or a transition that does not fit the record's lifecycle state is
//! reported through [`Transition`](crate::store::Transition) instead, so a
//! publisher loop racing the housekeeper never sees an `Err` for it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The embedded engine failed (I/O error, corruption reported by sled).
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// A persisted row could not be encoded or decoded.
    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Persisted state violates a structural invariant.
    #[error("corrupt store: {0}")]
    Corrupt(String),

    #[error("topic must be non-empty")]
    InvalidTopic,

    #[error("invalid qos level {0}, expected 0, 1 or 2")]
    InvalidQos(u8),

    #[error("invalid store name {0:?}")]
    InvalidName(String),

    #[error("capacity must be at least 1")]
    InvalidCapacity,

    /// The store was closed; persisted data is untouched.
    #[error("message store {0:?} is closed")]
    Closed(String),

    /// A blocking store task panicked or was cancelled before finishing.
    #[error("store task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Task(err.to_string())
    }
}

impl From<sled::transaction::TransactionError<StoreError>> for StoreError {
    fn from(err: sled::transaction::TransactionError<StoreError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(e) => StoreError::Storage(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

//! Error types for the Fleetscale state store.
//!
//! The redb error family collapses into two variants: `Open` for anything
//! that prevents the database from coming up, `Storage` for everything
//! after that. Decode failures keep the offending key so a corrupt row can
//! be located and deleted by hand.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open state store: {0}")]
    Open(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("failed to encode record: {0}")]
    Encode(String),

    #[error("corrupt record at key {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid cluster {0}")]
    InvalidCluster(String),
}

impl From<redb::DatabaseError> for StateError {
    fn from(e: redb::DatabaseError) -> Self {
        StateError::Open(e.to_string())
    }
}

impl From<redb::TransactionError> for StateError {
    fn from(e: redb::TransactionError) -> Self {
        StateError::Storage(e.to_string())
    }
}

impl From<redb::TableError> for StateError {
    fn from(e: redb::TableError) -> Self {
        StateError::Storage(e.to_string())
    }
}

impl From<redb::StorageError> for StateError {
    fn from(e: redb::StorageError) -> Self {
        StateError::Storage(e.to_string())
    }
}

impl From<redb::CommitError> for StateError {
    fn from(e: redb::CommitError) -> Self {
        StateError::Storage(e.to_string())
    }
}

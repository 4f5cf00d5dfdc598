//! Error types and result types for query building and execution.
//!
//! Argument-shape and operator errors are raised locally, before any round-trip to the
//! store. Failures reported by the store itself are wrapped in [`QueryError::Store`] and
//! passed through without retry. Use [`QueryResult<T>`] as the return type for fallible operations.

use std::error::Error as StdError;

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur while building or executing a query.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The comparison or array operator token is not part of the operator grammar.
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),
    /// The call shape is ambiguous or malformed. The message names the offending arguments.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// The underlying store or driver reported a failure.
    #[error("Store error: {0}")]
    Store(#[source] Box<dyn StdError + Send + Sync>),
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during backend initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
}

impl QueryError {
    /// Wraps a store-side failure, keeping the original error as the source.
    pub fn store(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        QueryError::Store(err.into())
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        QueryError::InvalidArgument(message.into())
    }
}

/// A specialized `Result` type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

impl From<BsonError> for QueryError {
    fn from(err: BsonError) -> Self {
        QueryError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for QueryError {
    fn from(err: SerdeJsonError) -> Self {
        QueryError::Serialization(err.to_string())
    }
}

//! Store Error Types
//!
//! This module defines the error type shared by every store backend,
//! providing clear error handling for connection, timeout, query, and
//! record-shape failures. Orchestration-level errors live in
//! `services::error`.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Store operation errors
///
/// Each variant names the backend (`"turso"`, `"surreal"`, `"memory"`, ...)
/// so log lines and fallback decisions can tell the stores apart.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Store cannot be reached (offline, closed, not initialized)
    #[error("{backend} store unavailable: {reason}")]
    Unavailable {
        backend: &'static str,
        reason: String,
    },

    /// Operation did not complete within the configured timeout
    #[error("{backend} store timed out during {operation} after {elapsed_ms}ms")]
    Timeout {
        backend: &'static str,
        operation: String,
        elapsed_ms: u64,
    },

    /// Query or statement failed
    #[error("{backend} query failed: {context}")]
    Query {
        backend: &'static str,
        context: String,
    },

    /// Referential or uniqueness constraint rejected the write
    #[error("{backend} constraint violation: {context}")]
    Constraint {
        backend: &'static str,
        context: String,
    },

    /// Record is missing its identifier or has an unusable shape
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// JSON (de)serialization failed
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// libsql operation error
    #[error("libsql operation failed: {0}")]
    Libsql(#[from] libsql::Error),

    /// SurrealDB operation error
    #[error("SurrealDB operation failed: {0}")]
    Surreal(#[from] surrealdb::Error),
}

impl StoreError {
    /// Create an unavailable error
    pub fn unavailable(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            backend,
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(backend: &'static str, operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            backend,
            operation: operation.into(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Create a query error with context
    pub fn query(backend: &'static str, context: impl Into<String>) -> Self {
        Self::Query {
            backend,
            context: context.into(),
        }
    }

    /// Create a constraint violation error
    pub fn constraint(backend: &'static str, context: impl Into<String>) -> Self {
        Self::Constraint {
            backend,
            context: context.into(),
        }
    }

    /// Create an invalid record error
    pub fn invalid_record(msg: impl Into<String>) -> Self {
        Self::InvalidRecord(msg.into())
    }

    /// Whether retrying later could succeed (connectivity, not data, problems)
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Run a store future under a deadline, mapping expiry to [`StoreError::Timeout`]
pub(crate) async fn with_timeout<T, F>(
    backend: &'static str,
    operation: &str,
    limit: Duration,
    fut: F,
) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::timeout(backend, operation, limit)),
    }
}

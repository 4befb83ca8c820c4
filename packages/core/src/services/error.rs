//! Service Layer Error Types
//!
//! This module defines error types for orchestration-level operations.
//! Only fatal outcomes surface here: mirror failures and exhausted read
//! fallbacks are recovered inside `DbService` and never become errors.

use crate::db::StoreError;
use crate::models::EntityKind;
use thiserror::Error;

/// Sync orchestration errors
#[derive(Error, Debug)]
pub enum DbServiceError {
    /// Authoritative write failed; nothing was mirrored
    #[error("Primary write failed for {kind} {id}: {source}")]
    PrimaryWrite {
        kind: EntityKind,
        id: String,
        source: StoreError,
    },

    /// Authoritative read failed and the read was not allowed to fall back
    #[error("Primary read failed for {kind}: {source}")]
    PrimaryRead { kind: EntityKind, source: StoreError },

    /// Authoritative delete failed; the mirror was left untouched
    #[error("Primary delete failed for {kind} {id}: {source}")]
    PrimaryDelete {
        kind: EntityKind,
        id: String,
        source: StoreError,
    },

    /// Write to a document-only kind failed
    #[error("Document write failed for {kind} {id}: {source}")]
    SecondaryWrite {
        kind: EntityKind,
        id: String,
        source: StoreError,
    },

    /// Subscription could not be established
    #[error("Subscription to {topic} failed: {source}")]
    Subscription { topic: String, source: StoreError },

    /// Uniqueness-checked creation hit an existing record
    #[error("{kind} {id} already exists")]
    Conflict { kind: EntityKind, id: String },

    /// Record cannot be persisted as given (missing id, not an object)
    #[error("Invalid {kind} record: {reason}")]
    InvalidRecord { kind: EntityKind, reason: String },

    /// Stored record does not decode into its typed entity
    #[error("Failed to decode {kind}: {source}")]
    Decode {
        kind: EntityKind,
        source: serde_json::Error,
    },
}

impl DbServiceError {
    /// Create a primary write error
    pub fn primary_write(kind: EntityKind, id: impl Into<String>, source: StoreError) -> Self {
        Self::PrimaryWrite {
            kind,
            id: id.into(),
            source,
        }
    }

    /// Create a primary read error
    pub fn primary_read(kind: EntityKind, source: StoreError) -> Self {
        Self::PrimaryRead { kind, source }
    }

    /// Create a primary delete error
    pub fn primary_delete(kind: EntityKind, id: impl Into<String>, source: StoreError) -> Self {
        Self::PrimaryDelete {
            kind,
            id: id.into(),
            source,
        }
    }

    /// Create a secondary write error
    pub fn secondary_write(kind: EntityKind, id: impl Into<String>, source: StoreError) -> Self {
        Self::SecondaryWrite {
            kind,
            id: id.into(),
            source,
        }
    }

    /// Create a subscription error
    pub fn subscription(topic: impl Into<String>, source: StoreError) -> Self {
        Self::Subscription {
            topic: topic.into(),
            source,
        }
    }

    /// Create a conflict error
    pub fn conflict(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            id: id.into(),
        }
    }

    /// Create an invalid record error
    pub fn invalid_record(kind: EntityKind, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            kind,
            reason: reason.into(),
        }
    }

    /// Create a decode error
    pub fn decode(kind: EntityKind, source: serde_json::Error) -> Self {
        Self::Decode { kind, source }
    }

    /// The underlying store failure, if this error wraps one
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::PrimaryWrite { source, .. }
            | Self::PrimaryRead { source, .. }
            | Self::PrimaryDelete { source, .. }
            | Self::SecondaryWrite { source, .. }
            | Self::Subscription { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type DbServiceResult<T> = Result<T, DbServiceError>;

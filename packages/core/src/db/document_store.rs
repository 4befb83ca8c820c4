//! DocumentStore Trait - Real-Time Document Mirror
//!
//! Abstraction over the document store that mirrors replicated entities and
//! holds document-only data (live events). Documents use **application
//! naming** (camel-case keys) and are keyed by collection plus id.

use crate::db::error::StoreResult;
use crate::db::events::ChangeStream;
use crate::models::{EntityKind, Record, RecordFilter};
use async_trait::async_trait;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Backend name used in logs and errors
    fn backend(&self) -> &'static str;

    /// Read one document; `Ok(None)` when absent
    async fn get(&self, kind: EntityKind, id: &str) -> StoreResult<Option<Record>>;

    /// Create or replace a document
    async fn set(&self, kind: EntityKind, id: &str, document: Record) -> StoreResult<()>;

    /// Delete a document; returns whether it existed
    async fn delete(&self, kind: EntityKind, id: &str) -> StoreResult<bool>;

    /// Documents of a collection matching all filter conditions, ordered by id
    async fn query(&self, kind: EntityKind, filter: &RecordFilter) -> StoreResult<Vec<Record>>;

    /// Every document id in a collection
    async fn list_ids(&self, kind: EntityKind) -> StoreResult<Vec<String>>;

    /// Live added/changed/removed documents of a collection matching `filter`
    ///
    /// Dropping the stream releases the subscription.
    async fn subscribe(&self, kind: EntityKind, filter: &RecordFilter) -> StoreResult<ChangeStream>;

    async fn health_check(&self) -> StoreResult<()>;
}

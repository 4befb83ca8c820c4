//! PrimaryStore Trait - Relational System of Record
//!
//! This module defines the `PrimaryStore` trait, the abstraction over the
//! relational store that is authoritative for every replicated entity.
//!
//! # Contract
//!
//! - Records cross this boundary in **primary naming** (underscore keys).
//!   Translation from and to application naming is the caller's job.
//! - `upsert` inserts or fully replaces a row keyed by the kind's id field.
//! - Parent references (`unit.curriculum_id`, `lesson.unit_id`,
//!   `quiz_attempt.quiz_id`) are enforced; an unknown parent is a
//!   [`StoreError::Constraint`](crate::db::StoreError).
//! - A quiz's `question_ids` list is persisted through the quiz/question
//!   relation and returned, in order, on every quiz fetch.
//! - Deleting a parent cascades to its children.
//!
//! # Examples
//!
//! ```rust,no_run
//! use learnspace_core::db::{PrimaryStore, StoreOptions, TursoStore};
//! use learnspace_core::models::EntityKind;
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store: Arc<dyn PrimaryStore> = Arc::new(
//!         TursoStore::open(PathBuf::from("./data/learnspace.db"), StoreOptions::default()).await?,
//!     );
//!
//!     let lesson = store.fetch(EntityKind::Lesson, "lesson_1").await?;
//!     println!("{:?}", lesson);
//!     Ok(())
//! }
//! ```

use crate::db::error::StoreResult;
use crate::db::events::ChangeStream;
use crate::models::{EntityKind, Record, RecordFilter};
use async_trait::async_trait;

/// Abstraction over the authoritative relational store
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the orchestrator shares one
/// instance across tasks behind an `Arc`.
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    /// Backend name used in logs and errors
    fn backend(&self) -> &'static str;

    /// Fetch one record by id; `Ok(None)` when it does not exist
    async fn fetch(&self, kind: EntityKind, id: &str) -> StoreResult<Option<Record>>;

    /// Fetch every record of a kind matching all filter conditions
    ///
    /// Results are ordered by id. Filter fields use primary naming.
    async fn fetch_where(&self, kind: EntityKind, filter: &RecordFilter) -> StoreResult<Vec<Record>>;

    /// Fetch one record with its children embedded
    ///
    /// - curriculum: `units`, each unit carrying `lesson_ids`, ordered by position
    /// - unit: `lesson_ids`, ordered by position
    /// - other kinds: same as [`fetch`](Self::fetch)
    async fn fetch_with_joins(&self, kind: EntityKind, id: &str) -> StoreResult<Option<Record>>;

    /// Insert or fully replace a record; returns the stored record
    async fn upsert(&self, kind: EntityKind, record: Record) -> StoreResult<Record>;

    /// Delete a record (cascading to children); returns whether it existed
    async fn delete(&self, kind: EntityKind, id: &str) -> StoreResult<bool>;

    /// Live change feed for writes made through this store
    ///
    /// Events are narrowed to `kind` and to records matching `filter`
    /// (primary naming). Dropping the stream ends the subscription.
    async fn watch(&self, kind: EntityKind, filter: &RecordFilter) -> StoreResult<ChangeStream>;

    /// Cheap round-trip proving the store is reachable
    async fn health_check(&self) -> StoreResult<()>;
}

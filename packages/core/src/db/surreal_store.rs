//! SurrealStore - DocumentStore Implementation for SurrealDB Backend
//!
//! This module implements the `DocumentStore` trait on embedded SurrealDB,
//! the real-time mirror of the relational store plus the home of
//! document-only data such as live events.
//!
//! # Layout
//!
//! One SCHEMALESS table per entity kind, record ids `table:doc_id`:
//!
//! - `doc_id`: the document id
//! - `body`: the document itself (application naming), queryable by field
//! - `body_json`: the exact JSON text of `body`, used for lossless reads
//! - `synced_at`: RFC 3339 timestamp of the last write
//!
//! # Change Events
//!
//! Every committed `set` / `delete` is published on a broadcast channel;
//! `subscribe` narrows that feed to one collection or document.
//!
//! # Examples
//!
//! ```rust,no_run
//! use learnspace_core::db::{DocumentStore, StoreOptions, SurrealStore};
//! use learnspace_core::models::EntityKind;
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SurrealStore::open(
//!         PathBuf::from("./data/mirror"),
//!         "learnspace",
//!         "mirror",
//!         StoreOptions::default(),
//!     )
//!     .await?;
//!
//!     let user = store.get(EntityKind::User, "user_1").await?;
//!     println!("{:?}", user);
//!     Ok(())
//! }
//! ```

use crate::db::document_store::DocumentStore;
use crate::db::error::{with_timeout, StoreError, StoreResult};
use crate::db::events::{filtered_broadcast, ChangeAction, ChangeEvent, ChangeStream};
use crate::db::naming::is_safe_field;
use crate::db::options::StoreOptions;
use crate::models::{EntityKind, Record, RecordFilter};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use surrealdb::engine::local::{Db, Mem, RocksDb};
use surrealdb::Surreal;
use tokio::sync::broadcast;

const BACKEND: &str = "surreal";

/// Row shape read back from a document table
#[derive(Debug, Clone, Deserialize)]
struct SurrealDocument {
    doc_id: String,
    body_json: String,
}

impl SurrealDocument {
    fn into_record(self, kind: EntityKind) -> StoreResult<Record> {
        match serde_json::from_str::<Value>(&self.body_json)? {
            Value::Object(record) => Ok(record),
            other => Err(StoreError::invalid_record(format!(
                "{} document {} is not an object: {}",
                kind, self.doc_id, other
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DocumentId {
    doc_id: String,
}

/// SurrealStore implements DocumentStore for embedded SurrealDB
pub struct SurrealStore {
    db: Arc<Surreal<Db>>,
    options: StoreOptions,
    events: broadcast::Sender<ChangeEvent>,
}

impl SurrealStore {
    /// Open an embedded RocksDB-backed store
    pub async fn open(
        db_path: PathBuf,
        namespace: &str,
        database: &str,
        options: StoreOptions,
    ) -> StoreResult<Self> {
        let db = Surreal::new::<RocksDb>(db_path.clone()).await.map_err(|e| {
            StoreError::unavailable(
                BACKEND,
                format!("failed to open {}: {}", db_path.display(), e),
            )
        })?;
        let store = Self::from_client(db, namespace, database, options).await?;
        tracing::info!("Opened document store at {}", db_path.display());
        Ok(store)
    }

    /// Open a purely in-memory store (tests, ephemeral tooling)
    pub async fn open_in_memory(
        namespace: &str,
        database: &str,
        options: StoreOptions,
    ) -> StoreResult<Self> {
        let db = Surreal::new::<Mem>(())
            .await
            .map_err(|e| StoreError::unavailable(BACKEND, e.to_string()))?;
        Self::from_client(db, namespace, database, options).await
    }

    /// Wrap an already-connected client and initialize the schema
    pub async fn from_client(
        db: Surreal<Db>,
        namespace: &str,
        database: &str,
        options: StoreOptions,
    ) -> StoreResult<Self> {
        db.use_ns(namespace).use_db(database).await?;
        let db = Arc::new(db);
        Self::initialize_schema(&db).await?;

        let (events, _) = broadcast::channel(options.event_capacity);
        Ok(Self {
            db,
            options,
            events,
        })
    }

    /// One SCHEMALESS table per kind, indexed on `doc_id`
    async fn initialize_schema(db: &Surreal<Db>) -> StoreResult<()> {
        for kind in EntityKind::ALL {
            db.query(format!(
                "DEFINE TABLE IF NOT EXISTS {table} SCHEMALESS;
                 DEFINE INDEX IF NOT EXISTS idx_{table}_doc_id ON TABLE {table} FIELDS doc_id UNIQUE;",
                table = kind.table()
            ))
            .await?
            .check()
            .map_err(|e| {
                StoreError::query(
                    BACKEND,
                    format!("Failed to define {} table: {}", kind.table(), e),
                )
            })?;
        }
        Ok(())
    }

    async fn do_get(&self, kind: EntityKind, id: &str) -> StoreResult<Option<Record>> {
        let mut response = self
            .db
            .query("SELECT doc_id, body_json FROM type::thing($tb, $id);")
            .bind(("tb", kind.table()))
            .bind(("id", id.to_string()))
            .await?;
        let documents: Vec<SurrealDocument> = response.take(0)?;
        documents
            .into_iter()
            .next()
            .map(|document| document.into_record(kind))
            .transpose()
    }

    async fn do_set(&self, kind: EntityKind, id: &str, document: Record) -> StoreResult<()> {
        let body_json = serde_json::to_string(&document)?;
        let mut response = self
            .db
            .query(
                "SELECT doc_id FROM type::thing($tb, $id);
                 UPSERT type::thing($tb, $id) CONTENT {
                    doc_id: $id,
                    body: $body,
                    body_json: $body_json,
                    synced_at: $synced_at
                 };",
            )
            .bind(("tb", kind.table()))
            .bind(("id", id.to_string()))
            .bind(("body", Value::Object(document.clone())))
            .bind(("body_json", body_json))
            .bind(("synced_at", Utc::now().to_rfc3339()))
            .await?
            .check()
            .map_err(|e| StoreError::query(BACKEND, format!("Failed to write {} {}: {}", kind, id, e)))?;

        let prior: Vec<DocumentId> = response.take(0)?;
        let action = if prior.is_empty() {
            ChangeAction::Added
        } else {
            ChangeAction::Changed
        };
        let _ = self
            .events
            .send(ChangeEvent::new(kind, action, id, Some(document)));
        Ok(())
    }

    async fn do_delete(&self, kind: EntityKind, id: &str) -> StoreResult<bool> {
        let mut response = self
            .db
            .query("DELETE type::thing($tb, $id) RETURN BEFORE;")
            .bind(("tb", kind.table()))
            .bind(("id", id.to_string()))
            .await?;
        let removed: Vec<SurrealDocument> = response.take(0)?;

        let Some(document) = removed.into_iter().next() else {
            return Ok(false);
        };
        let record = document.into_record(kind).ok();
        let _ = self
            .events
            .send(ChangeEvent::new(kind, ChangeAction::Removed, id, record));
        Ok(true)
    }

    async fn do_query(&self, kind: EntityKind, filter: &RecordFilter) -> StoreResult<Vec<Record>> {
        let mut clauses = Vec::new();
        let mut bindings = Vec::new();
        for (index, (field, value)) in filter.conditions().iter().enumerate() {
            if !is_safe_field(field) {
                return Err(StoreError::query(
                    BACKEND,
                    format!("invalid filter field '{}'", field),
                ));
            }
            // null conditions also match absent fields; those are checked below
            if !value.is_null() {
                clauses.push(format!("body.{} = $p{}", field, index));
                bindings.push((format!("p{}", index), value.clone()));
            }
        }

        let mut sql = "SELECT doc_id, body_json FROM type::table($tb)".to_string();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY doc_id;");

        let mut query = self.db.query(sql).bind(("tb", kind.table()));
        for binding in bindings {
            query = query.bind(binding);
        }
        let mut response = query.await?;
        let documents: Vec<SurrealDocument> = response.take(0)?;

        let mut records = Vec::with_capacity(documents.len());
        for document in documents {
            let record = document.into_record(kind)?;
            if filter.matches(&record) {
                records.push(record);
            }
        }
        Ok(filter.truncate(records))
    }

    async fn do_list_ids(&self, kind: EntityKind) -> StoreResult<Vec<String>> {
        let mut response = self
            .db
            .query("SELECT doc_id FROM type::table($tb) ORDER BY doc_id;")
            .bind(("tb", kind.table()))
            .await?;
        let ids: Vec<DocumentId> = response.take(0)?;
        Ok(ids.into_iter().map(|row| row.doc_id).collect())
    }

    async fn do_health_check(&self) -> StoreResult<()> {
        self.db
            .query("RETURN true;")
            .await
            .and_then(|response| response.check())
            .map_err(|e| StoreError::unavailable(BACKEND, e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for SurrealStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn get(&self, kind: EntityKind, id: &str) -> StoreResult<Option<Record>> {
        with_timeout(BACKEND, "get", self.options.timeout, self.do_get(kind, id)).await
    }

    async fn set(&self, kind: EntityKind, id: &str, document: Record) -> StoreResult<()> {
        with_timeout(
            BACKEND,
            "set",
            self.options.timeout,
            self.do_set(kind, id, document),
        )
        .await
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> StoreResult<bool> {
        with_timeout(BACKEND, "delete", self.options.timeout, self.do_delete(kind, id)).await
    }

    async fn query(&self, kind: EntityKind, filter: &RecordFilter) -> StoreResult<Vec<Record>> {
        with_timeout(BACKEND, "query", self.options.timeout, self.do_query(kind, filter)).await
    }

    async fn list_ids(&self, kind: EntityKind) -> StoreResult<Vec<String>> {
        with_timeout(BACKEND, "list_ids", self.options.timeout, self.do_list_ids(kind)).await
    }

    async fn subscribe(&self, kind: EntityKind, filter: &RecordFilter) -> StoreResult<ChangeStream> {
        Ok(filtered_broadcast(
            BACKEND,
            self.events.subscribe(),
            kind,
            filter.clone(),
        ))
    }

    async fn health_check(&self) -> StoreResult<()> {
        with_timeout(BACKEND, "health_check", self.options.timeout, self.do_health_check()).await
    }
}

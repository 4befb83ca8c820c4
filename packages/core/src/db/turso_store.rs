//! TursoStore - PrimaryStore Implementation for Turso/libsql Backend
//!
//! This module implements the `PrimaryStore` trait on an embedded libsql
//! database, the system of record for every replicated entity.
//!
//! # Schema
//!
//! One table per replicated kind:
//!
//! - `id TEXT PRIMARY KEY`
//! - parent column (`curriculum_id`, `unit_id`, `quiz_id`) for nested kinds,
//!   `NOT NULL` with `ON DELETE CASCADE`
//! - `data JSON NOT NULL` holding the full record in primary naming
//! - `updated_at DATETIME`
//!
//! Quiz question lists live in `quiz_questions (quiz_id, question_id, position)`
//! and are reattached, in position order, on every quiz read.
//!
//! # SQLite Configuration
//!
//! - WAL mode: Write-Ahead Logging for better concurrency
//! - Foreign keys: enabled per connection (SQLite scopes the pragma to the connection)
//! - Busy timeout: 5s wait on locks instead of failing immediately
//!
//! # Examples
//!
//! ```rust,no_run
//! use learnspace_core::db::{PrimaryStore, StoreOptions, TursoStore};
//! use learnspace_core::models::EntityKind;
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = TursoStore::open(PathBuf::from("./data/learnspace.db"), StoreOptions::default()).await?;
//!     let units = store.fetch_with_joins(EntityKind::Curriculum, "curriculum_1").await?;
//!     println!("{:?}", units);
//!     Ok(())
//! }
//! ```

use crate::db::error::{with_timeout, StoreError, StoreResult};
use crate::db::events::{filtered_broadcast, ChangeAction, ChangeEvent, ChangeStream};
use crate::db::naming::is_safe_field;
use crate::db::options::StoreOptions;
use crate::db::primary_store::PrimaryStore;
use crate::models::{EntityKind, Record, RecordFilter};
use async_trait::async_trait;
use libsql::params::Params;
use libsql::{Builder, Connection, Database};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

const BACKEND: &str = "turso";

const POSITION_ORDER: &str = "COALESCE(json_extract(data, '$.position'), 0), id";

/// TursoStore implements PrimaryStore for an embedded libsql database
pub struct TursoStore {
    db: Arc<Database>,
    db_path: PathBuf,
    options: StoreOptions,
    events: broadcast::Sender<ChangeEvent>,
}

/// Map a libsql failure, classifying constraint violations
fn sql_error(context: &str, e: libsql::Error) -> StoreError {
    let message = e.to_string();
    if message.to_ascii_lowercase().contains("constraint") {
        StoreError::constraint(BACKEND, format!("{}: {}", context, message))
    } else {
        StoreError::query(BACKEND, format!("{}: {}", context, message))
    }
}

fn ensure_replicated(kind: EntityKind) -> StoreResult<()> {
    if kind.is_replicated() {
        Ok(())
    } else {
        Err(StoreError::query(
            BACKEND,
            format!("{} is not stored in the relational store", kind),
        ))
    }
}

fn to_sql_value(value: &Value) -> libsql::Value {
    match value {
        Value::Null => libsql::Value::Null,
        Value::Bool(flag) => libsql::Value::Integer(i64::from(*flag)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => libsql::Value::Integer(i),
            None => libsql::Value::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => libsql::Value::Text(s.clone()),
        other => libsql::Value::Text(other.to_string()),
    }
}

fn parse_data(kind: EntityKind, data: &str) -> StoreResult<Record> {
    match serde_json::from_str::<Value>(data)? {
        Value::Object(record) => Ok(record),
        other => Err(StoreError::invalid_record(format!(
            "{} row data is not an object: {}",
            kind, other
        ))),
    }
}

impl TursoStore {
    /// Open (or create) the database file and initialize the schema
    ///
    /// # Errors
    ///
    /// - parent directory cannot be created
    /// - libsql cannot open the file
    /// - schema statements fail
    pub async fn open(db_path: PathBuf, options: StoreOptions) -> StoreResult<Self> {
        let is_new_database = !db_path.exists();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::unavailable(
                        BACKEND,
                        format!("cannot create {}: {}", parent.display(), e),
                    )
                })?;
            }
        }

        let db = Builder::new_local(&db_path).build().await.map_err(|e| {
            StoreError::unavailable(
                BACKEND,
                format!("failed to open {}: {}", db_path.display(), e),
            )
        })?;

        let (events, _) = broadcast::channel(options.event_capacity);
        let store = Self {
            db: Arc::new(db),
            db_path,
            options,
            events,
        };
        store.initialize_schema(is_new_database).await?;
        tracing::info!("Opened relational store at {}", store.db_path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// PRAGMA statements return rows, so they go through query() rather than execute()
    async fn execute_pragma(conn: &Connection, pragma: &str) -> StoreResult<()> {
        let mut stmt = conn
            .prepare(pragma)
            .await
            .map_err(|e| sql_error(&format!("Failed to execute '{}'", pragma), e))?;
        let _ = stmt
            .query(())
            .await
            .map_err(|e| sql_error(&format!("Failed to execute '{}'", pragma), e))?;
        Ok(())
    }

    async fn connect_with_timeout(&self) -> StoreResult<Connection> {
        let conn = self
            .db
            .connect()
            .map_err(|e| StoreError::unavailable(BACKEND, e.to_string()))?;
        Self::execute_pragma(&conn, "PRAGMA busy_timeout = 5000").await?;
        Self::execute_pragma(&conn, "PRAGMA foreign_keys = ON").await?;
        Ok(conn)
    }

    async fn initialize_schema(&self, is_new_database: bool) -> StoreResult<()> {
        let conn = self.connect_with_timeout().await?;
        Self::execute_pragma(&conn, "PRAGMA journal_mode = WAL").await?;

        for kind in EntityKind::ALL.iter().filter(|kind| kind.is_replicated()) {
            let parent_column = kind
                .parent()
                .map(|parent| {
                    format!(
                        "{column} TEXT NOT NULL REFERENCES {table}(id) ON DELETE CASCADE,",
                        column = parent.column,
                        table = parent.kind.table()
                    )
                })
                .unwrap_or_default();

            conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {table} (
                        id TEXT PRIMARY KEY,
                        {parent_column}
                        data JSON NOT NULL,
                        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
                    )",
                    table = kind.table(),
                    parent_column = parent_column
                ),
                (),
            )
            .await
            .map_err(|e| sql_error(&format!("Failed to create {} table", kind.table()), e))?;

            if let Some(parent) = kind.parent() {
                conn.execute(
                    &format!(
                        "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table}({column})",
                        table = kind.table(),
                        column = parent.column
                    ),
                    (),
                )
                .await
                .map_err(|e| sql_error("Failed to create parent index", e))?;
            }
        }

        conn.execute(
            "CREATE TABLE IF NOT EXISTS quiz_questions (
                quiz_id TEXT NOT NULL,
                question_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (quiz_id, question_id),
                FOREIGN KEY (quiz_id) REFERENCES quizzes(id) ON DELETE CASCADE,
                FOREIGN KEY (question_id) REFERENCES questions(id) ON DELETE CASCADE
            )",
            (),
        )
        .await
        .map_err(|e| sql_error("Failed to create quiz_questions table", e))?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_quiz_questions_question ON quiz_questions(question_id)",
            (),
        )
        .await
        .map_err(|e| sql_error("Failed to create quiz_questions index", e))?;

        // Flush schema for fresh files so a second connection sees the tables
        if is_new_database {
            Self::execute_pragma(&conn, "PRAGMA wal_checkpoint(TRUNCATE)").await?;
        }
        Ok(())
    }

    async fn query_data(
        conn: &Connection,
        kind: EntityKind,
        sql: &str,
        params: Params,
    ) -> StoreResult<Vec<Record>> {
        let mut rows = conn
            .query(sql, params)
            .await
            .map_err(|e| sql_error(&format!("Failed to query {}", kind.table()), e))?;
        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| sql_error("Failed to read row", e))?
        {
            let data: String = row.get(0)?;
            records.push(parse_data(kind, &data)?);
        }
        Ok(records)
    }

    async fn query_ids(conn: &Connection, sql: &str, param: &str) -> StoreResult<Vec<Value>> {
        let mut rows = conn
            .query(sql, [param])
            .await
            .map_err(|e| sql_error("Failed to query ids", e))?;
        let mut ids = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| sql_error("Failed to read row", e))?
        {
            let id: String = row.get(0)?;
            ids.push(Value::String(id));
        }
        Ok(ids)
    }

    async fn question_ids(conn: &Connection, quiz_id: &str) -> StoreResult<Vec<Value>> {
        Self::query_ids(
            conn,
            "SELECT question_id FROM quiz_questions WHERE quiz_id = ? ORDER BY position",
            quiz_id,
        )
        .await
    }

    async fn lesson_ids(conn: &Connection, unit_id: &str) -> StoreResult<Vec<Value>> {
        Self::query_ids(
            conn,
            &format!("SELECT id FROM lessons WHERE unit_id = ? ORDER BY {}", POSITION_ORDER),
            unit_id,
        )
        .await
    }

    /// Reattach relation-backed lists
    async fn hydrate(conn: &Connection, kind: EntityKind, mut record: Record) -> StoreResult<Record> {
        if let Some(list) = kind.join_list() {
            if let Some(id) = kind.record_id(&record).map(str::to_string) {
                let ids = Self::question_ids(conn, &id).await?;
                record.insert(list.to_string(), Value::Array(ids));
            }
        }
        Ok(record)
    }

    async fn fetch_on(conn: &Connection, kind: EntityKind, id: &str) -> StoreResult<Option<Record>> {
        let sql = format!("SELECT data FROM {} WHERE id = ?", kind.table());
        let found = Self::query_data(conn, kind, &sql, Params::Positional(vec![id.into()]))
            .await?
            .into_iter()
            .next();
        match found {
            Some(record) => Ok(Some(Self::hydrate(conn, kind, record).await?)),
            None => Ok(None),
        }
    }

    async fn do_fetch(&self, kind: EntityKind, id: &str) -> StoreResult<Option<Record>> {
        ensure_replicated(kind)?;
        let conn = self.connect_with_timeout().await?;
        Self::fetch_on(&conn, kind, id).await
    }

    async fn do_fetch_where(&self, kind: EntityKind, filter: &RecordFilter) -> StoreResult<Vec<Record>> {
        ensure_replicated(kind)?;
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        for (field, value) in filter.conditions() {
            if !is_safe_field(field) {
                return Err(StoreError::query(
                    BACKEND,
                    format!("invalid filter field '{}'", field),
                ));
            }
            params.push(libsql::Value::Text(format!("$.{}", field)));
            if value.is_null() {
                clauses.push("json_extract(data, ?) IS NULL".to_string());
            } else {
                clauses.push("json_extract(data, ?) = ?".to_string());
                params.push(to_sql_value(value));
            }
        }

        let mut sql = format!("SELECT data FROM {}", kind.table());
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY id");
        if let Some(limit) = filter.max_results() {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let conn = self.connect_with_timeout().await?;
        let rows = Self::query_data(&conn, kind, &sql, Params::Positional(params)).await?;
        let mut records = Vec::with_capacity(rows.len());
        for record in rows {
            records.push(Self::hydrate(&conn, kind, record).await?);
        }
        Ok(records)
    }

    async fn do_fetch_with_joins(&self, kind: EntityKind, id: &str) -> StoreResult<Option<Record>> {
        ensure_replicated(kind)?;
        let conn = self.connect_with_timeout().await?;
        let Some(mut record) = Self::fetch_on(&conn, kind, id).await? else {
            return Ok(None);
        };

        match kind {
            EntityKind::Curriculum => {
                let sql = format!(
                    "SELECT data FROM units WHERE curriculum_id = ? ORDER BY {}",
                    POSITION_ORDER
                );
                let units = Self::query_data(
                    &conn,
                    EntityKind::Unit,
                    &sql,
                    Params::Positional(vec![id.into()]),
                )
                .await?;
                let mut joined = Vec::with_capacity(units.len());
                for mut unit in units {
                    let unit_id = EntityKind::Unit
                        .record_id(&unit)
                        .unwrap_or_default()
                        .to_string();
                    let lessons = Self::lesson_ids(&conn, &unit_id).await?;
                    unit.insert("lesson_ids".to_string(), Value::Array(lessons));
                    joined.push(Value::Object(unit));
                }
                record.insert("units".to_string(), Value::Array(joined));
            }
            EntityKind::Unit => {
                let lessons = Self::lesson_ids(&conn, id).await?;
                record.insert("lesson_ids".to_string(), Value::Array(lessons));
            }
            _ => {}
        }
        Ok(Some(record))
    }

    /// Row writes for one upsert; runs inside the caller's transaction
    async fn write_rows(
        conn: &Connection,
        kind: EntityKind,
        id: &str,
        record: &Record,
        question_ids: &[String],
    ) -> StoreResult<bool> {
        let table = kind.table();
        let existed = !Self::query_ids(conn, &format!("SELECT id FROM {} WHERE id = ?", table), id)
            .await?
            .is_empty();
        let data = serde_json::to_string(record)?;

        match kind.parent() {
            Some(parent) => {
                let parent_id = record
                    .get(parent.column)
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        StoreError::constraint(BACKEND, format!("{} requires {}", kind, parent.column))
                    })?;
                conn.execute(
                    &format!(
                        "INSERT INTO {table} (id, {column}, data) VALUES (?, ?, ?)
                         ON CONFLICT(id) DO UPDATE SET
                            {column} = excluded.{column},
                            data = excluded.data,
                            updated_at = CURRENT_TIMESTAMP",
                        table = table,
                        column = parent.column
                    ),
                    (id, parent_id, data.as_str()),
                )
                .await
                .map_err(|e| sql_error(&format!("Failed to upsert {} {}", kind, id), e))?;
            }
            None => {
                conn.execute(
                    &format!(
                        "INSERT INTO {table} (id, data) VALUES (?, ?)
                         ON CONFLICT(id) DO UPDATE SET
                            data = excluded.data,
                            updated_at = CURRENT_TIMESTAMP",
                        table = table
                    ),
                    (id, data.as_str()),
                )
                .await
                .map_err(|e| sql_error(&format!("Failed to upsert {} {}", kind, id), e))?;
            }
        }

        if kind.join_list().is_some() {
            conn.execute("DELETE FROM quiz_questions WHERE quiz_id = ?", [id])
                .await
                .map_err(|e| sql_error("Failed to clear quiz questions", e))?;
            for (position, question_id) in question_ids.iter().enumerate() {
                conn.execute(
                    "INSERT INTO quiz_questions (quiz_id, question_id, position) VALUES (?, ?, ?)",
                    (id, question_id.as_str(), position as i64),
                )
                .await
                .map_err(|e| {
                    sql_error(&format!("Failed to link question {} to quiz {}", question_id, id), e)
                })?;
            }
        }
        Ok(existed)
    }

    async fn do_upsert(&self, kind: EntityKind, mut record: Record) -> StoreResult<Record> {
        ensure_replicated(kind)?;
        let id = kind
            .record_id(&record)
            .ok_or_else(|| {
                StoreError::invalid_record(format!("{} record has no {}", kind, kind.id_field()))
            })?
            .to_string();
        for derived in kind.derived_columns() {
            record.remove(*derived);
        }

        let mut question_ids: Vec<String> = Vec::new();
        if let Some(list) = kind.join_list() {
            if let Some(Value::Array(ids)) = record.remove(list) {
                for question_id in ids.iter().filter_map(Value::as_str) {
                    if !question_ids.iter().any(|known| known == question_id) {
                        question_ids.push(question_id.to_string());
                    }
                }
            }
        }

        let conn = self.connect_with_timeout().await?;
        conn.execute("BEGIN TRANSACTION", ())
            .await
            .map_err(|e| sql_error("Failed to begin transaction", e))?;

        let existed = match Self::write_rows(&conn, kind, &id, &record, &question_ids).await {
            Ok(existed) => existed,
            Err(e) => {
                let _rollback = conn.execute("ROLLBACK", ()).await;
                return Err(e);
            }
        };

        if let Err(e) = conn.execute("COMMIT", ()).await {
            let _rollback = conn.execute("ROLLBACK", ()).await;
            return Err(sql_error("Failed to commit transaction", e));
        }

        if let Some(list) = kind.join_list() {
            record.insert(
                list.to_string(),
                Value::Array(question_ids.into_iter().map(Value::String).collect()),
            );
        }

        let action = if existed {
            ChangeAction::Changed
        } else {
            ChangeAction::Added
        };
        let _ = self
            .events
            .send(ChangeEvent::new(kind, action, id, Some(record.clone())));
        Ok(record)
    }

    async fn do_delete(&self, kind: EntityKind, id: &str) -> StoreResult<bool> {
        ensure_replicated(kind)?;
        let conn = self.connect_with_timeout().await?;
        let prior = Self::fetch_on(&conn, kind, id).await?;
        let affected = conn
            .execute(&format!("DELETE FROM {} WHERE id = ?", kind.table()), [id])
            .await
            .map_err(|e| sql_error(&format!("Failed to delete {} {}", kind, id), e))?;

        if affected == 0 {
            return Ok(false);
        }
        let _ = self
            .events
            .send(ChangeEvent::new(kind, ChangeAction::Removed, id, prior));
        Ok(true)
    }

    async fn do_health_check(&self) -> StoreResult<()> {
        let conn = self.connect_with_timeout().await?;
        let mut rows = conn
            .query("SELECT 1", ())
            .await
            .map_err(|e| StoreError::unavailable(BACKEND, e.to_string()))?;
        rows.next()
            .await
            .map_err(|e| StoreError::unavailable(BACKEND, e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl PrimaryStore for TursoStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn fetch(&self, kind: EntityKind, id: &str) -> StoreResult<Option<Record>> {
        with_timeout(BACKEND, "fetch", self.options.timeout, self.do_fetch(kind, id)).await
    }

    async fn fetch_where(&self, kind: EntityKind, filter: &RecordFilter) -> StoreResult<Vec<Record>> {
        with_timeout(
            BACKEND,
            "fetch_where",
            self.options.timeout,
            self.do_fetch_where(kind, filter),
        )
        .await
    }

    async fn fetch_with_joins(&self, kind: EntityKind, id: &str) -> StoreResult<Option<Record>> {
        with_timeout(
            BACKEND,
            "fetch_with_joins",
            self.options.timeout,
            self.do_fetch_with_joins(kind, id),
        )
        .await
    }

    async fn upsert(&self, kind: EntityKind, record: Record) -> StoreResult<Record> {
        with_timeout(BACKEND, "upsert", self.options.timeout, self.do_upsert(kind, record)).await
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> StoreResult<bool> {
        with_timeout(BACKEND, "delete", self.options.timeout, self.do_delete(kind, id)).await
    }

    async fn watch(&self, kind: EntityKind, filter: &RecordFilter) -> StoreResult<ChangeStream> {
        ensure_replicated(kind)?;
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

//! In-Memory Store Backends
//!
//! `MemoryPrimaryStore` and `MemoryDocumentStore` implement the two store
//! traits over plain maps. They enforce the same record contract as the
//! real backends (parent references, quiz/question relation, cascades,
//! change events) and add failure injection so orchestration behavior can
//! be exercised without a broken database:
//!
//! - `set_offline(true)` makes every operation fail with `Unavailable`
//! - `set_latency(..)` delays every operation (timeout testing)

use crate::db::document_store::DocumentStore;
use crate::db::error::{StoreError, StoreResult};
use crate::db::events::{filtered_broadcast, ChangeAction, ChangeEvent, ChangeStream};
use crate::db::options::StoreOptions;
use crate::db::primary_store::PrimaryStore;
use crate::models::{EntityKind, Record, RecordFilter};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

type Tables = HashMap<EntityKind, BTreeMap<String, Record>>;

/// Offline switch plus artificial latency
#[derive(Default)]
struct FaultInjector {
    offline: AtomicBool,
    latency_ms: AtomicU64,
}

impl FaultInjector {
    async fn check(&self, backend: &'static str) -> StoreResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable(backend, "store is offline"));
        }
        Ok(())
    }
}

fn position_of(record: &Record) -> i64 {
    record.get("position").and_then(Value::as_i64).unwrap_or(0)
}

fn children_sorted<'a>(
    tables: &'a Tables,
    kind: EntityKind,
    parent_column: &str,
    parent_id: &str,
) -> Vec<&'a Record> {
    let mut children: Vec<&Record> = tables
        .get(&kind)
        .map(|table| {
            table
                .values()
                .filter(|record| record.get(parent_column).and_then(Value::as_str) == Some(parent_id))
                .collect()
        })
        .unwrap_or_default();
    children.sort_by_key(|record| position_of(record));
    children
}

fn id_list(records: &[&Record]) -> Value {
    Value::Array(
        records
            .iter()
            .filter_map(|record| record.get("id").cloned())
            .collect(),
    )
}

/// Keep the first occurrence of each id
fn dedupe_ids(ids: &[Value]) -> Vec<Value> {
    let mut seen = Vec::with_capacity(ids.len());
    for id in ids {
        if !seen.contains(id) {
            seen.push(id.clone());
        }
    }
    seen
}

/// Map-backed [`PrimaryStore`]
pub struct MemoryPrimaryStore {
    tables: RwLock<Tables>,
    faults: FaultInjector,
    events: broadcast::Sender<ChangeEvent>,
}

impl MemoryPrimaryStore {
    const BACKEND: &'static str = "memory-primary";

    pub fn new() -> Self {
        Self::with_options(StoreOptions::default())
    }

    pub fn with_options(options: StoreOptions) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity);
        Self {
            tables: RwLock::new(HashMap::new()),
            faults: FaultInjector::default(),
            events,
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.faults.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.faults
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of stored records of a kind (bypasses fault injection)
    pub async fn len(&self, kind: EntityKind) -> usize {
        self.tables
            .read()
            .await
            .get(&kind)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    pub async fn is_empty(&self) -> bool {
        self.tables.read().await.values().all(BTreeMap::is_empty)
    }

    fn emit(&self, event: ChangeEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }

    fn check_references(tables: &Tables, kind: EntityKind, record: &Record) -> StoreResult<()> {
        if let Some(parent) = kind.parent() {
            let parent_id = record
                .get(parent.column)
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    StoreError::constraint(
                        Self::BACKEND,
                        format!("{} requires {}", kind, parent.column),
                    )
                })?;
            let exists = tables
                .get(&parent.kind)
                .is_some_and(|table| table.contains_key(parent_id));
            if !exists {
                return Err(StoreError::constraint(
                    Self::BACKEND,
                    format!("FOREIGN KEY: {} '{}' does not exist", parent.kind, parent_id),
                ));
            }
        }

        if let Some(list) = kind.join_list() {
            if let Some(Value::Array(ids)) = record.get(list) {
                let questions = tables.get(&EntityKind::Question);
                for id in ids {
                    let known = id
                        .as_str()
                        .is_some_and(|id| questions.is_some_and(|table| table.contains_key(id)));
                    if !known {
                        return Err(StoreError::constraint(
                            Self::BACKEND,
                            format!("FOREIGN KEY: question {} does not exist", id),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Remove children of a deleted record, depth first
    fn cascade(tables: &mut Tables, kind: EntityKind, id: &str) {
        let child_kinds: Vec<(EntityKind, &'static str)> = EntityKind::ALL
            .iter()
            .filter_map(|child| {
                child
                    .parent()
                    .filter(|parent| parent.kind == kind)
                    .map(|parent| (*child, parent.column))
            })
            .collect();

        for (child_kind, column) in child_kinds {
            let doomed: Vec<String> = tables
                .get(&child_kind)
                .map(|table| {
                    table
                        .iter()
                        .filter(|(_, record)| record.get(column).and_then(Value::as_str) == Some(id))
                        .map(|(child_id, _)| child_id.clone())
                        .collect()
                })
                .unwrap_or_default();
            for child_id in doomed {
                if let Some(table) = tables.get_mut(&child_kind) {
                    table.remove(&child_id);
                }
                Self::cascade(tables, child_kind, &child_id);
            }
        }

        if let Some((owner, list)) = kind.referenced_by() {
            if let Some(owners) = tables.get_mut(&owner) {
                for record in owners.values_mut() {
                    if let Some(Value::Array(ids)) = record.get_mut(list) {
                        ids.retain(|referenced| referenced.as_str() != Some(id));
                    }
                }
            }
        }
    }
}

impl Default for MemoryPrimaryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrimaryStore for MemoryPrimaryStore {
    fn backend(&self) -> &'static str {
        Self::BACKEND
    }

    async fn fetch(&self, kind: EntityKind, id: &str) -> StoreResult<Option<Record>> {
        self.faults.check(Self::BACKEND).await?;
        let tables = self.tables.read().await;
        Ok(tables.get(&kind).and_then(|table| table.get(id)).cloned())
    }

    async fn fetch_where(&self, kind: EntityKind, filter: &RecordFilter) -> StoreResult<Vec<Record>> {
        self.faults.check(Self::BACKEND).await?;
        let tables = self.tables.read().await;
        let matching = tables
            .get(&kind)
            .map(|table| {
                table
                    .values()
                    .filter(|record| filter.matches(record))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(filter.truncate(matching))
    }

    async fn fetch_with_joins(&self, kind: EntityKind, id: &str) -> StoreResult<Option<Record>> {
        self.faults.check(Self::BACKEND).await?;
        let tables = self.tables.read().await;
        let Some(mut record) = tables.get(&kind).and_then(|table| table.get(id)).cloned() else {
            return Ok(None);
        };

        match kind {
            EntityKind::Curriculum => {
                let units = children_sorted(&tables, EntityKind::Unit, "curriculum_id", id)
                    .into_iter()
                    .map(|unit| {
                        let mut unit = unit.clone();
                        let unit_id = unit.get("id").and_then(Value::as_str).unwrap_or_default();
                        let lessons = children_sorted(&tables, EntityKind::Lesson, "unit_id", unit_id);
                        unit.insert("lesson_ids".to_string(), id_list(&lessons));
                        Value::Object(unit)
                    })
                    .collect();
                record.insert("units".to_string(), Value::Array(units));
            }
            EntityKind::Unit => {
                let lessons = children_sorted(&tables, EntityKind::Lesson, "unit_id", id);
                record.insert("lesson_ids".to_string(), id_list(&lessons));
            }
            _ => {}
        }
        Ok(Some(record))
    }

    async fn upsert(&self, kind: EntityKind, mut record: Record) -> StoreResult<Record> {
        self.faults.check(Self::BACKEND).await?;
        let id = kind
            .record_id(&record)
            .ok_or_else(|| StoreError::invalid_record(format!("{} record has no {}", kind, kind.id_field())))?
            .to_string();
        for derived in kind.derived_columns() {
            record.remove(*derived);
        }
        if let Some(list) = kind.join_list() {
            let ids = match record.get(list) {
                Some(Value::Array(ids)) => dedupe_ids(ids),
                _ => Vec::new(),
            };
            record.insert(list.to_string(), Value::Array(ids));
        }

        let mut tables = self.tables.write().await;
        Self::check_references(&tables, kind, &record)?;
        let existed = tables
            .entry(kind)
            .or_default()
            .insert(id.clone(), record.clone())
            .is_some();
        drop(tables);

        let action = if existed {
            ChangeAction::Changed
        } else {
            ChangeAction::Added
        };
        self.emit(ChangeEvent::new(kind, action, id, Some(record.clone())));
        Ok(record)
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> StoreResult<bool> {
        self.faults.check(Self::BACKEND).await?;
        let mut tables = self.tables.write().await;
        let removed = tables.get_mut(&kind).and_then(|table| table.remove(id));
        if removed.is_some() {
            Self::cascade(&mut tables, kind, id);
        }
        drop(tables);

        match removed {
            Some(record) => {
                self.emit(ChangeEvent::new(kind, ChangeAction::Removed, id, Some(record)));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn watch(&self, kind: EntityKind, filter: &RecordFilter) -> StoreResult<ChangeStream> {
        self.faults.check(Self::BACKEND).await?;
        Ok(filtered_broadcast(
            Self::BACKEND,
            self.events.subscribe(),
            kind,
            filter.clone(),
        ))
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.faults.check(Self::BACKEND).await
    }
}

/// Map-backed [`DocumentStore`]
pub struct MemoryDocumentStore {
    collections: RwLock<Tables>,
    faults: FaultInjector,
    writes: AtomicUsize,
    events: broadcast::Sender<ChangeEvent>,
}

impl MemoryDocumentStore {
    const BACKEND: &'static str = "memory-document";

    pub fn new() -> Self {
        Self::with_options(StoreOptions::default())
    }

    pub fn with_options(options: StoreOptions) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity);
        Self {
            collections: RwLock::new(HashMap::new()),
            faults: FaultInjector::default(),
            writes: AtomicUsize::new(0),
            events,
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.faults.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.faults
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Successful `set` and `delete` calls so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Raw document access (bypasses fault injection)
    pub async fn peek(&self, kind: EntityKind, id: &str) -> Option<Record> {
        self.collections
            .read()
            .await
            .get(&kind)
            .and_then(|collection| collection.get(id))
            .cloned()
    }

    pub async fn len(&self, kind: EntityKind) -> usize {
        self.collections
            .read()
            .await
            .get(&kind)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    pub async fn is_empty(&self) -> bool {
        self.collections.read().await.values().all(BTreeMap::is_empty)
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn backend(&self) -> &'static str {
        Self::BACKEND
    }

    async fn get(&self, kind: EntityKind, id: &str) -> StoreResult<Option<Record>> {
        self.faults.check(Self::BACKEND).await?;
        Ok(self.peek(kind, id).await)
    }

    async fn set(&self, kind: EntityKind, id: &str, document: Record) -> StoreResult<()> {
        self.faults.check(Self::BACKEND).await?;
        let existed = self
            .collections
            .write()
            .await
            .entry(kind)
            .or_default()
            .insert(id.to_string(), document.clone())
            .is_some();
        self.writes.fetch_add(1, Ordering::SeqCst);

        let action = if existed {
            ChangeAction::Changed
        } else {
            ChangeAction::Added
        };
        let _ = self
            .events
            .send(ChangeEvent::new(kind, action, id, Some(document)));
        Ok(())
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> StoreResult<bool> {
        self.faults.check(Self::BACKEND).await?;
        let removed = self
            .collections
            .write()
            .await
            .get_mut(&kind)
            .and_then(|collection| collection.remove(id));
        self.writes.fetch_add(1, Ordering::SeqCst);

        match removed {
            Some(document) => {
                let _ = self.events.send(ChangeEvent::new(
                    kind,
                    ChangeAction::Removed,
                    id,
                    Some(document),
                ));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn query(&self, kind: EntityKind, filter: &RecordFilter) -> StoreResult<Vec<Record>> {
        self.faults.check(Self::BACKEND).await?;
        let collections = self.collections.read().await;
        let matching = collections
            .get(&kind)
            .map(|collection| {
                collection
                    .values()
                    .filter(|document| filter.matches(document))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(filter.truncate(matching))
    }

    async fn list_ids(&self, kind: EntityKind) -> StoreResult<Vec<String>> {
        self.faults.check(Self::BACKEND).await?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(&kind)
            .map(|collection| collection.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn subscribe(&self, kind: EntityKind, filter: &RecordFilter) -> StoreResult<ChangeStream> {
        self.faults.check(Self::BACKEND).await?;
        Ok(filtered_broadcast(
            Self::BACKEND,
            self.events.subscribe(),
            kind,
            filter.clone(),
        ))
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.faults.check(Self::BACKEND).await
    }
}

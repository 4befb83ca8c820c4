//! DbService - Sync Orchestrator
//!
//! Every entity operation in LearnSpace goes through `DbService`, which
//! coordinates the relational store (system of record) with its document
//! mirror.
//!
//! # Write Path
//!
//! 1. Clean the record (drop null fields, dedupe join-id lists, require the id)
//! 2. Translate to underscore naming and upsert into the relational store.
//!    Failure is fatal and nothing is mirrored.
//! 3. Mirror the camel-case record into the document store. Failure is
//!    logged, recorded as drift and the reconciler is woken; the save still
//!    succeeds.
//!
//! # Read Path
//!
//! 1. Read from the relational store (a miss is a valid answer)
//! 2. On failure, repeat the equivalent read against the document store
//! 3. If that fails too, return an empty result
//!
//! [`ReadPolicy::Strict`] skips the fallback and surfaces the failure; it is
//! used for uniqueness checks and auth-sensitive lookups.
//!
//! # Examples
//!
//! ```rust,no_run
//! use learnspace_core::config::SyncConfig;
//! use learnspace_core::db::{MemoryDocumentStore, MemoryPrimaryStore};
//! use learnspace_core::models::{User, UserRole};
//! use learnspace_core::services::DbService;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let service = DbService::new(
//!         Arc::new(MemoryPrimaryStore::new()),
//!         Arc::new(MemoryDocumentStore::new()),
//!         SyncConfig::default(),
//!     );
//!
//!     service
//!         .save_user(&User::new("u1", "Sara", "sara@x.com", UserRole::Student))
//!         .await?;
//!     let user = service.get_user("u1").await?;
//!     assert_eq!(user.map(|u| u.name), Some("Sara".to_string()));
//!     Ok(())
//! }
//! ```

use crate::config::SyncConfig;
use crate::db::naming::{
    clean_record, record_to_app_naming, record_to_primary_naming, to_app_key, to_primary_key,
};
use crate::db::{
    with_timeout, DocumentStore, MemoryDocumentStore, PrimaryStore, StoreError, StoreResult,
    SurrealStore, TursoStore,
};
use crate::models::{
    AppSetting, Curriculum, CurriculumWithUnits, Entity, EntityKind, InteractionEvent, Lesson,
    LiveEvent, MaintenanceMode, Question, Quiz, QuizAttempt, QuizWithQuestions, Record,
    RecordFilter, Unit, User, UserRole, MAINTENANCE_SETTING_ID,
};
use crate::services::error::{DbServiceError, DbServiceResult};
use crate::services::reconciler::{
    mirror_document, DriftLedger, ReconcileReport, ReconcileWaker, Reconciliation, ResyncReport,
};
use chrono::Utc;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// How a read reacts to a relational-store failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPolicy {
    /// Fall back to the document store, then to an empty result
    #[default]
    BestEffort,
    /// Surface the failure without falling back
    Strict,
}

/// Which store answered a read (logged only, never returned)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadSource {
    Primary,
    Secondary,
    Empty,
}

/// Result of the best-effort mirror step of a write or delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorOutcome {
    Mirrored,
    Failed(String),
    /// No mirror step: the kind lives only in the document store
    Skipped,
}

impl MirrorOutcome {
    pub fn is_mirrored(&self) -> bool {
        matches!(self, MirrorOutcome::Mirrored)
    }
}

/// A successful write and what happened to its mirror copy
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub id: String,
    /// The record as written, in application naming
    pub record: Record,
    pub mirror: MirrorOutcome,
}

/// A successful delete and what happened to its mirror copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Whether the authoritative store held the record
    pub existed: bool,
    pub mirror: MirrorOutcome,
}

/// Reachability of both stores
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub primary: Result<(), String>,
    pub secondary: Result<(), String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.primary.is_ok() && self.secondary.is_ok()
    }
}

fn sort_by_position<T>(items: &mut [T], key: impl Fn(&T) -> (i64, &str)) {
    items.sort_by(|a, b| key(a).cmp(&key(b)));
}

/// Sync orchestrator over a relational store and its document mirror
pub struct DbService {
    primary: Arc<dyn PrimaryStore>,
    secondary: Arc<dyn DocumentStore>,
    config: SyncConfig,
    ledger: Arc<DriftLedger>,
    waker: Option<ReconcileWaker>,
}

impl DbService {
    pub fn new(
        primary: Arc<dyn PrimaryStore>,
        secondary: Arc<dyn DocumentStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            primary,
            secondary,
            config,
            ledger: Arc::new(DriftLedger::new()),
            waker: None,
        }
    }

    /// Open the configured on-disk stores
    ///
    /// Without a `secondary_path` the mirror runs in memory.
    pub async fn open(config: SyncConfig) -> StoreResult<Self> {
        let options = config.store_options();
        let primary = TursoStore::open(config.primary_path.clone(), options).await?;
        let secondary: Arc<dyn DocumentStore> = match &config.secondary_path {
            Some(path) => Arc::new(
                SurrealStore::open(path.clone(), &config.namespace, &config.database, options)
                    .await?,
            ),
            None => Arc::new(MemoryDocumentStore::with_options(options)),
        };
        Ok(Self::new(Arc::new(primary), secondary, config))
    }

    /// Wake this reconciler whenever drift is recorded
    pub fn with_reconcile_waker(mut self, waker: ReconcileWaker) -> Self {
        self.waker = Some(waker);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn primary(&self) -> &Arc<dyn PrimaryStore> {
        &self.primary
    }

    pub fn secondary(&self) -> &Arc<dyn DocumentStore> {
        &self.secondary
    }

    pub fn drift_ledger(&self) -> &Arc<DriftLedger> {
        &self.ledger
    }

    /// Repair operations sharing this service's stores and drift ledger
    pub fn reconciliation(&self) -> Reconciliation {
        Reconciliation::new(
            self.primary.clone(),
            self.secondary.clone(),
            self.ledger.clone(),
        )
    }

    /// Run one reconcile pass now
    pub async fn reconcile_once(&self) -> ReconcileReport {
        self.reconciliation().run_once().await
    }

    /// Rebuild the whole mirror from the relational store
    pub async fn resync_all(&self) -> DbServiceResult<ResyncReport> {
        self.reconciliation().resync_all().await
    }

    pub async fn health_check(&self) -> HealthReport {
        let primary = self
            .timed(self.primary.backend(), "health_check", self.primary.health_check())
            .await
            .map_err(|e| e.to_string());
        let secondary = self
            .timed(self.secondary.backend(), "health_check", self.secondary.health_check())
            .await
            .map_err(|e| e.to_string());
        HealthReport { primary, secondary }
    }

    /// Bound a store call by `operation_timeout_ms`; injected stores need not time out
    async fn timed<T>(
        &self,
        backend: &'static str,
        operation: &str,
        fut: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        with_timeout(backend, operation, self.config.operation_timeout(), fut).await
    }

    async fn record_drift(&self, kind: EntityKind, id: &str, error: &str) {
        self.ledger.record(kind, id, error).await;
        if let Some(waker) = &self.waker {
            waker.wake();
        }
    }

    //
    // GENERIC RECORD OPERATIONS
    //

    /// Normalize an application-named record for writing; returns its id
    fn prepare(kind: EntityKind, record: Record) -> DbServiceResult<(String, Record)> {
        let mut record = clean_record(record);
        for derived in kind.derived_columns() {
            record.remove(&to_app_key(derived));
        }
        if let Some(list) = kind.join_list() {
            let field = to_app_key(list);
            if let Some(Value::Array(ids)) = record.get_mut(&field) {
                let mut unique: Vec<Value> = Vec::with_capacity(ids.len());
                for id in ids.drain(..) {
                    if !unique.contains(&id) {
                        unique.push(id);
                    }
                }
                *ids = unique;
            }
        }
        let id = kind
            .record_id(&record)
            .ok_or_else(|| {
                DbServiceError::invalid_record(kind, format!("missing {}", kind.id_field()))
            })?
            .to_string();
        Ok((id, record))
    }

    /// Write-through with best-effort mirror
    pub async fn save_record(&self, kind: EntityKind, record: Record) -> DbServiceResult<WriteOutcome> {
        let (id, document) = Self::prepare(kind, record)?;

        if !kind.is_replicated() {
            self.timed(
                self.secondary.backend(),
                "set",
                self.secondary.set(kind, &id, document.clone()),
            )
            .await
            .map_err(|e| DbServiceError::secondary_write(kind, &id, e))?;
            return Ok(WriteOutcome {
                id,
                record: document,
                mirror: MirrorOutcome::Skipped,
            });
        }

        self.timed(
            self.primary.backend(),
            "upsert",
            self.primary.upsert(kind, record_to_primary_naming(document.clone())),
        )
        .await
        .map_err(|e| {
            tracing::error!("Primary write failed for {} {}: {}", kind, id, e);
            DbServiceError::primary_write(kind, &id, e)
        })?;

        let mirror = match self
            .timed(
                self.secondary.backend(),
                "set",
                self.secondary.set(kind, &id, document.clone()),
            )
            .await
        {
            Ok(()) => {
                if self.ledger.clear(kind, &id).await {
                    tracing::debug!("Mirror write for {} {} cleared earlier drift", kind, id);
                }
                MirrorOutcome::Mirrored
            }
            Err(e) => {
                tracing::warn!("Mirror write failed for {} {} (kept in primary): {}", kind, id, e);
                let reason = e.to_string();
                self.record_drift(kind, &id, &reason).await;
                MirrorOutcome::Failed(reason)
            }
        };

        Ok(WriteOutcome {
            id,
            record: document,
            mirror,
        })
    }

    /// Relational read with document fallback, then empty result
    async fn read_with_fallback<T, P, S, SF>(
        &self,
        kind: EntityKind,
        operation: &str,
        policy: ReadPolicy,
        primary: P,
        secondary: S,
    ) -> DbServiceResult<T>
    where
        T: Default,
        P: Future<Output = StoreResult<T>>,
        S: FnOnce() -> SF,
        SF: Future<Output = StoreResult<T>>,
    {
        let primary_error = match self.timed(self.primary.backend(), operation, primary).await {
            Ok(value) => {
                tracing::trace!("{} {} served by {:?}", kind, operation, ReadSource::Primary);
                return Ok(value);
            }
            Err(e) => e,
        };

        if policy == ReadPolicy::Strict {
            tracing::warn!("Strict {} {} failed: {}", kind, operation, primary_error);
            return Err(DbServiceError::primary_read(kind, primary_error));
        }

        tracing::warn!(
            "Primary {} failed for {}, falling back to mirror: {}",
            operation,
            kind,
            primary_error
        );
        match self.timed(self.secondary.backend(), operation, secondary()).await {
            Ok(value) => {
                tracing::debug!("{} {} served by {:?}", kind, operation, ReadSource::Secondary);
                Ok(value)
            }
            Err(e) => {
                tracing::error!(
                    "Mirror {} also failed for {}, returning {:?} result: {}",
                    operation,
                    kind,
                    ReadSource::Empty,
                    e
                );
                Ok(T::default())
            }
        }
    }

    /// Document-only kinds read straight from the document store
    async fn read_secondary_only<T, F>(
        &self,
        kind: EntityKind,
        operation: &str,
        policy: ReadPolicy,
        fut: F,
    ) -> DbServiceResult<T>
    where
        T: Default,
        F: Future<Output = StoreResult<T>>,
    {
        match self.timed(self.secondary.backend(), operation, fut).await {
            Ok(value) => Ok(value),
            Err(e) if policy == ReadPolicy::Strict => Err(DbServiceError::primary_read(kind, e)),
            Err(e) => {
                tracing::error!("Document {} failed for {}, returning empty result: {}", operation, kind, e);
                Ok(T::default())
            }
        }
    }

    /// Fetch one record in application naming
    pub async fn get_record(
        &self,
        kind: EntityKind,
        id: &str,
        policy: ReadPolicy,
    ) -> DbServiceResult<Option<Record>> {
        if !kind.is_replicated() {
            return self
                .read_secondary_only(kind, "get", policy, self.secondary.get(kind, id))
                .await;
        }
        self.read_with_fallback(
            kind,
            "fetch",
            policy,
            async {
                Ok::<_, StoreError>(
                    self.primary
                        .fetch(kind, id)
                        .await?
                        .map(record_to_app_naming),
                )
            },
            || self.secondary.get(kind, id),
        )
        .await
    }

    /// Records matching an application-named filter
    pub async fn query_records(
        &self,
        kind: EntityKind,
        filter: &RecordFilter,
        policy: ReadPolicy,
    ) -> DbServiceResult<Vec<Record>> {
        if !kind.is_replicated() {
            return self
                .read_secondary_only(kind, "query", policy, self.secondary.query(kind, filter))
                .await;
        }
        let primary_filter = filter.map_fields(to_primary_key);
        self.read_with_fallback(
            kind,
            "fetch_where",
            policy,
            async {
                Ok::<_, StoreError>(
                    self.primary
                        .fetch_where(kind, &primary_filter)
                        .await?
                        .into_iter()
                        .map(record_to_app_naming)
                        .collect(),
                )
            },
            || self.secondary.query(kind, filter),
        )
        .await
    }

    /// Record with children embedded (`units` / `lessonIds` / `questionIds`)
    pub async fn get_record_with_joins(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> DbServiceResult<Option<Record>> {
        if !kind.is_replicated() {
            return self.get_record(kind, id, ReadPolicy::BestEffort).await;
        }
        self.read_with_fallback(
            kind,
            "fetch_with_joins",
            ReadPolicy::BestEffort,
            async {
                Ok::<_, StoreError>(
                    self.primary
                        .fetch_with_joins(kind, id)
                        .await?
                        .map(mirror_document),
                )
            },
            || self.mirror_with_joins(kind, id),
        )
        .await
    }

    /// Rebuild joins from mirror documents
    async fn mirror_with_joins(&self, kind: EntityKind, id: &str) -> StoreResult<Option<Record>> {
        let Some(mut record) = self.secondary.get(kind, id).await? else {
            return Ok(None);
        };
        match kind {
            EntityKind::Curriculum => {
                let mut units = self
                    .secondary
                    .query(EntityKind::Unit, &RecordFilter::by("curriculumId", id))
                    .await?;
                sort_documents_by_position(&mut units);
                let mut joined = Vec::with_capacity(units.len());
                for mut unit in units {
                    let unit_id = EntityKind::Unit
                        .record_id(&unit)
                        .unwrap_or_default()
                        .to_string();
                    unit.insert("lessonIds".to_string(), self.mirror_lesson_ids(&unit_id).await?);
                    joined.push(Value::Object(unit));
                }
                record.insert("units".to_string(), Value::Array(joined));
            }
            EntityKind::Unit => {
                record.insert("lessonIds".to_string(), self.mirror_lesson_ids(id).await?);
            }
            _ => {}
        }
        Ok(Some(record))
    }

    async fn mirror_lesson_ids(&self, unit_id: &str) -> StoreResult<Value> {
        let mut lessons = self
            .secondary
            .query(EntityKind::Lesson, &RecordFilter::by("unitId", unit_id))
            .await?;
        sort_documents_by_position(&mut lessons);
        Ok(Value::Array(
            lessons
                .into_iter()
                .filter_map(|lesson| lesson.get("id").cloned())
                .collect(),
        ))
    }

    /// Children removed by the relational cascade, gathered before deleting
    async fn cascade_targets(&self, kind: EntityKind, id: &str) -> Vec<(EntityKind, String)> {
        let mut targets = Vec::new();
        let mut pending = vec![(kind, id.to_string())];
        while let Some((parent_kind, parent_id)) = pending.pop() {
            for child in EntityKind::ALL {
                let Some(parent) = child.parent().filter(|parent| parent.kind == parent_kind) else {
                    continue;
                };
                let filter = RecordFilter::by(parent.column, parent_id.as_str());
                match self
                    .timed(self.primary.backend(), "fetch_where", self.primary.fetch_where(child, &filter))
                    .await
                {
                    Ok(children) => {
                        for record in children {
                            if let Some(child_id) = child.record_id(&record) {
                                targets.push((child, child_id.to_string()));
                                pending.push((child, child_id.to_string()));
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Could not list {} children of {} {}: {}",
                            child,
                            parent_kind,
                            parent_id,
                            e
                        );
                    }
                }
            }
        }
        targets
    }

    /// Owners whose join list names this record, gathered before deleting
    ///
    /// Reads the relational store; if that fails, the mirror's copies are
    /// scanned instead since those are the documents that would go stale.
    async fn join_owners(&self, kind: EntityKind, id: &str) -> Vec<(EntityKind, String)> {
        let Some((owner, list)) = kind.referenced_by() else {
            return Vec::new();
        };
        let everything = RecordFilter::new();
        let (records, field) = match self
            .timed(self.primary.backend(), "fetch_where", self.primary.fetch_where(owner, &everything))
            .await
        {
            Ok(records) => (records, list.to_string()),
            Err(e) => {
                tracing::warn!("Could not list {} referencing {} {}: {}", owner, kind, id, e);
                match self
                    .timed(self.secondary.backend(), "query", self.secondary.query(owner, &everything))
                    .await
                {
                    Ok(documents) => (documents, to_app_key(list)),
                    Err(e) => {
                        tracing::warn!("Mirror scan of {} failed as well: {}", owner, e);
                        return Vec::new();
                    }
                }
            }
        };
        records
            .iter()
            .filter(|record| {
                record
                    .get(&field)
                    .and_then(Value::as_array)
                    .is_some_and(|ids| ids.iter().any(|value| value.as_str() == Some(id)))
            })
            .filter_map(|record| owner.record_id(record).map(|owner_id| (owner, owner_id.to_string())))
            .collect()
    }

    /// Copy the relational version of a record into the mirror
    ///
    /// Any failure leaves the key in the drift ledger for the reconciler.
    async fn refresh_mirror(&self, kind: EntityKind, id: &str) -> MirrorOutcome {
        let applied = match self
            .timed(self.primary.backend(), "fetch", self.primary.fetch(kind, id))
            .await
        {
            Ok(Some(record)) => {
                self.timed(
                    self.secondary.backend(),
                    "set",
                    self.secondary.set(kind, id, mirror_document(record)),
                )
                .await
            }
            Ok(None) => self
                .timed(self.secondary.backend(), "delete", self.secondary.delete(kind, id))
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };
        match applied {
            Ok(()) => {
                self.ledger.clear(kind, id).await;
                MirrorOutcome::Mirrored
            }
            Err(e) => {
                tracing::warn!("Mirror refresh failed for {} {}: {}", kind, id, e);
                let reason = e.to_string();
                self.record_drift(kind, id, &reason).await;
                MirrorOutcome::Failed(reason)
            }
        }
    }

    async fn mirror_delete(&self, kind: EntityKind, id: &str) -> MirrorOutcome {
        match self
            .timed(self.secondary.backend(), "delete", self.secondary.delete(kind, id))
            .await
        {
            Ok(_) => {
                self.ledger.clear(kind, id).await;
                MirrorOutcome::Mirrored
            }
            Err(e) => {
                tracing::warn!("Mirror delete failed for {} {}: {}", kind, id, e);
                let reason = e.to_string();
                self.record_drift(kind, id, &reason).await;
                MirrorOutcome::Failed(reason)
            }
        }
    }

    /// Authoritative delete first, then best-effort mirror delete
    ///
    /// Children cascaded by the relational store are removed from the
    /// mirror as well, and owners whose join list lost the id (quizzes
    /// losing a question) are re-mirrored from the relational store.
    pub async fn delete_record(&self, kind: EntityKind, id: &str) -> DbServiceResult<DeleteOutcome> {
        if !kind.is_replicated() {
            let existed = self
                .timed(self.secondary.backend(), "delete", self.secondary.delete(kind, id))
                .await
                .map_err(|e| DbServiceError::secondary_write(kind, id, e))?;
            return Ok(DeleteOutcome {
                existed,
                mirror: MirrorOutcome::Skipped,
            });
        }

        let cascaded = self.cascade_targets(kind, id).await;
        let owners = self.join_owners(kind, id).await;
        let existed = self
            .timed(self.primary.backend(), "delete", self.primary.delete(kind, id))
            .await
            .map_err(|e| {
                tracing::error!("Primary delete failed for {} {}: {}", kind, id, e);
                DbServiceError::primary_delete(kind, id, e)
            })?;

        let mirror = self.mirror_delete(kind, id).await;
        for (child_kind, child_id) in cascaded {
            self.mirror_delete(child_kind, &child_id).await;
        }
        for (owner_kind, owner_id) in owners {
            self.refresh_mirror(owner_kind, &owner_id).await;
        }
        Ok(DeleteOutcome { existed, mirror })
    }

    //
    // TYPED ENTITY OPERATIONS
    //

    pub async fn get<E: Entity>(&self, id: &str) -> DbServiceResult<Option<E>> {
        self.get_with::<E>(id, ReadPolicy::BestEffort).await
    }

    async fn get_with<E: Entity>(&self, id: &str, policy: ReadPolicy) -> DbServiceResult<Option<E>> {
        self.get_record(E::KIND, id, policy)
            .await?
            .map(|record| E::from_record(record).map_err(|e| DbServiceError::decode(E::KIND, e)))
            .transpose()
    }

    pub async fn save<E: Entity>(&self, entity: &E) -> DbServiceResult<()> {
        self.save_entity(entity).await.map(|_| ())
    }

    /// Save and report what happened to the mirror copy
    pub async fn save_entity<E: Entity>(&self, entity: &E) -> DbServiceResult<WriteOutcome> {
        let record = entity
            .to_record()
            .map_err(|e| DbServiceError::invalid_record(E::KIND, e.to_string()))?;
        self.save_record(E::KIND, record).await
    }

    pub async fn delete<E: Entity>(&self, id: &str) -> DbServiceResult<bool> {
        Ok(self.delete_record(E::KIND, id).await?.existed)
    }

    pub async fn list_where<E: Entity>(&self, filter: &RecordFilter) -> DbServiceResult<Vec<E>> {
        self.list_with::<E>(filter, ReadPolicy::BestEffort).await
    }

    async fn list_with<E: Entity>(
        &self,
        filter: &RecordFilter,
        policy: ReadPolicy,
    ) -> DbServiceResult<Vec<E>> {
        self.query_records(E::KIND, filter, policy)
            .await?
            .into_iter()
            .map(|record| E::from_record(record).map_err(|e| DbServiceError::decode(E::KIND, e)))
            .collect()
    }

    // users

    pub async fn get_user(&self, uid: &str) -> DbServiceResult<Option<User>> {
        self.get(uid).await
    }

    pub async fn save_user(&self, user: &User) -> DbServiceResult<()> {
        self.save(user).await
    }

    pub async fn delete_user(&self, uid: &str) -> DbServiceResult<bool> {
        self.delete::<User>(uid).await
    }

    /// Registration: fails with `Conflict` if the uid is taken
    ///
    /// The existence check reads the relational store strictly; without it
    /// the check cannot be trusted and the error is returned.
    pub async fn create_user(&self, user: &User) -> DbServiceResult<()> {
        if self
            .get_with::<User>(&user.uid, ReadPolicy::Strict)
            .await?
            .is_some()
        {
            return Err(DbServiceError::conflict(EntityKind::User, &user.uid));
        }
        self.save(user).await
    }

    pub async fn get_users_by_role(&self, role: UserRole) -> DbServiceResult<Vec<User>> {
        self.list_where(&RecordFilter::by("role", role.as_str())).await
    }

    /// Auth-sensitive lookup; never answered from the mirror
    pub async fn find_user_by_email(&self, email: &str) -> DbServiceResult<Option<User>> {
        let users = self
            .list_with::<User>(&RecordFilter::by("email", email).limit(1), ReadPolicy::Strict)
            .await?;
        Ok(users.into_iter().next())
    }

    // curricula

    pub async fn get_curriculum(&self, id: &str) -> DbServiceResult<Option<Curriculum>> {
        self.get(id).await
    }

    pub async fn save_curriculum(&self, curriculum: &Curriculum) -> DbServiceResult<()> {
        self.save(curriculum).await
    }

    pub async fn delete_curriculum(&self, id: &str) -> DbServiceResult<bool> {
        self.delete::<Curriculum>(id).await
    }

    pub async fn get_curriculum_with_units(
        &self,
        id: &str,
    ) -> DbServiceResult<Option<CurriculumWithUnits>> {
        self.get_record_with_joins(EntityKind::Curriculum, id)
            .await?
            .map(|record| {
                serde_json::from_value(Value::Object(record))
                    .map_err(|e| DbServiceError::decode(EntityKind::Curriculum, e))
            })
            .transpose()
    }

    pub async fn list_curricula_by_grade(&self, grade: &str) -> DbServiceResult<Vec<Curriculum>> {
        self.list_where(&RecordFilter::by("grade", grade)).await
    }

    // units

    pub async fn get_unit(&self, id: &str) -> DbServiceResult<Option<Unit>> {
        self.get(id).await
    }

    pub async fn save_unit(&self, unit: &Unit) -> DbServiceResult<()> {
        self.save(unit).await
    }

    pub async fn delete_unit(&self, id: &str) -> DbServiceResult<bool> {
        self.delete::<Unit>(id).await
    }

    pub async fn get_units_by_curriculum(&self, curriculum_id: &str) -> DbServiceResult<Vec<Unit>> {
        let mut units: Vec<Unit> = self
            .list_where(&RecordFilter::by("curriculumId", curriculum_id))
            .await?;
        sort_by_position(&mut units, |unit| (unit.position, unit.id.as_str()));
        Ok(units)
    }

    // lessons

    pub async fn get_lesson(&self, id: &str) -> DbServiceResult<Option<Lesson>> {
        self.get(id).await
    }

    pub async fn save_lesson(&self, lesson: &Lesson) -> DbServiceResult<()> {
        self.save(lesson).await
    }

    pub async fn delete_lesson(&self, id: &str) -> DbServiceResult<bool> {
        self.delete::<Lesson>(id).await
    }

    pub async fn get_lessons_by_unit(&self, unit_id: &str) -> DbServiceResult<Vec<Lesson>> {
        let mut lessons: Vec<Lesson> = self.list_where(&RecordFilter::by("unitId", unit_id)).await?;
        sort_by_position(&mut lessons, |lesson| (lesson.position, lesson.id.as_str()));
        Ok(lessons)
    }

    // questions

    pub async fn get_question(&self, id: &str) -> DbServiceResult<Option<Question>> {
        self.get(id).await
    }

    pub async fn save_question(&self, question: &Question) -> DbServiceResult<()> {
        self.save(question).await
    }

    pub async fn delete_question(&self, id: &str) -> DbServiceResult<bool> {
        self.delete::<Question>(id).await
    }

    // quizzes

    pub async fn get_quiz(&self, id: &str) -> DbServiceResult<Option<Quiz>> {
        self.get(id).await
    }

    /// Questions must already exist; the relation rejects unknown ids
    pub async fn save_quiz(&self, quiz: &Quiz) -> DbServiceResult<()> {
        self.save(quiz).await
    }

    pub async fn delete_quiz(&self, id: &str) -> DbServiceResult<bool> {
        self.delete::<Quiz>(id).await
    }

    /// Quiz plus its questions in relation order; unresolvable ids are skipped
    pub async fn get_quiz_with_questions(
        &self,
        quiz_id: &str,
    ) -> DbServiceResult<Option<QuizWithQuestions>> {
        let Some(quiz) = self.get_quiz(quiz_id).await? else {
            return Ok(None);
        };

        let mut questions = Vec::with_capacity(quiz.question_ids.len());
        for question_id in &quiz.question_ids {
            match self.get_question(question_id).await? {
                Some(question) => questions.push(question),
                None => tracing::warn!(
                    "Quiz {} references missing question {}",
                    quiz_id,
                    question_id
                ),
            }
        }
        Ok(Some(QuizWithQuestions { quiz, questions }))
    }

    // attempts

    pub async fn get_quiz_attempt(&self, id: &str) -> DbServiceResult<Option<QuizAttempt>> {
        self.get(id).await
    }

    pub async fn save_quiz_attempt(&self, attempt: &QuizAttempt) -> DbServiceResult<()> {
        self.save(attempt).await
    }

    pub async fn get_attempts_by_user(&self, user_id: &str) -> DbServiceResult<Vec<QuizAttempt>> {
        self.list_where(&RecordFilter::by("userId", user_id)).await
    }

    pub async fn get_attempts_by_quiz(&self, quiz_id: &str) -> DbServiceResult<Vec<QuizAttempt>> {
        self.list_where(&RecordFilter::by("quizId", quiz_id)).await
    }

    // interactions

    pub async fn record_interaction(&self, event: &InteractionEvent) -> DbServiceResult<()> {
        self.save(event).await
    }

    /// Oldest first
    pub async fn get_interactions_by_lesson(
        &self,
        lesson_id: &str,
    ) -> DbServiceResult<Vec<InteractionEvent>> {
        let mut events: Vec<InteractionEvent> =
            self.list_where(&RecordFilter::by("lessonId", lesson_id)).await?;
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(events)
    }

    // settings

    pub async fn set_maintenance_mode(
        &self,
        mode: &MaintenanceMode,
        updated_by: Option<&str>,
    ) -> DbServiceResult<()> {
        let value = serde_json::to_value(mode)
            .map_err(|e| DbServiceError::invalid_record(EntityKind::AppSetting, e.to_string()))?;
        self.save(&AppSetting {
            id: MAINTENANCE_SETTING_ID.to_string(),
            value,
            updated_by: updated_by.map(str::to_string),
            updated_at: Some(Utc::now()),
        })
        .await
    }

    /// Disabled when unset or unreadable
    pub async fn get_maintenance_mode(&self) -> DbServiceResult<MaintenanceMode> {
        Ok(self
            .get::<AppSetting>(MAINTENANCE_SETTING_ID)
            .await?
            .map(|setting| MaintenanceMode::from_setting_value(&setting.value))
            .unwrap_or_default())
    }

    // live events

    pub async fn publish_live_event(&self, event: &LiveEvent) -> DbServiceResult<()> {
        self.save(event).await
    }

    pub async fn get_live_events(&self, topic: &str) -> DbServiceResult<Vec<LiveEvent>> {
        let mut events: Vec<LiveEvent> = self.list_where(&RecordFilter::by("topic", topic)).await?;
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(events)
    }
}

fn sort_documents_by_position(documents: &mut [Record]) {
    documents.sort_by(|a, b| {
        let key = |record: &Record| {
            (
                record.get("position").and_then(Value::as_i64).unwrap_or(0),
                record
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            )
        };
        key(a).cmp(&key(b))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_prepare_strips_nulls_and_derived_fields() {
        let (id, prepared) = DbService::prepare(
            EntityKind::Curriculum,
            record(json!({"id": "c1", "title": "Math", "grade": null, "units": []})),
        )
        .unwrap();

        assert_eq!(id, "c1");
        assert_eq!(prepared, record(json!({"id": "c1", "title": "Math"})));
    }

    #[test]
    fn test_prepare_dedupes_join_ids_keeping_first_occurrence() {
        let (_, prepared) = DbService::prepare(
            EntityKind::Quiz,
            record(json!({"id": "quiz_1", "questionIds": ["q2", "q1", "q2", "q3", "q1"]})),
        )
        .unwrap();

        assert_eq!(prepared["questionIds"], json!(["q2", "q1", "q3"]));
    }

    #[test]
    fn test_prepare_requires_kind_specific_id() {
        let result = DbService::prepare(EntityKind::User, record(json!({"id": "u1", "name": "x"})));
        assert!(matches!(result, Err(DbServiceError::InvalidRecord { .. })));
    }

    #[test]
    fn test_sort_documents_by_position_then_id() {
        let mut documents = vec![
            record(json!({"id": "b", "position": 1})),
            record(json!({"id": "c"})),
            record(json!({"id": "a", "position": 1})),
        ];
        sort_documents_by_position(&mut documents);
        let ids: Vec<_> = documents.iter().map(|d| d["id"].clone()).collect();
        assert_eq!(ids, vec![json!("c"), json!("a"), json!("b")]);
    }
}

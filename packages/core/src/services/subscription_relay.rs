//! Subscription Relay
//!
//! Relays live change feeds from whichever store is authoritative for a feed
//! to registered callbacks, enriching each record with joined data first
//! (an actor id resolved to a display name, a curriculum id to its title).
//!
//! Each subscription is one tokio task reading a store change stream. The
//! relay owns a registry of every open subscription; a subscription stays
//! open until its [`SubscriptionHandle`] is unsubscribed or
//! [`SubscriptionRelay::close_all`] runs. Dropping a handle does not close
//! the feed.
//!
//! Enrichment never drops an event: a missing id, a failed lookup or a
//! missing display field writes the enrichment's placeholder instead.

use crate::db::naming::{record_to_app_naming, to_primary_key};
use crate::db::with_timeout;
use crate::db::{ChangeAction, ChangeEvent, StoreError};
use crate::models::{EntityKind, Record, RecordFilter, MAINTENANCE_SETTING_ID};
use crate::services::db_service::{DbService, ReadPolicy};
use crate::services::error::{DbServiceError, DbServiceResult};
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::AbortHandle;

/// Which store a feed listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedSource {
    /// Relational store watch; records arrive in underscore naming and are
    /// translated before delivery
    Primary,
    /// Document store subscription
    Secondary,
}

/// Resolve an id field of each record against another entity
#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    /// Field of the relayed record holding the id to resolve
    pub id_field: String,
    /// Entity the id refers to
    pub target: EntityKind,
    /// Field of the target entity to copy
    pub source_field: String,
    /// Field written onto the relayed record
    pub display_field: String,
    pub placeholder: String,
}

impl Enrichment {
    pub fn new(
        id_field: impl Into<String>,
        target: EntityKind,
        source_field: impl Into<String>,
        display_field: impl Into<String>,
        placeholder: impl Into<String>,
    ) -> Self {
        Self {
            id_field: id_field.into(),
            target,
            source_field: source_field.into(),
            display_field: display_field.into(),
            placeholder: placeholder.into(),
        }
    }
}

/// A feed: one kind on one store, narrowed by an application-named filter
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSpec {
    /// `collection:key`
    pub topic: String,
    pub kind: EntityKind,
    pub source: FeedSource,
    pub filter: RecordFilter,
    pub enrichments: Vec<Enrichment>,
}

impl FeedSpec {
    /// Feed on `kind` scoped to `key`; the topic is `collection:key`
    pub fn new(kind: EntityKind, key: &str, source: FeedSource, filter: RecordFilter) -> Self {
        Self {
            topic: format!("{}:{}", kind.table(), key),
            kind,
            source,
            filter,
            enrichments: Vec::new(),
        }
    }

    pub fn enrich(mut self, enrichment: Enrichment) -> Self {
        self.enrichments.push(enrichment);
        self
    }
}

/// A change delivered to a subscriber, in application naming
#[derive(Debug, Clone, PartialEq)]
pub struct RelayedEvent {
    pub topic: String,
    pub kind: EntityKind,
    pub action: ChangeAction,
    pub id: String,
    /// Enriched record; `None` for removals without prior state
    pub record: Option<Record>,
}

pub type FeedCallback = Arc<dyn Fn(RelayedEvent) + Send + Sync>;

struct OpenFeed {
    topic: String,
    active: Arc<AtomicBool>,
    abort: AbortHandle,
}

type Registry = Arc<Mutex<HashMap<u64, OpenFeed>>>;

fn release(registry: &Registry, id: u64) {
    if let Ok(mut feeds) = registry.lock() {
        feeds.remove(&id);
    }
}

/// Cancels one subscription
///
/// `unsubscribe` is idempotent: the first call stops callbacks and releases
/// the store subscription, later calls do nothing.
pub struct SubscriptionHandle {
    id: u64,
    topic: String,
    active: Arc<AtomicBool>,
    abort: AbortHandle,
    registry: Registry,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop the feed and release its store subscription
    ///
    /// Events not yet handed to the callback are dropped. On a multi-threaded
    /// runtime a callback that already passed its active check may still run
    /// once after this returns. Calling it from inside the callback is
    /// allowed.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.abort.abort();
        release(&self.registry, self.id);
        tracing::debug!("Unsubscribed from {}", self.topic);
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Live feed multiplexer over a [`DbService`]
pub struct SubscriptionRelay {
    service: Arc<DbService>,
    registry: Registry,
    next_id: AtomicU64,
}

impl SubscriptionRelay {
    pub fn new(service: Arc<DbService>) -> Self {
        Self {
            service,
            registry: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open subscriptions
    pub fn active_count(&self) -> usize {
        self.registry.lock().map(|feeds| feeds.len()).unwrap_or(0)
    }

    /// Topics with an open subscription (one entry per subscription)
    pub fn active_topics(&self) -> Vec<String> {
        self.registry
            .lock()
            .map(|feeds| feeds.values().map(|feed| feed.topic.clone()).collect())
            .unwrap_or_default()
    }

    /// Close every open subscription
    pub fn close_all(&self) {
        let feeds: Vec<OpenFeed> = match self.registry.lock() {
            Ok(mut feeds) => feeds.drain().map(|(_, feed)| feed).collect(),
            Err(_) => return,
        };
        for feed in &feeds {
            feed.active.store(false, Ordering::SeqCst);
            feed.abort.abort();
        }
        if !feeds.is_empty() {
            tracing::info!("Closed {} subscriptions", feeds.len());
        }
    }

    /// Open a feed and relay its enriched events to `callback`
    ///
    /// Returns once the store subscription is established; every change
    /// committed after that point is delivered.
    pub async fn subscribe<F>(&self, spec: FeedSpec, callback: F) -> DbServiceResult<SubscriptionHandle>
    where
        F: Fn(RelayedEvent) + Send + Sync + 'static,
    {
        let timeout = self.service.config().operation_timeout();
        let stream = match spec.source {
            FeedSource::Primary => {
                let primary = self.service.primary();
                let filter = spec.filter.map_fields(to_primary_key);
                with_timeout(primary.backend(), "watch", timeout, primary.watch(spec.kind, &filter))
                    .await
            }
            FeedSource::Secondary => {
                let secondary = self.service.secondary();
                with_timeout(
                    secondary.backend(),
                    "subscribe",
                    timeout,
                    secondary.subscribe(spec.kind, &spec.filter),
                )
                .await
            }
        }
        .map_err(|e| DbServiceError::subscription(&spec.topic, e))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let active = Arc::new(AtomicBool::new(true));
        let callback: FeedCallback = Arc::new(callback);
        let topic = spec.topic.clone();

        // hold the registry lock across spawn so the task cannot release
        // itself before it is registered
        let mut feeds = self.registry.lock().map_err(|_| {
            DbServiceError::subscription(&topic, StoreError::unavailable("relay", "registry poisoned"))
        })?;

        let task = {
            let service = self.service.clone();
            let active = active.clone();
            let registry = self.registry.clone();
            let mut stream = stream;
            tokio::spawn(async move {
                while let Some(item) = stream.next().await {
                    let event = match item {
                        Ok(event) => event,
                        Err(e) => {
                            tracing::warn!("Feed {} received a store error: {}", spec.topic, e);
                            continue;
                        }
                    };
                    let relayed = relay_event(&service, &spec, event).await;
                    if !active.load(Ordering::SeqCst) {
                        break;
                    }
                    callback(relayed);
                }
                tracing::debug!("Feed {} ended", spec.topic);
                active.store(false, Ordering::SeqCst);
                release(&registry, id);
            })
        };
        let abort = task.abort_handle();

        feeds.insert(
            id,
            OpenFeed {
                topic: topic.clone(),
                active: active.clone(),
                abort: abort.clone(),
            },
        );
        drop(feeds);

        tracing::debug!("Subscribed to {} (subscription {})", topic, id);
        Ok(SubscriptionHandle {
            id,
            topic,
            active,
            abort,
            registry: self.registry.clone(),
        })
    }

    /// New and changed interaction events of one lesson, with `userName`
    pub async fn subscribe_to_lesson_interactions<F>(
        &self,
        lesson_id: &str,
        callback: F,
    ) -> DbServiceResult<SubscriptionHandle>
    where
        F: Fn(RelayedEvent) + Send + Sync + 'static,
    {
        let spec = FeedSpec::new(
            EntityKind::InteractionEvent,
            lesson_id,
            FeedSource::Secondary,
            RecordFilter::by("lessonId", lesson_id),
        )
        .enrich(self.user_name("userId", "userName"));
        self.subscribe(spec, callback).await
    }

    /// Maintenance-mode setting, with `updatedByName`
    pub async fn subscribe_to_maintenance_mode<F>(&self, callback: F) -> DbServiceResult<SubscriptionHandle>
    where
        F: Fn(RelayedEvent) + Send + Sync + 'static,
    {
        let spec = FeedSpec::new(
            EntityKind::AppSetting,
            MAINTENANCE_SETTING_ID,
            FeedSource::Secondary,
            RecordFilter::by("id", MAINTENANCE_SETTING_ID),
        )
        .enrich(self.user_name("updatedBy", "updatedByName"));
        self.subscribe(spec, callback).await
    }

    /// One user document from the relational store, with `curriculumTitle`
    pub async fn subscribe_to_user<F>(&self, uid: &str, callback: F) -> DbServiceResult<SubscriptionHandle>
    where
        F: Fn(RelayedEvent) + Send + Sync + 'static,
    {
        let spec = FeedSpec::new(
            EntityKind::User,
            uid,
            FeedSource::Primary,
            RecordFilter::by("uid", uid),
        )
        .enrich(Enrichment::new(
            "curriculumId",
            EntityKind::Curriculum,
            "title",
            "curriculumTitle",
            "",
        ));
        self.subscribe(spec, callback).await
    }

    /// Live events published on `topic`, with `userName`
    pub async fn subscribe_to_live_events<F>(
        &self,
        topic: &str,
        callback: F,
    ) -> DbServiceResult<SubscriptionHandle>
    where
        F: Fn(RelayedEvent) + Send + Sync + 'static,
    {
        let spec = FeedSpec::new(
            EntityKind::LiveEvent,
            topic,
            FeedSource::Secondary,
            RecordFilter::by("topic", topic),
        )
        .enrich(self.user_name("userId", "userName"));
        self.subscribe(spec, callback).await
    }

    fn user_name(&self, id_field: &str, display_field: &str) -> Enrichment {
        Enrichment::new(
            id_field,
            EntityKind::User,
            "name",
            display_field,
            self.service.config().unknown_user_placeholder.clone(),
        )
    }
}

impl Drop for SubscriptionRelay {
    fn drop(&mut self) {
        self.close_all();
    }
}

async fn relay_event(service: &DbService, spec: &FeedSpec, event: ChangeEvent) -> RelayedEvent {
    let mut record = match spec.source {
        FeedSource::Primary => event.record.map(record_to_app_naming),
        FeedSource::Secondary => event.record,
    };
    if event.action != ChangeAction::Removed {
        if let Some(record) = record.as_mut() {
            for enrichment in &spec.enrichments {
                apply_enrichment(service, enrichment, record).await;
            }
        }
    }
    RelayedEvent {
        topic: spec.topic.clone(),
        kind: event.kind,
        action: event.action,
        id: event.id,
        record,
    }
}

async fn apply_enrichment(service: &DbService, enrichment: &Enrichment, record: &mut Record) {
    let resolved = match record.get(&enrichment.id_field).and_then(Value::as_str) {
        Some(id) => match service
            .get_record(enrichment.target, id, ReadPolicy::BestEffort)
            .await
        {
            Ok(Some(target)) => target.get(&enrichment.source_field).cloned(),
            Ok(None) => {
                tracing::debug!("Enrichment target {} {} not found", enrichment.target, id);
                None
            }
            Err(e) => {
                tracing::debug!("Enrichment lookup of {} {} failed: {}", enrichment.target, id, e);
                None
            }
        },
        None => None,
    };
    let value = resolved
        .filter(|value| !value.is_null())
        .unwrap_or_else(|| Value::String(enrichment.placeholder.clone()));
    record.insert(enrichment.display_field.clone(), value);
}

//! Change Events for Store Watches
//!
//! This module defines the change events both store backends emit when a
//! record is added, changed, or removed. Watchers (the subscription relay,
//! tests, the sync binary) consume them as a [`ChangeStream`] without
//! coupling to a particular backend.
//!
//! # Event Flow
//!
//! 1. A store commits a write or delete
//! 2. A [`ChangeEvent`] is published on the store's broadcast channel
//! 3. Each watch stream filters by collection and record id
//! 4. Subscribers receive the record in the store's own naming

use crate::db::error::StoreResult;
use crate::models::{EntityKind, Record, RecordFilter};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

/// What happened to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Added,
    Changed,
    Removed,
}

/// A single record change
///
/// `record` is `None` for removals when the backend cannot report the prior
/// state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub kind: EntityKind,
    pub action: ChangeAction,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Record>,
}

impl ChangeEvent {
    pub fn new(kind: EntityKind, action: ChangeAction, id: impl Into<String>, record: Option<Record>) -> Self {
        Self {
            kind,
            action,
            id: id.into(),
            record,
        }
    }

    /// Get a string representation of the event type
    pub fn event_type(&self) -> String {
        let action = match self.action {
            ChangeAction::Added => "added",
            ChangeAction::Changed => "changed",
            ChangeAction::Removed => "removed",
        };
        format!("{}:{}", self.kind, action)
    }

    /// Whether this event belongs to a feed on `kind` narrowed by `filter`
    ///
    /// A non-empty filter needs the record to decide, so removals that carry
    /// no prior state only reach unfiltered feeds.
    pub fn matches(&self, kind: EntityKind, filter: &RecordFilter) -> bool {
        if self.kind != kind {
            return false;
        }
        if filter.conditions().is_empty() {
            return true;
        }
        self.record
            .as_ref()
            .is_some_and(|record| filter.matches(record))
    }
}

/// Live change feed returned by `watch` / `subscribe`
pub type ChangeStream = BoxStream<'static, StoreResult<ChangeEvent>>;

/// Narrow a backend's broadcast feed to one collection and filter
///
/// Lagged receivers skip the missed events and keep going.
pub(crate) fn filtered_broadcast(
    backend: &'static str,
    rx: broadcast::Receiver<ChangeEvent>,
    kind: EntityKind,
    filter: RecordFilter,
) -> ChangeStream {
    BroadcastStream::new(rx)
        .filter_map(move |item| {
            let keep = match item {
                Ok(event) if event.matches(kind, &filter) => Some(Ok(event)),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        "{} change feed for {} lagged, skipped {} events",
                        backend,
                        kind,
                        skipped
                    );
                    None
                }
            };
            futures::future::ready(keep)
        })
        .boxed()
}

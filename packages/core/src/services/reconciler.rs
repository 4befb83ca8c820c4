//! Background Mirror Reconciler
//!
//! Repairs drift between the relational store and its document mirror:
//!
//! - `DriftLedger` remembers every key whose mirror write or delete failed
//! - `Reconciliation` re-reads each drifted key from the relational store and
//!   re-applies it to the mirror (set when present, delete when gone)
//! - `MirrorReconciler` runs reconciliation in the background, woken by the
//!   orchestrator whenever drift is recorded and on a periodic tick
//!
//! ## Event-Driven Model
//!
//! 1. A mirror write fails; the orchestrator records drift and calls `wake()`
//! 2. Rapid wakes are coalesced into a single pass
//! 3. Keys that are still unreachable stay in the ledger for the next tick
//! 4. The tick is a no-op while the ledger is empty

use crate::db::naming::{record_to_app_naming, to_app_naming};
use crate::db::{DocumentStore, PrimaryStore, StoreError};
use crate::models::{EntityKind, Record, RecordFilter};
use crate::services::error::{DbServiceError, DbServiceResult};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DriftKey {
    pub kind: EntityKind,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriftEntry {
    pub first_seen: DateTime<Utc>,
    /// Failed attempts so far, including the original mirror write
    pub attempts: u32,
    pub last_error: String,
}

/// Keys whose mirror copy may differ from the relational store
#[derive(Debug, Default)]
pub struct DriftLedger {
    entries: Mutex<BTreeMap<DriftKey, DriftEntry>>,
}

impl DriftLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed mirror operation (or a failed repair of one)
    pub async fn record(&self, kind: EntityKind, id: &str, error: impl Into<String>) {
        let error = error.into();
        let mut entries = self.entries.lock().await;
        entries
            .entry(DriftKey {
                kind,
                id: id.to_string(),
            })
            .and_modify(|entry| {
                entry.attempts += 1;
                entry.last_error = error.clone();
            })
            .or_insert_with(|| DriftEntry {
                first_seen: Utc::now(),
                attempts: 1,
                last_error: error.clone(),
            });
    }

    /// Forget a key; returns whether it was drifted
    pub async fn clear(&self, kind: EntityKind, id: &str) -> bool {
        self.entries
            .lock()
            .await
            .remove(&DriftKey {
                kind,
                id: id.to_string(),
            })
            .is_some()
    }

    pub async fn get(&self, kind: EntityKind, id: &str) -> Option<DriftEntry> {
        self.entries
            .lock()
            .await
            .get(&DriftKey {
                kind,
                id: id.to_string(),
            })
            .cloned()
    }

    pub async fn contains(&self, kind: EntityKind, id: &str) -> bool {
        self.get(kind, id).await.is_some()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn keys(&self) -> Vec<DriftKey> {
        self.entries.lock().await.keys().cloned().collect()
    }
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Mirror documents rewritten from the relational store
    pub repaired: usize,
    /// Mirror documents deleted because the record no longer exists
    pub removed: usize,
    /// Keys still drifted after this pass
    pub still_drifted: usize,
}

/// Outcome of a full mirror rebuild
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncReport {
    pub mirrored: usize,
    /// Mirror documents with no relational counterpart, deleted
    pub orphans_removed: usize,
    /// Writes that failed and were recorded as drift
    pub failed: usize,
}

/// Mirror document for a record read from the relational store
pub(crate) fn mirror_document(record: Record) -> Record {
    let mut document = record_to_app_naming(record);
    if let Some(units) = document.remove("units") {
        document.insert("units".to_string(), to_app_naming(units));
    }
    document
}

/// One-shot repair operations over a store pair and its drift ledger
#[derive(Clone)]
pub struct Reconciliation {
    primary: Arc<dyn PrimaryStore>,
    secondary: Arc<dyn DocumentStore>,
    ledger: Arc<DriftLedger>,
}

impl Reconciliation {
    pub fn new(
        primary: Arc<dyn PrimaryStore>,
        secondary: Arc<dyn DocumentStore>,
        ledger: Arc<DriftLedger>,
    ) -> Self {
        Self {
            primary,
            secondary,
            ledger,
        }
    }

    pub fn ledger(&self) -> &Arc<DriftLedger> {
        &self.ledger
    }

    /// Re-apply every drifted key from the relational store to the mirror
    pub async fn run_once(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for key in self.ledger.keys().await {
            let DriftKey { kind, id } = key;
            let applied: Result<bool, StoreError> = match self.primary.fetch(kind, &id).await {
                Ok(Some(record)) => self
                    .secondary
                    .set(kind, &id, mirror_document(record))
                    .await
                    .map(|_| true),
                Ok(None) => self.secondary.delete(kind, &id).await.map(|_| false),
                Err(e) => Err(e),
            };

            match applied {
                Ok(present) => {
                    self.ledger.clear(kind, &id).await;
                    if present {
                        report.repaired += 1;
                    } else {
                        report.removed += 1;
                    }
                    tracing::debug!("Reconciled mirror for {} {}", kind, id);
                }
                Err(e) => {
                    tracing::debug!("Mirror for {} {} still drifted: {}", kind, id, e);
                    self.ledger.record(kind, &id, e.to_string()).await;
                    report.still_drifted += 1;
                }
            }
        }

        if report.repaired + report.removed > 0 || report.still_drifted > 0 {
            tracing::info!(
                "Reconcile pass: {} repaired, {} removed, {} still drifted",
                report.repaired,
                report.removed,
                report.still_drifted
            );
        }
        report
    }

    /// Rebuild the mirror of every replicated kind from the relational store
    ///
    /// Fails only when the relational store cannot be read. Mirror failures
    /// are recorded as drift and counted.
    pub async fn resync_all(&self) -> DbServiceResult<ResyncReport> {
        let mut report = ResyncReport::default();

        for kind in EntityKind::ALL.into_iter().filter(EntityKind::is_replicated) {
            let records = self
                .primary
                .fetch_where(kind, &RecordFilter::new())
                .await
                .map_err(|e| DbServiceError::primary_read(kind, e))?;

            let mut primary_ids = BTreeSet::new();
            for record in records {
                let Some(id) = kind.record_id(&record).map(str::to_string) else {
                    continue;
                };
                match self.secondary.set(kind, &id, mirror_document(record)).await {
                    Ok(()) => {
                        self.ledger.clear(kind, &id).await;
                        report.mirrored += 1;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to mirror {} {} during resync: {}", kind, id, e);
                        self.ledger.record(kind, &id, e.to_string()).await;
                        report.failed += 1;
                    }
                }
                primary_ids.insert(id);
            }

            let mirrored_ids = match self.secondary.list_ids(kind).await {
                Ok(ids) => ids,
                Err(e) => {
                    tracing::warn!("Failed to list mirror {} documents: {}", kind, e);
                    continue;
                }
            };
            for orphan in mirrored_ids.iter().filter(|id| !primary_ids.contains(*id)) {
                match self.secondary.delete(kind, orphan).await {
                    Ok(_) => report.orphans_removed += 1,
                    Err(e) => {
                        tracing::warn!("Failed to remove orphan {} {}: {}", kind, orphan, e);
                        self.ledger.record(kind, orphan, e.to_string()).await;
                        report.failed += 1;
                    }
                }
            }
        }

        tracing::info!(
            "Resync complete: {} mirrored, {} orphans removed, {} failed",
            report.mirrored,
            report.orphans_removed,
            report.failed
        );
        Ok(report)
    }
}

/// Handle to wake the reconciler
///
/// Lightweight and cloneable; multiple wakes are coalesced into one pass.
#[derive(Clone)]
pub struct ReconcileWaker {
    trigger_tx: mpsc::Sender<()>,
}

impl ReconcileWaker {
    /// Non-blocking; a full channel means a pass is already pending
    pub fn wake(&self) {
        match self.trigger_tx.try_send(()) {
            Ok(_) => {
                tracing::debug!("MirrorReconciler wake signal sent");
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("MirrorReconciler already has pending wake");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("MirrorReconciler has shut down, wake ignored");
            }
        }
    }
}

/// Background task that drains the drift ledger
pub struct MirrorReconciler {
    waker: ReconcileWaker,
    _shutdown_tx: mpsc::Sender<()>,
}

impl MirrorReconciler {
    /// Spawn the reconcile loop
    ///
    /// Runs a pass on every wake and on every `interval` tick while drift
    /// remains. Must be called from within a tokio runtime.
    pub fn start(reconciliation: Reconciliation, interval: Duration) -> Self {
        tracing::info!(
            "MirrorReconciler starting (tick every {}s)",
            interval.as_secs()
        );

        let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(4);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown_rx.recv() => {
                        tracing::info!("MirrorReconciler shutting down");
                        break;
                    }

                    Some(_) = trigger_rx.recv() => {
                        tracing::debug!("MirrorReconciler woken up by trigger");
                        while trigger_rx.try_recv().is_ok() {}
                        reconciliation.run_once().await;
                    }

                    _ = ticker.tick() => {
                        if !reconciliation.ledger().is_empty().await {
                            reconciliation.run_once().await;
                        }
                    }
                }
            }
        });

        Self {
            waker: ReconcileWaker { trigger_tx },
            _shutdown_tx: shutdown_tx,
        }
    }

    /// Cloneable waker for the orchestrator
    pub fn waker(&self) -> ReconcileWaker {
        self.waker.clone()
    }

    pub fn wake(&self) {
        self.waker.wake();
    }

    /// Stop the background task; an in-progress pass finishes first
    pub fn shutdown(self) {
        tracing::info!("Shutting down MirrorReconciler");
        // dropping the shutdown sender ends the loop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ledger_counts_attempts_per_key() {
        let ledger = DriftLedger::new();
        ledger.record(EntityKind::User, "u1", "offline").await;
        ledger.record(EntityKind::User, "u1", "timed out").await;
        ledger.record(EntityKind::Lesson, "u1", "offline").await;

        let entry = ledger.get(EntityKind::User, "u1").await.unwrap();
        assert_eq!(entry.attempts, 2);
        assert_eq!(entry.last_error, "timed out");
        assert_eq!(ledger.len().await, 2);

        assert!(ledger.clear(EntityKind::User, "u1").await);
        assert!(!ledger.clear(EntityKind::User, "u1").await);
        assert!(ledger.contains(EntityKind::Lesson, "u1").await);
    }

    #[test]
    fn test_waker_coalesces_multiple_wakes() {
        let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(2);
        let waker = ReconcileWaker { trigger_tx };

        waker.wake();
        waker.wake();
        waker.wake();

        let mut count = 0;
        while trigger_rx.try_recv().is_ok() {
            count += 1;
        }
        assert!(count <= 2, "Excess wakes should be coalesced, got {}", count);
    }

    #[test]
    fn test_waker_handles_closed_channel() {
        let (trigger_tx, trigger_rx) = mpsc::channel::<()>(2);
        let waker = ReconcileWaker { trigger_tx };
        drop(trigger_rx);
        waker.wake();
    }

    #[test]
    fn test_mirror_document_translates_nested_units() {
        let record = serde_json::json!({
            "id": "c1",
            "author_id": "t1",
            "units": [{"id": "u1", "curriculum_id": "c1", "lesson_ids": ["l1"]}]
        });
        let document = mirror_document(record.as_object().cloned().unwrap());

        assert_eq!(document["authorId"], "t1");
        assert_eq!(document["units"][0]["lessonIds"], serde_json::json!(["l1"]));
        assert_eq!(document["units"][0]["curriculumId"], "c1");
    }
}

//! Business Services
//!
//! This module contains the orchestration layer on top of the stores:
//!
//! - `DbService` - write-through with best-effort mirror, reads with fallback
//! - `SubscriptionRelay` - enriched live feeds with explicit unsubscribe handles
//! - `MirrorReconciler` - background repair of mirror drift
//!
//! Services own every fatal vs non-fatal decision; the stores below them only
//! report failures.

pub mod db_service;
pub mod error;
pub mod reconciler;
pub mod subscription_relay;

pub use db_service::{DbService, DeleteOutcome, HealthReport, MirrorOutcome, ReadPolicy, WriteOutcome};
pub use error::{DbServiceError, DbServiceResult};
pub use reconciler::{
    DriftEntry, DriftKey, DriftLedger, MirrorReconciler, ReconcileReport, ReconcileWaker,
    Reconciliation, ResyncReport,
};
pub use subscription_relay::{
    Enrichment, FeedCallback, FeedSource, FeedSpec, RelayedEvent, SubscriptionHandle,
    SubscriptionRelay,
};

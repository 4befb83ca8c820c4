//! Database Layer
//!
//! This module handles all store interactions:
//!
//! - `PrimaryStore`: the relational system of record (Turso/libsql)
//! - `DocumentStore`: the real-time document mirror (SurrealDB)
//! - Field naming translation between the application and the relational store
//! - Change events and watch streams shared by every backend
//! - In-memory backends with failure injection
//!
//! # Architecture
//!
//! LearnSpace writes every replicated entity to the relational store first
//! and mirrors it into the document store on a best-effort basis. The
//! orchestration lives in `services::DbService`; this layer only knows how
//! to store and watch records.

mod document_store;
mod error;
pub mod events;
mod memory_store;
pub mod naming;
mod options;
mod primary_store;
mod surreal_store;
mod turso_store;

pub use document_store::DocumentStore;
pub use error::{StoreError, StoreResult};
pub use events::{ChangeAction, ChangeEvent, ChangeStream};
pub use memory_store::{MemoryDocumentStore, MemoryPrimaryStore};
pub use options::StoreOptions;
pub use primary_store::PrimaryStore;
pub use surreal_store::SurrealStore;
pub use turso_store::TursoStore;

pub(crate) use error::with_timeout;

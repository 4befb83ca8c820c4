//! LearnSpace Core Data Layer
//!
//! This crate provides the data-access and synchronization layer for the
//! LearnSpace learning-management system.
//!
//! # Architecture
//!
//! - **Relational system of record**: libsql/Turso, one table per entity kind
//!   with enforced foreign keys
//! - **Document mirror**: embedded SurrealDB, camel-case documents used for
//!   real-time feeds and as a fallback read path
//! - **Write-through, mirror best-effort**: a failed mirror write never fails
//!   a save; drift is recorded and repaired in the background
//!
//! # Modules
//!
//! - [`models`] - Domain entities (User, Curriculum, Lesson, Quiz, etc.)
//! - [`db`] - Store traits, libsql and SurrealDB backends, naming translation
//! - [`services`] - DbService orchestration, subscription relay, reconciler
//! - [`config`] - Sync configuration

pub mod config;
pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::SyncConfig;
pub use models::*;
pub use services::*;

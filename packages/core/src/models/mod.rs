//! Data Models
//!
//! This module contains the data structures used throughout LearnSpace:
//!
//! - `EntityKind` / `Entity` - storage layout and the typed-entity contract
//! - `Record` / `RecordFilter` - the untyped shape every store boundary speaks
//! - Domain entities (User, Curriculum, Unit, Lesson, Quiz, ...)

mod entity;
mod learning;
mod record;

pub use entity::{Entity, EntityKind, ParentRef, Residency};
pub use learning::{
    AppSetting, Curriculum, CurriculumWithUnits, InteractionEvent, Lesson, LiveEvent,
    MaintenanceMode, Question, Quiz, QuizAttempt, QuizWithQuestions, Unit, UnitOutline, User,
    UserRole, MAINTENANCE_SETTING_ID,
};
pub use record::{Record, RecordFilter};

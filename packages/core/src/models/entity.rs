//! Entity Kinds and Storage Layout
//!
//! Every persisted record belongs to exactly one [`EntityKind`]. The kind
//! carries everything the stores need to know about a record without the
//! stores knowing the record's Rust type:
//!
//! - **Identifier field**: `uid` for users, `id` for everything else
//! - **Table / collection name**: shared by the relational and document stores
//! - **Parent reference**: the foreign key for nested entities
//!   (curriculum -> unit -> lesson, quiz -> attempt)
//! - **Join list**: quizzes carry `question_ids`, persisted through the
//!   `quiz_questions` relation table
//! - **Residency**: replicated to both stores, or document-store only
//!
//! Typed structs implement [`Entity`] to bind themselves to a kind.

use super::record::Record;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a kind's records live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// Primary store is the system of record; the document store mirrors it
    Replicated,
    /// Transient real-time data, written only to the document store
    SecondaryOnly,
}

/// Foreign-key reference from a nested entity to its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentRef {
    /// Parent entity kind
    pub kind: EntityKind,
    /// Column / field holding the parent id, in primary (underscore) naming
    pub column: &'static str,
}

/// All persisted entity kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Curriculum,
    Unit,
    Lesson,
    Question,
    Quiz,
    QuizAttempt,
    InteractionEvent,
    AppSetting,
    LiveEvent,
}

impl EntityKind {
    /// Every kind, parents before children (schema creation order)
    pub const ALL: [EntityKind; 10] = [
        EntityKind::User,
        EntityKind::Curriculum,
        EntityKind::Unit,
        EntityKind::Lesson,
        EntityKind::Question,
        EntityKind::Quiz,
        EntityKind::QuizAttempt,
        EntityKind::InteractionEvent,
        EntityKind::AppSetting,
        EntityKind::LiveEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Curriculum => "curriculum",
            EntityKind::Unit => "unit",
            EntityKind::Lesson => "lesson",
            EntityKind::Question => "question",
            EntityKind::Quiz => "quiz",
            EntityKind::QuizAttempt => "quiz_attempt",
            EntityKind::InteractionEvent => "interaction_event",
            EntityKind::AppSetting => "app_setting",
            EntityKind::LiveEvent => "live_event",
        }
    }

    /// Table name in the primary store and collection name in the document store
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::User => "users",
            EntityKind::Curriculum => "curricula",
            EntityKind::Unit => "units",
            EntityKind::Lesson => "lessons",
            EntityKind::Question => "questions",
            EntityKind::Quiz => "quizzes",
            EntityKind::QuizAttempt => "quiz_attempts",
            EntityKind::InteractionEvent => "interaction_events",
            EntityKind::AppSetting => "app_settings",
            EntityKind::LiveEvent => "live_events",
        }
    }

    /// Name of the identifier field (identical in both naming conventions)
    pub fn id_field(&self) -> &'static str {
        match self {
            EntityKind::User => "uid",
            _ => "id",
        }
    }

    pub fn parent(&self) -> Option<ParentRef> {
        match self {
            EntityKind::Unit => Some(ParentRef {
                kind: EntityKind::Curriculum,
                column: "curriculum_id",
            }),
            EntityKind::Lesson => Some(ParentRef {
                kind: EntityKind::Unit,
                column: "unit_id",
            }),
            EntityKind::QuizAttempt => Some(ParentRef {
                kind: EntityKind::Quiz,
                column: "quiz_id",
            }),
            _ => None,
        }
    }

    /// Id-list field persisted through a relation table (primary naming)
    pub fn join_list(&self) -> Option<&'static str> {
        match self {
            EntityKind::Quiz => Some("question_ids"),
            _ => None,
        }
    }

    /// The kind and join list that hold this kind's ids (primary naming)
    ///
    /// Deleting a referenced record rewrites the owner's list in the
    /// relational store.
    pub fn referenced_by(&self) -> Option<(EntityKind, &'static str)> {
        match self {
            EntityKind::Question => Some((EntityKind::Quiz, "question_ids")),
            _ => None,
        }
    }

    /// Fields reconstructed from joins on read and never stored (primary naming)
    pub fn derived_columns(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Curriculum => &["units"],
            EntityKind::Unit => &["lesson_ids"],
            _ => &[],
        }
    }

    pub fn residency(&self) -> Residency {
        match self {
            EntityKind::LiveEvent => Residency::SecondaryOnly,
            _ => Residency::Replicated,
        }
    }

    pub fn is_replicated(&self) -> bool {
        self.residency() == Residency::Replicated
    }

    /// Read the identifier out of a record, if present and a string
    pub fn record_id<'a>(&self, record: &'a Record) -> Option<&'a str> {
        record
            .get(self.id_field())
            .and_then(|value| value.as_str())
            .filter(|id| !id.is_empty())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed domain record bound to an [`EntityKind`]
///
/// Implementors serialize with camel-case field names; conversion to and
/// from [`Record`] goes through `serde_json`.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    const KIND: EntityKind;

    fn entity_id(&self) -> &str;

    fn to_record(&self) -> Result<Record, serde_json::Error> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(record) => Ok(record),
            other => Err(serde::ser::Error::custom(format!(
                "{} did not serialize to an object: {}",
                Self::KIND,
                other
            ))),
        }
    }

    fn from_record(record: Record) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(record))
    }
}

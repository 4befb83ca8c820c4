//! Learning Domain Entities
//!
//! Typed records for everything the application persists. Field names
//! serialize in camel-case (application naming); the data layer translates
//! to underscore naming only at the relational store boundary.
//!
//! Optional fields are omitted when unset so no store ever receives a
//! sentinel `null`.
//!
//! # Examples
//!
//! ```rust
//! use learnspace_core::models::{Entity, User, UserRole};
//!
//! let user = User::new("u1", "Sara", "sara@x.com", UserRole::Student);
//! let record = user.to_record().unwrap();
//! assert_eq!(record["uid"], "u1");
//! assert!(!record.contains_key("curriculumId"));
//! ```

use super::entity::{Entity, EntityKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Setting id under which the maintenance flag is stored
pub const MAINTENANCE_SETTING_ID: &str = "maintenance";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Student,
    Teacher,
    Parent,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Student => "student",
            UserRole::Teacher => "teacher",
            UserRole::Parent => "parent",
            UserRole::Admin => "admin",
        }
    }
}

/// Registered account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<String>,
    /// Curriculum the user is enrolled in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curriculum_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(
        uid: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
        role: UserRole,
    ) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
            email: email.into(),
            role,
            grade: None,
            curriculum_id: None,
            avatar_url: None,
            created_at: None,
        }
    }
}

impl Entity for User {
    const KIND: EntityKind = EntityKind::User;

    fn entity_id(&self) -> &str {
        &self.uid
    }
}

/// Top of the content hierarchy: curriculum -> unit -> lesson
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Curriculum {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(default)]
    pub published: bool,
}

impl Curriculum {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            grade: None,
            subject: None,
            author_id: None,
            published: false,
        }
    }
}

impl Entity for Curriculum {
    const KIND: EntityKind = EntityKind::Curriculum;

    fn entity_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub id: String,
    pub curriculum_id: String,
    pub title: String,
    #[serde(default)]
    pub position: i64,
}

impl Unit {
    pub fn new(
        id: impl Into<String>,
        curriculum_id: impl Into<String>,
        title: impl Into<String>,
        position: i64,
    ) -> Self {
        Self {
            id: id.into(),
            curriculum_id: curriculum_id.into(),
            title: title.into(),
            position,
        }
    }
}

impl Entity for Unit {
    const KIND: EntityKind = EntityKind::Unit;

    fn entity_id(&self) -> &str {
        &self.id
    }
}

/// A unit with the ids of its lessons, in position order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitOutline {
    #[serde(flatten)]
    pub unit: Unit,
    #[serde(default)]
    pub lesson_ids: Vec<String>,
}

/// A curriculum with its units embedded, in position order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurriculumWithUnits {
    #[serde(flatten)]
    pub curriculum: Curriculum,
    #[serde(default)]
    pub units: Vec<UnitOutline>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: String,
    pub unit_id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub position: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
}

impl Lesson {
    pub fn new(
        id: impl Into<String>,
        unit_id: impl Into<String>,
        title: impl Into<String>,
        position: i64,
    ) -> Self {
        Self {
            id: id.into(),
            unit_id: unit_id.into(),
            title: title.into(),
            content: String::new(),
            position,
            duration_minutes: None,
        }
    }
}

impl Entity for Lesson {
    const KIND: EntityKind = EntityKind::Lesson;

    fn entity_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    #[serde(default = "default_points")]
    pub points: u32,
}

fn default_points() -> u32 {
    1
}

impl Question {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            options: Vec::new(),
            correct_answer: None,
            points: default_points(),
        }
    }
}

impl Entity for Question {
    const KIND: EntityKind = EntityKind::Question;

    fn entity_id(&self) -> &str {
        &self.id
    }
}

/// Quiz; `question_ids` is persisted through the quiz/question relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lesson_id: Option<String>,
    #[serde(default)]
    pub question_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passing_score: Option<f64>,
}

impl Quiz {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            lesson_id: None,
            question_ids: Vec::new(),
            time_limit_minutes: None,
            passing_score: None,
        }
    }
}

impl Entity for Quiz {
    const KIND: EntityKind = EntityKind::Quiz;

    fn entity_id(&self) -> &str {
        &self.id
    }
}

/// A quiz together with its resolved questions, in relation order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizWithQuestions {
    pub quiz: Quiz,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttempt {
    pub id: String,
    pub quiz_id: String,
    pub user_id: String,
    pub score: f64,
    /// Question id -> submitted answer
    #[serde(default)]
    pub answers: serde_json::Map<String, Value>,
    pub submitted_at: DateTime<Utc>,
}

impl QuizAttempt {
    pub fn new(quiz_id: impl Into<String>, user_id: impl Into<String>, score: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            quiz_id: quiz_id.into(),
            user_id: user_id.into(),
            score,
            answers: serde_json::Map::new(),
            submitted_at: Utc::now(),
        }
    }
}

impl Entity for QuizAttempt {
    const KIND: EntityKind = EntityKind::QuizAttempt;

    fn entity_id(&self) -> &str {
        &self.id
    }
}

/// Learner activity inside a lesson (views, answers, hints, completions)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionEvent {
    pub id: String,
    pub lesson_id: String,
    pub user_id: String,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl InteractionEvent {
    pub fn new(
        lesson_id: impl Into<String>,
        user_id: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            lesson_id: lesson_id.into(),
            user_id: user_id.into(),
            event_type: event_type.into(),
            payload: Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

impl Entity for InteractionEvent {
    const KIND: EntityKind = EntityKind::InteractionEvent;

    fn entity_id(&self) -> &str {
        &self.id
    }
}

/// Application-wide key/value setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSetting {
    pub id: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Entity for AppSetting {
    const KIND: EntityKind = EntityKind::AppSetting;

    fn entity_id(&self) -> &str {
        &self.id
    }
}

/// Value stored under the `maintenance` setting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceMode {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl MaintenanceMode {
    /// Read the flag out of a setting value; malformed values count as disabled
    pub fn from_setting_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}

/// Ephemeral real-time signal (presence, typing, live reactions)
///
/// Lives only in the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveEvent {
    pub id: String,
    /// Feed key, e.g. a lesson id or classroom id
    pub topic: String,
    pub user_id: String,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl LiveEvent {
    pub fn new(
        topic: impl Into<String>,
        user_id: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic: topic.into(),
            user_id: user_id.into(),
            event_type: event_type.into(),
            payload: Value::Null,
            created_at: Utc::now(),
        }
    }
}

impl Entity for LiveEvent {
    const KIND: EntityKind = EntityKind::LiveEvent;

    fn entity_id(&self) -> &str {
        &self.id
    }
}

//! Untyped Records and Equality Filters
//!
//! [`Record`] is the entity-agnostic shape that crosses every store boundary.
//! [`RecordFilter`] describes a conjunction of field equality conditions,
//! evaluated natively by the stores where they can and by
//! [`RecordFilter::matches`] everywhere else.

use serde_json::Value;

/// A flat key-value record (one row / one document)
pub type Record = serde_json::Map<String, Value>;

/// Conjunction of `field == value` conditions plus an optional result limit
///
/// A `Value::Null` condition matches records where the field is absent or null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    conditions: Vec<(String, Value)>,
    limit: Option<usize>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a single-condition filter
    pub fn by(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new().eq(field, value)
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    pub fn max_results(&self) -> Option<usize> {
        self.limit
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.limit.is_none()
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.conditions
            .iter()
            .all(|(field, expected)| match (record.get(field), expected) {
                (None, Value::Null) => true,
                (Some(actual), expected) => actual == expected,
                (None, _) => false,
            })
    }

    /// Rewrite every condition's field name (e.g. into primary naming)
    pub fn map_fields(&self, rename: impl Fn(&str) -> String) -> Self {
        Self {
            conditions: self
                .conditions
                .iter()
                .map(|(field, value)| (rename(field), value.clone()))
                .collect(),
            limit: self.limit,
        }
    }

    /// Truncate a result set to the filter's limit
    pub fn truncate(&self, mut records: Vec<Record>) -> Vec<Record> {
        if let Some(limit) = self.limit {
            records.truncate(limit);
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = RecordFilter::new();
        assert!(filter.matches(&record(json!({"role": "student"}))));
        assert!(filter.matches(&Record::new()));
    }

    #[test]
    fn test_conditions_are_conjunctive() {
        let filter = RecordFilter::by("role", "student").eq("grade", "5");

        assert!(filter.matches(&record(json!({"role": "student", "grade": "5"}))));
        assert!(!filter.matches(&record(json!({"role": "student", "grade": "6"}))));
        assert!(!filter.matches(&record(json!({"grade": "5"}))));
    }

    #[test]
    fn test_null_condition_matches_missing_field() {
        let filter = RecordFilter::by("lessonId", Value::Null);

        assert!(filter.matches(&record(json!({"id": "q1"}))));
        assert!(filter.matches(&record(json!({"id": "q1", "lessonId": null}))));
        assert!(!filter.matches(&record(json!({"id": "q1", "lessonId": "l1"}))));
    }

    #[test]
    fn test_map_fields_keeps_values_and_limit() {
        let filter = RecordFilter::by("quizId", "quiz_1").limit(3);
        let mapped = filter.map_fields(|field| field.to_uppercase());

        assert_eq!(mapped.conditions(), &[("QUIZID".to_string(), json!("quiz_1"))]);
        assert_eq!(mapped.max_results(), Some(3));
    }
}

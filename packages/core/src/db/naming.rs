//! Field Naming Translation
//!
//! The application speaks camel-case (`curriculumId`), the relational store
//! speaks underscore naming (`curriculum_id`). Translation happens only at
//! the primary-store boundary and only on top-level keys; nested values are
//! carried through untouched.
//!
//! Both directions are pure and total: they never fail, and anything that is
//! not an object (null, scalars) passes through unchanged. Top-level arrays
//! are translated element-wise.
//!
//! ```rust
//! use learnspace_core::db::naming::{to_app_key, to_primary_key};
//!
//! assert_eq!(to_primary_key("curriculumId"), "curriculum_id");
//! assert_eq!(to_app_key("curriculum_id"), "curriculumId");
//! ```

use crate::models::Record;
use serde_json::Value;

/// `curriculumId` -> `curriculum_id`
///
/// Each uppercase character becomes `_` plus its lowercase form. A leading
/// uppercase character does not produce a leading underscore, and an existing
/// underscore is never doubled.
pub fn to_primary_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (index, ch) in key.chars().enumerate() {
        if ch.is_uppercase() {
            if index > 0 && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// `curriculum_id` -> `curriculumId`
///
/// An underscore followed by a character uppercases that character; a run
/// of inner underscores counts as one. Leading underscores are kept as-is and
/// a trailing run becomes a single `_`, so translating twice is a no-op.
pub fn to_app_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut leading = true;
    let mut upper_next = false;
    for ch in key.chars() {
        if ch == '_' {
            if leading {
                out.push('_');
            } else {
                upper_next = true;
            }
            continue;
        }
        leading = false;
        if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    if upper_next {
        out.push('_');
    }
    out
}

fn rename_keys(record: Record, rename: fn(&str) -> String) -> Record {
    let mut out = Record::with_capacity(record.len());
    for (key, value) in record {
        let renamed = rename(&key);
        let already_target = renamed == key;
        match out.get(&renamed) {
            // a key that was already in target form beats a translated duplicate
            Some(_) if !already_target => {
                tracing::warn!(
                    "Dropping field '{}': collides with existing field '{}'",
                    key,
                    renamed
                );
            }
            Some(_) => {
                tracing::warn!(
                    "Field '{}' overrides a translated duplicate of the same name",
                    key
                );
                out.insert(renamed, value);
            }
            None => {
                out.insert(renamed, value);
            }
        }
    }
    out
}

/// Translate a record's top-level keys into primary (underscore) naming
pub fn record_to_primary_naming(record: Record) -> Record {
    rename_keys(record, to_primary_key)
}

/// Translate a record's top-level keys into application (camel-case) naming
pub fn record_to_app_naming(record: Record) -> Record {
    rename_keys(record, to_app_key)
}

/// Translate any value into primary naming (objects and arrays of objects)
pub fn to_primary_naming(value: Value) -> Value {
    match value {
        Value::Object(record) => Value::Object(record_to_primary_naming(record)),
        Value::Array(items) => Value::Array(items.into_iter().map(to_primary_naming).collect()),
        other => other,
    }
}

/// Translate any value into application naming (objects and arrays of objects)
pub fn to_app_naming(value: Value) -> Value {
    match value {
        Value::Object(record) => Value::Object(record_to_app_naming(record)),
        Value::Array(items) => Value::Array(items.into_iter().map(to_app_naming).collect()),
        other => other,
    }
}

/// Whether a field name can be spliced into a SQL or SurrealQL path
pub(crate) fn is_safe_field(field: &str) -> bool {
    !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Drop top-level fields whose value is null
pub fn clean_record(mut record: Record) -> Record {
    record.retain(|_, value| !value.is_null());
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_key_translation_both_ways() {
        assert_eq!(to_primary_key("curriculumId"), "curriculum_id");
        assert_eq!(to_primary_key("avatarUrl"), "avatar_url");
        assert_eq!(to_primary_key("uid"), "uid");
        assert_eq!(to_app_key("curriculum_id"), "curriculumId");
        assert_eq!(to_app_key("time_limit_minutes"), "timeLimitMinutes");
        assert_eq!(to_app_key("uid"), "uid");
    }

    #[test]
    fn test_edge_keys() {
        assert_eq!(to_primary_key("Name"), "name");
        assert_eq!(to_primary_key("already_snake"), "already_snake");
        assert_eq!(to_primary_key("snake_Mixed"), "snake_mixed");
        assert_eq!(to_app_key("_private"), "_private");
        assert_eq!(to_app_key("trailing_"), "trailing_");
        assert_eq!(to_app_key("double__under"), "doubleUnder");
        assert_eq!(to_app_key("trailing__"), "trailing_");
    }

    #[test]
    fn test_translation_is_idempotent() {
        for key in [
            "curriculum_id",
            "double__under",
            "a___b",
            "_private",
            "__dunder",
            "trailing_",
            "trailing__",
            "snake_Mixed",
            "curriculumId",
        ] {
            let app = to_app_key(key);
            assert_eq!(to_app_key(&app), app, "to_app_key not idempotent on {}", key);
            let primary = to_primary_key(key);
            assert_eq!(to_primary_key(&primary), primary, "to_primary_key not idempotent on {}", key);
        }
    }

    #[test]
    fn test_only_top_level_keys_are_translated() {
        let app = json!({
            "userId": "u1",
            "answers": {"questionOne": "a"},
            "payload": [{"innerKey": 1}]
        });

        let primary = to_primary_naming(app);

        assert_eq!(
            primary,
            json!({
                "user_id": "u1",
                "answers": {"questionOne": "a"},
                "payload": [{"innerKey": 1}]
            })
        );
    }

    #[test]
    fn test_round_trip_for_camel_case_records() {
        let app = record(json!({
            "uid": "u1",
            "curriculumId": "c1",
            "avatarUrl": "https://x/y.png",
            "createdAt": "2024-01-01T00:00:00Z"
        }));

        let back = record_to_app_naming(record_to_primary_naming(app.clone()));
        assert_eq!(back, app);
    }

    #[test]
    fn test_arrays_and_scalars_pass_through() {
        assert_eq!(
            to_app_naming(json!([{"unit_id": "u"}, {"unit_id": "v"}])),
            json!([{"unitId": "u"}, {"unitId": "v"}])
        );
        assert_eq!(to_app_naming(Value::Null), Value::Null);
        assert_eq!(to_primary_naming(json!("plain")), json!("plain"));
        assert_eq!(to_primary_naming(json!({})), json!({}));
    }

    #[test]
    fn test_collision_keeps_key_already_in_target_form() {
        let primary = record_to_primary_naming(record(json!({
            "curriculumId": "translated",
            "curriculum_id": "native"
        })));
        assert_eq!(primary.len(), 1);
        assert_eq!(primary["curriculum_id"], "native");
    }

    #[test]
    fn test_filter_fields_are_restricted_to_identifiers() {
        assert!(is_safe_field("curriculum_id"));
        assert!(is_safe_field("questionIds"));
        assert!(!is_safe_field("role') OR 1=1 --"));
        assert!(!is_safe_field("body.role"));
        assert!(!is_safe_field(""));
    }

    #[test]
    fn test_clean_record_strips_nulls() {
        let cleaned = clean_record(record(json!({"id": "l1", "content": null, "position": 0})));
        assert_eq!(cleaned, record(json!({"id": "l1", "position": 0})));
    }
}

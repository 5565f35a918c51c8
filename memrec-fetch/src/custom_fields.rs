//! Custom field extraction from raw person objects
//!
//! The platform reports custom fields in three different shapes depending on
//! endpoint and API vintage. Each shape gets one extractor function tried in
//! order; the first non-null value wins. Field names are compared by display
//! name, case-insensitive and whitespace-trimmed.

use serde_json::Value;

type ShapeExtractor = fn(&Value, &str) -> Option<String>;

/// Extractors in priority order
const SHAPES: &[ShapeExtractor] = &[from_custom_fields, from_custom_field_values, from_profile];

/// Value of the custom field named `field_name`, or None when the person
/// carries no such field (or it is null) in any known shape.
pub fn custom_field_value(person: &Value, field_name: &str) -> Option<String> {
    SHAPES
        .iter()
        .find_map(|extract| extract(person, field_name))
}

/// Shape 1: `custom_fields: [{name, value}]`
fn from_custom_fields(person: &Value, field_name: &str) -> Option<String> {
    value_from_entries(person.get("custom_fields"), field_name)
}

/// Shape 2: `custom_field_values: [{name, value}]` or
/// `[{custom_field: {name}, value}]`
fn from_custom_field_values(person: &Value, field_name: &str) -> Option<String> {
    let entries = person.get("custom_field_values")?.as_array()?;
    entries.iter().find_map(|entry| {
        let name = entry.get("name").and_then(Value::as_str).or_else(|| {
            entry
                .get("custom_field")
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)
        });
        if name_matches(name, field_name) {
            scalar_string(entry.get("value"))
        } else {
            None
        }
    })
}

/// Shape 3: `profile.custom_fields: [{name, value}]`
fn from_profile(person: &Value, field_name: &str) -> Option<String> {
    value_from_entries(
        person.get("profile").and_then(|p| p.get("custom_fields")),
        field_name,
    )
}

fn value_from_entries(list: Option<&Value>, field_name: &str) -> Option<String> {
    let entries = list?.as_array()?;
    entries.iter().find_map(|entry| {
        let name = entry.get("name").and_then(Value::as_str);
        if name_matches(name, field_name) {
            scalar_string(entry.get("value"))
        } else {
            None
        }
    })
}

fn name_matches(entry_name: Option<&str>, wanted: &str) -> bool {
    match entry_name {
        Some(name) => name.trim().eq_ignore_ascii_case(wanted.trim()),
        None => false,
    }
}

/// Stringify a scalar field value; null, missing, and compound values stay None.
fn scalar_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

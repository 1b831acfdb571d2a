//! Schema derivation - projects the canonical schema into per-action schemas.
//!
//! | Action | Dropped fields | Required | Extra keys |
//! |--------|----------------|----------|------------|
//! | create / replace | `$create: false` | canonical | rejected |
//! | update | `$update: false` | none | rejected |
//! | view | `$view: false`, `$virtual: true` | none | tolerated |
//!
//! Flag annotations never survive into a derived schema.

use serde_json::{Map, Value};

use crate::error::SchemaError;
use crate::flags::{get_field_flags, is_object_schema, join_path, Flag};
use crate::types::{ValidateAction, FLAG_KEYS};

/// Derive the schema for `action`, recursing into nested object fields.
///
/// # Errors
///
/// Returns `SchemaError::InvalidFlag` if a flag annotation is malformed.
pub fn copy_fields(action: ValidateAction, schema: &Value) -> Result<Value, SchemaError> {
    copy_object(action, schema, "")
}

/// Derive the schema for `action` and prefix its title with `[action]`.
///
/// # Errors
///
/// Returns `SchemaError::InvalidFlag` if a flag annotation is malformed.
pub fn copy_schema(action: ValidateAction, schema: &Value) -> Result<Value, SchemaError> {
    let mut derived = copy_fields(action, schema)?;

    if let Some(Value::String(title)) = schema.get("title") {
        if let Value::Object(map) = &mut derived {
            map.insert(
                "title".to_string(),
                Value::String(format!("[{}] {}", action, title)),
            );
        }
    }

    Ok(derived)
}

/// Recursively remove all flag annotations from a schema.
pub fn strip_flags(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !FLAG_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), strip_flags(v)))
                .collect(),
        ),
        Value::Array(arr) => Value::Array(arr.iter().map(strip_flags).collect()),
        other => other.clone(),
    }
}

// --- Internal implementation ---

fn copy_object(action: ValidateAction, schema: &Value, path: &str) -> Result<Value, SchemaError> {
    let Some(map) = schema.as_object() else {
        return Ok(schema.clone());
    };

    let mut result = Map::new();
    let mut required: Vec<String> = map
        .get("required")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    for (key, value) in map {
        if FLAG_KEYS.contains(&key.as_str()) {
            continue;
        }

        match key.as_str() {
            "properties" => {
                let resolved = copy_properties(action, value, path, &mut required)?;
                result.insert(key.clone(), resolved);
            }
            // Rebuilt below from the surviving fields
            "required" | "additionalProperties" => continue,
            _ => {
                result.insert(key.clone(), strip_flags(value));
            }
        }
    }

    if matches!(action, ValidateAction::Update | ValidateAction::View) {
        required.clear();
    }

    if !required.is_empty() || map.contains_key("required") {
        result.insert(
            "required".to_string(),
            Value::Array(required.into_iter().map(Value::String).collect()),
        );
    }

    if action != ValidateAction::View && map.contains_key("properties") {
        result.insert("additionalProperties".to_string(), Value::Bool(false));
    }

    Ok(Value::Object(result))
}

fn copy_properties(
    action: ValidateAction,
    value: &Value,
    path: &str,
    required: &mut Vec<String>,
) -> Result<Value, SchemaError> {
    let Some(props) = value.as_object() else {
        return Ok(value.clone());
    };

    let mut result = Map::new();

    for (name, prop) in props {
        let prop_path = join_path(path, name);
        let flags = get_field_flags(prop, &prop_path)?;
        let flag = flags.for_action(action);

        let dropped =
            flag.is_false() || (action == ValidateAction::View && flags.virtual_field);
        if dropped {
            required.retain(|r| r != name);
            continue;
        }

        let mut field = if is_object_schema(prop) {
            copy_object(action, prop, &prop_path)?
        } else {
            strip_flags(prop)
        };

        if let (Flag::Permission(permission), Value::Object(field_map)) = (flag, &mut field) {
            let note = format!("#permission({})", permission);
            let description = match field_map.get("description").and_then(Value::as_str) {
                Some(existing) => format!("{} {}", existing, note),
                None => note,
            };
            field_map.insert("description".to_string(), Value::String(description));
        }

        result.insert(name.clone(), field);
    }

    Ok(Value::Object(result))
}

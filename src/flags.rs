//! Per-field behavioral flags.
//!
//! Flags are read from `$`-prefixed annotations on property schemas and
//! merged over a fixed default set:
//!
//! | Flag | JSON value | Default |
//! |------|------------|---------|
//! | `$virtual` | bool | `false` |
//! | `$create` | bool or permission name | `true` |
//! | `$update` | bool or permission name | `true` |
//! | `$view` | bool or permission name | `true` |
//! | `$search` | bool | `false` |
//! | `$filter` | bool | `true` |
//! | `$sort` | bool | `true` |
//!
//! View transforms are functions and are attached through
//! [`FlagTable::attach_transform`] instead of JSON.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::acl::Actor;
use crate::error::SchemaError;
use crate::types::{json_type_name, ValidateAction};

/// Function rewriting a field value for output: `(value, actor, record)`.
pub type ViewTransform = Arc<dyn Fn(&Value, Option<&Actor>, &Value) -> Value + Send + Sync>;

/// Value of a single action flag.
#[derive(Clone)]
pub enum Flag {
    Bool(bool),
    Permission(String),
    Transform(ViewTransform),
}

impl Flag {
    pub fn is_false(&self) -> bool {
        matches!(self, Flag::Bool(false))
    }

    /// Everything except an explicit `false` counts as set.
    pub fn is_truthy(&self) -> bool {
        !self.is_false()
    }

    pub fn permission(&self) -> Option<&str> {
        match self {
            Flag::Permission(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flag::Bool(b) => write!(f, "Bool({})", b),
            Flag::Permission(p) => write!(f, "Permission({:?})", p),
            Flag::Transform(_) => f.write_str("Transform(..)"),
        }
    }
}

impl PartialEq for Flag {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Flag::Bool(a), Flag::Bool(b)) => a == b,
            (Flag::Permission(a), Flag::Permission(b)) => a == b,
            (Flag::Transform(a), Flag::Transform(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Effective flags of one field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFlags {
    pub virtual_field: bool,
    pub create: Flag,
    pub update: Flag,
    pub view: Flag,
    pub search: bool,
    pub filter: bool,
    pub sort: bool,
}

impl Default for FieldFlags {
    fn default() -> Self {
        Self {
            virtual_field: false,
            create: Flag::Bool(true),
            update: Flag::Bool(true),
            view: Flag::Bool(true),
            search: false,
            filter: true,
            sort: true,
        }
    }
}

impl FieldFlags {
    /// The flag consulted for `action`.
    pub fn for_action(&self, action: ValidateAction) -> &Flag {
        match action.flag_action() {
            ValidateAction::Update => &self.update,
            ValidateAction::View => &self.view,
            _ => &self.create,
        }
    }

    /// `(name, set)` pairs in declaration order, used for flag path tables.
    fn truthy(&self) -> [(&'static str, bool); 7] {
        [
            ("virtual", self.virtual_field),
            ("create", self.create.is_truthy()),
            ("update", self.update.is_truthy()),
            ("view", self.view.is_truthy()),
            ("search", self.search),
            ("filter", self.filter),
            ("sort", self.sort),
        ]
    }
}

/// Read the effective flags of one property schema.
///
/// Explicit annotations override the defaults; unset flags keep them.
///
/// # Errors
///
/// Returns `SchemaError::InvalidFlag` if an annotation has the wrong type.
pub fn get_field_flags(prop: &Value, path: &str) -> Result<FieldFlags, SchemaError> {
    let mut flags = FieldFlags::default();
    let Some(map) = prop.as_object() else {
        return Ok(flags);
    };

    if let Some(v) = map.get("$virtual") {
        flags.virtual_field = parse_bool(v, "$virtual", path)?;
    }
    if let Some(v) = map.get("$create") {
        flags.create = parse_action_flag(v, "$create", path)?;
    }
    if let Some(v) = map.get("$update") {
        flags.update = parse_action_flag(v, "$update", path)?;
    }
    if let Some(v) = map.get("$view") {
        flags.view = parse_action_flag(v, "$view", path)?;
    }
    if let Some(v) = map.get("$search") {
        flags.search = parse_bool(v, "$search", path)?;
    }
    if let Some(v) = map.get("$filter") {
        flags.filter = parse_bool(v, "$filter", path)?;
    }
    if let Some(v) = map.get("$sort") {
        flags.sort = parse_bool(v, "$sort", path)?;
    }

    Ok(flags)
}

/// For every flag, the dot paths of the fields where it is set.
///
/// Walks nested object fields; a nested object contributes both its own
/// path and its children's.
///
/// # Errors
///
/// Returns `SchemaError::InvalidFlag` if any annotation is malformed.
pub fn flag_paths(
    schema: &Value,
    prefix: &str,
) -> Result<BTreeMap<&'static str, Vec<String>>, SchemaError> {
    let mut result: BTreeMap<&'static str, Vec<String>> = BTreeMap::new();
    collect_flag_paths(schema, prefix, &mut result)?;
    Ok(result)
}

fn collect_flag_paths(
    schema: &Value,
    prefix: &str,
    out: &mut BTreeMap<&'static str, Vec<String>>,
) -> Result<(), SchemaError> {
    let Some(props) = properties(schema) else {
        return Ok(());
    };

    for (key, prop) in props {
        let path = join_path(prefix, key);
        let flags = get_field_flags(prop, &path)?;

        for (name, set) in flags.truthy() {
            let paths = out.entry(name).or_default();
            if set {
                paths.push(path.clone());
            }
        }

        if is_object_schema(prop) {
            collect_flag_paths(prop, &path, out)?;
        }
    }

    Ok(())
}

/// Side-table of effective flags keyed by field dot path.
///
/// Built once from the canonical schema; derived schemas never carry flags.
#[derive(Debug, Clone, Default)]
pub struct FlagTable {
    fields: BTreeMap<String, FieldFlags>,
}

impl FlagTable {
    /// # Errors
    ///
    /// Returns `SchemaError::InvalidFlag` if any annotation is malformed.
    pub fn from_schema(schema: &Value) -> Result<Self, SchemaError> {
        let mut table = FlagTable::default();
        table.collect(schema, "")?;
        Ok(table)
    }

    fn collect(&mut self, schema: &Value, prefix: &str) -> Result<(), SchemaError> {
        let Some(props) = properties(schema) else {
            return Ok(());
        };
        for (key, prop) in props {
            let path = join_path(prefix, key);
            let flags = get_field_flags(prop, &path)?;
            self.fields.insert(path.clone(), flags);
            if is_object_schema(prop) {
                self.collect(prop, &path)?;
            }
        }
        Ok(())
    }

    /// Flags for a field path. Unknown paths have no entry.
    pub fn get(&self, path: &str) -> Option<&FieldFlags> {
        self.fields.get(path)
    }

    /// Replace the `$view` flag of a field with a transform function.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::UnknownTransformField` if the path is not declared.
    pub fn attach_transform(
        &mut self,
        path: &str,
        transform: ViewTransform,
    ) -> Result<(), SchemaError> {
        let flags = self
            .fields
            .get_mut(path)
            .ok_or_else(|| SchemaError::UnknownTransformField {
                path: path.to_string(),
            })?;
        flags.view = Flag::Transform(transform);
        Ok(())
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

/// The `properties` map of an object schema.
pub fn properties(schema: &Value) -> Option<&Map<String, Value>> {
    schema.get("properties").and_then(Value::as_object)
}

/// True for schemas that declare nested properties.
pub fn is_object_schema(schema: &Value) -> bool {
    properties(schema).is_some()
}

/// Look up the property schema at a dot path.
pub fn field_schema<'a>(schema: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = schema;
    for part in path.split('.') {
        current = properties(current)?.get(part)?;
    }
    Some(current)
}

pub(crate) fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn parse_bool(value: &Value, flag: &str, path: &str) -> Result<bool, SchemaError> {
    value.as_bool().ok_or_else(|| SchemaError::InvalidFlag {
        path: path.to_string(),
        flag: flag.to_string(),
        expected: "boolean",
        actual: json_type_name(value).to_string(),
    })
}

fn parse_action_flag(value: &Value, flag: &str, path: &str) -> Result<Flag, SchemaError> {
    match value {
        Value::Bool(b) => Ok(Flag::Bool(*b)),
        Value::String(s) if !s.is_empty() => Ok(Flag::Permission(s.clone())),
        other => Err(SchemaError::InvalidFlag {
            path: path.to_string(),
            flag: flag.to_string(),
            expected: "boolean or permission name",
            actual: json_type_name(other).to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_when_no_annotations() {
        let flags = get_field_flags(&json!({ "type": "string" }), "name").unwrap();
        assert_eq!(flags, FieldFlags::default());
    }

    #[test]
    fn explicit_flags_override_defaults() {
        let prop = json!({
            "type": "number",
            "$update": "shop.manager",
            "$create": false,
            "$search": true
        });
        let flags = get_field_flags(&prop, "price").unwrap();
        assert_eq!(flags.update, Flag::Permission("shop.manager".into()));
        assert!(flags.create.is_false());
        assert!(flags.search);
        assert!(flags.filter);
        assert_eq!(flags.view, Flag::Bool(true));
    }

    #[test]
    fn replace_uses_create_flag() {
        let flags = get_field_flags(&json!({ "$create": false }), "id").unwrap();
        assert!(flags.for_action(ValidateAction::Replace).is_false());
        assert!(flags.for_action(ValidateAction::Update).is_truthy());
    }

    #[test]
    fn invalid_flag_type_errors() {
        let err = get_field_flags(&json!({ "$virtual": "yes" }), "pw").unwrap_err();
        assert!(matches!(
            err,
            SchemaError::InvalidFlag { flag, expected: "boolean", .. } if flag == "$virtual"
        ));

        let err = get_field_flags(&json!({ "$view": 3 }), "pw").unwrap_err();
        match err {
            SchemaError::InvalidFlag { actual, .. } => assert_eq!(actual, "number"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn flag_paths_walks_nested_objects() {
        let schema = json!({
            "type": "object",
            "properties": {
                "id": { "type": "integer", "$filter": false },
                "name": { "type": "string", "$search": true },
                "address": {
                    "type": "object",
                    "properties": {
                        "city": { "type": "string", "$search": true },
                        "zip": { "type": "string", "$sort": false }
                    }
                }
            }
        });
        let paths = flag_paths(&schema, "").unwrap();

        assert_eq!(paths["search"], vec!["name", "address.city"]);
        assert_eq!(
            paths["filter"],
            vec!["name", "address", "address.city", "address.zip"]
        );
        assert_eq!(paths["sort"], vec!["id", "name", "address", "address.city"]);
        assert!(paths["virtual"].is_empty());
    }

    #[test]
    fn flag_paths_with_prefix() {
        let schema = json!({
            "properties": { "a": { "type": "string", "$search": true } }
        });
        let paths = flag_paths(&schema, "root").unwrap();
        assert_eq!(paths["search"], vec!["root.a"]);
    }

    #[test]
    fn table_attaches_transforms() {
        let schema = json!({
            "properties": {
                "id": { "type": "integer" },
                "email": { "type": "string" }
            }
        });
        let mut table = FlagTable::from_schema(&schema).unwrap();
        let transform: ViewTransform = Arc::new(|_, _, _| json!("***"));
        table.attach_transform("email", transform).unwrap();

        let email = table.get("email").unwrap();
        assert!(matches!(email.view, Flag::Transform(_)));
        assert!(matches!(
            table.attach_transform("missing", Arc::new(|v, _, _| v.clone())),
            Err(SchemaError::UnknownTransformField { .. })
        ));
    }

    #[test]
    fn field_schema_follows_dot_paths() {
        let schema = json!({
            "properties": {
                "address": {
                    "type": "object",
                    "properties": { "city": { "type": "string" } }
                }
            }
        });
        let city = field_schema(&schema, "address.city").unwrap();
        assert_eq!(city["type"], "string");
        assert!(field_schema(&schema, "address.street").is_none());
        assert!(field_schema(&schema, "address.city.x").is_none());
    }
}

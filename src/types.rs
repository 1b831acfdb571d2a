//! Core types shared by the schema engine and the resource pipelines.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SchemaError;

/// Flag annotation keys recognised on property schemas.
pub const FLAG_KEYS: &[&str] = &[
    "$virtual", "$create", "$update", "$view", "$search", "$filter", "$sort",
];

/// JSON Schema keywords that legitimately start with `$`.
pub const SCHEMA_DOLLAR_KEYWORDS: &[&str] = &[
    "$schema",
    "$id",
    "$ref",
    "$defs",
    "$comment",
    "$anchor",
    "$dynamicRef",
    "$dynamicAnchor",
    "$vocabulary",
];

/// A persisted or incoming record. Always a JSON object at the pipeline edges.
pub type Record = Value;

/// Query strings, path params and headers as received from a transport.
pub type StringMap = BTreeMap<String, String>;

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Action a payload is validated for.
///
/// Each one owns a derived schema. `Replace` shares the `$create` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidateAction {
    Create,
    Replace,
    Update,
    View,
}

impl ValidateAction {
    pub const ALL: [ValidateAction; 4] = [
        ValidateAction::Create,
        ValidateAction::Replace,
        ValidateAction::Update,
        ValidateAction::View,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ValidateAction::Create => "create",
            ValidateAction::Replace => "replace",
            ValidateAction::Update => "update",
            ValidateAction::View => "view",
        }
    }

    /// The action whose flag governs this one (`replace` reads `$create`).
    pub fn flag_action(&self) -> ValidateAction {
        match self {
            ValidateAction::Replace => ValidateAction::Create,
            other => *other,
        }
    }
}

impl fmt::Display for ValidateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidateAction {
    type Err = SchemaError;

    /// Case-insensitive; anything outside the four schema actions is a
    /// programmer error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(ValidateAction::Create),
            "replace" => Ok(ValidateAction::Replace),
            "update" => Ok(ValidateAction::Update),
            "view" => Ok(ValidateAction::View),
            _ => Err(SchemaError::UnknownAction {
                action: s.to_string(),
            }),
        }
    }
}

/// CRUD action exposed by a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceAction {
    Get,
    Create,
    Update,
    Replace,
    Delete,
    List,
}

impl ResourceAction {
    pub const ALL: [ResourceAction; 6] = [
        ResourceAction::Get,
        ResourceAction::Create,
        ResourceAction::Update,
        ResourceAction::Replace,
        ResourceAction::Delete,
        ResourceAction::List,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceAction::Get => "get",
            ResourceAction::Create => "create",
            ResourceAction::Update => "update",
            ResourceAction::Replace => "replace",
            ResourceAction::Delete => "delete",
            ResourceAction::List => "list",
        }
    }

    /// Prefix of the coarse permission string checked for this action.
    ///
    /// Reads (`get`, `list`) are gated by `view.{name}`.
    pub fn permission_prefix(&self) -> &'static str {
        match self {
            ResourceAction::Get | ResourceAction::List => "view",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for ResourceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceAction {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceAction::ALL
            .into_iter()
            .find(|action| action.as_str() == s.to_lowercase())
            .ok_or_else(|| SchemaError::UnknownAction {
                action: s.to_string(),
            })
    }
}

/// Record identifier: backends key rows by string or integer ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Str(String),
}

impl RecordId {
    /// Read an id out of a JSON value. Only strings and integers qualify.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(RecordId::Str(s.clone())),
            Value::Number(n) => n.as_i64().map(RecordId::Int),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            RecordId::Int(n) => Value::from(*n),
            RecordId::Str(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(n) => write!(f, "{}", n),
            RecordId::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId::Str(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        RecordId::Str(s)
    }
}

impl From<i64> for RecordId {
    fn from(n: i64) -> Self {
        RecordId::Int(n)
    }
}

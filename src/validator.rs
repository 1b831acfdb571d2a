//! Structural validation of payloads against derived schemas.

use jsonschema::error::ValidationErrorKind;
use serde_json::Value;

use crate::error::{codes, SchemaError};

/// A single structural problem found in a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeIssue {
    /// A required property is missing. `path` includes the property name.
    Required { path: Vec<String> },
    /// The object at `path` carries keys its schema does not declare.
    UnrecognizedKeys { path: Vec<String>, keys: Vec<String> },
    /// Any other mismatch, with the engine's native code.
    Other {
        path: Vec<String>,
        code: String,
        message: String,
    },
}

impl ShapeIssue {
    pub fn path(&self) -> &[String] {
        match self {
            ShapeIssue::Required { path }
            | ShapeIssue::UnrecognizedKeys { path, .. }
            | ShapeIssue::Other { path, .. } => path,
        }
    }
}

/// Something that can check a value against a compiled schema.
///
/// Implementations are compiled once per derived schema and shared across
/// requests.
pub trait ShapeValidator: Send + Sync {
    /// Every issue found in `data`. Empty when the value matches.
    fn issues(&self, data: &Value) -> Vec<ShapeIssue>;
}

/// Compiles a derived schema (for the named action) into a validator.
pub type ShapeCompiler = fn(&str, &Value) -> Result<Box<dyn ShapeValidator>, SchemaError>;

/// [`ShapeValidator`] backed by the `jsonschema` crate.
pub struct JsonSchemaShape {
    validator: jsonschema::Validator,
}

impl JsonSchemaShape {
    /// Compile a derived schema.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::Compile` if the schema is not usable.
    pub fn compile(action: &str, schema: &Value) -> Result<Self, SchemaError> {
        let validator = jsonschema::validator_for(schema).map_err(|e| SchemaError::Compile {
            action: action.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { validator })
    }

    /// [`ShapeCompiler`] for the default engine.
    pub fn compiler(action: &str, schema: &Value) -> Result<Box<dyn ShapeValidator>, SchemaError> {
        Ok(Box::new(Self::compile(action, schema)?))
    }
}

impl ShapeValidator for JsonSchemaShape {
    fn issues(&self, data: &Value) -> Vec<ShapeIssue> {
        self.validator
            .iter_errors(data)
            .map(|e| {
                let path = split_pointer(&e.instance_path.to_string());
                match &e.kind {
                    ValidationErrorKind::Required { property } => {
                        let mut path = path;
                        path.push(match property {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        });
                        ShapeIssue::Required { path }
                    }
                    ValidationErrorKind::AdditionalProperties { unexpected } => {
                        ShapeIssue::UnrecognizedKeys {
                            path,
                            keys: unexpected.clone(),
                        }
                    }
                    kind => ShapeIssue::Other {
                        path,
                        code: native_code(kind).to_string(),
                        message: e.to_string(),
                    },
                }
            })
            .collect()
    }
}

/// Validate a payload against an already-derived schema.
///
/// Convenience for one-off checks; resources keep compiled validators.
///
/// # Errors
///
/// Returns `SchemaError::Compile` if the schema does not compile.
pub fn validate_against_schema(
    schema: &Value,
    payload: &Value,
) -> Result<Vec<ShapeIssue>, SchemaError> {
    let shape = JsonSchemaShape::compile("custom", schema)?;
    Ok(shape.issues(payload))
}

fn native_code(kind: &ValidationErrorKind) -> &'static str {
    match kind {
        ValidationErrorKind::Type { .. } => codes::INVALID_TYPE,
        ValidationErrorKind::Enum { .. } | ValidationErrorKind::Constant { .. } => {
            "invalid_enum_value"
        }
        ValidationErrorKind::Minimum { .. }
        | ValidationErrorKind::ExclusiveMinimum { .. }
        | ValidationErrorKind::MinLength { .. }
        | ValidationErrorKind::MinItems { .. }
        | ValidationErrorKind::MinProperties { .. } => "too_small",
        ValidationErrorKind::Maximum { .. }
        | ValidationErrorKind::ExclusiveMaximum { .. }
        | ValidationErrorKind::MaxLength { .. }
        | ValidationErrorKind::MaxItems { .. }
        | ValidationErrorKind::MaxProperties { .. } => "too_big",
        ValidationErrorKind::Pattern { .. } => "invalid_string",
        ValidationErrorKind::Format { .. } => "invalid_format",
        _ => "invalid",
    }
}

/// Split a JSON Pointer into unescaped segments.
fn split_pointer(pointer: &str) -> Vec<String> {
    pointer
        .split('/')
        .skip(1)
        .map(|part| part.replace("~1", "/").replace("~0", "~"))
        .collect()
}

//! Field-level flag enforcement.
//!
//! Runs after structural validation and decides, per field, whether the
//! value passes, is rewritten, is dropped, or is rejected:
//!
//! | Flag | create / replace / update | view |
//! |------|---------------------------|------|
//! | `true` | pass | pass |
//! | `false` | reject (`permission_denied`) | omit |
//! | permission name | require grant, else reject | require grant, else omit |
//! | transform | pass | replace with transform output |
//!
//! Virtual fields are dropped from the output for every action. Errors are
//! collected for the whole record rather than stopping at the first one.

use serde_json::{Map, Value};

use crate::acl::{may_i, Actor};
use crate::error::{codes, FieldError, FieldErrors, ResourceError};
use crate::flags::{field_schema, is_object_schema, join_path, FieldFlags, Flag, FlagTable};
use crate::types::ValidateAction;

/// Sanitize `value` (an object at `path`) against the flags of `action`.
///
/// `schema` decides which fields exist (the canonical schema when called
/// from [`ResourceSchema::validate`](crate::ResourceSchema::validate));
/// `flags` is the side-table the flag values come from.
///
/// # Errors
///
/// Returns `ResourceError::Validation` with every offending field: 403 when
/// any field was denied, 400 otherwise.
pub fn validate_flags_object(
    action: ValidateAction,
    path: &str,
    value: &Value,
    schema: &Value,
    flags: &FlagTable,
    record: &Value,
    actor: Option<&Actor>,
) -> Result<Value, ResourceError> {
    let walker = FlagWalker {
        action,
        schema,
        flags,
        record,
        actor,
    };
    let mut errors = FieldErrors::new();
    let output = walker.object(path, value, &mut errors);

    if errors.is_empty() {
        Ok(output)
    } else {
        Err(ResourceError::field_errors(errors))
    }
}

struct FlagWalker<'a> {
    action: ValidateAction,
    schema: &'a Value,
    flags: &'a FlagTable,
    record: &'a Value,
    actor: Option<&'a Actor>,
}

impl FlagWalker<'_> {
    fn object(&self, path: &str, value: &Value, errors: &mut FieldErrors) -> Value {
        let Some(fields) = value.as_object() else {
            let key = if path.is_empty() { "$" } else { path };
            let message = format!("Field \"{}\" must be an object.", key);
            errors.insert(
                key.to_string(),
                FieldError::new(message, codes::INVALID_TYPE),
            );
            return Value::Null;
        };

        let mut output = Map::new();
        for (name, field_value) in fields {
            let full_path = join_path(path, name);
            if let Some(v) = self.field(&full_path, field_value, errors) {
                output.insert(name.clone(), v);
            }
        }
        Value::Object(output)
    }

    fn field(&self, path: &str, value: &Value, errors: &mut FieldErrors) -> Option<Value> {
        let is_view = self.action == ValidateAction::View;

        let Some(field) = field_schema(self.schema, path) else {
            if !is_view {
                errors.insert(
                    path.to_string(),
                    FieldError::new(
                        format!("Field \"{}\" not found in schema.", path),
                        codes::FIELD_NOT_FOUND,
                    ),
                );
            }
            return None;
        };

        let defaults = FieldFlags::default();
        let flags = self.flags.get(path).unwrap_or(&defaults);

        match flags.for_action(self.action) {
            Flag::Bool(true) => {}
            Flag::Bool(false) => {
                if !is_view {
                    self.deny(path, errors);
                }
                return None;
            }
            Flag::Permission(permission) => {
                if flags.virtual_field {
                    return None;
                }
                if !may_i(self.actor, permission) {
                    if !is_view {
                        self.deny(path, errors);
                    }
                    return None;
                }
            }
            Flag::Transform(transform) => {
                if is_view {
                    return Some(transform(value, self.actor, self.record));
                }
            }
        }

        if flags.virtual_field {
            return None;
        }

        if is_object_schema(field) && value.is_object() {
            return Some(self.object(path, value, errors));
        }

        Some(value.clone())
    }

    fn deny(&self, path: &str, errors: &mut FieldErrors) {
        errors.insert(
            path.to_string(),
            FieldError::new(
                format!("You not allowed to {} \"{}\".", self.action, path),
                codes::PERMISSION_DENIED,
            ),
        );
    }
}

//! Error types for schema loading, schema construction and resource actions.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::types::ResourceAction;

/// Boxed error raised by storage or cache collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors while loading schemas or configuration from disk or network.
#[derive(Debug, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. } | LoadError::ReadError { .. } => 3,
            #[cfg(feature = "remote")]
            LoadError::NetworkError { .. } => 3,
            LoadError::InvalidJson { .. } => 2,
        }
    }
}

/// Configuration errors. Fatal and never retryable.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid schema: missing 'id' field")]
    MissingId,

    #[error("invalid schema: root must be an object schema with properties")]
    NotAnObject,

    #[error("invalid flag {flag} at {path}: expected {expected}, got {actual}")]
    InvalidFlag {
        path: String,
        flag: String,
        expected: &'static str,
        actual: String,
    },

    #[error("view transform attached to unknown field \"{path}\"")]
    UnknownTransformField { path: String },

    #[error("unknown action: {action}")]
    UnknownAction { action: String },

    #[error("unknown hook: {hook}")]
    UnknownHook { hook: String },

    #[error("resource name is required")]
    MissingName,

    #[error("derived {action} schema does not compile: {message}")]
    Compile { action: String, message: String },

    #[error("authentication method {name} already registered")]
    DuplicateAuthMethod { name: String },

    #[error("authentication method {name} not registered")]
    UnknownAuthMethod { name: String },
}

impl SchemaError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        2
    }
}

/// Per-field validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub message: String,
    pub code: String,
}

impl FieldError {
    pub fn new(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        self.code == codes::PERMISSION_DENIED
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Field errors keyed by dot path.
pub type FieldErrors = BTreeMap<String, FieldError>;

/// Stable error codes reported in [`FieldError::code`].
pub mod codes {
    pub const REQUIRED: &str = "required";
    pub const PERMISSION_DENIED: &str = "permission_denied";
    pub const FIELD_NOT_FOUND: &str = "field_not_found";
    pub const INVALID_TYPE: &str = "invalid_type";
}

/// HTTP-shaped error raised by schema validation and resource actions.
///
/// Every variant maps to a status code and a JSON body so a transport
/// adapter can serialize it without inspecting the cause.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Validate failed")]
    Validation {
        status: u16,
        message: String,
        errors: FieldErrors,
    },

    #[error("Permission denied {action}.{permission}")]
    PermissionDenied { action: String, permission: String },

    #[error("{message}")]
    NotFound { message: String },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("resource {resource} does not support {action}")]
    NotConfigured {
        resource: String,
        action: ResourceAction,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("backend error: {0}")]
    Backend(#[source] BoxError),

    #[error("cache error: {0}")]
    Cache(#[source] BoxError),

    #[error("{message}")]
    Hook { status: u16, message: String },
}

impl ResourceError {
    /// Structural (400) validation failure.
    pub fn invalid(message: impl Into<String>, errors: FieldErrors) -> Self {
        ResourceError::Validation {
            status: 400,
            message: message.into(),
            errors,
        }
    }

    /// Field-level validation failure: 403 when any field was denied,
    /// 400 otherwise.
    pub fn field_errors(errors: FieldErrors) -> Self {
        let denied = errors.values().any(FieldError::is_permission_denied);
        let message = if errors.len() == 1 {
            errors
                .values()
                .next()
                .map(|e| e.message.clone())
                .unwrap_or_default()
        } else {
            format!("{} fields failed validation", errors.len())
        };
        ResourceError::Validation {
            status: if denied { 403 } else { 400 },
            message,
            errors,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ResourceError::NotFound {
            message: message.into(),
        }
    }

    pub fn backend(err: impl Into<BoxError>) -> Self {
        ResourceError::Backend(err.into())
    }

    pub fn cache(err: impl Into<BoxError>) -> Self {
        ResourceError::Cache(err.into())
    }

    /// Error raised from a hook with an explicit status code.
    pub fn hook(status: u16, message: impl Into<String>) -> Self {
        ResourceError::Hook {
            status,
            message: message.into(),
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ResourceError::Validation { status, .. } => *status,
            ResourceError::PermissionDenied { .. } => 403,
            ResourceError::NotFound { .. } => 404,
            ResourceError::Unauthorized => 401,
            ResourceError::Hook { status, .. } => *status,
            ResourceError::NotConfigured { .. }
            | ResourceError::Schema(_)
            | ResourceError::Backend(_)
            | ResourceError::Cache(_) => 500,
        }
    }

    /// Field errors carried by a validation failure, if any.
    pub fn errors(&self) -> Option<&FieldErrors> {
        match self {
            ResourceError::Validation { errors, .. } => Some(errors),
            _ => None,
        }
    }

    /// Response body for transports.
    pub fn body(&self) -> Value {
        match self {
            ResourceError::Validation {
                message, errors, ..
            } => json!({ "message": message, "errors": errors }),
            ResourceError::PermissionDenied { action, permission } => json!({
                "message": "Permission denied",
                "action": action,
                "permissionName": permission,
            }),
            ResourceError::NotFound { message } => json!({ "message": message }),
            ResourceError::Unauthorized => json!({ "message": "Unauthorized" }),
            ResourceError::Hook { message, .. } => json!({ "message": message }),
            ResourceError::NotConfigured { .. }
            | ResourceError::Schema(_)
            | ResourceError::Backend(_)
            | ResourceError::Cache(_) => json!({ "message": "Internal server error!" }),
        }
    }
}

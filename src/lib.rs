//! Resource Schema
//!
//! Schema-driven CRUD resources with per-field permission flags.
//!
//! A resource is declared with one canonical JSON Schema whose properties
//! carry `$`-prefixed flags. From it the library derives the create,
//! replace, update and view schemas, validates payloads per action and
//! actor, and runs each CRUD action through a pipeline of permission
//! checks, hooks, a repository and an optional cache.
//!
//! # Example
//!
//! ```
//! use resource_schema::{Actor, ResourceSchema, ValidateAction};
//! use serde_json::json;
//!
//! let schema = ResourceSchema::new(
//!     "products",
//!     json!({
//!         "type": "object",
//!         "properties": {
//!             "id": { "type": "integer", "$create": false, "$update": false },
//!             "name": { "type": "string" },
//!             "price": { "type": "number", "$update": "shop.manager" }
//!         },
//!         "required": ["id", "name"]
//!     }),
//! )
//! .unwrap();
//!
//! // Clients never send the id on create
//! assert!(schema.create_schema()["properties"].get("id").is_none());
//!
//! // Changing the price needs the shop.manager grant
//! let clerk = Actor::new(["update.products"]);
//! let err = schema
//!     .validate(ValidateAction::Update, &json!({ "price": 5 }), Some(&clerk))
//!     .unwrap_err();
//! assert_eq!(err.status_code(), 403);
//! ```
//!
//! # Flags
//!
//! | Flag | Value | Default | Effect |
//! |------|-------|---------|--------|
//! | `$virtual` | bool | `false` | Accepted on input, never stored or returned |
//! | `$create` | bool or permission | `true` | Who may set the field on create/replace |
//! | `$update` | bool or permission | `true` | Who may set the field on update |
//! | `$view` | bool or permission | `true` | Who sees the field |
//! | `$search` | bool | `false` | Field takes part in free-text search |
//! | `$filter` | bool | `true` | Field may be filtered on |
//! | `$sort` | bool | `true` | Field may be sorted on |

mod acl;
mod auth;
mod cache;
mod config;
mod error;
mod field_validator;
mod flags;
mod hooks;
mod linter;
mod loader;
mod memory;
mod query;
mod repository;
mod resolver;
mod resource;
mod router;
mod schema;
mod types;
mod validator;

pub use acl::{may_i, may_i_any, Actor};
pub use auth::{
    ApiKeyLocation, AuthFn, AuthMethod, AuthRequest, AuthScheme, Authentications, HttpScheme,
};
pub use cache::{consistent_stringify_deep, CacheAdaptor, CacheManager, MemoryCache, NoCache};
pub use config::ResourceConfig;
pub use error::{codes, BoxError, FieldError, FieldErrors, LoadError, ResourceError, SchemaError};
pub use field_validator::validate_flags_object;
pub use flags::{
    field_schema, flag_paths, get_field_flags, is_object_schema, properties, FieldFlags, Flag,
    FlagTable, ViewTransform,
};
pub use hooks::{hook, Hook, HookChain, HookContext, HookEvent, Hooks};
pub use linter::{lint, lint_file, Diagnostic, FileResult, FileStatus, LintResult, Severity};
pub use loader::{is_url, load_config, load_json, load_schema, load_schema_auto, load_schema_str};
pub use memory::{MemoryRepository, SEARCH_FIELD};
pub use query::{
    DefaultAdaptor, FilterOperator, ListAdaptor, ListInput, ListResponse, ListResults,
    QueryFilter, QueryListParam, QueryRange, QuerySort, SortDirection,
};
pub use repository::Repository;
pub use resolver::{copy_fields, copy_schema, strip_flags};
pub use resource::{Resource, ResourceRequest, ResourceResponse};
pub use router::{Endpoint, HttpMethod, RouteDef, RouterProvider, StandardRouter};
pub use schema::{CanonicalSchema, DerivedSchema, ResourceSchema};
pub use types::{
    json_type_name, Record, RecordId, ResourceAction, StringMap, ValidateAction, FLAG_KEYS,
    SCHEMA_DOLLAR_KEYWORDS,
};
pub use validator::{
    validate_against_schema, JsonSchemaShape, ShapeCompiler, ShapeIssue, ShapeValidator,
};

#[cfg(feature = "remote")]
pub use loader::load_schema_url;

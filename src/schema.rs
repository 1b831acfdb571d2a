//! Resource schema - owns the canonical schema and its four derived forms.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::acl::Actor;
use crate::error::{codes, FieldError, FieldErrors, ResourceError, SchemaError};
use crate::field_validator::validate_flags_object;
use crate::flags::{flag_paths, properties, FlagTable, ViewTransform};
use crate::resolver::copy_schema;
use crate::types::ValidateAction;
use crate::validator::{JsonSchemaShape, ShapeCompiler, ShapeIssue, ShapeValidator};

/// Passes over a view record before giving up on pruning mismatches.
const MAX_VIEW_PRUNE_PASSES: usize = 8;

/// Canonical schema plus the view transforms attached to its fields.
#[derive(Clone)]
pub struct CanonicalSchema {
    schema: Value,
    transforms: Vec<(String, ViewTransform)>,
}

impl CanonicalSchema {
    pub fn new(schema: Value) -> Self {
        Self {
            schema,
            transforms: Vec::new(),
        }
    }

    /// Rewrite the field at `path` (dot path) whenever it is viewed.
    pub fn with_view_transform<F>(mut self, path: impl Into<String>, transform: F) -> Self
    where
        F: Fn(&Value, Option<&Actor>, &Value) -> Value + Send + Sync + 'static,
    {
        self.transforms.push((path.into(), Arc::new(transform)));
        self
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }
}

impl From<Value> for CanonicalSchema {
    fn from(schema: Value) -> Self {
        CanonicalSchema::new(schema)
    }
}

/// A derived schema with its compiled validator.
pub struct DerivedSchema {
    action: ValidateAction,
    schema: Value,
    shape: Box<dyn ShapeValidator>,
}

impl DerivedSchema {
    fn build(
        action: ValidateAction,
        canonical: &Value,
        compiler: ShapeCompiler,
    ) -> Result<Self, SchemaError> {
        let schema = copy_schema(action, canonical)?;
        let shape = compiler(action.as_str(), &schema)?;
        Ok(Self {
            action,
            schema,
            shape,
        })
    }

    pub fn action(&self) -> ValidateAction {
        self.action
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn issues(&self, data: &Value) -> Vec<ShapeIssue> {
        self.shape.issues(data)
    }
}

impl std::fmt::Debug for DerivedSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedSchema")
            .field("action", &self.action)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Canonical schema, flag side-table and the create/replace/update/view
/// projections, all computed once at construction.
pub struct ResourceSchema {
    name: String,
    canonical: Value,
    flags: FlagTable,
    flag_paths: BTreeMap<&'static str, Vec<String>>,
    create: DerivedSchema,
    replace: DerivedSchema,
    update: DerivedSchema,
    view: DerivedSchema,
}

impl ResourceSchema {
    /// Build a resource schema validated by the `jsonschema` engine.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::MissingId` when the root has no `id` property,
    /// or any flag/compile error found while deriving.
    pub fn new(
        name: impl Into<String>,
        canonical: impl Into<CanonicalSchema>,
    ) -> Result<Self, SchemaError> {
        Self::with_compiler(name, canonical, JsonSchemaShape::compiler)
    }

    /// Build a resource schema with a custom structural validator.
    ///
    /// # Errors
    ///
    /// Same as [`ResourceSchema::new`].
    pub fn with_compiler(
        name: impl Into<String>,
        canonical: impl Into<CanonicalSchema>,
        compiler: ShapeCompiler,
    ) -> Result<Self, SchemaError> {
        let CanonicalSchema { schema, transforms } = canonical.into();

        let props = properties(&schema).ok_or(SchemaError::NotAnObject)?;
        if !props.contains_key("id") {
            return Err(SchemaError::MissingId);
        }

        let mut flags = FlagTable::from_schema(&schema)?;
        for (path, transform) in transforms {
            flags.attach_transform(&path, transform)?;
        }
        let flag_paths = flag_paths(&schema, "")?;

        Ok(Self {
            name: name.into(),
            create: DerivedSchema::build(ValidateAction::Create, &schema, compiler)?,
            replace: DerivedSchema::build(ValidateAction::Replace, &schema, compiler)?,
            update: DerivedSchema::build(ValidateAction::Update, &schema, compiler)?,
            view: DerivedSchema::build(ValidateAction::View, &schema, compiler)?,
            canonical: schema,
            flags,
            flag_paths,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn rename(&mut self, name: String) {
        self.name = name;
    }

    pub fn canonical(&self) -> &Value {
        &self.canonical
    }

    pub fn flags(&self) -> &FlagTable {
        &self.flags
    }

    /// Field paths per flag name (`search`, `filter`, `sort`, ...).
    pub fn flag_paths(&self) -> &BTreeMap<&'static str, Vec<String>> {
        &self.flag_paths
    }

    pub fn pick_schema(&self, action: ValidateAction) -> &DerivedSchema {
        match action {
            ValidateAction::Create => &self.create,
            ValidateAction::Replace => &self.replace,
            ValidateAction::Update => &self.update,
            ValidateAction::View => &self.view,
        }
    }

    /// Pick a derived schema by action name.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::UnknownAction` outside create/replace/update/view.
    pub fn pick_schema_named(&self, action: &str) -> Result<&DerivedSchema, SchemaError> {
        Ok(self.pick_schema(action.parse()?))
    }

    pub fn create_schema(&self) -> &Value {
        &self.create.schema
    }

    pub fn replace_schema(&self) -> &Value {
        &self.replace.schema
    }

    pub fn update_schema(&self) -> &Value {
        &self.update.schema
    }

    pub fn view_schema(&self) -> &Value {
        &self.view.schema
    }

    /// Validate `data` for `action` as `actor` and return the sanitized value.
    ///
    /// Structural problems are reported first (400). Only a structurally
    /// valid payload reaches the field flags (403 on any denied field),
    /// which are walked over the canonical schema so nested flags still
    /// apply.
    /// Views never fail structurally: mismatching fields are dropped.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::Validation` with field-path keyed errors.
    pub fn validate(
        &self,
        action: ValidateAction,
        data: &Value,
        actor: Option<&Actor>,
    ) -> Result<Value, ResourceError> {
        let derived = self.pick_schema(action);

        if action == ValidateAction::View {
            let pruned = prune_view(derived, data);
            return validate_flags_object(
                action,
                "",
                &pruned,
                &self.canonical,
                &self.flags,
                &pruned,
                actor,
            );
        }

        let issues = derived.issues(data);
        if !issues.is_empty() {
            let mut errors = FieldErrors::new();
            for issue in &issues {
                make_error(issue, &mut errors);
            }
            let fields: Vec<&String> = errors.keys().collect();
            debug!(resource = %self.name, action = %action, ?fields, "validation failed");
            return Err(ResourceError::invalid("Invalid input", errors));
        }

        validate_flags_object(action, "", data, &self.canonical, &self.flags, data, actor)
    }
}

impl std::fmt::Debug for ResourceSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceSchema")
            .field("name", &self.name)
            .field("canonical", &self.canonical)
            .finish_non_exhaustive()
    }
}

/// Translate a structural issue into field errors.
fn make_error(issue: &ShapeIssue, errors: &mut FieldErrors) {
    match issue {
        ShapeIssue::Required { path } => {
            let key = path.join(".");
            errors.insert(
                key.clone(),
                FieldError::new(format!("Field \"{}\" is required.", key), codes::REQUIRED),
            );
        }
        // An undeclared key is an attempt to set a field the action hides.
        ShapeIssue::UnrecognizedKeys { path, keys } => {
            for key in keys {
                let full = path
                    .iter()
                    .chain(std::iter::once(key))
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(".");
                let message = format!("Field \"{}\" is not allowed", full);
                errors.insert(full, FieldError::new(message, codes::PERMISSION_DENIED));
            }
        }
        ShapeIssue::Other { path, code, message } => {
            let key = if path.is_empty() {
                "$".to_string()
            } else {
                path.join(".")
            };
            errors.insert(key, FieldError::new(message.clone(), code.clone()));
        }
    }
}

/// Drop every field whose value does not match the view schema.
///
/// The field removed is the deepest declared property enclosing the issue,
/// so a bad array item removes the whole array field.
fn prune_view(derived: &DerivedSchema, data: &Value) -> Value {
    if !data.is_object() {
        return Value::Object(Map::new());
    }

    let mut data = data.clone();
    for _ in 0..MAX_VIEW_PRUNE_PASSES {
        let issues = derived.issues(&data);
        if issues.is_empty() {
            break;
        }

        let mut removed = false;
        for issue in &issues {
            let field = enclosing_field(&derived.schema, issue.path());
            if !field.is_empty() {
                removed |= remove_path(&mut data, &field);
            }
        }
        if !removed {
            break;
        }
    }
    data
}

fn enclosing_field(schema: &Value, path: &[String]) -> Vec<String> {
    let mut current = schema;
    let mut field = Vec::new();
    for segment in path {
        match properties(current).and_then(|props| props.get(segment)) {
            Some(next) => {
                field.push(segment.clone());
                current = next;
            }
            None => break,
        }
    }
    field
}

fn remove_path(data: &mut Value, path: &[String]) -> bool {
    let Some((last, parents)) = path.split_last() else {
        return false;
    };
    let mut current = data;
    for segment in parents {
        match current.get_mut(segment.as_str()) {
            Some(next) => current = next,
            None => return false,
        }
    }
    current
        .as_object_mut()
        .map(|map| map.remove(last).is_some())
        .unwrap_or(false)
}

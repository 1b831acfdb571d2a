//! Schema linting - static analysis of canonical resource schemas.
//!
//! Checks schema files for:
//! - JSON syntax errors
//! - A root that is not an object schema, or lacks an `id` property
//! - Flag annotations with the wrong value type
//! - Unknown `$`-prefixed keys (usually a misspelled flag)
//! - Derived schemas that fail to compile

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::SchemaError;
use crate::flags::{get_field_flags, is_object_schema, properties};
use crate::loader::load_schema;
use crate::schema::ResourceSchema;
use crate::types::{FLAG_KEYS, SCHEMA_DOLLAR_KEYWORDS};

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single diagnostic message from linting.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub file: PathBuf,
    /// JSON path to the issue (e.g., "/properties/price/$update")
    pub path: String,
    pub message: String,
}

/// Result of linting a single file.
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub file: PathBuf,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Status of a linted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Ok,
    Error,
    Warning,
}

/// Result of linting a directory or set of files.
#[derive(Debug, Clone, Serialize)]
pub struct LintResult {
    pub path: PathBuf,
    pub files_checked: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub warnings: usize,
    pub results: Vec<FileResult>,
}

impl LintResult {
    /// Returns true if all files passed (no errors).
    pub fn is_ok(&self) -> bool {
        self.errors == 0
    }
}

/// Lint a file or directory.
///
/// If path is a directory, recursively finds all .json files.
/// If `strict` is true, warnings are treated as errors.
pub fn lint(path: &Path, strict: bool) -> LintResult {
    let files = collect_schema_files(path);
    let mut results = Vec::new();
    let mut total_errors = 0;
    let mut total_warnings = 0;

    for file in &files {
        let file_result = lint_file(file, path);
        total_errors += file_result.count(Severity::Error);
        total_warnings += file_result.count(Severity::Warning);
        results.push(file_result);
    }

    let failed = results
        .iter()
        .filter(|r| {
            if strict {
                r.status != FileStatus::Ok
            } else {
                r.status == FileStatus::Error
            }
        })
        .count();

    LintResult {
        path: path.to_path_buf(),
        files_checked: files.len(),
        passed: files.len() - failed,
        failed,
        errors: total_errors,
        warnings: total_warnings,
        results,
    }
}

impl FileResult {
    fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

/// Collects diagnostics for one file.
struct Sink<'a> {
    file: &'a Path,
    diagnostics: Vec<Diagnostic>,
}

impl Sink<'_> {
    fn push(&mut self, severity: Severity, code: &str, path: impl Into<String>, message: String) {
        self.diagnostics.push(Diagnostic {
            severity,
            code: code.to_string(),
            file: self.file.to_path_buf(),
            path: path.into(),
            message,
        });
    }

    fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }
}

/// Lint a single schema file.
pub fn lint_file(file: &Path, base_path: &Path) -> FileResult {
    let mut sink = Sink {
        file,
        diagnostics: Vec::new(),
    };

    match load_schema(file) {
        Ok(schema) => check_schema(&schema, file, &mut sink),
        Err(e) => {
            let message = format!("syntax error: {}", e);
            sink.push(Severity::Error, "E001", "/", message);
        }
    }

    let diagnostics = sink.diagnostics;
    let has_errors = diagnostics.iter().any(|d| d.severity == Severity::Error);
    let has_warnings = diagnostics.iter().any(|d| d.severity == Severity::Warning);

    let status = if has_errors {
        FileStatus::Error
    } else if has_warnings {
        FileStatus::Warning
    } else {
        FileStatus::Ok
    };

    FileResult {
        file: file.strip_prefix(base_path).unwrap_or(file).to_path_buf(),
        status,
        diagnostics,
    }
}

fn check_schema(schema: &Value, file: &Path, sink: &mut Sink<'_>) {
    let Some(props) = properties(schema) else {
        sink.push(
            Severity::Error,
            "E002",
            "/",
            "root must be an object schema with properties".to_string(),
        );
        return;
    };

    if !props.contains_key("id") {
        sink.push(
            Severity::Error,
            "E003",
            "/properties",
            "schema missing 'id' property".to_string(),
        );
    }

    check_properties(props, "", sink);

    // Only worth compiling once the flags themselves are sound.
    if sink.has_errors() {
        return;
    }
    let name = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("schema");
    let compiled = ResourceSchema::new(name, schema.clone());
    if let Err(SchemaError::Compile { action, message }) = compiled {
        sink.push(
            Severity::Error,
            "E005",
            "/",
            format!("derived {} schema does not compile: {}", action, message),
        );
    }
}

fn check_properties(props: &Map<String, Value>, pointer: &str, sink: &mut Sink<'_>) {
    for (key, prop) in props {
        let prop_pointer = format!("{}/properties/{}", pointer, key);
        let Some(map) = prop.as_object() else {
            continue;
        };

        for (annotation, value) in map {
            if !annotation.starts_with('$') {
                continue;
            }
            let annotation_pointer = format!("{}/{}", prop_pointer, annotation);

            if FLAG_KEYS.contains(&annotation.as_str()) {
                check_flag_value(annotation, value, key, annotation_pointer, sink);
            } else if !SCHEMA_DOLLAR_KEYWORDS.contains(&annotation.as_str()) {
                sink.push(
                    Severity::Warning,
                    "W001",
                    annotation_pointer,
                    format!(
                        "unknown annotation \"{}\": expected one of {}",
                        annotation,
                        FLAG_KEYS.join(", ")
                    ),
                );
            }
        }

        if map.get("$virtual").and_then(Value::as_bool) == Some(true)
            && map.get("$view").and_then(Value::as_bool) == Some(false)
        {
            sink.push(
                Severity::Warning,
                "W002",
                prop_pointer.clone(),
                format!(
                    "virtual field \"{}\" is hidden from view and can never be seen",
                    key
                ),
            );
        }

        if is_object_schema(prop) {
            if let Some(nested) = properties(prop) {
                check_properties(nested, &prop_pointer, sink);
            }
        }
    }
}

fn check_flag_value(flag: &str, value: &Value, field: &str, pointer: String, sink: &mut Sink<'_>) {
    let mut single = Map::new();
    single.insert(flag.to_string(), value.clone());

    let parsed = get_field_flags(&Value::Object(single), field);
    if let Err(SchemaError::InvalidFlag { expected, actual, .. }) = parsed {
        sink.push(
            Severity::Error,
            "E004",
            pointer,
            format!(
                "invalid {} value: expected {}, got {}",
                flag, expected, actual
            ),
        );
    }
}

/// Collect all .json files in a path (file or directory).
fn collect_schema_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            return vec![path.to_path_buf()];
        }
        return vec![];
    }

    let mut files = Vec::new();
    collect_files_recursive(path, &mut files);
    files.sort();
    files
}

fn collect_files_recursive(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files_recursive(&path, files);
        } else if path.extension().map(|e| e == "json").unwrap_or(false) {
            files.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    fn lint_str(content: &str) -> FileResult {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        lint_file(file.path(), file.path().parent().unwrap())
    }

    fn codes(result: &FileResult) -> Vec<&str> {
        result.diagnostics.iter().map(|d| d.code.as_str()).collect()
    }

    #[test]
    fn lint_valid_schema() {
        let result = lint_str(
            r#"{
                "type": "object",
                "properties": {
                    "id": { "type": "integer", "$create": false, "$update": false },
                    "name": { "type": "string", "$search": true },
                    "price": { "type": "number", "$update": "shop.manager" }
                },
                "required": ["id", "name"]
            }"#,
        );
        assert_eq!(result.status, FileStatus::Ok);
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn lint_invalid_json_syntax() {
        let result = lint_str("{ not valid json }");
        assert_eq!(result.status, FileStatus::Error);
        assert_eq!(codes(&result), vec!["E001"]);
    }

    #[test]
    fn lint_root_without_properties() {
        let result = lint_str(r#"{ "type": "string" }"#);
        assert_eq!(result.status, FileStatus::Error);
        assert_eq!(codes(&result), vec!["E002"]);
    }

    #[test]
    fn lint_missing_id_property() {
        let schema = r#"{ "type": "object", "properties": { "name": { "type": "string" } } }"#;
        let result = lint_str(schema);
        assert_eq!(result.status, FileStatus::Error);
        assert!(codes(&result).contains(&"E003"));
    }

    #[test]
    fn lint_invalid_flag_types() {
        let result = lint_str(
            r#"{
                "properties": {
                    "id": { "type": "integer" },
                    "name": { "type": "string", "$search": "yes", "$view": 3 },
                    "meta": {
                        "type": "object",
                        "properties": { "note": { "type": "string", "$create": "" } }
                    }
                }
            }"#,
        );
        assert_eq!(result.status, FileStatus::Error);

        let paths: Vec<&str> = result
            .diagnostics
            .iter()
            .filter(|d| d.code == "E004")
            .map(|d| d.path.as_str())
            .collect();
        assert_eq!(
            paths,
            vec![
                "/properties/name/$search",
                "/properties/name/$view",
                "/properties/meta/properties/note/$create",
            ]
        );
    }

    #[test]
    fn lint_unknown_annotation_warns() {
        let result = lint_str(
            r#"{
                "$schema": "https://json-schema.org/draft/2020-12/schema",
                "properties": {
                    "id": { "type": "integer", "$comment": "primary key" },
                    "name": { "type": "string", "$serch": true }
                }
            }"#,
        );
        assert_eq!(result.status, FileStatus::Warning);
        assert_eq!(codes(&result), vec!["W001"]);
        assert_eq!(result.diagnostics[0].path, "/properties/name/$serch");
    }

    #[test]
    fn lint_hidden_virtual_field_warns() {
        let result = lint_str(
            r#"{
                "properties": {
                    "id": { "type": "integer" },
                    "confirm": { "type": "string", "$virtual": true, "$view": false },
                    "password": { "type": "string", "$virtual": true }
                }
            }"#,
        );
        assert_eq!(codes(&result), vec!["W002"]);
        assert_eq!(result.diagnostics[0].path, "/properties/confirm");
    }

    #[test]
    fn lint_uncompilable_schema() {
        let result = lint_str(
            r#"{
                "properties": {
                    "id": { "type": "integer" },
                    "code": { "type": "string", "pattern": "([" }
                }
            }"#,
        );
        assert_eq!(result.status, FileStatus::Error);
        assert!(codes(&result).contains(&"E005"));
    }

    #[test]
    fn lint_directory() {
        let dir = tempdir().unwrap();

        std::fs::write(
            dir.path().join("valid.json"),
            r#"{"type": "object", "properties": {"id": {"type": "integer"}}}"#,
        )
        .unwrap();
        let invalid = dir.path().join("invalid.json");
        std::fs::write(invalid, "{ not json }").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let result = lint(dir.path(), false);
        assert_eq!(result.files_checked, 2);
        assert_eq!(result.passed, 1);
        assert_eq!(result.failed, 1);
        assert!(!result.is_ok());
    }

    #[test]
    fn lint_strict_mode() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("products.json");
        std::fs::write(
            &file_path,
            r#"{"properties": {"id": {"type": "integer"}, "name": {"$filtr": false}}}"#,
        )
        .unwrap();

        let result = lint(&file_path, false);
        assert_eq!(result.files_checked, 1);
        assert_eq!(result.passed, 1);
        assert_eq!(result.warnings, 1);

        let result = lint(&file_path, true);
        assert_eq!(result.passed, 0);
        assert_eq!(result.failed, 1);
        assert!(result.is_ok());
    }
}

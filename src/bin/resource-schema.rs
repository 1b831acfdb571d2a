//! Resource Schema CLI
//!
//! Command-line interface for inspecting canonical resource schemas.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use resource_schema::{
    lint, load_config, load_schema, load_schema_auto, Actor, FileStatus, MemoryRepository,
    Resource, ResourceError, ResourceSchema, SchemaError, Severity, ValidateAction,
};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "resource-schema")]
#[command(about = "Derive, validate and lint flag-annotated resource schemas")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the schema derived for one action
    Derive {
        /// Schema source: file path or URL (http:// or https://)
        schema: String,

        /// Action to derive for: create, replace, update or view
        #[arg(long, short)]
        action: String,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Validate a payload for an action as an actor with the given grants
    Validate {
        /// Schema source: file path or URL (http:// or https://)
        schema: String,

        /// Payload file to validate
        payload: PathBuf,

        /// Action to validate for: create, replace, update or view
        #[arg(long, short)]
        action: String,

        /// Permission granted to the actor (repeatable)
        #[arg(long = "permission", short = 'p')]
        permissions: Vec<String>,

        /// Validate without an actor
        #[arg(long, conflicts_with = "permissions")]
        anonymous: bool,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,
    },

    /// List the fields each flag is set on
    Flags {
        /// Schema source: file path or URL (http:// or https://)
        schema: String,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Describe the endpoints a resource would expose
    Endpoints {
        /// Schema source: file path or URL (http:// or https://)
        schema: String,

        /// Resource name (default: schema file stem)
        #[arg(long)]
        name: Option<String>,

        /// Resource settings file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Lint schema files for errors (syntax, missing id, invalid flags)
    Lint {
        /// File or directory to lint
        path: PathBuf,

        /// Output format: text (default) or json
        #[arg(long, default_value = "text")]
        format: String,

        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,

        /// Suppress progress output, only show errors
        #[arg(long, short)]
        quiet: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Derive {
            schema,
            action,
            output,
            pretty,
        } => run_derive(&schema, &action, output, pretty),

        Commands::Validate {
            schema,
            payload,
            action,
            permissions,
            anonymous,
            json,
        } => {
            let actor = (!anonymous).then(|| Actor::new(permissions));
            run_validate(&schema, &payload, &action, actor, json)
        }

        Commands::Flags { schema, pretty } => run_flags(&schema, pretty),

        Commands::Endpoints {
            schema,
            name,
            config,
            pretty,
        } => run_endpoints(&schema, name, config.as_deref(), pretty),

        Commands::Lint {
            path,
            format,
            strict,
            quiet,
        } => run_lint(&path, &format, strict, quiet),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

/// Load a schema source and build the resource schema from it.
fn build_schema(source: &str, name: &str) -> Result<ResourceSchema, u8> {
    let canonical = load_schema_auto(source).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    ResourceSchema::new(name, canonical).map_err(|e| schema_error(&e))
}

fn schema_error(e: &SchemaError) -> u8 {
    eprintln!("Error: {}", e);
    e.exit_code() as u8
}

/// Resource name implied by a schema source: the file stem.
fn default_name(source: &str) -> String {
    let trimmed = source.split(['?', '#']).next().unwrap_or(source);
    Path::new(trimmed)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("resource")
        .to_string()
}

fn to_json<T: Serialize>(value: &T, pretty: bool) -> Result<String, u8> {
    if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })
}

fn run_derive(source: &str, action: &str, output: Option<PathBuf>, pretty: bool) -> Result<(), u8> {
    let schema = build_schema(source, &default_name(source))?;
    let derived = schema
        .pick_schema_named(action)
        .map_err(|e| schema_error(&e))?;
    let json_output = to_json(derived.schema(), pretty)?;

    match output {
        Some(path) => {
            std::fs::write(&path, &json_output).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", json_output);
        }
    }

    Ok(())
}

fn run_validate(
    source: &str,
    payload_path: &Path,
    action: &str,
    actor: Option<Actor>,
    json_output: bool,
) -> Result<(), u8> {
    let payload = load_schema(payload_path).map_err(|e| {
        report_error(json_output, &format!("loading payload: {}", e));
        e.exit_code() as u8
    })?;

    let action: ValidateAction = action.parse().map_err(|e: SchemaError| {
        report_error(json_output, &e.to_string());
        e.exit_code() as u8
    })?;
    let canonical = load_schema_auto(source).map_err(|e| {
        report_error(json_output, &format!("loading schema: {}", e));
        e.exit_code() as u8
    })?;
    let schema = ResourceSchema::new(default_name(source), canonical).map_err(|e| {
        report_error(json_output, &e.to_string());
        e.exit_code() as u8
    })?;

    match schema.validate(action, &payload, actor.as_ref()) {
        Ok(sanitized) => {
            if json_output {
                println!(
                    "{}",
                    serde_json::json!({ "valid": true, "data": sanitized })
                );
            } else {
                println!("Valid");
                println!("{}", to_json(&sanitized, true)?);
            }
            Ok(())
        }
        Err(e @ ResourceError::Validation { .. }) => {
            if json_output {
                let mut body = e.body();
                body["valid"] = Value::Bool(false);
                body["status"] = e.status_code().into();
                println!("{}", body);
            } else {
                eprintln!("Validation failed ({}):", e.status_code());
                for (path, error) in e.errors().into_iter().flatten() {
                    eprintln!("  {}: {}", path, error);
                }
            }
            Err(1)
        }
        Err(e) => {
            report_error(json_output, &e.to_string());
            Err(2)
        }
    }
}

/// Output an error message in plain text or JSON format.
fn report_error(json_output: bool, msg: &str) {
    if json_output {
        println!("{}", serde_json::json!({ "valid": false, "error": msg }));
    } else {
        eprintln!("Error: {}", msg);
    }
}

fn run_flags(source: &str, pretty: bool) -> Result<(), u8> {
    let schema = build_schema(source, &default_name(source))?;
    println!("{}", to_json(schema.flag_paths(), pretty)?);
    Ok(())
}

fn run_endpoints(
    source: &str,
    name: Option<String>,
    config: Option<&Path>,
    pretty: bool,
) -> Result<(), u8> {
    let name = name.unwrap_or_else(|| default_name(source));
    let canonical = load_schema_auto(source).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let repository = Arc::new(MemoryRepository::new(name.clone()));
    let mut resource = Resource::named(name, repository, canonical).map_err(|e| schema_error(&e))?;

    if let Some(path) = config {
        let config = load_config(path).map_err(|e| {
            eprintln!("Error: {}", e);
            e.exit_code() as u8
        })?;
        resource = resource.with_config(&config);
    }

    println!("{}", to_json(&resource.endpoints(), pretty)?);
    Ok(())
}

fn run_lint(path: &Path, format: &str, strict: bool, quiet: bool) -> Result<(), u8> {
    if !path.exists() {
        eprintln!("Error: path not found: {}", path.display());
        return Err(2);
    }

    let result = lint(path, strict);

    if format == "json" {
        println!("{}", to_json(&result, true)?);
    } else {
        if !quiet {
            println!("Linting {} ...\n", path.display());
        }

        for file_result in &result.results {
            let status_icon = match file_result.status {
                FileStatus::Ok => "\x1b[32m✓\x1b[0m",
                FileStatus::Warning => "\x1b[33m⚠\x1b[0m",
                FileStatus::Error => "\x1b[31m✗\x1b[0m",
            };

            if !quiet || file_result.status != FileStatus::Ok {
                println!("  {} {}", status_icon, file_result.file.display());
            }

            for diag in &file_result.diagnostics {
                let (color, label) = match diag.severity {
                    Severity::Error => ("\x1b[31m", "error"),
                    Severity::Warning => ("\x1b[33m", "warning"),
                };
                if !quiet || diag.severity == Severity::Error {
                    println!(
                        "    {}{}[{}]\x1b[0m: {} - {}",
                        color, label, diag.code, diag.path, diag.message
                    );
                }
            }
        }

        println!();
        if result.is_ok() && (!strict || result.warnings == 0) {
            println!(
                "\x1b[32m✓ {} files checked, all passed\x1b[0m",
                result.files_checked
            );
        } else {
            println!(
                "\x1b[31m✗ {} files checked: {} passed, {} failed ({} errors, {} warnings)\x1b[0m",
                result.files_checked, result.passed, result.failed, result.errors, result.warnings
            );
        }
    }

    if result.is_ok() && (!strict || result.warnings == 0) {
        Ok(())
    } else {
        Err(1)
    }
}

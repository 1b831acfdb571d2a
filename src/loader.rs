//! Loading canonical schemas and resource configuration.
//!
//! Handles loading from files, strings, and HTTP URLs.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::ResourceConfig;
use crate::error::LoadError;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Load a schema from a file path.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist,
/// or `LoadError::InvalidJson` if the file isn't valid JSON.
pub fn load_schema(path: &Path) -> Result<Value, LoadError> {
    load_json(path)
}

/// Load a schema from a JSON string.
///
/// # Errors
///
/// Returns `LoadError::InvalidJson` if the string isn't valid JSON.
pub fn load_schema_str(content: &str) -> Result<Value, LoadError> {
    serde_json::from_str(content).map_err(|source| LoadError::InvalidJson { source })
}

/// Load a [`ResourceConfig`] from a JSON file.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound`, or `LoadError::InvalidJson` when the
/// file is not JSON or carries unknown keys.
pub fn load_config(path: &Path) -> Result<ResourceConfig, LoadError> {
    load_json(path)
}

/// Read and deserialize any JSON file.
///
/// # Errors
///
/// Same as [`load_schema`].
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| LoadError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&content).map_err(|source| LoadError::InvalidJson { source })
}

/// Load a schema from an HTTP/HTTPS URL.
///
/// Requires the `remote` feature (enabled by default).
///
/// # Errors
///
/// Returns `LoadError::NetworkError` if the request fails or the
/// response isn't valid JSON.
#[cfg(feature = "remote")]
pub fn load_schema_url(url: &str) -> Result<Value, LoadError> {
    let network = |source| LoadError::NetworkError {
        url: url.to_string(),
        source,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(network)?;

    client
        .get(url)
        .send()
        .and_then(|response| response.error_for_status())
        .map_err(network)?
        .json()
        .map_err(network)
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Load a schema from a file path or URL.
///
/// URL loading requires the `remote` feature.
///
/// # Errors
///
/// Returns appropriate errors based on the source type.
pub fn load_schema_auto(source: &str) -> Result<Value, LoadError> {
    if is_url(source) {
        #[cfg(feature = "remote")]
        {
            load_schema_url(source)
        }
        #[cfg(not(feature = "remote"))]
        {
            Err(LoadError::FileNotFound {
                path: std::path::PathBuf::from(source),
            })
        }
    } else {
        load_schema(Path::new(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn load_schema_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"type": "object"}}"#).unwrap();

        let schema = load_schema(file.path()).unwrap();
        assert_eq!(schema["type"], "object");
    }

    #[test]
    fn load_schema_file_not_found() {
        let result = load_schema(Path::new("/nonexistent/path.json"));
        assert!(matches!(result, Err(LoadError::FileNotFound { .. })));
    }

    #[test]
    fn load_schema_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not valid json").unwrap();

        let result = load_schema(file.path());
        assert!(matches!(result, Err(LoadError::InvalidJson { .. })));
    }

    #[test]
    fn load_schema_str_invalid() {
        let result = load_schema_str("not json");
        assert!(matches!(result, Err(LoadError::InvalidJson { .. })));
    }

    #[test]
    fn load_config_reads_settings() {
        let mut file = NamedTempFile::new().unwrap();
        let settings = r#"{"permission_name": "catalog", "disabled": ["delete"]}"#;
        writeln!(file, "{}", settings).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.permission_name.as_deref(), Some("catalog"));
        assert_eq!(config.list_age_seconds, None);
    }

    #[test]
    fn load_config_rejects_unknown_keys() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"permissions": "catalog"}}"#).unwrap();

        let result = load_config(file.path());
        assert!(matches!(result, Err(LoadError::InvalidJson { .. })));
    }

    #[test]
    fn is_url_detects_schemes() {
        assert!(is_url("https://example.com/schema.json"));
        assert!(is_url("http://example.com/schema.json"));
        assert!(!is_url("/path/to/schema.json"));
        assert!(!is_url("schema.json"));
    }

    #[test]
    fn load_schema_auto_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"type": "string"}}"#).unwrap();

        let schema = load_schema_auto(file.path().to_str().unwrap()).unwrap();
        assert_eq!(schema["type"], "string");
    }

    #[cfg(feature = "remote")]
    mod remote {
        use super::*;

        #[test]
        fn load_schema_url_valid() {
            let mut server = mockito::Server::new();
            let mock = server
                .mock("GET", "/products.json")
                .with_header("content-type", "application/json")
                .with_body(r#"{"type": "object", "properties": {"id": {"type": "integer"}}}"#)
                .create();

            let url = format!("{}/products.json", server.url());
            let schema = load_schema_url(&url).unwrap();
            assert_eq!(schema["properties"]["id"]["type"], "integer");
            mock.assert();
        }

        #[test]
        fn load_schema_url_404() {
            let mut server = mockito::Server::new();
            server
                .mock("GET", "/missing.json")
                .with_status(404)
                .create();

            let result = load_schema_url(&format!("{}/missing.json", server.url()));
            assert!(matches!(result, Err(LoadError::NetworkError { .. })));
        }

        #[test]
        fn load_schema_url_invalid_body() {
            let mut server = mockito::Server::new();
            server
                .mock("GET", "/broken.json")
                .with_body("not json")
                .create();

            let result = load_schema_auto(&format!("{}/broken.json", server.url()));
            assert!(matches!(result, Err(LoadError::NetworkError { .. })));
        }
    }
}

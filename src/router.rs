//! Endpoint descriptors and the route table that places actions on paths.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::types::{ResourceAction, StringMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where one action is mounted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDef {
    pub path: String,
    pub method: HttpMethod,
}

/// Maps an action to a route. Returning `None` suppresses the endpoint.
pub trait RouterProvider: Send + Sync {
    fn route(&self, action: ResourceAction, resource: &str) -> Option<RouteDef>;
}

impl<F> RouterProvider for F
where
    F: Fn(ResourceAction, &str) -> Option<RouteDef> + Send + Sync,
{
    fn route(&self, action: ResourceAction, resource: &str) -> Option<RouteDef> {
        self(action, resource)
    }
}

/// REST layout: `GET|PATCH|PUT|DELETE {name}/:id`, `POST|GET {name}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRouter;

impl RouterProvider for StandardRouter {
    fn route(&self, action: ResourceAction, resource: &str) -> Option<RouteDef> {
        let (path, method) = match action {
            ResourceAction::Get => (format!("{}/:id", resource), HttpMethod::Get),
            ResourceAction::Create => (resource.to_string(), HttpMethod::Post),
            ResourceAction::Update => (format!("{}/:id", resource), HttpMethod::Patch),
            ResourceAction::Replace => (format!("{}/:id", resource), HttpMethod::Put),
            ResourceAction::Delete => (format!("{}/:id", resource), HttpMethod::Delete),
            ResourceAction::List => (resource.to_string(), HttpMethod::Get),
        };
        Some(RouteDef { path, method })
    }
}

/// Transport-neutral description of one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub path: String,
    pub method: HttpMethod,
    pub action: ResourceAction,
    pub tags: Vec<String>,
    pub summary: String,
    pub authentication: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,
}

impl Endpoint {
    /// Match a concrete request path against this endpoint's pattern and
    /// return the `:param` captures.
    pub fn match_path(&self, path: &str) -> Option<StringMap> {
        let pattern: Vec<&str> = self.path.trim_matches('/').split('/').collect();
        let actual: Vec<&str> = path.trim_matches('/').split('/').collect();
        if pattern.len() != actual.len() {
            return None;
        }

        let mut params = StringMap::new();
        for (expected, segment) in pattern.iter().zip(&actual) {
            match expected.strip_prefix(':') {
                Some(name) if !segment.is_empty() => {
                    params.insert(name.to_string(), segment.to_string());
                }
                Some(_) => return None,
                None if expected == segment => {}
                None => return None,
            }
        }
        Some(params)
    }
}

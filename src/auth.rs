//! Authentication registry: named methods tried in order until one yields
//! an actor.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::debug;

use crate::acl::Actor;
use crate::error::{ResourceError, SchemaError};
use crate::types::StringMap;

/// Request data an authentication method may inspect.
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    pub headers: StringMap,
    pub query: StringMap,
    pub params: StringMap,
    pub body: Value,
}

impl AuthRequest {
    /// Header value, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Token of an `Authorization: Bearer <token>` header.
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.header("authorization")?;
        let (scheme, token) = value.split_once(' ')?;
        scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
    }
}

/// Resolves a request to an actor, or `None` when the credentials do not
/// apply to this method.
pub type AuthFn = Arc<dyn Fn(AuthRequest) -> AuthFuture + Send + Sync>;

/// Future returned by an [`AuthFn`].
pub type AuthFuture = BoxFuture<'static, Result<Option<Actor>, ResourceError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpScheme {
    Basic,
    Bearer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeyLocation {
    Header,
    Query,
}

/// How a method reads its credentials. Used for endpoint documentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthScheme {
    Http {
        scheme: HttpScheme,
        bearer_format: Option<String>,
    },
    ApiKey {
        location: ApiKeyLocation,
        name: String,
    },
}

impl AuthScheme {
    /// OpenAPI security scheme object.
    pub fn security_scheme(&self) -> Value {
        match self {
            AuthScheme::Http {
                scheme,
                bearer_format,
            } => {
                let mut value = json!({
                    "type": "http",
                    "scheme": match scheme {
                        HttpScheme::Basic => "basic",
                        HttpScheme::Bearer => "bearer",
                    },
                });
                if let Some(format) = bearer_format {
                    value["bearerFormat"] = json!(format);
                }
                value
            }
            AuthScheme::ApiKey { location, name } => json!({
                "type": "apiKey",
                "in": match location {
                    ApiKeyLocation::Header => "header",
                    ApiKeyLocation::Query => "query",
                },
                "name": name,
            }),
        }
    }
}

#[derive(Clone)]
pub struct AuthMethod {
    pub scheme: AuthScheme,
    func: AuthFn,
}

impl AuthMethod {
    pub fn new<F, Fut>(scheme: AuthScheme, func: F) -> Self
    where
        F: Fn(AuthRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Actor>, ResourceError>> + Send + 'static,
    {
        Self {
            scheme,
            func: Arc::new(move |request| Box::pin(func(request))),
        }
    }

    pub fn bearer<F, Fut>(func: F) -> Self
    where
        F: Fn(AuthRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Actor>, ResourceError>> + Send + 'static,
    {
        Self::new(
            AuthScheme::Http {
                scheme: HttpScheme::Bearer,
                bearer_format: None,
            },
            func,
        )
    }

    pub fn basic<F, Fut>(func: F) -> Self
    where
        F: Fn(AuthRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Actor>, ResourceError>> + Send + 'static,
    {
        Self::new(
            AuthScheme::Http {
                scheme: HttpScheme::Basic,
                bearer_format: None,
            },
            func,
        )
    }

    pub fn api_key<F, Fut>(location: ApiKeyLocation, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(AuthRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Actor>, ResourceError>> + Send + 'static,
    {
        Self::new(
            AuthScheme::ApiKey {
                location,
                name: name.into(),
            },
            func,
        )
    }
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthMethod")
            .field("scheme", &self.scheme)
            .finish_non_exhaustive()
    }
}

/// Registry of named authentication methods.
#[derive(Debug, Clone, Default)]
pub struct Authentications {
    methods: BTreeMap<String, AuthMethod>,
}

impl Authentications {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// Returns `SchemaError::DuplicateAuthMethod` if `name` is taken.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        method: AuthMethod,
    ) -> Result<(), SchemaError> {
        let name = name.into();
        if self.methods.contains_key(&name) {
            return Err(SchemaError::DuplicateAuthMethod { name });
        }
        self.methods.insert(name, method);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Security schemes of every registered method, keyed by name.
    pub fn security_schemes(&self) -> BTreeMap<String, Value> {
        self.methods
            .iter()
            .map(|(name, method)| {
                (name.clone(), method.scheme.security_scheme())
            })
            .collect()
    }

    /// Try `methods` in order and return the first actor produced.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unregistered method name,
    /// `ResourceError::Unauthorized` when every method declines, or the
    /// first error a method raises.
    pub async fn try_authenticate(
        &self,
        methods: &[String],
        request: &AuthRequest,
    ) -> Result<Actor, ResourceError> {
        for name in methods {
            let method = self
                .methods
                .get(name)
                .ok_or_else(|| SchemaError::UnknownAuthMethod { name: name.clone() })?;

            debug!(method = %name, "trying authentication method");
            if let Some(actor) = (method.func)(request.clone()).await? {
                debug!(method = %name, "authenticated");
                return Ok(actor);
            }
        }

        debug!("all authentication methods declined");
        Err(ResourceError::Unauthorized)
    }
}

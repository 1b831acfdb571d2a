//! Resource orchestration: permission checks, validation, hooks, caching
//! and the storage call for each CRUD action.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::try_join_all;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::acl::{may_i, Actor};
use crate::auth::{AuthRequest, Authentications};
use crate::cache::CacheManager;
use crate::config::ResourceConfig;
use crate::error::{ResourceError, SchemaError};
use crate::hooks::{Hook, HookContext, HookEvent, Hooks};
use crate::query::{DefaultAdaptor, ListAdaptor, ListInput, ListResults, QueryListParam};
use crate::repository::Repository;
use crate::router::{Endpoint, HttpMethod, RouterProvider, StandardRouter};
use crate::schema::{CanonicalSchema, ResourceSchema};
use crate::types::{Record, RecordId, ResourceAction, StringMap, ValidateAction};

/// Order endpoints are generated in.
const ENDPOINT_ORDER: [ResourceAction; 6] = [
    ResourceAction::Get,
    ResourceAction::Update,
    ResourceAction::Replace,
    ResourceAction::Create,
    ResourceAction::Delete,
    ResourceAction::List,
];

/// A request as handed over by a transport.
#[derive(Debug, Clone, Default)]
pub struct ResourceRequest {
    pub params: StringMap,
    pub query: StringMap,
    pub body: Value,
    pub headers: StringMap,
    /// The authenticated actor, `None` for anonymous requests.
    pub actor: Option<Actor>,
}

impl ResourceRequest {
    pub fn new(actor: Option<Actor>) -> Self {
        Self {
            actor,
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.params.insert("id".to_string(), id.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }
}

/// HTTP-shaped outcome of [`Resource::handle`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceResponse {
    pub status: u16,
    pub body: Value,
    pub headers: StringMap,
}

impl ResourceResponse {
    fn ok(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            headers: StringMap::new(),
        }
    }
}

impl From<&ResourceError> for ResourceResponse {
    fn from(err: &ResourceError) -> Self {
        Self::ok(err.status_code(), err.body())
    }
}

/// One CRUD resource: a schema bound to a storage backend.
///
/// Configured once at startup through the builder methods, then shared
/// read-only across requests.
pub struct Resource {
    name: String,
    permission_name: Option<String>,
    schema: ResourceSchema,
    repository: Arc<dyn Repository>,
    hooks: Hooks,
    cache: CacheManager,
    list_adaptor: Arc<dyn ListAdaptor>,
    router: Arc<dyn RouterProvider>,
    tags: Vec<String>,
    authentication: Vec<String>,
    enabled: BTreeSet<ResourceAction>,
}

impl Resource {
    /// Resource named after its repository.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::MissingName` if the repository has no name, or
    /// any error raised while deriving the schemas.
    pub fn new(
        repository: Arc<dyn Repository>,
        canonical: impl Into<CanonicalSchema>,
    ) -> Result<Self, SchemaError> {
        let name = repository.name().to_string();
        Self::named(name, repository, canonical)
    }

    /// Resource with an explicit name.
    ///
    /// Actions the repository does not support are disabled.
    ///
    /// # Errors
    ///
    /// Same as [`Resource::new`].
    pub fn named(
        name: impl Into<String>,
        repository: Arc<dyn Repository>,
        canonical: impl Into<CanonicalSchema>,
    ) -> Result<Self, SchemaError> {
        let name = name.into();
        if name.is_empty() {
            return Err(SchemaError::MissingName);
        }

        let schema = ResourceSchema::new(name.clone(), canonical)?;
        let enabled = ResourceAction::ALL
            .into_iter()
            .filter(|action| repository.supports(*action))
            .collect();

        Ok(Self {
            tags: vec![name.clone()],
            name,
            permission_name: None,
            schema,
            repository,
            hooks: Hooks::new(),
            cache: CacheManager::default(),
            list_adaptor: Arc::new(DefaultAdaptor),
            router: Arc::new(StandardRouter),
            authentication: Vec::new(),
            enabled,
        })
    }

    /// Apply declarative settings on top of the current ones.
    pub fn with_config(mut self, config: &ResourceConfig) -> Self {
        if let Some(name) = config.name.as_ref().filter(|name| !name.is_empty()) {
            if self.tags == [self.name.clone()] {
                self.tags = vec![name.clone()];
            }
            self.name = name.clone();
            self.schema.rename(name.clone());
        }
        if let Some(permission) = &config.permission_name {
            self.permission_name = Some(permission.clone());
        }
        if !config.tags.is_empty() {
            self.tags = config.tags.clone();
        }
        if !config.authentication.is_empty() {
            self.authentication = config.authentication.clone();
        }
        if let Some(age) = config.item_age_seconds {
            self.cache.set_item_age_seconds(age);
        }
        if let Some(age) = config.list_age_seconds {
            self.cache.set_list_age_seconds(age);
        }
        self.disable(config.disabled.iter().copied())
    }

    pub fn permission_name(mut self, permission: impl Into<String>) -> Self {
        self.permission_name = Some(permission.into());
        self
    }

    pub fn tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn authentication(mut self, methods: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.authentication = methods.into_iter().map(Into::into).collect();
        self
    }

    pub fn list_adaptor(mut self, adaptor: impl ListAdaptor + 'static) -> Self {
        self.list_adaptor = Arc::new(adaptor);
        self
    }

    pub fn cache(mut self, cache: CacheManager) -> Self {
        self.cache = cache;
        self
    }

    pub fn router_provider(mut self, router: impl RouterProvider + 'static) -> Self {
        self.router = Arc::new(router);
        self
    }

    /// Turn actions off regardless of repository support.
    pub fn disable(mut self, actions: impl IntoIterator<Item = ResourceAction>) -> Self {
        for action in actions {
            self.enabled.remove(&action);
        }
        self
    }

    /// Append hooks to a record lifecycle event.
    pub fn hook(mut self, event: HookEvent, hooks: impl IntoIterator<Item = Hook<Record>>) -> Self {
        self.hooks.register(event, hooks);
        self
    }

    pub fn pre_list_hook(mut self, hooks: impl IntoIterator<Item = Hook<QueryListParam>>) -> Self {
        self.hooks.register_pre_list(hooks);
        self
    }

    pub fn post_list_hook(mut self, hooks: impl IntoIterator<Item = Hook<ListResults>>) -> Self {
        self.hooks.register_post_list(hooks);
        self
    }

    pub fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Permission namespace; the resource name unless overridden.
    pub fn permission(&self) -> &str {
        self.permission_name.as_deref().unwrap_or(&self.name)
    }

    pub fn schema(&self) -> &ResourceSchema {
        &self.schema
    }

    pub fn tag_list(&self) -> &[String] {
        &self.tags
    }

    pub fn authentication_methods(&self) -> &[String] {
        &self.authentication
    }

    pub fn is_enabled(&self, action: ResourceAction) -> bool {
        self.enabled.contains(&action)
    }

    /// Fail with `PermissionDenied` unless the actor holds
    /// `{prefix}.{permission}`.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::PermissionDenied`.
    pub fn check_permission(
        &self,
        actor: Option<&Actor>,
        prefix: &str,
    ) -> Result<(), ResourceError> {
        let permission = self.permission();
        if may_i(actor, &format!("{}.{}", prefix, permission)) {
            Ok(())
        } else {
            debug!(resource = %self.name, action = prefix, "permission denied");
            Err(ResourceError::PermissionDenied {
                action: prefix.to_string(),
                permission: permission.to_string(),
            })
        }
    }

    /// Render a stored record for `actor`.
    ///
    /// Actors without the base view permission get an empty object. The
    /// `postView` hooks run on the sanitized record.
    ///
    /// # Errors
    ///
    /// Propagates `postView` hook failures.
    pub async fn view_as(
        &self,
        data: Record,
        actor: Option<&Actor>,
    ) -> Result<Record, ResourceError> {
        if !may_i(actor, &format!("view.{}", self.permission())) {
            return Ok(Value::Object(Map::new()));
        }

        let output = self.schema.validate(ValidateAction::View, &data, actor)?;
        let ctx = self.context(ResourceAction::Get, actor, data.clone(), record_id(&data));
        self.hooks.execute(HookEvent::PostView, output, &ctx).await
    }

    /// # Errors
    ///
    /// `NotFound` when no record has this id, `PermissionDenied` without
    /// `view.{permission}`.
    pub async fn get(&self, id: &RecordId, actor: Option<&Actor>) -> Result<Record, ResourceError> {
        self.ensure_enabled(ResourceAction::Get)?;
        self.check_permission(actor, "view")?;
        debug!(resource = %self.name, %id, "get");

        let repository = &self.repository;
        let data = self
            .cache
            .get(&self.name, id, || repository.get(id))
            .await?
            .ok_or_else(|| self.not_found(id))?;

        self.view_as(data, actor).await
    }

    /// # Errors
    ///
    /// Validation, permission, hook and backend failures.
    pub async fn create(
        &self,
        body: Value,
        actor: Option<&Actor>,
    ) -> Result<Record, ResourceError> {
        self.ensure_enabled(ResourceAction::Create)?;
        self.check_permission(actor, "create")?;
        debug!(resource = %self.name, "create");

        let data = self.schema.validate(ValidateAction::Create, &body, actor)?;
        let ctx = self.context(ResourceAction::Create, actor, body, None);
        let data = self.hooks.execute(HookEvent::PreCreate, data, &ctx).await?;

        self.cache.invalidate(&self.name, None).await?;
        let result = self.repository.create(data.clone()).await?;

        let ctx = self.context(ResourceAction::Create, actor, data, record_id(&result));
        let result = self
            .hooks
            .execute(HookEvent::PostCreate, result, &ctx)
            .await?;

        self.view_as(result, actor).await
    }

    /// # Errors
    ///
    /// Validation, permission, hook and backend failures.
    pub async fn update(
        &self,
        id: &RecordId,
        patch: Value,
        actor: Option<&Actor>,
    ) -> Result<Record, ResourceError> {
        self.ensure_enabled(ResourceAction::Update)?;
        self.check_permission(actor, "update")?;
        debug!(resource = %self.name, %id, "update");

        let data = self.schema.validate(ValidateAction::Update, &patch, actor)?;
        let ctx = self.context(
            ResourceAction::Update,
            actor,
            with_id(patch, id),
            Some(id.clone()),
        );
        let data = self.hooks.execute(HookEvent::PreUpdate, data, &ctx).await?;

        self.cache.invalidate(&self.name, Some(id)).await?;
        let result = self.repository.update(id, data).await?;
        let result = self
            .hooks
            .execute(HookEvent::PostUpdate, result, &ctx)
            .await?;

        self.view_as(result, actor).await
    }

    /// Replace the whole record. The response shows the row as stored.
    ///
    /// # Errors
    ///
    /// Validation, permission, hook and backend failures.
    pub async fn replace(
        &self,
        id: &RecordId,
        body: Value,
        actor: Option<&Actor>,
    ) -> Result<Record, ResourceError> {
        self.ensure_enabled(ResourceAction::Replace)?;
        self.check_permission(actor, "replace")?;
        debug!(resource = %self.name, %id, "replace");

        let data = self.schema.validate(ValidateAction::Replace, &body, actor)?;
        let ctx = self.context(ResourceAction::Replace, actor, body, Some(id.clone()));
        let data = self.hooks.execute(HookEvent::PreReplace, data, &ctx).await?;

        self.cache.invalidate(&self.name, Some(id)).await?;
        let result = self.repository.replace(id, data.clone()).await?;

        let ctx = self.context(ResourceAction::Replace, actor, data, Some(id.clone()));
        let result = self
            .hooks
            .execute(HookEvent::PostReplace, result, &ctx)
            .await?;

        self.view_as(result, actor).await
    }

    /// Delete a record and return `{ "id": id }`.
    ///
    /// # Errors
    ///
    /// `NotFound` when the backend deleted nothing, plus permission, hook
    /// and backend failures.
    pub async fn delete(
        &self,
        id: &RecordId,
        actor: Option<&Actor>,
    ) -> Result<Value, ResourceError> {
        self.ensure_enabled(ResourceAction::Delete)?;
        self.check_permission(actor, "delete")?;
        debug!(resource = %self.name, %id, "delete");

        let marker = json!({ "id": id.to_value() });
        let ctx = self.context(
            ResourceAction::Delete,
            actor,
            marker.clone(),
            Some(id.clone()),
        );
        self.hooks
            .execute(HookEvent::PreDelete, marker.clone(), &ctx)
            .await?;

        self.cache.invalidate(&self.name, Some(id)).await?;
        if self.repository.delete(id).await? == 0 {
            return Err(self.not_found(id));
        }

        self.hooks
            .execute(HookEvent::PostDelete, marker.clone(), &ctx)
            .await?;
        Ok(marker)
    }

    /// Run a structured list query and view-transform every row.
    ///
    /// Rows the actor may not view come back as empty objects, in place.
    ///
    /// # Errors
    ///
    /// Permission, hook and backend failures.
    pub async fn list_query(
        &self,
        params: QueryListParam,
        actor: Option<&Actor>,
    ) -> Result<(QueryListParam, ListResults), ResourceError> {
        self.ensure_enabled(ResourceAction::List)?;
        self.check_permission(actor, "view")?;

        let raw = serde_json::to_value(&params).unwrap_or(Value::Null);
        let ctx = self.context(ResourceAction::List, actor, raw, None);
        let params = self.hooks.execute_pre_list(params, &ctx).await?;
        debug!(resource = %self.name, filters = params.filter.len(), "list");

        let repository = &self.repository;
        let results = self
            .cache
            .list(&self.name, &params, || async {
                repository.list(&params).await.map(Some)
            })
            .await?
            .unwrap_or_default();

        let raw = serde_json::to_value(&results).unwrap_or(Value::Null);
        let ctx = self.context(ResourceAction::List, actor, raw, None);
        let ListResults { data, total } = self.hooks.execute_post_list(results, &ctx).await?;

        let data = try_join_all(data.into_iter().map(|row| self.view_as(row, actor))).await?;
        Ok((params, ListResults { data, total }))
    }

    /// Parse a transport list request with the list adaptor, run it and
    /// format the response.
    ///
    /// # Errors
    ///
    /// See [`Resource::list_query`].
    pub async fn list(
        &self,
        input: ListInput<'_>,
        actor: Option<&Actor>,
    ) -> Result<ResourceResponse, ResourceError> {
        self.ensure_enabled(ResourceAction::List)?;
        self.check_permission(actor, "view")?;

        let params = self.list_adaptor.parse(&self.name, input);
        let (params, results) = self.list_query(params, actor).await?;
        let response = self.list_adaptor.response(results, &params, &self.name);
        Ok(ResourceResponse {
            status: 200,
            body: response.body,
            headers: response.headers,
        })
    }

    /// Resolve the actor for a request using this resource's methods.
    ///
    /// A resource without authentication methods treats every caller as
    /// an actor with no grants.
    ///
    /// # Errors
    ///
    /// `Unauthorized` when every method declines.
    pub async fn authenticate(
        &self,
        registry: &Authentications,
        request: &AuthRequest,
    ) -> Result<Actor, ResourceError> {
        if self.authentication.is_empty() {
            return Ok(Actor::anonymous());
        }
        registry
            .try_authenticate(&self.authentication, request)
            .await
    }

    /// Dispatch a transport request to the pipeline of `action`.
    ///
    /// # Errors
    ///
    /// Whatever the pipeline raises; a missing `id` param is `NotFound`.
    pub async fn dispatch(
        &self,
        action: ResourceAction,
        request: ResourceRequest,
    ) -> Result<ResourceResponse, ResourceError> {
        let actor = request.actor.as_ref();
        match action {
            ResourceAction::Get => {
                let id = self.id_param(action, &request)?;
                Ok(ResourceResponse::ok(200, self.get(&id, actor).await?))
            }
            ResourceAction::Create => {
                let created = self.create(request.body.clone(), actor).await?;
                Ok(ResourceResponse::ok(201, created))
            }
            ResourceAction::Update => {
                let id = self.id_param(action, &request)?;
                let updated = self.update(&id, request.body.clone(), actor).await?;
                Ok(ResourceResponse::ok(200, updated))
            }
            ResourceAction::Replace => {
                let id = self.id_param(action, &request)?;
                let replaced = self.replace(&id, request.body.clone(), actor).await?;
                Ok(ResourceResponse::ok(200, replaced))
            }
            ResourceAction::Delete => {
                let id = self.id_param(action, &request)?;
                Ok(ResourceResponse::ok(200, self.delete(&id, actor).await?))
            }
            ResourceAction::List => {
                let input = ListInput {
                    query: &request.query,
                    params: &request.params,
                    body: &request.body,
                    headers: &request.headers,
                };
                self.list(input, actor).await
            }
        }
    }

    /// Like [`Resource::dispatch`], with errors rendered as responses.
    pub async fn handle(
        &self,
        action: ResourceAction,
        request: ResourceRequest,
    ) -> ResourceResponse {
        match self.dispatch(action, request).await {
            Ok(response) => response,
            Err(err) => {
                if err.status_code() >= 500 {
                    warn!(resource = %self.name, %action, error = %err, "request failed");
                } else {
                    debug!(resource = %self.name, %action, error = %err, "request rejected");
                }
                ResourceResponse::from(&err)
            }
        }
    }

    /// Endpoint descriptors for every enabled action the router places.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        let view = self.schema.view_schema().clone();
        let id_params = json!({
            "type": "object",
            "properties": { "id": { "type": "string", "minLength": 1 } },
            "required": ["id"]
        });

        ENDPOINT_ORDER
            .into_iter()
            .filter(|action| self.is_enabled(*action))
            .filter_map(|action| {
                let Some(route) = self.router.route(action, &self.name) else {
                    debug!(resource = %self.name, %action, "route disabled by router provider");
                    return None;
                };

                let (params_schema, query_schema, body_schema, response_schema) = match action {
                    ResourceAction::Get | ResourceAction::Delete => {
                        (Some(id_params.clone()), None, None, view.clone())
                    }
                    ResourceAction::Update => (
                        Some(id_params.clone()),
                        None,
                        Some(self.schema.update_schema().clone()),
                        view.clone(),
                    ),
                    ResourceAction::Replace => (
                        Some(id_params.clone()),
                        None,
                        Some(self.schema.replace_schema().clone()),
                        view.clone(),
                    ),
                    ResourceAction::Create => (
                        None,
                        None,
                        Some(self.schema.create_schema().clone()),
                        view.clone(),
                    ),
                    ResourceAction::List => (
                        None,
                        self.list_adaptor.query_schema(),
                        None,
                        json!({ "type": "array", "items": view.clone() }),
                    ),
                };

                Some(Endpoint {
                    path: route.path,
                    method: route.method,
                    action,
                    tags: self.tags.clone(),
                    summary: format!("[{}] {}", action, self.name),
                    authentication: self.authentication.clone(),
                    params_schema,
                    query_schema,
                    body_schema,
                    response_schema: Some(response_schema),
                })
            })
            .collect()
    }

    /// Find the endpoint serving `method` on `path`, with its path params.
    pub fn route(&self, method: HttpMethod, path: &str) -> Option<(ResourceAction, StringMap)> {
        self.endpoints()
            .into_iter()
            .filter(|endpoint| endpoint.method == method)
            .find_map(|endpoint| {
                endpoint
                    .match_path(path)
                    .map(|params| (endpoint.action, params))
            })
    }

    fn ensure_enabled(&self, action: ResourceAction) -> Result<(), ResourceError> {
        if self.is_enabled(action) {
            Ok(())
        } else {
            Err(ResourceError::NotConfigured {
                resource: self.name.clone(),
                action,
            })
        }
    }

    fn id_param(
        &self,
        action: ResourceAction,
        request: &ResourceRequest,
    ) -> Result<RecordId, ResourceError> {
        match request.params.get("id").map(String::as_str) {
            Some(id) if !id.is_empty() => Ok(id
                .parse::<i64>()
                .map(RecordId::Int)
                .unwrap_or_else(|_| RecordId::from(id))),
            _ => Err(ResourceError::not_found(format!(
                "Resource {} {} requires id",
                self.name, action
            ))),
        }
    }

    fn not_found(&self, id: &RecordId) -> ResourceError {
        ResourceError::not_found(format!("Resource {} with id {} not found", self.name, id))
    }

    fn context(
        &self,
        action: ResourceAction,
        actor: Option<&Actor>,
        raw: Value,
        id: Option<RecordId>,
    ) -> HookContext {
        HookContext {
            resource: self.name.clone(),
            action,
            actor: actor.cloned(),
            raw,
            id,
        }
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("permission", &self.permission())
            .field("enabled", &self.enabled)
            .field("hooks", &self.hooks)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

fn record_id(record: &Value) -> Option<RecordId> {
    record.get("id").and_then(RecordId::from_value)
}

/// The raw update payload as hooks see it: body id if present, else the
/// path id.
fn with_id(mut body: Value, id: &RecordId) -> Value {
    if let Some(fields) = body.as_object_mut() {
        if fields.get("id").and_then(RecordId::from_value).is_none() {
            fields.insert("id".to_string(), id.to_value());
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::hooks::hook;
    use crate::memory::MemoryRepository;
    use crate::router::RouteDef;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn products() -> Value {
        json!({
            "title": "Product",
            "type": "object",
            "required": ["name"],
            "properties": {
                "id": { "type": "integer", "$create": false, "$update": false },
                "name": { "type": "string", "$search": true },
                "price": { "type": "number", "$update": "shop.manager" },
                "cost": { "type": "number", "$view": "shop.manager" }
            }
        })
    }

    fn resource() -> Resource {
        let repo = MemoryRepository::new("products").with_rows([
            json!({ "id": 1, "name": "Shirt", "price": 20, "cost": 8 }),
            json!({ "id": 2, "name": "Hat", "price": 10, "cost": 3 }),
        ]);
        Resource::new(Arc::new(repo), products()).unwrap()
    }

    fn admin() -> Actor {
        Actor::new([
            "view.products",
            "create.products",
            "update.products",
            "replace.products",
            "delete.products",
        ])
    }

    struct ReadOnly;

    #[async_trait::async_trait]
    impl Repository for ReadOnly {
        fn name(&self) -> &str {
            "archive"
        }

        fn supports(&self, action: ResourceAction) -> bool {
            action == ResourceAction::Get
        }

        async fn get(&self, id: &RecordId) -> Result<Option<Record>, ResourceError> {
            Ok(Some(json!({ "id": id.to_value() })))
        }
    }

    #[test]
    fn empty_name_is_rejected() {
        let repo = MemoryRepository::new("");
        assert!(matches!(
            Resource::new(Arc::new(repo), products()),
            Err(SchemaError::MissingName)
        ));
    }

    #[tokio::test]
    async fn get_requires_view_permission() {
        let err = resource()
            .get(&RecordId::Int(1), Some(&Actor::anonymous()))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.to_string(), "Permission denied view.products");
    }

    #[tokio::test]
    async fn get_masks_permission_gated_fields() {
        let resource = resource();
        let row = resource
            .get(&RecordId::Int(1), Some(&admin()))
            .await
            .unwrap();
        assert_eq!(row, json!({ "id": 1, "name": "Shirt", "price": 20 }));

        let mut manager = admin();
        manager.grant("shop.manager");
        let row = resource
            .get(&RecordId::Int(1), Some(&manager))
            .await
            .unwrap();
        assert_eq!(row["cost"], 8);
    }

    #[tokio::test]
    async fn get_missing_row_is_not_found() {
        let err = resource()
            .get(&RecordId::Int(99), Some(&admin()))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn create_without_view_returns_empty_object() {
        let creator = Actor::new(["create.products"]);
        let row = resource()
            .create(json!({ "name": "Cap", "price": 5 }), Some(&creator))
            .await
            .unwrap();
        assert_eq!(row, json!({}));
    }

    #[tokio::test]
    async fn update_with_ungranted_field_touches_nothing() {
        let resource = resource();
        let actor = Actor::new(["update.products", "view.products"]);
        let patch = json!({ "name": "x", "price": 5 });
        let err = resource
            .update(&RecordId::Int(1), patch, Some(&actor))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 403);
        let errors = err.errors().unwrap();
        assert_eq!(errors.keys().collect::<Vec<_>>(), vec!["price"]);

        let row = resource.get(&RecordId::Int(1), Some(&actor)).await.unwrap();
        assert_eq!(row["name"], "Shirt");
    }

    #[tokio::test]
    async fn hooks_run_around_create() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let resource = resource()
            .hook(
                HookEvent::PreCreate,
                [hook(|mut data: Record, _ctx| async move {
                    data["name"] = json!(format!("{}!", data["name"].as_str().unwrap_or_default()));
                    Ok(data)
                })],
            )
            .hook(
                HookEvent::PostCreate,
                [hook(move |data: Record, ctx: HookContext| {
                    let counter = counter.clone();
                    async move {
                        assert_eq!(ctx.id, Some(RecordId::Int(3)));
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(data)
                    }
                })],
            );

        let row = resource
            .create(json!({ "name": "Cap" }), Some(&admin()))
            .await
            .unwrap();
        assert_eq!(row, json!({ "id": 3, "name": "Cap!" }));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pre_delete_failure_keeps_the_row() {
        let in_use = hook(|_data: Record, _ctx| async {
            Err(ResourceError::hook(409, "in use"))
        });
        let resource = resource().hook(HookEvent::PreDelete, [in_use]);
        let err = resource
            .delete(&RecordId::Int(1), Some(&admin()))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 409);
        assert!(resource
            .get(&RecordId::Int(1), Some(&admin()))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn delete_returns_id_and_then_not_found() {
        let resource = resource();
        let out = resource
            .delete(&RecordId::Int(2), Some(&admin()))
            .await
            .unwrap();
        assert_eq!(out, json!({ "id": 2 }));
        let err = resource
            .delete(&RecordId::Int(2), Some(&admin()))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn post_view_runs_on_every_row() {
        let resource = resource().hook(
            HookEvent::PostView,
            [hook(|mut data: Record, _ctx| async move {
                data["viewed"] = json!(true);
                Ok(data)
            })],
        );
        let (_, results) = resource
            .list_query(QueryListParam::new("products"), Some(&admin()))
            .await
            .unwrap();
        assert_eq!(results.total, 2);
        assert!(results.data.iter().all(|row| row["viewed"] == json!(true)));
    }

    #[tokio::test]
    async fn cached_reads_are_invalidated_by_writes() {
        let cache = CacheManager::new(Arc::new(MemoryCache::new())).with_ages(60, 60);
        let resource = resource().cache(cache);
        let actor = admin();
        let id = RecordId::Int(1);

        let row = resource.get(&id, Some(&actor)).await.unwrap();
        assert_eq!(row["name"], "Shirt");
        // cache fills are detached
        tokio::task::yield_now().await;
        resource
            .update(&id, json!({ "name": "Tee" }), Some(&actor))
            .await
            .unwrap();
        let row = resource.get(&id, Some(&actor)).await.unwrap();
        assert_eq!(row["name"], "Tee");
    }

    #[tokio::test]
    async fn unsupported_actions_are_not_configured() {
        let resource = Resource::new(Arc::new(ReadOnly), products()).unwrap();
        let reader = Actor::new(["view.archive"]);
        assert!(resource.get(&RecordId::Int(1), Some(&reader)).await.is_ok());

        let writer = Actor::new(["create.archive"]);
        let err = resource
            .create(json!({ "name": "x" }), Some(&writer))
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::NotConfigured { .. }));
        assert_eq!(resource.endpoints().len(), 1);
    }

    #[tokio::test]
    async fn permission_name_is_shared_namespace() {
        let resource = resource().permission_name("catalog");
        let actor = Actor::new(["view.catalog"]);
        assert!(resource.get(&RecordId::Int(1), Some(&actor)).await.is_ok());
        assert!(resource
            .get(&RecordId::Int(1), Some(&admin()))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn handle_maps_errors_to_responses() {
        let resource = resource();

        let response = resource
            .handle(ResourceAction::Get, ResourceRequest::new(Some(admin())))
            .await;
        assert_eq!(response.status, 404);

        let body = json!({ "name": "Cap" });
        let request = ResourceRequest::new(Some(admin())).with_body(body);
        let response = resource.handle(ResourceAction::Create, request).await;
        assert_eq!(response.status, 201);
        assert_eq!(response.body["id"], 3);

        let response = resource
            .handle(
                ResourceAction::List,
                ResourceRequest::new(Some(admin())).with_query("limit", "1"),
            )
            .await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body.as_array().map(Vec::len), Some(1));
        assert_eq!(response.headers["X-total-products"], "3");
    }

    #[test]
    fn endpoints_follow_router_and_disable() {
        let resource = resource()
            .disable([ResourceAction::Replace])
            .router_provider(|action: ResourceAction, name: &str| match action {
                ResourceAction::Delete => None,
                other => StandardRouter.route(other, name),
            });
        let endpoints = resource.endpoints();
        let actions: Vec<_> = endpoints.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                ResourceAction::Get,
                ResourceAction::Update,
                ResourceAction::Create,
                ResourceAction::List
            ]
        );

        let create = &endpoints[2];
        assert_eq!(create.path, "products");
        assert_eq!(create.summary, "[create] products");
        assert_eq!(create.tags, vec!["products"]);
        let body = create.body_schema.as_ref().unwrap();
        assert!(body["properties"].get("id").is_none());
    }

    #[test]
    fn route_finds_endpoint_for_request() {
        let resource = resource();
        let (action, params) = resource.route(HttpMethod::Patch, "products/7").unwrap();
        assert_eq!(action, ResourceAction::Update);
        assert_eq!(params["id"], "7");
        let (action, _) = resource.route(HttpMethod::Get, "products").unwrap();
        assert_eq!(action, ResourceAction::List);
        assert!(resource.route(HttpMethod::Post, "products/7").is_none());
    }

    #[test]
    fn config_overrides_settings() {
        let config = ResourceConfig {
            permission_name: Some("catalog".into()),
            disabled: vec![ResourceAction::Delete],
            authentication: vec!["token".into()],
            ..Default::default()
        };
        let resource = resource().with_config(&config);
        assert_eq!(resource.permission(), "catalog");
        assert!(!resource.is_enabled(ResourceAction::Delete));
        assert_eq!(resource.endpoints()[0].authentication, vec!["token"]);
    }

    #[test]
    fn custom_route_defs_are_used() {
        let resource = resource().router_provider(|action: ResourceAction, name: &str| {
            Some(RouteDef {
                path: format!("v2/{}/{}", name, action),
                method: HttpMethod::Post,
            })
        });
        assert!(resource
            .endpoints()
            .iter()
            .all(|e| e.path.starts_with("v2/products/")));
    }
}

//! Lifecycle hooks - ordered async transform chains keyed by event.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use crate::acl::Actor;
use crate::error::{ResourceError, SchemaError};
use crate::query::{ListResults, QueryListParam};
use crate::types::{Record, RecordId, ResourceAction};

/// Fixed information handed to every hook of a chain.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub resource: String,
    pub action: ResourceAction,
    pub actor: Option<Actor>,
    /// The input as received, before validation or earlier hooks.
    pub raw: Value,
    pub id: Option<RecordId>,
}

/// One hook: receives the previous hook's output and returns the next input.
pub type Hook<T> =
    Arc<dyn Fn(T, HookContext) -> BoxFuture<'static, Result<T, ResourceError>> + Send + Sync>;

/// Wrap an async closure as a [`Hook`].
pub fn hook<T, F, Fut>(f: F) -> Hook<T>
where
    F: Fn(T, HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ResourceError>> + Send + 'static,
{
    Arc::new(move |data, ctx| Box::pin(f(data, ctx)))
}

/// Record lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    PreCreate,
    PreUpdate,
    PreReplace,
    PreDelete,
    PostCreate,
    PostUpdate,
    PostReplace,
    PostDelete,
    PostView,
}

impl HookEvent {
    pub const ALL: [HookEvent; 9] = [
        HookEvent::PreCreate,
        HookEvent::PreUpdate,
        HookEvent::PreReplace,
        HookEvent::PreDelete,
        HookEvent::PostCreate,
        HookEvent::PostUpdate,
        HookEvent::PostReplace,
        HookEvent::PostDelete,
        HookEvent::PostView,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::PreCreate => "preCreate",
            HookEvent::PreUpdate => "preUpdate",
            HookEvent::PreReplace => "preReplace",
            HookEvent::PreDelete => "preDelete",
            HookEvent::PostCreate => "postCreate",
            HookEvent::PostUpdate => "postUpdate",
            HookEvent::PostReplace => "postReplace",
            HookEvent::PostDelete => "postDelete",
            HookEvent::PostView => "postView",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookEvent {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HookEvent::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| SchemaError::UnknownHook {
                hook: s.to_string(),
            })
    }
}

/// Ordered chain of hooks for one event.
pub struct HookChain<T> {
    name: &'static str,
    hooks: Vec<Hook<T>>,
}

impl<T: Send + 'static> HookChain<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            hooks: Vec::new(),
        }
    }

    /// Append hooks in order. Never replaces what is already registered.
    pub fn register(&mut self, hooks: impl IntoIterator<Item = Hook<T>>) {
        self.hooks.extend(hooks);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run the chain in registration order.
    ///
    /// An empty chain returns `data` unchanged. The first failing hook
    /// aborts the chain and its error is returned as is.
    ///
    /// # Errors
    ///
    /// Returns whatever error the failing hook produced.
    pub async fn execute(&self, data: T, ctx: &HookContext) -> Result<T, ResourceError> {
        if self.hooks.is_empty() {
            return Ok(data);
        }

        debug!(
            event = self.name,
            resource = %ctx.resource,
            hooks = self.hooks.len(),
            "running hooks"
        );
        let mut result = data;
        for hook in &self.hooks {
            result = hook(result, ctx.clone()).await?;
        }
        Ok(result)
    }
}

impl<T> fmt::Debug for HookChain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookChain")
            .field("name", &self.name)
            .field("len", &self.hooks.len())
            .finish()
    }
}

/// All hook chains of one resource.
///
/// Populated at setup time, read during request handling.
#[derive(Debug)]
pub struct Hooks {
    record: HashMap<HookEvent, HookChain<Record>>,
    pre_list: HookChain<QueryListParam>,
    post_list: HookChain<ListResults>,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            record: HookEvent::ALL
                .into_iter()
                .map(|event| (event, HookChain::new(event.as_str())))
                .collect(),
            pre_list: HookChain::new("preList"),
            post_list: HookChain::new("postList"),
        }
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, event: HookEvent, hooks: impl IntoIterator<Item = Hook<Record>>) {
        self.chain_mut(event).register(hooks);
    }

    pub fn register_pre_list(&mut self, hooks: impl IntoIterator<Item = Hook<QueryListParam>>) {
        self.pre_list.register(hooks);
    }

    pub fn register_post_list(&mut self, hooks: impl IntoIterator<Item = Hook<ListResults>>) {
        self.post_list.register(hooks);
    }

    pub fn count(&self, event: HookEvent) -> usize {
        self.record.get(&event).map(HookChain::len).unwrap_or(0)
    }

    pub fn pre_list_count(&self) -> usize {
        self.pre_list.len()
    }

    pub fn post_list_count(&self) -> usize {
        self.post_list.len()
    }

    /// # Errors
    ///
    /// Propagates the first hook failure.
    pub async fn execute(
        &self,
        event: HookEvent,
        data: Record,
        ctx: &HookContext,
    ) -> Result<Record, ResourceError> {
        match self.record.get(&event) {
            Some(chain) => chain.execute(data, ctx).await,
            None => Ok(data),
        }
    }

    /// # Errors
    ///
    /// Propagates the first hook failure.
    pub async fn execute_pre_list(
        &self,
        params: QueryListParam,
        ctx: &HookContext,
    ) -> Result<QueryListParam, ResourceError> {
        self.pre_list.execute(params, ctx).await
    }

    /// # Errors
    ///
    /// Propagates the first hook failure.
    pub async fn execute_post_list(
        &self,
        results: ListResults,
        ctx: &HookContext,
    ) -> Result<ListResults, ResourceError> {
        self.post_list.execute(results, ctx).await
    }

    fn chain_mut(&mut self, event: HookEvent) -> &mut HookChain<Record> {
        self.record
            .entry(event)
            .or_insert_with(|| HookChain::new(event.as_str()))
    }
}

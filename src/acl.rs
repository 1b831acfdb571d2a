//! Actors and permission checks.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// An authenticated identity with a flat set of permission strings.
///
/// Permissions are lowercased on the way in; there is no hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    permissions: BTreeSet<String>,
}

impl Actor {
    pub fn new<I, S>(permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            permissions: permissions
                .into_iter()
                .map(|p| p.as_ref().to_lowercase())
                .collect(),
        }
    }

    /// Actor with no grants at all.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn has(&self, permission: &str) -> bool {
        self.permissions.contains(&permission.to_lowercase())
    }

    pub fn grant(&mut self, permission: impl AsRef<str>) {
        self.permissions.insert(permission.as_ref().to_lowercase());
    }

    pub fn permissions(&self) -> impl Iterator<Item = &str> {
        self.permissions.iter().map(String::as_str)
    }
}

/// Returns true when the actor holds `permission`. A missing actor or an
/// empty permission name never passes.
pub fn may_i(actor: Option<&Actor>, permission: &str) -> bool {
    match actor {
        Some(actor) if !permission.is_empty() => actor.has(permission),
        _ => false,
    }
}

/// Returns true when the actor holds any of `permissions`.
pub fn may_i_any(actor: Option<&Actor>, permissions: &[&str]) -> bool {
    permissions.iter().any(|p| may_i(actor, p))
}

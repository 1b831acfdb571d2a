//! Declarative resource settings, loadable from JSON.

use serde::{Deserialize, Serialize};

use crate::types::ResourceAction;

/// Settings applied to a [`Resource`](crate::Resource) through
/// [`Resource::with_config`](crate::Resource::with_config).
///
/// ```json
/// {
///   "name": "products",
///   "permission_name": "catalog",
///   "item_age_seconds": 60,
///   "disabled": ["delete"],
///   "authentication": ["token"]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceConfig {
    /// Overrides the name the resource was built with.
    pub name: Option<String>,
    /// Permission namespace; defaults to the resource name.
    pub permission_name: Option<String>,
    /// Item cache age. Negative disables item caching; unset keeps the
    /// resource's current age.
    pub item_age_seconds: Option<i64>,
    /// List cache age, same rules as `item_age_seconds`.
    pub list_age_seconds: Option<i64>,
    /// Actions turned off even if the repository supports them.
    pub disabled: Vec<ResourceAction>,
    /// Endpoint tags; defaults to the resource name.
    pub tags: Vec<String>,
    /// Authentication method names tried for every endpoint.
    pub authentication: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let config: ResourceConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ResourceConfig::default());
        assert_eq!(config.item_age_seconds, None);
    }

    #[test]
    fn parses_all_fields() {
        let config: ResourceConfig = serde_json::from_str(
            r#"{
                "name": "products",
                "permission_name": "catalog",
                "item_age_seconds": 60,
                "list_age_seconds": 10,
                "disabled": ["delete", "replace"],
                "tags": ["shop"],
                "authentication": ["token"]
            }"#,
        )
        .unwrap();
        assert_eq!(config.permission_name.as_deref(), Some("catalog"));
        assert_eq!(config.item_age_seconds, Some(60));
        assert_eq!(
            config.disabled,
            vec![ResourceAction::Delete, ResourceAction::Replace]
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = serde_json::from_str::<ResourceConfig>(r#"{ "ttl": 5 }"#);
        assert!(result.is_err());
    }
}

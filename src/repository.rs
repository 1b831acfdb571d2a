//! Storage backend contract.

use async_trait::async_trait;

use crate::error::ResourceError;
use crate::query::{ListResults, QueryListParam};
use crate::types::{Record, RecordId, ResourceAction};

/// A storage backend bound to one resource.
///
/// Every operation is optional. A backend lists what it implements in
/// [`Repository::supports`]; the resource disables the rest and never
/// calls them. The default bodies fail with `NotConfigured`.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Name of the backing collection or table.
    fn name(&self) -> &str;

    /// Whether this backend implements `action`.
    fn supports(&self, action: ResourceAction) -> bool;

    /// Fetch one record. `Ok(None)` when no row has this id.
    async fn get(&self, id: &RecordId) -> Result<Option<Record>, ResourceError> {
        let _ = id;
        Err(self.not_configured(ResourceAction::Get))
    }

    async fn create(&self, data: Record) -> Result<Record, ResourceError> {
        let _ = data;
        Err(self.not_configured(ResourceAction::Create))
    }

    /// Apply a partial update and return the stored record.
    async fn update(&self, id: &RecordId, patch: Record) -> Result<Record, ResourceError> {
        let _ = (id, patch);
        Err(self.not_configured(ResourceAction::Update))
    }

    async fn replace(&self, id: &RecordId, data: Record) -> Result<Record, ResourceError> {
        let _ = (id, data);
        Err(self.not_configured(ResourceAction::Replace))
    }

    /// Delete one record, returning the number of rows affected.
    async fn delete(&self, id: &RecordId) -> Result<u64, ResourceError> {
        let _ = id;
        Err(self.not_configured(ResourceAction::Delete))
    }

    async fn list(&self, params: &QueryListParam) -> Result<ListResults, ResourceError> {
        let _ = params;
        Err(self.not_configured(ResourceAction::List))
    }

    fn not_configured(&self, action: ResourceAction) -> ResourceError {
        ResourceError::NotConfigured {
            resource: self.name().to_string(),
            action,
        }
    }
}

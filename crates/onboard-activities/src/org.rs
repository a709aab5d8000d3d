//! Application-Plane Organization Adapters
//!
//! The final two steps live here: creating the tenant's organization in
//! the application plane and flipping it to active once everything else
//! has landed. Activation is the commit point of the whole run, so its
//! compensation flips the flag back rather than deleting anything.

use crate::require_str;
use async_trait::async_trait;
use onboard_common::{ProvisionError, TenantId};
use onboard_orchestrator::activity::{Activity, ActivityContext};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Lifecycle of an organization in the application plane
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrgStatus {
    /// Created but not yet serving traffic
    Provisioning,
    /// Fully onboarded
    Active,
}

/// One organization
#[derive(Clone, Debug)]
pub struct OrgEntry {
    /// Directory-assigned org ID
    pub org_id: String,
    /// Lifecycle state
    pub status: OrgStatus,
    /// Idempotency key of the creating invocation
    pub created_by: String,
}

/// Client facade over the application plane's tenant directory
#[derive(Default)]
pub struct AppPlaneDirectory {
    orgs: RwLock<HashMap<TenantId, OrgEntry>>,
}

impl AppPlaneDirectory {
    /// New client
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an org for a tenant, idempotent per key
    pub fn create_org(&self, tenant_id: TenantId, key: &str) -> Result<OrgEntry, ProvisionError> {
        let mut orgs = self.orgs.write();
        if let Some(existing) = orgs.get(&tenant_id) {
            if existing.created_by == key {
                return Ok(existing.clone());
            }
            return Err(ProvisionError::Conflict(format!(
                "tenant {tenant_id} already has an organization"
            )));
        }
        let entry = OrgEntry {
            org_id: format!("org-{}", Uuid::new_v4().simple()),
            status: OrgStatus::Provisioning,
            created_by: key.to_string(),
        };
        orgs.insert(tenant_id, entry.clone());
        Ok(entry)
    }

    /// Delete an org; absent orgs are a no-op
    pub fn delete_org(&self, tenant_id: TenantId) {
        self.orgs.write().remove(&tenant_id);
    }

    /// Set an org's lifecycle state
    pub fn set_status(&self, tenant_id: TenantId, status: OrgStatus) -> Result<(), ProvisionError> {
        let mut orgs = self.orgs.write();
        let org = orgs
            .get_mut(&tenant_id)
            .ok_or_else(|| ProvisionError::Validation(format!("unknown tenant: {tenant_id}")))?;
        org.status = status;
        Ok(())
    }

    /// Look up a tenant's org
    pub fn org(&self, tenant_id: TenantId) -> Option<OrgEntry> {
        self.orgs.read().get(&tenant_id).cloned()
    }

    /// Number of orgs (test observability)
    pub fn org_count(&self) -> usize {
        self.orgs.read().len()
    }
}

/// Step 9: create the tenant's organization in the application plane
pub struct CreateAppPlaneOrgActivity {
    directory: Arc<AppPlaneDirectory>,
}

impl CreateAppPlaneOrgActivity {
    /// Adapter over the tenant directory
    pub fn new(directory: Arc<AppPlaneDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl Activity for CreateAppPlaneOrgActivity {
    async fn invoke(&self, ctx: &ActivityContext) -> Result<serde_json::Value, ProvisionError> {
        let org = self
            .directory
            .create_org(ctx.tenant_id, &ctx.idempotency_key())?;
        Ok(serde_json::json!({
            "org_id": org.org_id,
            "external_id": org.org_id,
        }))
    }

    async fn compensate(
        &self,
        ctx: &ActivityContext,
        _payload: &serde_json::Value,
    ) -> Result<(), ProvisionError> {
        self.directory.delete_org(ctx.tenant_id);
        Ok(())
    }
}

/// Step 10: mark the tenant active
pub struct MarkTenantActiveActivity {
    directory: Arc<AppPlaneDirectory>,
}

impl MarkTenantActiveActivity {
    /// Adapter over the tenant directory
    pub fn new(directory: Arc<AppPlaneDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl Activity for MarkTenantActiveActivity {
    async fn invoke(&self, ctx: &ActivityContext) -> Result<serde_json::Value, ProvisionError> {
        self.directory.set_status(ctx.tenant_id, OrgStatus::Active)?;
        Ok(serde_json::json!({ "active": true }))
    }

    async fn compensate(
        &self,
        ctx: &ActivityContext,
        _payload: &serde_json::Value,
    ) -> Result<(), ProvisionError> {
        // The org step's compensation deletes the org outright; if it still
        // exists when this runs, just take it out of service.
        if self.directory.org(ctx.tenant_id).is_some() {
            self.directory
                .set_status(ctx.tenant_id, OrgStatus::Provisioning)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(step_index: usize, tenant_id: TenantId) -> ActivityContext {
        ActivityContext {
            run_id: Uuid::new_v4(),
            tenant_id,
            plan_id: "pro".into(),
            step_index,
            prior_results: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_org_lifecycle() {
        let directory = Arc::new(AppPlaneDirectory::new());
        let activity = CreateAppPlaneOrgActivity::new(directory.clone());
        let tenant_id = Uuid::new_v4();
        let ctx = ctx(9, tenant_id);

        let payload = activity.invoke(&ctx).await.unwrap();
        assert_eq!(directory.org(tenant_id).unwrap().status, OrgStatus::Provisioning);

        activity.compensate(&ctx, &payload).await.unwrap();
        assert!(directory.org(tenant_id).is_none());
    }

    #[tokio::test]
    async fn test_activation_flips_status_both_ways() {
        let directory = Arc::new(AppPlaneDirectory::new());
        let tenant_id = Uuid::new_v4();
        directory.create_org(tenant_id, "seed").unwrap();

        let activity = MarkTenantActiveActivity::new(directory.clone());
        let ctx = ctx(10, tenant_id);

        let payload = activity.invoke(&ctx).await.unwrap();
        assert_eq!(directory.org(tenant_id).unwrap().status, OrgStatus::Active);

        activity.compensate(&ctx, &payload).await.unwrap();
        assert_eq!(directory.org(tenant_id).unwrap().status, OrgStatus::Provisioning);
    }

    #[tokio::test]
    async fn test_activation_without_org_is_invalid() {
        let directory = Arc::new(AppPlaneDirectory::new());
        let activity = MarkTenantActiveActivity::new(directory);
        let err = activity.invoke(&ctx(10, Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Validation(_)));
    }
}

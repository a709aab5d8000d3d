//! Standard Activity Set
//!
//! Owns one client per external system and wires all eleven step kinds
//! into an [`ActivityRegistry`]. Deployments that need to swap a single
//! collaborator register their own activity over the same registry.

use crate::billing::{BillingClient, CreateBillingCustomerActivity};
use crate::database::{CreateSchemaActivity, DatabaseAdminClient};
use crate::deploy::{DeployApplicationActivity, Deployer};
use crate::dns::{ConfigureDnsActivity, CreateResourceRecordsActivity, DnsClient};
use crate::identity::{CreateAdminUserActivity, CreateIdentityRealmActivity, IdentityProviderClient};
use crate::infra::{InfraProvisioner, ProvisionInfrastructureActivity};
use crate::org::{AppPlaneDirectory, CreateAppPlaneOrgActivity, MarkTenantActiveActivity};
use crate::storage::{CreateStorageBucketActivity, ObjectStoreClient};
use onboard_orchestrator::activity::ActivityRegistry;
use onboard_orchestrator::steps::StepKind;
use std::sync::Arc;

/// The full set of external-system clients behind the standard step
/// sequence. Clients are shared, so tests (and status tooling) can observe
/// external state through the same handles the activities mutate.
pub struct StandardActivities {
    /// Identity provider admin API
    pub idp: Arc<IdentityProviderClient>,
    /// Database admin API
    pub database: Arc<DatabaseAdminClient>,
    /// Object store control API
    pub object_store: Arc<ObjectStoreClient>,
    /// Infrastructure provisioner
    pub infra: Arc<InfraProvisioner>,
    /// Deployment controller
    pub deployer: Arc<Deployer>,
    /// DNS provider API
    pub dns: Arc<DnsClient>,
    /// Billing provider API
    pub billing: Arc<BillingClient>,
    /// Application-plane tenant directory
    pub directory: Arc<AppPlaneDirectory>,
}

impl StandardActivities {
    /// Fresh clients for every external system
    pub fn new() -> Self {
        Self {
            idp: Arc::new(IdentityProviderClient::new()),
            database: Arc::new(DatabaseAdminClient::new()),
            object_store: Arc::new(ObjectStoreClient::new()),
            infra: Arc::new(InfraProvisioner::new()),
            deployer: Arc::new(Deployer::new()),
            dns: Arc::new(DnsClient::new()),
            billing: Arc::new(BillingClient::new()),
            directory: Arc::new(AppPlaneDirectory::new()),
        }
    }

    /// Registry covering every step kind in the standard sequence
    pub fn registry(&self) -> ActivityRegistry {
        let mut registry = ActivityRegistry::new();
        registry.register(
            StepKind::CreateIdentityRealm,
            Arc::new(CreateIdentityRealmActivity::new(self.idp.clone())),
        );
        registry.register(
            StepKind::CreateAdminUser,
            Arc::new(CreateAdminUserActivity::new(self.idp.clone())),
        );
        registry.register(
            StepKind::CreateSchema,
            Arc::new(CreateSchemaActivity::new(self.database.clone())),
        );
        registry.register(
            StepKind::CreateStorageBucket,
            Arc::new(CreateStorageBucketActivity::new(self.object_store.clone())),
        );
        registry.register(
            StepKind::ProvisionInfrastructure,
            Arc::new(ProvisionInfrastructureActivity::new(self.infra.clone())),
        );
        registry.register(
            StepKind::DeployApplication,
            Arc::new(DeployApplicationActivity::new(self.deployer.clone())),
        );
        registry.register(
            StepKind::ConfigureDns,
            Arc::new(ConfigureDnsActivity::new(self.dns.clone())),
        );
        registry.register(
            StepKind::CreateResourceRecords,
            Arc::new(CreateResourceRecordsActivity::new(self.dns.clone())),
        );
        registry.register(
            StepKind::CreateBillingCustomer,
            Arc::new(CreateBillingCustomerActivity::new(self.billing.clone())),
        );
        registry.register(
            StepKind::CreateAppPlaneOrg,
            Arc::new(CreateAppPlaneOrgActivity::new(self.directory.clone())),
        );
        registry.register(
            StepKind::MarkTenantActive,
            Arc::new(MarkTenantActiveActivity::new(self.directory.clone())),
        );
        registry
    }
}

impl Default for StandardActivities {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::org::OrgStatus;
    use onboard_common::short_tenant_id;
    use onboard_orchestrator::model::RunStatus;
    use onboard_orchestrator::orchestrator::{Orchestrator, OrchestratorConfig, RunOutcome};
    use onboard_orchestrator::store::{MemoryRunStore, RunStore};
    use uuid::Uuid;

    fn orchestrator(
        activities: &StandardActivities,
    ) -> (Orchestrator, Arc<MemoryRunStore>) {
        let store = Arc::new(MemoryRunStore::new());
        let orchestrator = Orchestrator::new(
            store.clone(),
            activities.registry(),
            OrchestratorConfig::default(),
        );
        (orchestrator, store)
    }

    #[test]
    fn test_registry_covers_every_step() {
        let activities = StandardActivities::new();
        let registry = activities.registry();
        for kind in StepKind::all() {
            assert!(registry.get(*kind).is_some(), "missing activity for {kind:?}");
        }
    }

    #[tokio::test]
    async fn test_full_run_lands_every_external_resource() {
        let activities = StandardActivities::new();
        let (orchestrator, _store) = orchestrator(&activities);
        let tenant_id = Uuid::new_v4();

        let report = orchestrator
            .start_or_resume(tenant_id, "enterprise")
            .await
            .unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.run.status, RunStatus::Completed);

        let short = short_tenant_id(&tenant_id);
        let realm = activities.idp.realm(&format!("tenant-{short}")).unwrap();
        assert_eq!(realm.users.len(), 1);
        assert!(activities.database.has_schema(&format!("tenant_{short}")));
        assert!(activities
            .object_store
            .has_bucket(&format!("tenant-{short}-data")));
        assert_eq!(activities.infra.stack_count(), 1);
        assert_eq!(activities.deployer.deployment_count(), 1);
        let zone = activities
            .dns
            .zone(&format!("{short}.tenants.onboardhq.io"))
            .unwrap();
        assert_eq!(zone.records.len(), 1);
        assert_eq!(activities.billing.customer_count(), 1);
        assert_eq!(
            activities.directory.org(tenant_id).unwrap().status,
            OrgStatus::Active
        );
    }

    #[tokio::test]
    async fn test_standard_plan_skips_the_dedicated_stack() {
        let activities = StandardActivities::new();
        let (orchestrator, _store) = orchestrator(&activities);
        let tenant_id = Uuid::new_v4();

        let report = orchestrator.start_or_resume(tenant_id, "pro").await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(activities.infra.stack_count(), 0);
        assert_eq!(activities.deployer.deployment_count(), 1);
    }

    #[tokio::test]
    async fn test_dns_conflict_unwinds_every_external_system() {
        let activities = StandardActivities::new();
        let (orchestrator, store) = orchestrator(&activities);
        let tenant_id = Uuid::new_v4();
        let short = short_tenant_id(&tenant_id);

        // Zone name already taken by another party
        activities
            .dns
            .create_zone(&format!("{short}.tenants.onboardhq.io"), "squatter")
            .unwrap();

        let report = orchestrator
            .start_or_resume(tenant_id, "enterprise")
            .await
            .unwrap();
        assert_eq!(report.outcome, RunOutcome::Compensated);
        assert_eq!(report.run.status, RunStatus::Compensated);

        // Everything the run created before the conflict is gone
        assert!(activities.idp.realm(&format!("tenant-{short}")).is_none());
        assert!(!activities.database.has_schema(&format!("tenant_{short}")));
        assert!(!activities
            .object_store
            .has_bucket(&format!("tenant-{short}-data")));
        assert_eq!(activities.infra.stack_count(), 0);
        assert_eq!(activities.deployer.deployment_count(), 0);
        assert_eq!(activities.billing.customer_count(), 0);
        assert!(activities.directory.org(tenant_id).is_none());

        // Only the squatter's zone survives
        assert_eq!(activities.dns.zone_count(), 1);

        let compensations = store.compensation_records(&report.run.run_id);
        assert_eq!(compensations.len(), 6);
    }

    #[tokio::test]
    async fn test_retrigger_after_compensation_starts_a_fresh_run() {
        let activities = StandardActivities::new();
        let (orchestrator, _store) = orchestrator(&activities);
        let tenant_id = Uuid::new_v4();
        let short = short_tenant_id(&tenant_id);
        let zone_name = format!("{short}.tenants.onboardhq.io");

        activities.dns.create_zone(&zone_name, "squatter").unwrap();
        let first = orchestrator
            .start_or_resume(tenant_id, "pro")
            .await
            .unwrap();
        assert_eq!(first.outcome, RunOutcome::Compensated);

        // Squatter releases the name; the next trigger gets a new run that
        // carries fresh idempotency keys and completes.
        let zone_id = activities.dns.zone(&zone_name).unwrap().zone_id;
        activities.dns.delete_zone(&zone_id);

        let second = orchestrator
            .start_or_resume(tenant_id, "pro")
            .await
            .unwrap();
        assert_eq!(second.outcome, RunOutcome::Completed);
        assert_ne!(first.run.run_id, second.run.run_id);
        assert_eq!(
            activities.directory.org(tenant_id).unwrap().status,
            OrgStatus::Active
        );
    }
}

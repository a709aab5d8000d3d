//! Application Deployment Adapter
//!
//! Deploys the application for a tenant onto whatever the infrastructure
//! step produced (dedicated stack or the shared pool).

use crate::require_str;
use async_trait::async_trait;
use onboard_common::{short_tenant_id, ProvisionError};
use onboard_orchestrator::activity::{Activity, ActivityContext};
use onboard_orchestrator::steps::StepKind;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// One live deployment
#[derive(Clone, Debug)]
pub struct DeploymentEntry {
    /// Deployer-assigned ID
    pub deployment_id: String,
    /// Where the application landed
    pub placement: String,
    /// Service endpoint for the tenant
    pub endpoint: String,
    /// Idempotency key of the creating invocation
    pub created_by: String,
}

/// Client facade over the deployment controller
#[derive(Default)]
pub struct Deployer {
    deployments: RwLock<HashMap<String, DeploymentEntry>>,
}

impl Deployer {
    /// New client
    pub fn new() -> Self {
        Self::default()
    }

    /// Deploy, idempotent per key
    pub fn deploy(
        &self,
        placement: &str,
        endpoint: &str,
        key: &str,
    ) -> Result<DeploymentEntry, ProvisionError> {
        let mut deployments = self.deployments.write();
        if let Some(existing) = deployments.values().find(|d| d.created_by == key) {
            return Ok(existing.clone());
        }
        let entry = DeploymentEntry {
            deployment_id: format!("deploy-{}", Uuid::new_v4().simple()),
            placement: placement.to_string(),
            endpoint: endpoint.to_string(),
            created_by: key.to_string(),
        };
        deployments.insert(entry.deployment_id.clone(), entry.clone());
        Ok(entry)
    }

    /// Undeploy; absent deployments are a no-op
    pub fn undeploy(&self, deployment_id: &str) {
        self.deployments.write().remove(deployment_id);
    }

    /// Number of live deployments (test observability)
    pub fn deployment_count(&self) -> usize {
        self.deployments.read().len()
    }
}

/// Step 5: deploy the application for the tenant
pub struct DeployApplicationActivity {
    deployer: Arc<Deployer>,
}

impl DeployApplicationActivity {
    /// Adapter over the deployment controller
    pub fn new(deployer: Arc<Deployer>) -> Self {
        Self { deployer }
    }
}

#[async_trait]
impl Activity for DeployApplicationActivity {
    async fn invoke(&self, ctx: &ActivityContext) -> Result<serde_json::Value, ProvisionError> {
        let infra = ctx
            .prior(StepKind::ProvisionInfrastructure)
            .ok_or_else(|| {
                ProvisionError::Validation("infrastructure step has no recorded result".into())
            })?;
        let placement = if infra.get("dedicated").and_then(|v| v.as_bool()) == Some(true) {
            require_str(infra, "stack_id")?
        } else {
            "shared-pool".to_string()
        };

        let endpoint = format!("{}.app.onboardhq.io", short_tenant_id(&ctx.tenant_id));
        let deployment = self
            .deployer
            .deploy(&placement, &endpoint, &ctx.idempotency_key())?;
        Ok(serde_json::json!({
            "deployment_id": deployment.deployment_id,
            "endpoint": deployment.endpoint,
            "placement": deployment.placement,
            "external_id": deployment.deployment_id,
        }))
    }

    async fn compensate(
        &self,
        _ctx: &ActivityContext,
        payload: &serde_json::Value,
    ) -> Result<(), ProvisionError> {
        let deployment_id = require_str(payload, "deployment_id")?;
        self.deployer.undeploy(&deployment_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deploy_consumes_infra_payload() {
        let deployer = Arc::new(Deployer::new());
        let activity = DeployApplicationActivity::new(deployer.clone());

        let mut ctx = ActivityContext {
            run_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            plan_id: "enterprise".into(),
            step_index: 5,
            prior_results: HashMap::new(),
        };
        ctx.prior_results.insert(
            StepKind::ProvisionInfrastructure,
            serde_json::json!({"dedicated": true, "stack_id": "stack-abc"}),
        );

        let payload = activity.invoke(&ctx).await.unwrap();
        assert_eq!(payload["placement"], "stack-abc");
        assert_eq!(deployer.deployment_count(), 1);

        activity.compensate(&ctx, &payload).await.unwrap();
        assert_eq!(deployer.deployment_count(), 0);
    }

    #[tokio::test]
    async fn test_deploy_without_infra_is_invalid() {
        let activity = DeployApplicationActivity::new(Arc::new(Deployer::new()));
        let ctx = ActivityContext {
            run_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            plan_id: "pro".into(),
            step_index: 5,
            prior_results: HashMap::new(),
        };
        assert!(matches!(
            activity.invoke(&ctx).await.unwrap_err(),
            ProvisionError::Validation(_)
        ));
    }
}

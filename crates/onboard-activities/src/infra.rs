//! Infrastructure Adapter
//!
//! Dedicated plans get their own infrastructure stack; standard plans are
//! placed on the shared pool and no external resource is created. The
//! payload records which path was taken so compensation only tears down
//! what was actually provisioned.

use crate::require_str;
use async_trait::async_trait;
use onboard_common::ProvisionError;
use onboard_orchestrator::activity::{Activity, ActivityContext};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Plans that receive a dedicated stack
const DEDICATED_PLANS: &[&str] = &["enterprise", "dedicated"];

/// One dedicated infrastructure stack
#[derive(Clone, Debug)]
pub struct StackEntry {
    /// Provisioner-assigned stack ID
    pub stack_id: String,
    /// Idempotency key of the creating invocation
    pub created_by: String,
}

/// Client facade over the infrastructure provisioner
#[derive(Default)]
pub struct InfraProvisioner {
    stacks: RwLock<HashMap<String, StackEntry>>,
}

impl InfraProvisioner {
    /// New client
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dedicated stack, idempotent per key
    pub fn create_stack(&self, key: &str) -> Result<StackEntry, ProvisionError> {
        let mut stacks = self.stacks.write();
        if let Some(existing) = stacks.values().find(|s| s.created_by == key) {
            return Ok(existing.clone());
        }
        let entry = StackEntry {
            stack_id: format!("stack-{}", Uuid::new_v4().simple()),
            created_by: key.to_string(),
        };
        stacks.insert(entry.stack_id.clone(), entry.clone());
        tracing::info!(stack_id = %entry.stack_id, "dedicated stack provisioned");
        Ok(entry)
    }

    /// Tear down a stack; absent stacks are a no-op
    pub fn destroy_stack(&self, stack_id: &str) {
        if self.stacks.write().remove(stack_id).is_some() {
            tracing::info!(stack_id, "dedicated stack destroyed");
        }
    }

    /// Number of live stacks (test observability)
    pub fn stack_count(&self) -> usize {
        self.stacks.read().len()
    }
}

/// Step 4: provision the tenant's infrastructure
pub struct ProvisionInfrastructureActivity {
    infra: Arc<InfraProvisioner>,
}

impl ProvisionInfrastructureActivity {
    /// Adapter over the provisioner
    pub fn new(infra: Arc<InfraProvisioner>) -> Self {
        Self { infra }
    }
}

#[async_trait]
impl Activity for ProvisionInfrastructureActivity {
    async fn invoke(&self, ctx: &ActivityContext) -> Result<serde_json::Value, ProvisionError> {
        if !DEDICATED_PLANS.contains(&ctx.plan_id.as_str()) {
            return Ok(serde_json::json!({
                "dedicated": false,
                "placement": "shared-pool",
                "external_id": format!("shared-pool:{}", ctx.tenant_id),
            }));
        }
        let stack = self.infra.create_stack(&ctx.idempotency_key())?;
        Ok(serde_json::json!({
            "dedicated": true,
            "stack_id": stack.stack_id,
            "external_id": stack.stack_id,
        }))
    }

    async fn compensate(
        &self,
        _ctx: &ActivityContext,
        payload: &serde_json::Value,
    ) -> Result<(), ProvisionError> {
        if payload.get("dedicated").and_then(|v| v.as_bool()) != Some(true) {
            // Shared placement created nothing to tear down
            return Ok(());
        }
        let stack_id = require_str(payload, "stack_id")?;
        self.infra.destroy_stack(&stack_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(plan: &str) -> ActivityContext {
        ActivityContext {
            run_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            plan_id: plan.into(),
            step_index: 4,
            prior_results: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_shared_plan_creates_no_stack() {
        let infra = Arc::new(InfraProvisioner::new());
        let activity = ProvisionInfrastructureActivity::new(infra.clone());
        let ctx = ctx("pro");

        let payload = activity.invoke(&ctx).await.unwrap();
        assert_eq!(payload["dedicated"], false);
        assert_eq!(infra.stack_count(), 0);

        activity.compensate(&ctx, &payload).await.unwrap();
        assert_eq!(infra.stack_count(), 0);
    }

    #[tokio::test]
    async fn test_dedicated_plan_round_trip() {
        let infra = Arc::new(InfraProvisioner::new());
        let activity = ProvisionInfrastructureActivity::new(infra.clone());
        let ctx = ctx("enterprise");

        let payload = activity.invoke(&ctx).await.unwrap();
        assert_eq!(payload["dedicated"], true);
        assert_eq!(infra.stack_count(), 1);

        // Retried call lands on the same stack
        let retried = activity.invoke(&ctx).await.unwrap();
        assert_eq!(retried["stack_id"], payload["stack_id"]);
        assert_eq!(infra.stack_count(), 1);

        activity.compensate(&ctx, &payload).await.unwrap();
        assert_eq!(infra.stack_count(), 0);
    }
}

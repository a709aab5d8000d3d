//! Activity Contract
//!
//! An activity is one externally-effecting operation paired with a
//! compensation. Activities must tolerate at-least-once invocation: the
//! deterministic idempotency key (run + step) lets a retried call after a
//! crash-before-ack address the resource it already created.

use crate::steps::StepKind;
use async_trait::async_trait;
use onboard_common::{ProvisionError, RunId, TenantId};
use std::collections::HashMap;
use std::sync::Arc;

/// Everything an activity invocation may depend on
#[derive(Clone, Debug)]
pub struct ActivityContext {
    /// Run the invocation belongs to
    pub run_id: RunId,
    /// Tenant being provisioned
    pub tenant_id: TenantId,
    /// Requested subscription plan
    pub plan_id: String,
    /// Position of the step in the sequence
    pub step_index: usize,
    /// Persisted payloads of previously completed steps, keyed by kind.
    /// Later steps consume earlier outputs from here instead of re-querying
    /// external systems.
    pub prior_results: HashMap<StepKind, serde_json::Value>,
}

impl ActivityContext {
    /// Deterministic idempotency key for this invocation
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.run_id, self.step_index)
    }

    /// Payload recorded by an earlier step, if that step ran
    pub fn prior(&self, kind: StepKind) -> Option<&serde_json::Value> {
        self.prior_results.get(&kind)
    }
}

/// One idempotent, independently-retryable provisioning operation
#[async_trait]
pub trait Activity: Send + Sync {
    /// Perform the external side effect. Must not create a duplicate
    /// resource when invoked twice with the same idempotency key.
    async fn invoke(&self, ctx: &ActivityContext) -> Result<serde_json::Value, ProvisionError>;

    /// Undo the external side effect. Receives exactly the payload the
    /// successful invocation recorded.
    async fn compensate(
        &self,
        ctx: &ActivityContext,
        payload: &serde_json::Value,
    ) -> Result<(), ProvisionError>;
}

/// Closed mapping from step kind to its activity
#[derive(Clone, Default)]
pub struct ActivityRegistry {
    activities: HashMap<StepKind, Arc<dyn Activity>>,
}

impl ActivityRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self { activities: HashMap::new() }
    }

    /// Register the activity for a step kind
    pub fn register(&mut self, kind: StepKind, activity: Arc<dyn Activity>) {
        self.activities.insert(kind, activity);
    }

    /// Look up the activity for a step kind
    pub fn get(&self, kind: StepKind) -> Option<Arc<dyn Activity>> {
        self.activities.get(&kind).cloned()
    }

    /// Number of registered activities
    pub fn len(&self) -> usize {
        self.activities.len()
    }

    /// Whether no activity is registered
    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }
}

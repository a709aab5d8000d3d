//! Trigger Listener
//!
//! Consumes inbound "start provisioning" events and starts (or resumes) a
//! run per tenant. A local in-flight guard plus the store's single-active-run
//! invariant guarantee at-most-one active run per tenant; a duplicate
//! trigger attaches to the existing run instead of forking a second one.

use crate::orchestrator::Orchestrator;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use onboard_common::TenantId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Event type this listener reacts to
pub const TENANT_PROVISIONING: &str = "TENANT_PROVISIONING";

/// Inbound provisioning command
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProvisioningTrigger {
    /// Discriminator; only `TENANT_PROVISIONING` is handled
    #[serde(rename = "eventType")]
    pub event_type: String,
    /// Tenant to provision
    #[serde(rename = "tenantId")]
    pub tenant_id: TenantId,
    /// Requested subscription plan
    #[serde(rename = "planId")]
    pub plan_id: String,
    /// When the control plane issued the request
    #[serde(rename = "requestedAt")]
    pub requested_at: DateTime<Utc>,
}

impl ProvisioningTrigger {
    /// A well-formed provisioning trigger for a tenant
    pub fn new(tenant_id: TenantId, plan_id: impl Into<String>) -> Self {
        Self {
            event_type: TENANT_PROVISIONING.to_string(),
            tenant_id,
            plan_id: plan_id.into(),
            requested_at: Utc::now(),
        }
    }
}

/// Consumes triggers and fans runs out to the orchestrator
pub struct TriggerListener {
    orchestrator: Arc<Orchestrator>,
    rx: mpsc::Receiver<ProvisioningTrigger>,
    in_flight: Arc<DashMap<TenantId, ()>>,
}

impl TriggerListener {
    /// Listener over an event channel
    pub fn new(orchestrator: Arc<Orchestrator>, rx: mpsc::Receiver<ProvisioningTrigger>) -> Self {
        Self {
            orchestrator,
            rx,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Consume events until the channel closes, then wait for runs in
    /// flight to settle. Runs for different tenants proceed concurrently.
    pub async fn run(mut self) {
        let mut handles = Vec::new();

        while let Some(event) = self.rx.recv().await {
            if event.event_type != TENANT_PROVISIONING {
                tracing::debug!(event_type = %event.event_type, "ignoring event");
                continue;
            }

            let tenant_id = event.tenant_id;
            if self.in_flight.insert(tenant_id, ()).is_some() {
                tracing::info!(%tenant_id, "run already in flight, duplicate trigger ignored");
                continue;
            }

            let orchestrator = self.orchestrator.clone();
            let in_flight = self.in_flight.clone();
            handles.push(tokio::spawn(async move {
                match orchestrator.start_or_resume(tenant_id, &event.plan_id).await {
                    Ok(report) => {
                        tracing::info!(
                            %tenant_id,
                            run_id = %report.run.run_id,
                            outcome = ?report.outcome,
                            "run settled"
                        );
                    }
                    Err(err) => {
                        tracing::error!(%tenant_id, error = %err, "run errored");
                    }
                }
                in_flight.remove(&tenant_id);
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }
}

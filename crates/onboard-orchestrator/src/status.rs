//! Status Query Interface
//!
//! Read-only projection of a run's progress for external pollers. Never
//! touches the write path, so the control-plane API polling
//! `GET /runs/{tenantId}` does not contend with the orchestrator loop.

use crate::model::{CompensationOutcome, RunStatus};
use crate::store::RunStore;
use onboard_common::{RunId, TenantId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Projection served to pollers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunStatusView {
    /// Run being reported
    pub run_id: RunId,
    /// Tenant the run belongs to
    pub tenant_id: TenantId,
    /// Run status
    pub status: RunStatus,
    /// Next step to execute (or count of completed steps when terminal)
    pub current_step_index: usize,
    /// Length of the step sequence
    pub total_steps: usize,
    /// Name of the current step, when the run is still in the sequence
    pub step_name: Option<String>,
    /// Terminal error, for operator diagnosis
    pub last_error: Option<String>,
    /// Steps whose compensation failed and need manual follow-up
    pub failed_compensations: Vec<String>,
}

/// Read path over the durable store
pub struct StatusReader {
    store: Arc<dyn RunStore>,
    step_names: Vec<String>,
}

impl StatusReader {
    /// Create a reader over `store` for the given step sequence
    pub fn new(store: Arc<dyn RunStore>, steps: &[crate::steps::StepDefinition]) -> Self {
        Self {
            store,
            step_names: steps.iter().map(|s| s.name.to_string()).collect(),
        }
    }

    /// Status of the tenant's most recent run
    pub fn status(&self, tenant_id: &TenantId) -> Option<RunStatusView> {
        let run = self.store.latest_run_for_tenant(tenant_id)?;
        Some(self.project(run))
    }

    /// Status of one specific run
    pub fn status_for_run(&self, run_id: &RunId) -> Option<RunStatusView> {
        let run = self.store.get_run(run_id)?;
        Some(self.project(run))
    }

    fn project(&self, run: crate::model::ProvisioningRun) -> RunStatusView {
        let failed_compensations = self
            .store
            .compensation_records(&run.run_id)
            .into_iter()
            .filter(|r| r.outcome == CompensationOutcome::Failed)
            .map(|r| r.step_name)
            .collect();

        RunStatusView {
            run_id: run.run_id,
            tenant_id: run.tenant_id,
            status: run.status,
            current_step_index: run.current_step_index,
            total_steps: self.step_names.len(),
            step_name: self.step_names.get(run.current_step_index).cloned(),
            last_error: run.last_error,
            failed_compensations,
        }
    }
}

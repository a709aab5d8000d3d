//! Main Orchestrator
//!
//! Drives the step sequence for one tenant run: load-or-create state,
//! execute the next pending step, advance or fail, trigger compensation,
//! emit final status. Every advance is persisted under an optimistic
//! version check, so a crashed process resumes at its recorded index and
//! two instances racing over the same run cannot both advance it.

use crate::activity::{ActivityContext, ActivityRegistry};
use crate::compensation::CompensationManager;
use crate::executor::StepExecutor;
use crate::model::{ProvisioningRun, RunStatus, StepOutcome};
use crate::steps::{default_steps, StepDefinition, StepKind};
use crate::store::{RunStore, StoreError};
use crate::webhook::CallbackSigner;
use onboard_common::TenantId;
use std::collections::HashMap;
use std::sync::Arc;

/// Orchestrator configuration
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// The fixed step sequence (per deployment, not per tenant)
    pub steps: Vec<StepDefinition>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { steps: default_steps() }
    }
}

/// How a `start_or_resume` call ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// The run reached the end of the sequence
    Completed,
    /// A terminal failure occurred and the unwind finished
    Compensated,
    /// A completed run already existed; returned unchanged
    AlreadyCompleted,
    /// Another orchestrator instance holds the run; this call stood down
    Abandoned,
}

/// Final state handed back to the caller
#[derive(Clone, Debug)]
pub struct RunReport {
    /// The run row as last observed
    pub run: ProvisioningRun,
    /// How this call ended
    pub outcome: RunOutcome,
}

/// Orchestrator errors
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Store failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// The step sequence references an unregistered activity
    #[error("no activity registered for step: {0}")]
    UnknownActivity(&'static str),
    /// The run row disappeared from the store mid-drive
    #[error("run vanished: {0}")]
    RunVanished(onboard_common::RunId),
    /// Cancellation requested for a tenant with no active run
    #[error("tenant {0} has no active run")]
    NoActiveRun(TenantId),
}

/// Result of one guarded run-row update
enum Commit {
    /// Update persisted; the stored row follows
    Committed(ProvisioningRun),
    /// Lost the row to a concurrent cancel; the stored row follows
    Cancelled(ProvisioningRun),
    /// Another instance advanced the run; stand down
    Lost(ProvisioningRun),
}

/// Durable saga orchestrator for tenant provisioning
pub struct Orchestrator {
    store: Arc<dyn RunStore>,
    registry: ActivityRegistry,
    executor: StepExecutor,
    compensation: CompensationManager,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Create an orchestrator over a store and activity registry
    pub fn new(
        store: Arc<dyn RunStore>,
        registry: ActivityRegistry,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            registry,
            executor: StepExecutor::new(),
            compensation: CompensationManager::new(),
            config,
        }
    }

    /// The configured step sequence
    pub fn steps(&self) -> &[StepDefinition] {
        &self.config.steps
    }

    /// Start provisioning for a tenant, or resume/attach to its active run.
    ///
    /// Idempotent: a completed run is returned unchanged; an active run is
    /// attached to rather than forked. Drives the run to a terminal state
    /// unless another instance wins the claim.
    pub async fn start_or_resume(
        &self,
        tenant_id: TenantId,
        plan_id: &str,
    ) -> Result<RunReport, OrchestratorError> {
        if let Some(active) = self.store.active_run_for_tenant(&tenant_id) {
            tracing::info!(%tenant_id, run_id = %active.run_id, "attaching to active run");
            return self.drive(active).await;
        }

        if let Some(latest) = self.store.latest_run_for_tenant(&tenant_id) {
            if latest.status == RunStatus::Completed {
                tracing::info!(%tenant_id, run_id = %latest.run_id, "run already completed");
                return Ok(RunReport { run: latest, outcome: RunOutcome::AlreadyCompleted });
            }
        }

        // New attempt generation for this tenant
        let run = ProvisioningRun::new(tenant_id, plan_id);
        match self.store.create_run(&run) {
            Ok(()) => {}
            // Lost the creation race to another trigger; attach instead
            Err(StoreError::ActiveRunExists(_)) => {
                if let Some(active) = self.store.active_run_for_tenant(&tenant_id) {
                    return self.drive(active).await;
                }
                return Err(OrchestratorError::RunVanished(run.run_id));
            }
            Err(err) => return Err(err.into()),
        }
        tracing::info!(%tenant_id, run_id = %run.run_id, plan_id, "provisioning run created");
        self.drive(run).await
    }

    /// Operator-initiated cancellation of the tenant's active run.
    ///
    /// Shares the terminal-failure code path: the driving loop observes the
    /// flag between steps and unwinds as if the current step failed.
    pub fn cancel(&self, tenant_id: &TenantId) -> Result<ProvisioningRun, OrchestratorError> {
        // Retried because the driving instance bumps the version between steps
        for _ in 0..16 {
            let Some(mut run) = self.store.active_run_for_tenant(tenant_id) else {
                return Err(OrchestratorError::NoActiveRun(*tenant_id));
            };
            run.cancel_requested = true;
            run.touch();
            let expected = run.version;
            match self.store.update_run(&run, expected) {
                Ok(stored) => {
                    tracing::info!(%tenant_id, run_id = %stored.run_id, "cancellation requested");
                    return Ok(stored);
                }
                Err(StoreError::VersionConflict { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(OrchestratorError::Store(StoreError::VersionConflict { expected: 0, stored: 0 }))
    }

    /// Re-enter every run a previous process left unfinished: `Running`
    /// runs resume the step loop at their persisted index, `Failed` and
    /// `Compensating` runs resume the unwind.
    ///
    /// No step already recorded successful is re-executed, and no step
    /// already compensated is compensated again.
    pub async fn recover(&self) -> Result<Vec<RunReport>, OrchestratorError> {
        let mut reports = Vec::new();
        for run in self.store.interrupted_runs() {
            tracing::info!(
                run_id = %run.run_id,
                status = ?run.status,
                step = run.current_step_index,
                "recovering run"
            );
            reports.push(self.drive(run).await?);
        }
        Ok(reports)
    }

    /// The orchestrator loop for one run
    async fn drive(&self, mut run: ProvisioningRun) -> Result<RunReport, OrchestratorError> {
        // A crash can leave a run Failed or mid-unwind; those resume the
        // unwind and never re-enter the forward step loop.
        if matches!(run.status, RunStatus::Failed | RunStatus::Compensating) {
            tracing::info!(run_id = %run.run_id, status = ?run.status, "resuming interrupted unwind");
            return self.finish_unwind(run).await;
        }

        // Claim: Pending -> Running (or re-assert Running on resume). The
        // version bump is the fence; a concurrent claimant conflicts here.
        run.status = RunStatus::Running;
        run.touch();
        run = match self.commit(&run)? {
            Commit::Committed(run) | Commit::Cancelled(run) => run,
            Commit::Lost(stored) => {
                return Ok(RunReport { run: stored, outcome: RunOutcome::Abandoned })
            }
        };

        let total = self.config.steps.len();
        loop {
            if run.cancel_requested {
                return self.fail_and_unwind(run, "cancelled by operator".into()).await;
            }

            if run.current_step_index >= total {
                run.status = RunStatus::Completed;
                run.touch();
                return match self.commit(&run)? {
                    Commit::Committed(run) => {
                        tracing::info!(run_id = %run.run_id, "provisioning completed");
                        Ok(RunReport { run, outcome: RunOutcome::Completed })
                    }
                    Commit::Cancelled(stored) => {
                        // Nothing left to cancel; all steps already succeeded
                        let mut done = stored;
                        done.status = RunStatus::Completed;
                        done.touch();
                        let expected = done.version;
                        let done = self.store.update_run(&done, expected)?;
                        Ok(RunReport { run: done, outcome: RunOutcome::Completed })
                    }
                    Commit::Lost(stored) => {
                        Ok(RunReport { run: stored, outcome: RunOutcome::Abandoned })
                    }
                };
            }

            let step = self.config.steps[run.current_step_index].clone();

            // Callback-dependent collaborators need the run-scoped secret
            // in place before they are first invoked.
            if step.needs_callback_secret && run.webhook_secret.is_none() {
                run.webhook_secret = Some(CallbackSigner::generate_secret());
                run.touch();
                run = match self.commit(&run)? {
                    Commit::Committed(run) | Commit::Cancelled(run) => run,
                    Commit::Lost(stored) => {
                        return Ok(RunReport { run: stored, outcome: RunOutcome::Abandoned })
                    }
                };
                continue;
            }

            let completed = self.completed_payloads(&run);

            // Idempotent skip: a step with a recorded success is never
            // re-invoked, only advanced past.
            if completed.contains_key(&run.current_step_index) {
                tracing::info!(
                    run_id = %run.run_id,
                    step = step.name,
                    "step already recorded successful, skipping"
                );
                run.current_step_index += 1;
                run.touch();
                run = match self.commit(&run)? {
                    Commit::Committed(run) | Commit::Cancelled(run) => run,
                    Commit::Lost(stored) => {
                        return Ok(RunReport { run: stored, outcome: RunOutcome::Abandoned })
                    }
                };
                continue;
            }

            let ctx = ActivityContext {
                run_id: run.run_id,
                tenant_id: run.tenant_id,
                plan_id: run.plan_id.clone(),
                step_index: run.current_step_index,
                prior_results: self.keyed_by_kind(&completed),
            };
            let activity = self
                .registry
                .get(step.kind)
                .ok_or(OrchestratorError::UnknownActivity(step.name))?;

            let record = self
                .executor
                .execute(&step, &ctx, activity.as_ref(), self.store.as_ref())
                .await?;

            match record.outcome {
                StepOutcome::Success => {
                    if let Some(resource_type) = step.kind.resource_type() {
                        let external_id = record
                            .result_payload
                            .as_ref()
                            .and_then(|p| p.get("external_id"))
                            .and_then(|v| v.as_str())
                            .map(String::from)
                            .unwrap_or_else(|| ctx.idempotency_key());
                        self.store.insert_resource_record(&crate::model::ResourceRecord {
                            run_id: run.run_id,
                            step_index: run.current_step_index,
                            step_name: step.name.to_string(),
                            resource_type: resource_type.to_string(),
                            external_id,
                            removed: false,
                        })?;
                    }

                    run.current_step_index += 1;
                    run.touch();
                    run = match self.commit(&run)? {
                        Commit::Committed(run) | Commit::Cancelled(run) => run,
                        Commit::Lost(stored) => {
                            // The success record is durable; whoever owns the
                            // run now will skip this step.
                            return Ok(RunReport { run: stored, outcome: RunOutcome::Abandoned });
                        }
                    };
                }
                StepOutcome::TerminalFailure => {
                    let error = record.error.unwrap_or_else(|| "step failed".into());
                    return self.fail_and_unwind(run, error).await;
                }
                // The executor only ever returns a gating record
                StepOutcome::RetryableFailure => {
                    debug_assert!(false, "executor returned a non-gating record");
                    let error = record.error.unwrap_or_else(|| "step failed".into());
                    return self.fail_and_unwind(run, error).await;
                }
            }
        }
    }

    /// Terminal-failure path: Failed -> Compensating -> unwind -> Compensated
    async fn fail_and_unwind(
        &self,
        run: ProvisioningRun,
        error: String,
    ) -> Result<RunReport, OrchestratorError> {
        tracing::error!(run_id = %run.run_id, error = %error, "run failed, starting unwind");

        let run = self.transition(run, |r| {
            r.status = RunStatus::Failed;
            r.last_error = Some(error.clone());
        })?;
        self.finish_unwind(run).await
    }

    /// Unwind a `Failed` or `Compensating` run to `Compensated`. Also the
    /// resumption entry point for unwinds interrupted by a crash: steps
    /// whose compensation is already recorded are not invoked again.
    async fn finish_unwind(&self, run: ProvisioningRun) -> Result<RunReport, OrchestratorError> {
        let run = if run.status == RunStatus::Failed {
            self.transition(run, |r| r.status = RunStatus::Compensating)?
        } else {
            run
        };

        self.compensation
            .unwind(&run, &self.config.steps, &self.registry, self.store.as_ref())
            .await?;

        let run = self.transition(run, |r| r.status = RunStatus::Compensated)?;
        tracing::info!(run_id = %run.run_id, "unwind finished");
        Ok(RunReport { run, outcome: RunOutcome::Compensated })
    }

    /// Persist a status transition on the failure path, absorbing version
    /// bumps from concurrent cancel requests (which are now moot).
    fn transition(
        &self,
        mut run: ProvisioningRun,
        apply: impl Fn(&mut ProvisioningRun),
    ) -> Result<ProvisioningRun, OrchestratorError> {
        for _ in 0..16 {
            apply(&mut run);
            run.touch();
            let expected = run.version;
            match self.store.update_run(&run, expected) {
                Ok(stored) => return Ok(stored),
                Err(StoreError::VersionConflict { .. }) => {
                    run = self
                        .store
                        .get_run(&run.run_id)
                        .ok_or(OrchestratorError::RunVanished(run.run_id))?;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(OrchestratorError::Store(StoreError::VersionConflict { expected: 0, stored: 0 }))
    }

    /// Guarded run-row update with race classification
    fn commit(&self, run: &ProvisioningRun) -> Result<Commit, OrchestratorError> {
        match self.store.update_run(run, run.version) {
            Ok(stored) => Ok(Commit::Committed(stored)),
            Err(StoreError::VersionConflict { .. }) => {
                let stored = self
                    .store
                    .get_run(&run.run_id)
                    .ok_or(OrchestratorError::RunVanished(run.run_id))?;
                // A cancel only flips a flag, so the stored index cannot be
                // ahead of ours. Adopt the stored row and let the loop route
                // it to the failure path. Anything else means another
                // instance owns the run.
                if stored.status == RunStatus::Running
                    && stored.cancel_requested
                    && stored.current_step_index <= run.current_step_index
                {
                    tracing::info!(run_id = %run.run_id, "cancel observed mid-step");
                    Ok(Commit::Cancelled(stored))
                } else {
                    tracing::warn!(
                        run_id = %run.run_id,
                        "version conflict: run advanced elsewhere, standing down"
                    );
                    Ok(Commit::Lost(stored))
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Payloads of steps recorded successful, by step index
    fn completed_payloads(&self, run: &ProvisioningRun) -> HashMap<usize, serde_json::Value> {
        let mut completed = HashMap::new();
        for record in self.store.step_records(&run.run_id) {
            if record.outcome == StepOutcome::Success {
                completed
                    .entry(record.step_index)
                    .or_insert_with(|| record.result_payload.clone().unwrap_or_default());
            }
        }
        completed
    }

    /// Re-key completed payloads by step kind for activity consumption
    fn keyed_by_kind(
        &self,
        completed: &HashMap<usize, serde_json::Value>,
    ) -> HashMap<StepKind, serde_json::Value> {
        completed
            .iter()
            .filter_map(|(index, payload)| {
                self.config.steps.get(*index).map(|s| (s.kind, payload.clone()))
            })
            .collect()
    }
}

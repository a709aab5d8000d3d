//! Compensation Manager
//!
//! On terminal failure the manager walks the completed steps in reverse and
//! invokes each one's compensation with the payload its success recorded.
//! A failing compensation is recorded and surfaced to operators, never
//! rethrown: partial manual cleanup beats an unwind abandoned halfway.

use crate::activity::{ActivityContext, ActivityRegistry};
use crate::model::{CompensationOutcome, CompensationRecord, ProvisioningRun, StepOutcome};
use crate::steps::StepDefinition;
use crate::store::{RunStore, StoreError};
use chrono::Utc;
use std::collections::{HashMap, HashSet};

/// Walks the unwind of a failed run
pub struct CompensationManager;

impl CompensationManager {
    /// Create a manager
    pub fn new() -> Self {
        Self
    }

    /// Compensate every completed step of `run`, newest first. Each
    /// completed step is attempted exactly once per run: steps whose
    /// compensation is already recorded (an unwind interrupted by a crash)
    /// are skipped on resume. Failures do not stop the walk. Returns the
    /// compensation records invoked by this call, in order.
    pub async fn unwind(
        &self,
        run: &ProvisioningRun,
        steps: &[StepDefinition],
        registry: &ActivityRegistry,
        store: &dyn RunStore,
    ) -> Result<Vec<CompensationRecord>, StoreError> {
        // Payload of each completed step, by index. A step records at most
        // one Success, so later entries cannot overwrite.
        let mut completed: HashMap<usize, serde_json::Value> = HashMap::new();
        for record in store.step_records(&run.run_id) {
            if record.outcome == StepOutcome::Success {
                completed
                    .entry(record.step_index)
                    .or_insert_with(|| record.result_payload.clone().unwrap_or_default());
            }
        }

        let prior_results = completed
            .iter()
            .filter_map(|(index, payload)| {
                steps.get(*index).map(|step| (step.kind, payload.clone()))
            })
            .collect::<HashMap<_, _>>();

        // Compensations already recorded by an interrupted unwind
        let already_attempted: HashSet<usize> = store
            .compensation_records(&run.run_id)
            .iter()
            .map(|r| r.step_index)
            .collect();

        let mut indexes: Vec<usize> = completed.keys().copied().collect();
        indexes.sort_unstable_by(|a, b| b.cmp(a));

        let mut records = Vec::with_capacity(indexes.len());
        for index in indexes {
            let Some(step) = steps.get(index) else { continue };
            if already_attempted.contains(&index) {
                tracing::info!(step = step.name, step_index = index, "already compensated, skipping");
                continue;
            }
            let payload = &completed[&index];

            let ctx = ActivityContext {
                run_id: run.run_id,
                tenant_id: run.tenant_id,
                plan_id: run.plan_id.clone(),
                step_index: index,
                prior_results: prior_results.clone(),
            };

            let result = match registry.get(step.kind) {
                Some(activity) => activity.compensate(&ctx, payload).await,
                None => Err(onboard_common::ProvisionError::Validation(format!(
                    "no activity registered for {}",
                    step.name
                ))),
            };

            let record = match result {
                Ok(()) => {
                    tracing::info!(step = step.name, step_index = index, "compensated");
                    store.mark_resource_removed(&run.run_id, index)?;
                    CompensationRecord {
                        run_id: run.run_id,
                        step_index: index,
                        step_name: step.name.to_string(),
                        attempted_at: Utc::now(),
                        outcome: CompensationOutcome::Success,
                        error: None,
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        step = step.name,
                        step_index = index,
                        error = %err,
                        "compensation failed, continuing unwind"
                    );
                    CompensationRecord {
                        run_id: run.run_id,
                        step_index: index,
                        step_name: step.name.to_string(),
                        attempted_at: Utc::now(),
                        outcome: CompensationOutcome::Failed,
                        error: Some(err.to_string()),
                    }
                }
            };

            store.append_compensation(&record)?;
            records.push(record);
        }

        Ok(records)
    }
}

impl Default for CompensationManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::Activity;
    use crate::model::StepExecutionRecord;
    use crate::steps::default_steps;
    use crate::store::MemoryRunStore;
    use async_trait::async_trait;
    use onboard_common::ProvisionError;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use uuid::Uuid;

    /// Records compensation order into a shared log; optionally fails
    struct RecordingActivity {
        log: Arc<Mutex<Vec<usize>>>,
        fail: bool,
    }

    #[async_trait]
    impl Activity for RecordingActivity {
        async fn invoke(
            &self,
            _ctx: &ActivityContext,
        ) -> Result<serde_json::Value, ProvisionError> {
            Ok(serde_json::json!({}))
        }

        async fn compensate(
            &self,
            ctx: &ActivityContext,
            _payload: &serde_json::Value,
        ) -> Result<(), ProvisionError> {
            self.log.lock().push(ctx.step_index);
            if self.fail {
                Err(ProvisionError::ExternalSystem { status: 500, message: "boom".into() })
            } else {
                Ok(())
            }
        }
    }

    fn seed_successes(store: &MemoryRunStore, run: &ProvisioningRun, count: usize) {
        let steps = default_steps();
        for index in 0..count {
            store
                .append_step_record(&StepExecutionRecord {
                    run_id: run.run_id,
                    step_index: index,
                    step_name: steps[index].name.to_string(),
                    attempt: 1,
                    started_at: Utc::now(),
                    finished_at: Utc::now(),
                    outcome: StepOutcome::Success,
                    result_payload: Some(serde_json::json!({"id": index})),
                    error: None,
                })
                .unwrap();
        }
    }

    fn registry_with(log: Arc<Mutex<Vec<usize>>>, fail_kinds: &[crate::steps::StepKind]) -> ActivityRegistry {
        let mut registry = ActivityRegistry::new();
        for step in default_steps() {
            registry.register(
                step.kind,
                Arc::new(RecordingActivity {
                    log: log.clone(),
                    fail: fail_kinds.contains(&step.kind),
                }),
            );
        }
        registry
    }

    #[tokio::test]
    async fn test_unwind_walks_completed_steps_in_reverse() {
        let store = MemoryRunStore::new();
        let run = ProvisioningRun::new(Uuid::new_v4(), "pro");
        store.create_run(&run).unwrap();
        // Steps 0..=5 completed; step 6 failed and must not be compensated
        seed_successes(&store, &run, 6);

        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = registry_with(log.clone(), &[]);

        let records = CompensationManager::new()
            .unwind(&run, &default_steps(), &registry, &store)
            .await
            .unwrap();

        assert_eq!(*log.lock(), vec![5, 4, 3, 2, 1, 0]);
        assert!(records
            .iter()
            .all(|r| r.outcome == CompensationOutcome::Success));
        assert_eq!(store.compensation_records(&run.run_id).len(), 6);
    }

    #[tokio::test]
    async fn test_failed_compensation_does_not_stop_the_walk() {
        let store = MemoryRunStore::new();
        let run = ProvisioningRun::new(Uuid::new_v4(), "pro");
        store.create_run(&run).unwrap();
        seed_successes(&store, &run, 5);

        let log = Arc::new(Mutex::new(Vec::new()));
        // Step index 3 is CreateStorageBucket; its compensation fails
        let registry = registry_with(log.clone(), &[crate::steps::StepKind::CreateStorageBucket]);

        let records = CompensationManager::new()
            .unwind(&run, &default_steps(), &registry, &store)
            .await
            .unwrap();

        // All five completed steps attempted despite the mid-walk failure
        assert_eq!(*log.lock(), vec![4, 3, 2, 1, 0]);
        let failed: Vec<_> = records
            .iter()
            .filter(|r| r.outcome == CompensationOutcome::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].step_index, 3);
    }

    #[tokio::test]
    async fn test_resumed_unwind_skips_recorded_compensations() {
        let store = MemoryRunStore::new();
        let run = ProvisioningRun::new(Uuid::new_v4(), "pro");
        store.create_run(&run).unwrap();
        seed_successes(&store, &run, 6);

        // A previous unwind compensated steps 5 and 4, then crashed
        let steps = default_steps();
        for index in [5usize, 4] {
            store
                .append_compensation(&CompensationRecord {
                    run_id: run.run_id,
                    step_index: index,
                    step_name: steps[index].name.to_string(),
                    attempted_at: Utc::now(),
                    outcome: CompensationOutcome::Success,
                    error: None,
                })
                .unwrap();
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = registry_with(log.clone(), &[]);
        CompensationManager::new()
            .unwind(&run, &steps, &registry, &store)
            .await
            .unwrap();

        // Only the remaining steps are invoked; nothing runs twice
        assert_eq!(*log.lock(), vec![3, 2, 1, 0]);
        let recorded = store.compensation_records(&run.run_id);
        assert_eq!(recorded.len(), 6);
        let mut indexes: Vec<_> = recorded.iter().map(|r| r.step_index).collect();
        indexes.sort_unstable();
        indexes.dedup();
        assert_eq!(indexes, vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_unwind_marks_resources_removed_on_success_only() {
        let store = MemoryRunStore::new();
        let run = ProvisioningRun::new(Uuid::new_v4(), "pro");
        store.create_run(&run).unwrap();
        seed_successes(&store, &run, 2);
        for index in 0..2 {
            store
                .insert_resource_record(&crate::model::ResourceRecord {
                    run_id: run.run_id,
                    step_index: index,
                    step_name: format!("step-{index}"),
                    resource_type: "identity-realm".into(),
                    external_id: format!("ext-{index}"),
                    removed: false,
                })
                .unwrap();
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = registry_with(log, &[]);
        CompensationManager::new()
            .unwind(&run, &default_steps(), &registry, &store)
            .await
            .unwrap();

        assert!(store
            .resource_records(&run.run_id)
            .iter()
            .all(|r| r.removed));
    }
}

//! Step Executor
//!
//! Wraps one activity invocation in the step's retry policy: per-attempt
//! timeout, exponential backoff, and the fixed error taxonomy. Every attempt
//! is appended to the execution history; only the final record gates run
//! progression.

use crate::activity::{Activity, ActivityContext};
use crate::model::{StepExecutionRecord, StepOutcome};
use crate::steps::StepDefinition;
use crate::store::{RunStore, StoreError};
use chrono::Utc;
use onboard_common::ProvisionError;

/// Executes one step under its retry policy
pub struct StepExecutor;

impl StepExecutor {
    /// Create an executor
    pub fn new() -> Self {
        Self
    }

    /// Run the step's activity until it succeeds, fails terminally, or
    /// exhausts its attempt budget. Returns the final (gating) record.
    pub async fn execute(
        &self,
        step: &StepDefinition,
        ctx: &ActivityContext,
        activity: &dyn Activity,
        store: &dyn RunStore,
    ) -> Result<StepExecutionRecord, StoreError> {
        let max_attempts = step.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let delay = step.retry.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let started_at = Utc::now();
            let result = match tokio::time::timeout(step.timeout, activity.invoke(ctx)).await {
                Ok(result) => result,
                // An abandoned attempt is retryable; the activity's own
                // idempotency key keeps a late-completing call from
                // duplicating the resource on retry.
                Err(_) => Err(ProvisionError::timeout()),
            };
            let finished_at = Utc::now();

            let record = match result {
                Ok(payload) => StepExecutionRecord {
                    run_id: ctx.run_id,
                    step_index: ctx.step_index,
                    step_name: step.name.to_string(),
                    attempt,
                    started_at,
                    finished_at,
                    outcome: StepOutcome::Success,
                    result_payload: Some(payload),
                    error: None,
                },
                Err(err) => {
                    let exhausted = attempt == max_attempts;
                    let outcome = if err.is_retryable() && !exhausted {
                        StepOutcome::RetryableFailure
                    } else {
                        StepOutcome::TerminalFailure
                    };
                    StepExecutionRecord {
                        run_id: ctx.run_id,
                        step_index: ctx.step_index,
                        step_name: step.name.to_string(),
                        attempt,
                        started_at,
                        finished_at,
                        outcome,
                        result_payload: None,
                        error: Some(err.to_string()),
                    }
                }
            };

            store.append_step_record(&record)?;

            match record.outcome {
                StepOutcome::Success => {
                    tracing::info!(
                        step = step.name,
                        step_index = ctx.step_index,
                        attempt,
                        "step succeeded"
                    );
                    return Ok(record);
                }
                StepOutcome::TerminalFailure => {
                    tracing::error!(
                        step = step.name,
                        step_index = ctx.step_index,
                        attempt,
                        error = record.error.as_deref().unwrap_or(""),
                        "step failed terminally"
                    );
                    return Ok(record);
                }
                StepOutcome::RetryableFailure => {
                    tracing::warn!(
                        step = step.name,
                        step_index = ctx.step_index,
                        attempt,
                        max_attempts,
                        error = record.error.as_deref().unwrap_or(""),
                        "step attempt failed, will retry"
                    );
                }
            }
        }

        unreachable!("the final attempt always returns a gating record")
    }
}

impl Default for StepExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityContext;
    use crate::steps::{RetryPolicy, StepKind};
    use crate::store::MemoryRunStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};
    use std::time::Duration;
    use uuid::Uuid;

    /// Activity that plays back a scripted sequence of results
    struct ScriptedActivity {
        script: Mutex<VecDeque<Result<serde_json::Value, ProvisionError>>>,
        invocations: Mutex<u32>,
        invoke_delay: Option<Duration>,
    }

    impl ScriptedActivity {
        fn new(script: Vec<Result<serde_json::Value, ProvisionError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                invocations: Mutex::new(0),
                invoke_delay: None,
            }
        }

        fn invocations(&self) -> u32 {
            *self.invocations.lock()
        }
    }

    #[async_trait]
    impl Activity for ScriptedActivity {
        async fn invoke(
            &self,
            _ctx: &ActivityContext,
        ) -> Result<serde_json::Value, ProvisionError> {
            *self.invocations.lock() += 1;
            if let Some(delay) = self.invoke_delay {
                tokio::time::sleep(delay).await;
            }
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(serde_json::json!({})))
        }

        async fn compensate(
            &self,
            _ctx: &ActivityContext,
            _payload: &serde_json::Value,
        ) -> Result<(), ProvisionError> {
            Ok(())
        }
    }

    fn test_step(max_attempts: u32) -> StepDefinition {
        StepDefinition {
            kind: StepKind::DeployApplication,
            name: StepKind::DeployApplication.name(),
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(1),
                multiplier: 1.0,
            },
            timeout: Duration::from_secs(5),
            needs_callback_secret: false,
        }
    }

    fn test_ctx() -> ActivityContext {
        ActivityContext {
            run_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            plan_id: "pro".into(),
            step_index: 5,
            prior_results: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_transient_twice_then_success_records_three_attempts() {
        let activity = ScriptedActivity::new(vec![
            Err(ProvisionError::Transient("conn reset".into())),
            Err(ProvisionError::Transient("throttled".into())),
            Ok(serde_json::json!({"deployment_id": "d1"})),
        ]);
        let store = MemoryRunStore::new();
        let ctx = test_ctx();

        let record = StepExecutor::new()
            .execute(&test_step(5), &ctx, &activity, &store)
            .await
            .unwrap();

        assert_eq!(record.outcome, StepOutcome::Success);
        assert_eq!(record.attempt, 3);
        let history = store.step_records(&ctx.run_id);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].outcome, StepOutcome::RetryableFailure);
        assert_eq!(history[1].outcome, StepOutcome::RetryableFailure);
        assert_eq!(history[2].outcome, StepOutcome::Success);
    }

    #[tokio::test]
    async fn test_conflict_short_circuits_on_first_attempt() {
        let activity = ScriptedActivity::new(vec![Err(ProvisionError::Conflict(
            "zone already delegated".into(),
        ))]);
        let store = MemoryRunStore::new();
        let ctx = test_ctx();

        let record = StepExecutor::new()
            .execute(&test_step(5), &ctx, &activity, &store)
            .await
            .unwrap();

        assert_eq!(record.outcome, StepOutcome::TerminalFailure);
        assert_eq!(activity.invocations(), 1);
        assert_eq!(store.step_records(&ctx.run_id).len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_become_terminal() {
        let activity = ScriptedActivity::new(vec![
            Err(ProvisionError::ExternalSystem { status: 503, message: "busy".into() }),
            Err(ProvisionError::ExternalSystem { status: 503, message: "busy".into() }),
            Err(ProvisionError::ExternalSystem { status: 503, message: "busy".into() }),
        ]);
        let store = MemoryRunStore::new();
        let ctx = test_ctx();

        let record = StepExecutor::new()
            .execute(&test_step(3), &ctx, &activity, &store)
            .await
            .unwrap();

        assert_eq!(record.outcome, StepOutcome::TerminalFailure);
        assert_eq!(activity.invocations(), 3);
        let history = store.step_records(&ctx.run_id);
        assert_eq!(history[0].outcome, StepOutcome::RetryableFailure);
        assert_eq!(history[1].outcome, StepOutcome::RetryableFailure);
        assert_eq!(history[2].outcome, StepOutcome::TerminalFailure);
    }

    #[tokio::test]
    async fn test_timeout_is_retried() {
        let mut activity = ScriptedActivity::new(vec![
            Ok(serde_json::json!({"late": true})),
            Ok(serde_json::json!({"deployment_id": "d1"})),
        ]);
        activity.invoke_delay = Some(Duration::from_millis(50));
        let mut step = test_step(3);
        step.timeout = Duration::from_millis(10);

        let store = MemoryRunStore::new();
        let ctx = test_ctx();
        let record = StepExecutor::new()
            .execute(&step, &ctx, &activity, &store)
            .await
            .unwrap();

        // Both attempts time out on the slow activity, third would too
        assert_eq!(record.outcome, StepOutcome::TerminalFailure);
        let history = store.step_records(&ctx.run_id);
        assert_eq!(history[0].outcome, StepOutcome::RetryableFailure);
        assert!(history[0].error.as_deref().unwrap().contains("timed out"));
    }
}

//! Provisioning Run Data Model

use chrono::{DateTime, Utc};
use onboard_common::{RunId, TenantId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall run status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Created by the trigger listener, not yet claimed
    Pending,
    /// Claimed by an orchestrator instance
    Running,
    /// All steps succeeded
    Completed,
    /// A step failed terminally; compensation not yet started
    Failed,
    /// Unwind in progress
    Compensating,
    /// Unwind attempted for every completed step
    Compensated,
}

impl RunStatus {
    /// Whether the run can still make progress
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Compensated)
    }

    /// Whether a new trigger for the same tenant must attach instead of fork
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

/// One tenant onboarding attempt
///
/// Never deleted; retained as an audit trail. `version` is the optimistic
/// concurrency token: every store update carries the expected version and
/// two racing orchestrator instances cannot both advance the same run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProvisioningRun {
    /// Unique run ID
    pub run_id: RunId,
    /// Tenant being onboarded
    pub tenant_id: TenantId,
    /// Subscription plan requested at trigger time
    pub plan_id: String,
    /// Current status
    pub status: RunStatus,
    /// Index of the next step to execute
    pub current_step_index: usize,
    /// Optimistic concurrency token, incremented on every persisted update
    pub version: u64,
    /// Per-run webhook callback secret, generated before the first
    /// callback-dependent step
    pub webhook_secret: Option<String>,
    /// Operator-initiated cancellation flag; observed between steps
    pub cancel_requested: bool,
    /// Terminal error of the failing step, if any
    pub last_error: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl ProvisioningRun {
    /// Create a new pending run for a tenant
    pub fn new(tenant_id: TenantId, plan_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            tenant_id,
            plan_id: plan_id.into(),
            status: RunStatus::Pending,
            current_step_index: 0,
            version: 0,
            webhook_secret: None,
            cancel_requested: false,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Touch the update timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Final outcome of one step attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    /// Activity completed; payload recorded
    Success,
    /// Retryable failure; the executor may attempt again
    RetryableFailure,
    /// Terminal failure; the run fails and compensation begins
    TerminalFailure,
}

/// One attempted step execution within a run
///
/// Every attempt is recorded, not just the final one, so operators can see
/// the full retry history. A `Success` record's payload is immutable and is
/// exactly what the step's compensation later receives.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepExecutionRecord {
    /// Run this attempt belongs to
    pub run_id: RunId,
    /// Position in the step sequence
    pub step_index: usize,
    /// Step name at time of execution
    pub step_name: String,
    /// 1-based attempt number within this run
    pub attempt: u32,
    /// Attempt start time
    pub started_at: DateTime<Utc>,
    /// Attempt finish time
    pub finished_at: DateTime<Utc>,
    /// Attempt outcome
    pub outcome: StepOutcome,
    /// Activity-specific result (created realm ID, bucket name, ...),
    /// present only on `Success`
    pub result_payload: Option<serde_json::Value>,
    /// Error description on failure
    pub error: Option<String>,
}

/// Outcome of one compensation invocation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompensationOutcome {
    /// Compensation succeeded
    Success,
    /// Compensation failed; recorded for operator follow-up, never blocks
    /// compensating earlier steps
    Failed,
}

/// One compensation invocation during unwind
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompensationRecord {
    /// Run being unwound
    pub run_id: RunId,
    /// Step whose effects were compensated
    pub step_index: usize,
    /// Step name
    pub step_name: String,
    /// Invocation time
    pub attempted_at: DateTime<Utc>,
    /// Invocation outcome
    pub outcome: CompensationOutcome,
    /// Error detail on failure
    pub error: Option<String>,
}

/// Externally-addressable resource created by a successful step
///
/// Written so the downstream CRUD layer can display what was provisioned
/// without re-deriving it from the step log. Marked removed during unwind.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Run that created the resource
    pub run_id: RunId,
    /// Step index that created it
    pub step_index: usize,
    /// Step name that created it
    pub step_name: String,
    /// Kind of external resource (identity-realm, storage-bucket, ...)
    pub resource_type: String,
    /// Identifier in the external system
    pub external_id: String,
    /// Set when the resource was compensated away
    pub removed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run_is_pending() {
        let run = ProvisioningRun::new(Uuid::new_v4(), "pro");
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.current_step_index, 0);
        assert_eq!(run.version, 0);
        assert!(run.webhook_secret.is_none());
        assert!(!run.cancel_requested);
    }

    #[test]
    fn test_status_terminality() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Compensated.is_terminal());
        assert!(RunStatus::Failed.is_active());
        assert!(RunStatus::Compensating.is_active());
        assert!(RunStatus::Running.is_active());
        assert!(RunStatus::Pending.is_active());
    }
}

//! Step Definitions
//!
//! The provisioning sequence is a closed, ordered list. Each step pairs an
//! activity with its compensation, so the unwind mirror is derived rather
//! than registered dynamically.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The nine-plus-two known activity kinds, in execution order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    /// Create the tenant's identity realm at the IdP
    CreateIdentityRealm,
    /// Create the tenant's first admin user inside the realm
    CreateAdminUser,
    /// Create the tenant's database schema
    CreateSchema,
    /// Create the tenant's object storage bucket
    CreateStorageBucket,
    /// Provision dedicated infrastructure (shared placement for non-dedicated plans)
    ProvisionInfrastructure,
    /// Deploy the application onto the provisioned infrastructure
    DeployApplication,
    /// Create the tenant's DNS zone
    ConfigureDns,
    /// Create the A/CNAME records inside the zone
    CreateResourceRecords,
    /// Create the billing customer at the billing collaborator
    CreateBillingCustomer,
    /// Create the organization in the application plane
    CreateAppPlaneOrg,
    /// Flip the tenant to active in the directory
    MarkTenantActive,
}

impl StepKind {
    /// All step kinds in execution order
    pub fn all() -> &'static [StepKind] {
        &[
            Self::CreateIdentityRealm,
            Self::CreateAdminUser,
            Self::CreateSchema,
            Self::CreateStorageBucket,
            Self::ProvisionInfrastructure,
            Self::DeployApplication,
            Self::ConfigureDns,
            Self::CreateResourceRecords,
            Self::CreateBillingCustomer,
            Self::CreateAppPlaneOrg,
            Self::MarkTenantActive,
        ]
    }

    /// Stable step name
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateIdentityRealm => "create-identity-realm",
            Self::CreateAdminUser => "create-admin-user",
            Self::CreateSchema => "create-schema",
            Self::CreateStorageBucket => "create-storage-bucket",
            Self::ProvisionInfrastructure => "provision-infrastructure",
            Self::DeployApplication => "deploy-application",
            Self::ConfigureDns => "configure-dns",
            Self::CreateResourceRecords => "create-resource-records",
            Self::CreateBillingCustomer => "create-billing-customer",
            Self::CreateAppPlaneOrg => "create-app-plane-org",
            Self::MarkTenantActive => "mark-tenant-active",
        }
    }

    /// Kind of external resource the step creates, if addressable
    pub fn resource_type(&self) -> Option<&'static str> {
        match self {
            Self::CreateIdentityRealm => Some("identity-realm"),
            Self::CreateAdminUser => Some("identity-user"),
            Self::CreateSchema => Some("database-schema"),
            Self::CreateStorageBucket => Some("storage-bucket"),
            Self::ProvisionInfrastructure => Some("infrastructure-stack"),
            Self::DeployApplication => Some("deployment"),
            Self::ConfigureDns => Some("dns-zone"),
            Self::CreateResourceRecords => Some("dns-records"),
            Self::CreateBillingCustomer => Some("billing-customer"),
            Self::CreateAppPlaneOrg => Some("app-plane-org"),
            Self::MarkTenantActive => None,
        }
    }
}

/// Bounded retry policy for one step
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Exponential backoff multiplier
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Backoff before the given 1-based attempt number
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.powi(attempt as i32 - 2);
        self.base_delay.mul_f64(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

/// One entry of the fixed provisioning sequence
#[derive(Clone, Debug)]
pub struct StepDefinition {
    /// Which activity this step runs
    pub kind: StepKind,
    /// Stable name, mirrored into execution records
    pub name: &'static str,
    /// Retry policy around the activity invocation
    pub retry: RetryPolicy,
    /// Per-attempt timeout; an exceeded attempt counts as retryable
    pub timeout: Duration,
    /// Whether a webhook callback secret must exist before this step runs
    pub needs_callback_secret: bool,
}

impl StepDefinition {
    fn new(kind: StepKind) -> Self {
        Self {
            kind,
            name: kind.name(),
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(120),
            needs_callback_secret: false,
        }
    }
}

/// The fixed eleven-step provisioning sequence
pub fn default_steps() -> Vec<StepDefinition> {
    StepKind::all()
        .iter()
        .map(|kind| {
            let mut step = StepDefinition::new(*kind);
            match kind {
                // Infrastructure and deployment calls are slow and flaky;
                // give them longer leashes.
                StepKind::ProvisionInfrastructure | StepKind::DeployApplication => {
                    step.retry.max_attempts = 5;
                    step.timeout = Duration::from_secs(600);
                }
                // These collaborators complete asynchronously via signed
                // callbacks; the secret must exist before they start.
                StepKind::CreateIdentityRealm | StepKind::CreateBillingCustomer => {
                    step.needs_callback_secret = true;
                }
                _ => {}
            }
            step
        })
        .collect()
}

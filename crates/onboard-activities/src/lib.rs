//! Onboarding Activities
//!
//! The eleven provisioning activities and their compensations, one thin
//! adapter per external collaborator:
//!
//! - identity: realm + admin user at the IdP
//! - database: tenant schema
//! - storage: object storage bucket
//! - infra: dedicated infrastructure (shared placement for standard plans)
//! - deploy: application deployment
//! - dns: zone + resource records
//! - billing: billing customer
//! - org: app-plane organization + activation flip
//!
//! Every adapter derives its external resource name from the tenant ID (or
//! carries the run's idempotency key to the collaborator), so an at-least-once
//! invocation can never create a duplicate resource.

#![warn(missing_docs)]
#![allow(dead_code)]

pub mod billing;
pub mod database;
pub mod deploy;
pub mod dns;
pub mod identity;
pub mod infra;
pub mod org;
pub mod registry;
pub mod storage;

pub use registry::StandardActivities;

use onboard_common::ProvisionError;

/// Pull a required string field out of a recorded step payload
pub(crate) fn require_str(payload: &serde_json::Value, field: &str) -> Result<String, ProvisionError> {
    payload
        .get(field)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| ProvisionError::Validation(format!("payload missing field: {field}")))
}

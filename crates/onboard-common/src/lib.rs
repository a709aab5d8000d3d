//! Onboard Common - Shared types for tenant provisioning
//!
//! This crate provides the primitives shared by every onboarding crate:
//! - Tenant and run identifiers
//! - The provisioning error taxonomy (retryable vs. terminal)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;

pub use error::{ProvisionError, ProvisionResult};

use uuid::Uuid;

/// Tenant ID
pub type TenantId = Uuid;

/// Provisioning run ID
pub type RunId = Uuid;

/// Short, DNS- and schema-safe form of a tenant ID.
///
/// Used to derive deterministic external resource names so a retried
/// activity addresses the same resource instead of creating a new one.
pub fn short_tenant_id(tenant_id: &TenantId) -> String {
    tenant_id.simple().to_string()[..8].to_string()
}

//! Billing Adapter
//!
//! The billing provider accepts an idempotency key on customer creation,
//! so the adapter forwards the run's key instead of deriving a
//! deterministic name.

use crate::require_str;
use async_trait::async_trait;
use onboard_common::ProvisionError;
use onboard_orchestrator::activity::{Activity, ActivityContext};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// One billing customer
#[derive(Clone, Debug)]
pub struct CustomerEntry {
    /// Provider-assigned customer ID
    pub customer_id: String,
    /// Subscribed plan
    pub plan_id: String,
    /// Idempotency key presented at creation
    pub created_by: String,
}

/// Client facade over the billing provider's API
#[derive(Default)]
pub struct BillingClient {
    customers: RwLock<HashMap<String, CustomerEntry>>,
}

impl BillingClient {
    /// New client
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a customer; the provider dedupes on the idempotency key
    pub fn create_customer(&self, plan_id: &str, key: &str) -> Result<CustomerEntry, ProvisionError> {
        let mut customers = self.customers.write();
        if let Some(existing) = customers.values().find(|c| c.created_by == key) {
            return Ok(existing.clone());
        }
        let entry = CustomerEntry {
            customer_id: format!("cust-{}", Uuid::new_v4().simple()),
            plan_id: plan_id.to_string(),
            created_by: key.to_string(),
        };
        customers.insert(entry.customer_id.clone(), entry.clone());
        Ok(entry)
    }

    /// Delete a customer; absent customers are a no-op
    pub fn delete_customer(&self, customer_id: &str) {
        self.customers.write().remove(customer_id);
    }

    /// Number of customers (test observability)
    pub fn customer_count(&self) -> usize {
        self.customers.read().len()
    }
}

/// Step 8: create the tenant's billing customer
pub struct CreateBillingCustomerActivity {
    billing: Arc<BillingClient>,
}

impl CreateBillingCustomerActivity {
    /// Adapter over the billing client
    pub fn new(billing: Arc<BillingClient>) -> Self {
        Self { billing }
    }
}

#[async_trait]
impl Activity for CreateBillingCustomerActivity {
    async fn invoke(&self, ctx: &ActivityContext) -> Result<serde_json::Value, ProvisionError> {
        let customer = self
            .billing
            .create_customer(&ctx.plan_id, &ctx.idempotency_key())?;
        Ok(serde_json::json!({
            "customer_id": customer.customer_id,
            "plan_id": customer.plan_id,
            "external_id": customer.customer_id,
        }))
    }

    async fn compensate(
        &self,
        _ctx: &ActivityContext,
        payload: &serde_json::Value,
    ) -> Result<(), ProvisionError> {
        let customer_id = require_str(payload, "customer_id")?;
        self.billing.delete_customer(&customer_id);
        Ok(())
    }
}

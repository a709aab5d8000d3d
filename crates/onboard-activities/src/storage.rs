//! Object Storage Adapter

use crate::require_str;
use async_trait::async_trait;
use onboard_common::{short_tenant_id, ProvisionError};
use onboard_orchestrator::activity::{Activity, ActivityContext};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// One provisioned bucket
#[derive(Clone, Debug)]
pub struct BucketEntry {
    /// Globally unique bucket name
    pub name: String,
    /// Idempotency key of the creating invocation
    pub created_by: String,
}

/// Client facade over the object store's control API
#[derive(Default)]
pub struct ObjectStoreClient {
    buckets: RwLock<HashMap<String, BucketEntry>>,
}

impl ObjectStoreClient {
    /// New client
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bucket, idempotent per key
    pub fn create_bucket(&self, name: &str, key: &str) -> Result<BucketEntry, ProvisionError> {
        let mut buckets = self.buckets.write();
        if let Some(existing) = buckets.get(name) {
            if existing.created_by == key {
                return Ok(existing.clone());
            }
            return Err(ProvisionError::Conflict(format!(
                "bucket {name} already exists with different provenance"
            )));
        }
        let entry = BucketEntry { name: name.to_string(), created_by: key.to_string() };
        buckets.insert(name.to_string(), entry.clone());
        Ok(entry)
    }

    /// Delete a bucket; absent buckets are a no-op
    pub fn delete_bucket(&self, name: &str) {
        self.buckets.write().remove(name);
    }

    /// Whether a bucket exists
    pub fn has_bucket(&self, name: &str) -> bool {
        self.buckets.read().contains_key(name)
    }

    /// Number of buckets (test observability)
    pub fn bucket_count(&self) -> usize {
        self.buckets.read().len()
    }
}

/// Step 3: create the tenant's object storage bucket
pub struct CreateStorageBucketActivity {
    object_store: Arc<ObjectStoreClient>,
}

impl CreateStorageBucketActivity {
    /// Adapter over the object store client
    pub fn new(object_store: Arc<ObjectStoreClient>) -> Self {
        Self { object_store }
    }

    fn bucket_name(ctx: &ActivityContext) -> String {
        format!("tenant-{}-data", short_tenant_id(&ctx.tenant_id))
    }
}

#[async_trait]
impl Activity for CreateStorageBucketActivity {
    async fn invoke(&self, ctx: &ActivityContext) -> Result<serde_json::Value, ProvisionError> {
        let name = Self::bucket_name(ctx);
        let bucket = self.object_store.create_bucket(&name, &ctx.idempotency_key())?;
        Ok(serde_json::json!({
            "bucket_name": bucket.name,
            "external_id": bucket.name,
        }))
    }

    async fn compensate(
        &self,
        _ctx: &ActivityContext,
        payload: &serde_json::Value,
    ) -> Result<(), ProvisionError> {
        let name = require_str(payload, "bucket_name")?;
        self.object_store.delete_bucket(&name);
        Ok(())
    }
}

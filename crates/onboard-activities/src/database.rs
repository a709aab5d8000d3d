//! Database Schema Adapter
//!
//! Creates the tenant's schema on the shared cluster. Schema names derive
//! from the tenant ID, so a retried create addresses the same schema.

use crate::require_str;
use async_trait::async_trait;
use onboard_common::{short_tenant_id, ProvisionError};
use onboard_orchestrator::activity::{Activity, ActivityContext};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// One provisioned schema
#[derive(Clone, Debug)]
pub struct SchemaEntry {
    /// Schema name on the cluster
    pub name: String,
    /// Idempotency key of the creating invocation
    pub created_by: String,
}

/// Client facade over the database admin API
#[derive(Default)]
pub struct DatabaseAdminClient {
    schemas: RwLock<HashMap<String, SchemaEntry>>,
}

impl DatabaseAdminClient {
    /// New client
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a schema, idempotent per key
    pub fn create_schema(&self, name: &str, key: &str) -> Result<SchemaEntry, ProvisionError> {
        let mut schemas = self.schemas.write();
        if let Some(existing) = schemas.get(name) {
            if existing.created_by == key {
                return Ok(existing.clone());
            }
            return Err(ProvisionError::Conflict(format!(
                "schema {name} already exists with different provenance"
            )));
        }
        let entry = SchemaEntry { name: name.to_string(), created_by: key.to_string() };
        schemas.insert(name.to_string(), entry.clone());
        Ok(entry)
    }

    /// Drop a schema; absent schemas are a no-op
    pub fn drop_schema(&self, name: &str) {
        self.schemas.write().remove(name);
    }

    /// Whether a schema exists
    pub fn has_schema(&self, name: &str) -> bool {
        self.schemas.read().contains_key(name)
    }

    /// Number of schemas (test observability)
    pub fn schema_count(&self) -> usize {
        self.schemas.read().len()
    }
}

/// Step 2: create the tenant's database schema
pub struct CreateSchemaActivity {
    database: Arc<DatabaseAdminClient>,
}

impl CreateSchemaActivity {
    /// Adapter over the database admin client
    pub fn new(database: Arc<DatabaseAdminClient>) -> Self {
        Self { database }
    }

    fn schema_name(ctx: &ActivityContext) -> String {
        format!("tenant_{}", short_tenant_id(&ctx.tenant_id))
    }
}

#[async_trait]
impl Activity for CreateSchemaActivity {
    async fn invoke(&self, ctx: &ActivityContext) -> Result<serde_json::Value, ProvisionError> {
        let name = Self::schema_name(ctx);
        let schema = self.database.create_schema(&name, &ctx.idempotency_key())?;
        Ok(serde_json::json!({
            "schema_name": schema.name,
            "external_id": schema.name,
        }))
    }

    async fn compensate(
        &self,
        _ctx: &ActivityContext,
        payload: &serde_json::Value,
    ) -> Result<(), ProvisionError> {
        let name = require_str(payload, "schema_name")?;
        self.database.drop_schema(&name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ctx() -> ActivityContext {
        ActivityContext {
            run_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            plan_id: "pro".into(),
            step_index: 2,
            prior_results: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_schema_create_drop_round_trip() {
        let database = Arc::new(DatabaseAdminClient::new());
        let activity = CreateSchemaActivity::new(database.clone());
        let ctx = ctx();

        let payload = activity.invoke(&ctx).await.unwrap();
        assert_eq!(database.schema_count(), 1);

        // Retried invocation addresses the same schema
        activity.invoke(&ctx).await.unwrap();
        assert_eq!(database.schema_count(), 1);

        activity.compensate(&ctx, &payload).await.unwrap();
        assert_eq!(database.schema_count(), 0);
    }
}

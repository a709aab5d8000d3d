//! Identity Provider Adapters
//!
//! Creates the tenant's realm and its first admin user at the IdP. Realm
//! names derive from the tenant ID, and every create carries the run's
//! idempotency key, so a retried call after a crash-before-ack finds the
//! resource it already created instead of minting a second one.

use crate::require_str;
use async_trait::async_trait;
use onboard_common::{short_tenant_id, ProvisionError};
use onboard_orchestrator::activity::{Activity, ActivityContext};
use onboard_orchestrator::steps::StepKind;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// One realm at the identity provider
#[derive(Clone, Debug)]
pub struct RealmEntry {
    /// IdP-assigned realm ID
    pub realm_id: String,
    /// Realm name (derived from the tenant ID)
    pub name: String,
    /// Idempotency key of the invocation that created the realm
    pub created_by: String,
    /// Users inside the realm, by user ID
    pub users: HashMap<String, UserEntry>,
}

/// One user inside a realm
#[derive(Clone, Debug)]
pub struct UserEntry {
    /// IdP-assigned user ID
    pub user_id: String,
    /// Login email
    pub email: String,
    /// Idempotency key of the creating invocation
    pub created_by: String,
}

/// Client facade over the identity provider's admin API
#[derive(Default)]
pub struct IdentityProviderClient {
    realms: RwLock<HashMap<String, RealmEntry>>,
}

impl IdentityProviderClient {
    /// New client
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a realm, idempotent per key
    pub fn create_realm(&self, name: &str, key: &str) -> Result<RealmEntry, ProvisionError> {
        let mut realms = self.realms.write();
        if let Some(existing) = realms.get(name) {
            if existing.created_by == key {
                return Ok(existing.clone());
            }
            return Err(ProvisionError::Conflict(format!(
                "realm {name} already exists with different provenance"
            )));
        }
        let entry = RealmEntry {
            realm_id: format!("realm-{}", Uuid::new_v4().simple()),
            name: name.to_string(),
            created_by: key.to_string(),
            users: HashMap::new(),
        };
        realms.insert(name.to_string(), entry.clone());
        tracing::info!(realm = name, realm_id = %entry.realm_id, "realm created");
        Ok(entry)
    }

    /// Delete a realm by ID; deleting an absent realm is a no-op
    pub fn delete_realm(&self, realm_id: &str) {
        self.realms.write().retain(|_, r| r.realm_id != realm_id);
    }

    /// Create a user inside a realm, idempotent per key
    pub fn create_user(
        &self,
        realm_id: &str,
        email: &str,
        key: &str,
    ) -> Result<UserEntry, ProvisionError> {
        let mut realms = self.realms.write();
        let realm = realms
            .values_mut()
            .find(|r| r.realm_id == realm_id)
            .ok_or_else(|| ProvisionError::Validation(format!("unknown realm: {realm_id}")))?;

        if let Some(existing) = realm.users.values().find(|u| u.email == email) {
            if existing.created_by == key {
                return Ok(existing.clone());
            }
            return Err(ProvisionError::Conflict(format!(
                "user {email} already exists in realm {realm_id}"
            )));
        }
        let user = UserEntry {
            user_id: format!("user-{}", Uuid::new_v4().simple()),
            email: email.to_string(),
            created_by: key.to_string(),
        };
        realm.users.insert(user.user_id.clone(), user.clone());
        Ok(user)
    }

    /// Delete a user; absent users are a no-op
    pub fn delete_user(&self, realm_id: &str, user_id: &str) {
        if let Some(realm) = self
            .realms
            .write()
            .values_mut()
            .find(|r| r.realm_id == realm_id)
        {
            realm.users.remove(user_id);
        }
    }

    /// Look up a realm by name
    pub fn realm(&self, name: &str) -> Option<RealmEntry> {
        self.realms.read().get(name).cloned()
    }

    /// Number of realms (test observability)
    pub fn realm_count(&self) -> usize {
        self.realms.read().len()
    }
}

/// Step 0: create the tenant's identity realm
pub struct CreateIdentityRealmActivity {
    idp: Arc<IdentityProviderClient>,
}

impl CreateIdentityRealmActivity {
    /// Adapter over the IdP client
    pub fn new(idp: Arc<IdentityProviderClient>) -> Self {
        Self { idp }
    }

    fn realm_name(ctx: &ActivityContext) -> String {
        format!("tenant-{}", short_tenant_id(&ctx.tenant_id))
    }
}

#[async_trait]
impl Activity for CreateIdentityRealmActivity {
    async fn invoke(&self, ctx: &ActivityContext) -> Result<serde_json::Value, ProvisionError> {
        let name = Self::realm_name(ctx);
        let realm = self.idp.create_realm(&name, &ctx.idempotency_key())?;
        Ok(serde_json::json!({
            "realm_id": realm.realm_id,
            "realm_name": realm.name,
            "external_id": realm.realm_id,
        }))
    }

    async fn compensate(
        &self,
        _ctx: &ActivityContext,
        payload: &serde_json::Value,
    ) -> Result<(), ProvisionError> {
        let realm_id = require_str(payload, "realm_id")?;
        self.idp.delete_realm(&realm_id);
        Ok(())
    }
}

/// Step 1: create the tenant's first admin user inside the realm
pub struct CreateAdminUserActivity {
    idp: Arc<IdentityProviderClient>,
}

impl CreateAdminUserActivity {
    /// Adapter over the IdP client
    pub fn new(idp: Arc<IdentityProviderClient>) -> Self {
        Self { idp }
    }
}

#[async_trait]
impl Activity for CreateAdminUserActivity {
    async fn invoke(&self, ctx: &ActivityContext) -> Result<serde_json::Value, ProvisionError> {
        let realm_payload = ctx
            .prior(StepKind::CreateIdentityRealm)
            .ok_or_else(|| ProvisionError::Validation("realm step has no recorded result".into()))?;
        let realm_id = require_str(realm_payload, "realm_id")?;
        let realm_name = require_str(realm_payload, "realm_name")?;

        let email = format!("admin@{realm_name}.tenants.onboardhq.io");
        let user = self.idp.create_user(&realm_id, &email, &ctx.idempotency_key())?;
        Ok(serde_json::json!({
            "realm_id": realm_id,
            "user_id": user.user_id,
            "email": user.email,
            "external_id": user.user_id,
        }))
    }

    async fn compensate(
        &self,
        _ctx: &ActivityContext,
        payload: &serde_json::Value,
    ) -> Result<(), ProvisionError> {
        let realm_id = require_str(payload, "realm_id")?;
        let user_id = require_str(payload, "user_id")?;
        self.idp.delete_user(&realm_id, &user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(step_index: usize) -> ActivityContext {
        ActivityContext {
            run_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            plan_id: "pro".into(),
            step_index,
            prior_results: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_realm_create_is_idempotent_per_key() {
        let idp = Arc::new(IdentityProviderClient::new());
        let activity = CreateIdentityRealmActivity::new(idp.clone());
        let ctx = ctx(0);

        let first = activity.invoke(&ctx).await.unwrap();
        let second = activity.invoke(&ctx).await.unwrap();

        assert_eq!(first["realm_id"], second["realm_id"]);
        assert_eq!(idp.realm_count(), 1);
    }

    #[tokio::test]
    async fn test_foreign_realm_is_a_conflict() {
        let idp = Arc::new(IdentityProviderClient::new());
        let activity = CreateIdentityRealmActivity::new(idp.clone());
        let ctx = ctx(0);

        // Same realm name created by someone else
        let name = CreateIdentityRealmActivity::realm_name(&ctx);
        idp.create_realm(&name, "someone-else").unwrap();

        let err = activity.invoke(&ctx).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_compensation_deletes_the_realm() {
        let idp = Arc::new(IdentityProviderClient::new());
        let activity = CreateIdentityRealmActivity::new(idp.clone());
        let ctx = ctx(0);

        let payload = activity.invoke(&ctx).await.unwrap();
        assert_eq!(idp.realm_count(), 1);

        activity.compensate(&ctx, &payload).await.unwrap();
        assert_eq!(idp.realm_count(), 0);
    }

    #[tokio::test]
    async fn test_admin_user_consumes_realm_payload() {
        let idp = Arc::new(IdentityProviderClient::new());
        let realm_activity = CreateIdentityRealmActivity::new(idp.clone());
        let user_activity = CreateAdminUserActivity::new(idp.clone());

        let realm_ctx = ctx(0);
        let realm_payload = realm_activity.invoke(&realm_ctx).await.unwrap();

        let mut user_ctx = ctx(1);
        user_ctx.tenant_id = realm_ctx.tenant_id;
        user_ctx
            .prior_results
            .insert(StepKind::CreateIdentityRealm, realm_payload.clone());

        let user_payload = user_activity.invoke(&user_ctx).await.unwrap();
        let realm = idp
            .realm(&require_str(&realm_payload, "realm_name").unwrap())
            .unwrap();
        assert_eq!(realm.users.len(), 1);

        user_activity.compensate(&user_ctx, &user_payload).await.unwrap();
        let realm = idp.realm(&realm.name).unwrap();
        assert!(realm.users.is_empty());
    }

    #[tokio::test]
    async fn test_admin_user_without_realm_payload_is_invalid() {
        let idp = Arc::new(IdentityProviderClient::new());
        let activity = CreateAdminUserActivity::new(idp);
        let err = activity.invoke(&ctx(1)).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Validation(_)));
    }
}

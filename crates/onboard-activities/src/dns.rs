//! DNS Adapter
//!
//! Two steps share this client: zone creation and record creation. Zone
//! names derive from the tenant ID, so a zone that already exists under a
//! different provenance means another party owns the name and the run
//! must not adopt it.

use crate::require_str;
use async_trait::async_trait;
use onboard_common::{short_tenant_id, ProvisionError};
use onboard_orchestrator::activity::{Activity, ActivityContext};
use onboard_orchestrator::steps::StepKind;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// One DNS record inside a zone
#[derive(Clone, Debug)]
pub struct RecordEntry {
    /// DNS-provider record ID
    pub record_id: String,
    /// Record name
    pub name: String,
    /// Record target
    pub target: String,
    /// Idempotency key of the creating invocation
    pub created_by: String,
}

/// One DNS zone
#[derive(Clone, Debug)]
pub struct ZoneEntry {
    /// DNS-provider zone ID
    pub zone_id: String,
    /// Fully qualified zone name
    pub name: String,
    /// Idempotency key of the creating invocation
    pub created_by: String,
    /// Records inside the zone, by record ID
    pub records: HashMap<String, RecordEntry>,
}

/// Client facade over the DNS provider's API
#[derive(Default)]
pub struct DnsClient {
    zones: RwLock<HashMap<String, ZoneEntry>>,
}

impl DnsClient {
    /// New client
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a zone, idempotent per key
    pub fn create_zone(&self, name: &str, key: &str) -> Result<ZoneEntry, ProvisionError> {
        let mut zones = self.zones.write();
        if let Some(existing) = zones.get(name) {
            if existing.created_by == key {
                return Ok(existing.clone());
            }
            return Err(ProvisionError::Conflict(format!(
                "zone {name} already exists with different provenance"
            )));
        }
        let entry = ZoneEntry {
            zone_id: format!("zone-{}", Uuid::new_v4().simple()),
            name: name.to_string(),
            created_by: key.to_string(),
            records: HashMap::new(),
        };
        zones.insert(name.to_string(), entry.clone());
        tracing::info!(zone = name, zone_id = %entry.zone_id, "zone created");
        Ok(entry)
    }

    /// Delete a zone by ID; absent zones are a no-op
    pub fn delete_zone(&self, zone_id: &str) {
        self.zones.write().retain(|_, z| z.zone_id != zone_id);
    }

    /// Create a record inside a zone, idempotent per key
    pub fn create_record(
        &self,
        zone_id: &str,
        name: &str,
        target: &str,
        key: &str,
    ) -> Result<RecordEntry, ProvisionError> {
        let mut zones = self.zones.write();
        let zone = zones
            .values_mut()
            .find(|z| z.zone_id == zone_id)
            .ok_or_else(|| ProvisionError::Validation(format!("unknown zone: {zone_id}")))?;

        if let Some(existing) = zone.records.values().find(|r| r.created_by == key) {
            return Ok(existing.clone());
        }
        let record = RecordEntry {
            record_id: format!("rec-{}", Uuid::new_v4().simple()),
            name: name.to_string(),
            target: target.to_string(),
            created_by: key.to_string(),
        };
        zone.records.insert(record.record_id.clone(), record.clone());
        Ok(record)
    }

    /// Delete a record; absent records are a no-op
    pub fn delete_record(&self, zone_id: &str, record_id: &str) {
        if let Some(zone) = self
            .zones
            .write()
            .values_mut()
            .find(|z| z.zone_id == zone_id)
        {
            zone.records.remove(record_id);
        }
    }

    /// Look up a zone by name
    pub fn zone(&self, name: &str) -> Option<ZoneEntry> {
        self.zones.read().get(name).cloned()
    }

    /// Number of zones (test observability)
    pub fn zone_count(&self) -> usize {
        self.zones.read().len()
    }
}

/// Step 6: create the tenant's DNS zone
pub struct ConfigureDnsActivity {
    dns: Arc<DnsClient>,
}

impl ConfigureDnsActivity {
    /// Adapter over the DNS client
    pub fn new(dns: Arc<DnsClient>) -> Self {
        Self { dns }
    }

    fn zone_name(ctx: &ActivityContext) -> String {
        format!("{}.tenants.onboardhq.io", short_tenant_id(&ctx.tenant_id))
    }
}

#[async_trait]
impl Activity for ConfigureDnsActivity {
    async fn invoke(&self, ctx: &ActivityContext) -> Result<serde_json::Value, ProvisionError> {
        let name = Self::zone_name(ctx);
        let zone = self.dns.create_zone(&name, &ctx.idempotency_key())?;
        Ok(serde_json::json!({
            "zone_id": zone.zone_id,
            "zone_name": zone.name,
            "external_id": zone.zone_id,
        }))
    }

    async fn compensate(
        &self,
        _ctx: &ActivityContext,
        payload: &serde_json::Value,
    ) -> Result<(), ProvisionError> {
        let zone_id = require_str(payload, "zone_id")?;
        self.dns.delete_zone(&zone_id);
        Ok(())
    }
}

/// Step 7: point the tenant's zone at the deployed application
pub struct CreateResourceRecordsActivity {
    dns: Arc<DnsClient>,
}

impl CreateResourceRecordsActivity {
    /// Adapter over the DNS client
    pub fn new(dns: Arc<DnsClient>) -> Self {
        Self { dns }
    }
}

#[async_trait]
impl Activity for CreateResourceRecordsActivity {
    async fn invoke(&self, ctx: &ActivityContext) -> Result<serde_json::Value, ProvisionError> {
        let zone_payload = ctx
            .prior(StepKind::ConfigureDns)
            .ok_or_else(|| ProvisionError::Validation("dns step has no recorded result".into()))?;
        let deploy_payload = ctx
            .prior(StepKind::DeployApplication)
            .ok_or_else(|| ProvisionError::Validation("deploy step has no recorded result".into()))?;

        let zone_id = require_str(zone_payload, "zone_id")?;
        let zone_name = require_str(zone_payload, "zone_name")?;
        let endpoint = require_str(deploy_payload, "endpoint")?;

        let record = self.dns.create_record(
            &zone_id,
            &format!("app.{zone_name}"),
            &endpoint,
            &ctx.idempotency_key(),
        )?;
        Ok(serde_json::json!({
            "zone_id": zone_id,
            "record_id": record.record_id,
            "record_name": record.name,
            "target": record.target,
            "external_id": record.record_id,
        }))
    }

    async fn compensate(
        &self,
        _ctx: &ActivityContext,
        payload: &serde_json::Value,
    ) -> Result<(), ProvisionError> {
        let zone_id = require_str(payload, "zone_id")?;
        let record_id = require_str(payload, "record_id")?;
        self.dns.delete_record(&zone_id, &record_id);
        Ok(())
    }
}

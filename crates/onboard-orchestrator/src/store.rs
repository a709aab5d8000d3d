//! Durable State Store
//!
//! Persists the step log, run row, compensation log and resource records for
//! every provisioning run. The run row carries an optimistic version so two
//! orchestrator instances racing to resume the same run cannot both advance
//! it: exactly one update succeeds, the other observes a version conflict.
//!
//! Two backends: an in-memory store for tests and embedding, and a JSON
//! file-per-run store that survives process restart. Documents are written
//! via temp-file + rename so a crash never leaves a torn file.

use crate::model::{
    CompensationRecord, ProvisioningRun, ResourceRecord, RunStatus, StepExecutionRecord,
};
use onboard_common::{RunId, TenantId};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The run row changed since it was loaded; the caller must stand down
    #[error("version conflict: expected {expected}, stored {stored}")]
    VersionConflict {
        /// Version the caller loaded
        expected: u64,
        /// Version currently stored
        stored: u64,
    },
    /// A non-terminal run already exists for the tenant
    #[error("tenant {0} already has an active run")]
    ActiveRunExists(TenantId),
    /// No run row under that ID
    #[error("run not found: {0}")]
    RunNotFound(RunId),
    /// Backing file error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Document (de)serialization error
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Durable state store contract
///
/// The only shared state across orchestrator instances. A step record is
/// persisted before `current_step_index` advances, so crash recovery never
/// re-executes a step already recorded successful.
pub trait RunStore: Send + Sync {
    /// Insert a new run; rejected if the tenant already has an active run
    fn create_run(&self, run: &ProvisioningRun) -> Result<(), StoreError>;

    /// Load a run by ID
    fn get_run(&self, run_id: &RunId) -> Option<ProvisioningRun>;

    /// The tenant's non-terminal run, if any
    fn active_run_for_tenant(&self, tenant_id: &TenantId) -> Option<ProvisioningRun>;

    /// The tenant's most recently created run, terminal or not
    fn latest_run_for_tenant(&self, tenant_id: &TenantId) -> Option<ProvisioningRun>;

    /// Runs a crashed process left claimed (`Running`) or mid-unwind
    /// (`Failed`, `Compensating`), scanned at startup for crash recovery
    fn interrupted_runs(&self) -> Vec<ProvisioningRun>;

    /// Atomic claim-and-advance: persists `run` only if the stored version
    /// equals `expected_version`, bumping the version. Returns the stored
    /// row.
    fn update_run(
        &self,
        run: &ProvisioningRun,
        expected_version: u64,
    ) -> Result<ProvisioningRun, StoreError>;

    /// Append one step attempt to the execution history
    fn append_step_record(&self, record: &StepExecutionRecord) -> Result<(), StoreError>;

    /// Full execution history for a run, in append order
    fn step_records(&self, run_id: &RunId) -> Vec<StepExecutionRecord>;

    /// Append one compensation invocation
    fn append_compensation(&self, record: &CompensationRecord) -> Result<(), StoreError>;

    /// Compensation history for a run, in append order
    fn compensation_records(&self, run_id: &RunId) -> Vec<CompensationRecord>;

    /// Record an externally-addressable resource created by a step
    fn insert_resource_record(&self, record: &ResourceRecord) -> Result<(), StoreError>;

    /// Resource records for a run
    fn resource_records(&self, run_id: &RunId) -> Vec<ResourceRecord>;

    /// Mark the resources created by one step as removed
    fn mark_resource_removed(&self, run_id: &RunId, step_index: usize)
        -> Result<(), StoreError>;
}

#[derive(Default)]
struct StoreState {
    runs: HashMap<RunId, ProvisioningRun>,
    steps: HashMap<RunId, Vec<StepExecutionRecord>>,
    compensations: HashMap<RunId, Vec<CompensationRecord>>,
    resources: HashMap<RunId, Vec<ResourceRecord>>,
}

impl StoreState {
    fn create_run(&mut self, run: &ProvisioningRun) -> Result<(), StoreError> {
        let active_exists = self
            .runs
            .values()
            .any(|r| r.tenant_id == run.tenant_id && r.status.is_active());
        if active_exists {
            return Err(StoreError::ActiveRunExists(run.tenant_id));
        }
        self.runs.insert(run.run_id, run.clone());
        Ok(())
    }

    fn update_run(
        &mut self,
        run: &ProvisioningRun,
        expected_version: u64,
    ) -> Result<ProvisioningRun, StoreError> {
        let stored = self
            .runs
            .get_mut(&run.run_id)
            .ok_or(StoreError::RunNotFound(run.run_id))?;
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                stored: stored.version,
            });
        }
        let mut next = run.clone();
        next.version = expected_version + 1;
        *stored = next.clone();
        Ok(next)
    }

    fn mark_resource_removed(&mut self, run_id: &RunId, step_index: usize) {
        if let Some(records) = self.resources.get_mut(run_id) {
            for record in records.iter_mut() {
                if record.step_index == step_index {
                    record.removed = true;
                }
            }
        }
    }

    fn interrupted_runs(&self) -> Vec<ProvisioningRun> {
        self.runs
            .values()
            .filter(|r| {
                matches!(
                    r.status,
                    RunStatus::Running | RunStatus::Failed | RunStatus::Compensating
                )
            })
            .cloned()
            .collect()
    }
}

/// In-memory store backend
#[derive(Default)]
pub struct MemoryRunStore {
    state: RwLock<StoreState>,
}

impl MemoryRunStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStore for MemoryRunStore {
    fn create_run(&self, run: &ProvisioningRun) -> Result<(), StoreError> {
        self.state.write().create_run(run)
    }

    fn get_run(&self, run_id: &RunId) -> Option<ProvisioningRun> {
        self.state.read().runs.get(run_id).cloned()
    }

    fn active_run_for_tenant(&self, tenant_id: &TenantId) -> Option<ProvisioningRun> {
        self.state
            .read()
            .runs
            .values()
            .find(|r| r.tenant_id == *tenant_id && r.status.is_active())
            .cloned()
    }

    fn latest_run_for_tenant(&self, tenant_id: &TenantId) -> Option<ProvisioningRun> {
        self.state
            .read()
            .runs
            .values()
            .filter(|r| r.tenant_id == *tenant_id)
            .max_by_key(|r| r.created_at)
            .cloned()
    }

    fn interrupted_runs(&self) -> Vec<ProvisioningRun> {
        self.state.read().interrupted_runs()
    }

    fn update_run(
        &self,
        run: &ProvisioningRun,
        expected_version: u64,
    ) -> Result<ProvisioningRun, StoreError> {
        self.state.write().update_run(run, expected_version)
    }

    fn append_step_record(&self, record: &StepExecutionRecord) -> Result<(), StoreError> {
        self.state
            .write()
            .steps
            .entry(record.run_id)
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn step_records(&self, run_id: &RunId) -> Vec<StepExecutionRecord> {
        self.state.read().steps.get(run_id).cloned().unwrap_or_default()
    }

    fn append_compensation(&self, record: &CompensationRecord) -> Result<(), StoreError> {
        self.state
            .write()
            .compensations
            .entry(record.run_id)
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn compensation_records(&self, run_id: &RunId) -> Vec<CompensationRecord> {
        self.state
            .read()
            .compensations
            .get(run_id)
            .cloned()
            .unwrap_or_default()
    }

    fn insert_resource_record(&self, record: &ResourceRecord) -> Result<(), StoreError> {
        self.state
            .write()
            .resources
            .entry(record.run_id)
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn resource_records(&self, run_id: &RunId) -> Vec<ResourceRecord> {
        self.state
            .read()
            .resources
            .get(run_id)
            .cloned()
            .unwrap_or_default()
    }

    fn mark_resource_removed(
        &self,
        run_id: &RunId,
        step_index: usize,
    ) -> Result<(), StoreError> {
        self.state.write().mark_resource_removed(run_id, step_index);
        Ok(())
    }
}

/// One run's full durable document
#[derive(Serialize, Deserialize)]
struct RunDocument {
    run: ProvisioningRun,
    steps: Vec<StepExecutionRecord>,
    compensations: Vec<CompensationRecord>,
    resources: Vec<ResourceRecord>,
}

/// File-per-run JSON store backend
///
/// Each run's document lives at `{dir}/{run_id}.json`. All documents are
/// loaded at open, so runs left `Running` by a crashed process are visible
/// to recovery.
pub struct JsonFileStore {
    dir: PathBuf,
    state: RwLock<StoreState>,
    io_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open (or create) a store rooted at `dir`, loading existing documents.
    ///
    /// A document that fails to parse is quarantined (renamed aside) rather
    /// than failing the open: one torn file must not take every other run's
    /// state down with it.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut state = StoreState::default();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = std::fs::read_to_string(&path)
                .map_err(StoreError::from)
                .and_then(|text| serde_json::from_str::<RunDocument>(&text).map_err(StoreError::from));
            let doc = match parsed {
                Ok(doc) => doc,
                Err(err) => {
                    let quarantine = path.with_extension("json.corrupt");
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "unreadable run document, quarantining"
                    );
                    std::fs::rename(&path, &quarantine)?;
                    continue;
                }
            };
            let run_id = doc.run.run_id;
            state.runs.insert(run_id, doc.run);
            state.steps.insert(run_id, doc.steps);
            state.compensations.insert(run_id, doc.compensations);
            state.resources.insert(run_id, doc.resources);
        }

        Ok(Self { dir, state: RwLock::new(state), io_lock: Mutex::new(()) })
    }

    fn document_path(&self, run_id: &RunId) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }

    /// Write the run's document atomically (temp file + rename).
    ///
    /// Writers are serialized: the drive loop and an operator cancel update
    /// the same run from different threads, and interleaved writes on the
    /// shared temp path could otherwise install a torn or stale document.
    fn persist(&self, run_id: &RunId) -> Result<(), StoreError> {
        let _io = self.io_lock.lock();
        let doc = {
            let state = self.state.read();
            let run = state
                .runs
                .get(run_id)
                .ok_or(StoreError::RunNotFound(*run_id))?;
            RunDocument {
                run: run.clone(),
                steps: state.steps.get(run_id).cloned().unwrap_or_default(),
                compensations: state.compensations.get(run_id).cloned().unwrap_or_default(),
                resources: state.resources.get(run_id).cloned().unwrap_or_default(),
            }
        };

        let bytes = serde_json::to_vec_pretty(&doc)?;
        let tmp = self.dir.join(format!("{run_id}.json.tmp"));
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, self.document_path(run_id))?;
        Ok(())
    }

    /// Directory the documents live in
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl RunStore for JsonFileStore {
    fn create_run(&self, run: &ProvisioningRun) -> Result<(), StoreError> {
        self.state.write().create_run(run)?;
        self.persist(&run.run_id)
    }

    fn get_run(&self, run_id: &RunId) -> Option<ProvisioningRun> {
        self.state.read().runs.get(run_id).cloned()
    }

    fn active_run_for_tenant(&self, tenant_id: &TenantId) -> Option<ProvisioningRun> {
        self.state
            .read()
            .runs
            .values()
            .find(|r| r.tenant_id == *tenant_id && r.status.is_active())
            .cloned()
    }

    fn latest_run_for_tenant(&self, tenant_id: &TenantId) -> Option<ProvisioningRun> {
        self.state
            .read()
            .runs
            .values()
            .filter(|r| r.tenant_id == *tenant_id)
            .max_by_key(|r| r.created_at)
            .cloned()
    }

    fn interrupted_runs(&self) -> Vec<ProvisioningRun> {
        self.state.read().interrupted_runs()
    }

    fn update_run(
        &self,
        run: &ProvisioningRun,
        expected_version: u64,
    ) -> Result<ProvisioningRun, StoreError> {
        let stored = self.state.write().update_run(run, expected_version)?;
        self.persist(&run.run_id)?;
        Ok(stored)
    }

    fn append_step_record(&self, record: &StepExecutionRecord) -> Result<(), StoreError> {
        self.state
            .write()
            .steps
            .entry(record.run_id)
            .or_default()
            .push(record.clone());
        self.persist(&record.run_id)
    }

    fn step_records(&self, run_id: &RunId) -> Vec<StepExecutionRecord> {
        self.state.read().steps.get(run_id).cloned().unwrap_or_default()
    }

    fn append_compensation(&self, record: &CompensationRecord) -> Result<(), StoreError> {
        self.state
            .write()
            .compensations
            .entry(record.run_id)
            .or_default()
            .push(record.clone());
        self.persist(&record.run_id)
    }

    fn compensation_records(&self, run_id: &RunId) -> Vec<CompensationRecord> {
        self.state
            .read()
            .compensations
            .get(run_id)
            .cloned()
            .unwrap_or_default()
    }

    fn insert_resource_record(&self, record: &ResourceRecord) -> Result<(), StoreError> {
        self.state
            .write()
            .resources
            .entry(record.run_id)
            .or_default()
            .push(record.clone());
        self.persist(&record.run_id)
    }

    fn resource_records(&self, run_id: &RunId) -> Vec<ResourceRecord> {
        self.state
            .read()
            .resources
            .get(run_id)
            .cloned()
            .unwrap_or_default()
    }

    fn mark_resource_removed(
        &self,
        run_id: &RunId,
        step_index: usize,
    ) -> Result<(), StoreError> {
        self.state.write().mark_resource_removed(run_id, step_index);
        self.persist(run_id)
    }
}

//! Tenant Provisioning Orchestrator (TPO)
//!
//! Drives a new tenant's entire operating stack - identity realm, schema,
//! object storage, infrastructure, deployment, DNS, billing, app-plane org -
//! as one durable, crash-resumable saga with typed compensation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   TENANT PROVISIONING ORCHESTRATOR                      │
//! │                                                                         │
//! │  ┌─────────────┐        ┌──────────────┐       ┌───────────────────┐   │
//! │  │   Trigger   │───────▶│ Orchestrator │──────▶│   Step Executor   │   │
//! │  │   Listener  │        │  (run loop)  │       │ (retry + timeout) │   │
//! │  └─────────────┘        └──────┬───────┘       └─────────┬─────────┘   │
//! │                                │ terminal failure        │             │
//! │                                ▼                         ▼             │
//! │                     ┌──────────────────┐      ┌───────────────────┐   │
//! │                     │   Compensation   │      │ Activity Registry │   │
//! │                     │     Manager      │      │ (external effects)│   │
//! │                     └────────┬─────────┘      └───────────────────┘   │
//! │                              │                                         │
//! │  ┌───────────────────────────▼────────────────────────────────────┐   │
//! │  │                     DURABLE STATE STORE                        │   │
//! │  │   runs | step records | compensations | resource records       │   │
//! │  └───────────────────────────┬────────────────────────────────────┘   │
//! │                              │ read path only                         │
//! │                     ┌────────▼─────────┐                              │
//! │                     │  Status Reader   │  ◀── control-plane pollers   │
//! │                     └──────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![allow(dead_code)]

pub mod activity;
pub mod compensation;
pub mod executor;
pub mod model;
pub mod orchestrator;
pub mod status;
pub mod steps;
pub mod store;
pub mod trigger;
pub mod webhook;

pub use activity::{Activity, ActivityContext, ActivityRegistry};
pub use compensation::CompensationManager;
pub use executor::StepExecutor;
pub use model::{
    CompensationOutcome, CompensationRecord, ProvisioningRun, ResourceRecord, RunStatus,
    StepExecutionRecord, StepOutcome,
};
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorError, RunOutcome, RunReport};
pub use status::{RunStatusView, StatusReader};
pub use steps::{default_steps, RetryPolicy, StepDefinition, StepKind};
pub use store::{JsonFileStore, MemoryRunStore, RunStore, StoreError};
pub use trigger::{ProvisioningTrigger, TriggerListener};
pub use webhook::CallbackSigner;

// Process Desk Engine
// Storage, orchestration and engine reconciliation on top of the domain models

//! # Engine Module
//!
//! The engine is the layer between the domain models and the outside world:
//! document storage, the instance store, task-set handling, the storage
//! manager that request-handling code calls, notification dispatch and the
//! bridge to the external execution engine.
//!
//! ## Engine Components
//!
//! ### Storage (`storage`, `patch`, `instance_store`)
//! - Repository traits for instances, attachments, submissions and processes
//! - `InstancePatch`: field-level partial merge applied atomically per document
//! - `ProcessInstanceStore`: typed create / get / update over the repository
//!
//! ### Orchestration (`tasks`, `labels`, `manager`)
//! - `TaskSetManager`: task deltas for each operation type
//! - `instance_label`: pure label computation
//! - `StorageManager`: one atomic update per lifecycle operation
//!
//! ### Side channels (`events`, `reconcile`)
//! - `EventBus`: broadcast-backed `NotificationService`
//! - `EngineReconciler`: NOT_STARTED / STARTED / SYNCED / DESYNCED tracking

/// Repository traits and the in-memory document store
pub mod storage;

/// Partial-merge instance updates
pub mod patch;

/// Process instance store
pub mod instance_store;

/// Task set deltas
pub mod tasks;

/// Instance labeling
pub mod labels;

/// Notification dispatch
pub mod events;

/// Execution engine seam and reconciliation state machine
pub mod reconcile;

/// Storage manager (orchestrator)
pub mod manager;

#[cfg(test)]
mod manager_tests;

pub use events::{EventBus, NotificationEvent, NotificationService};
pub use instance_store::{ProcessInstanceStore, DEFAULT_PAGE_SIZE};
pub use labels::instance_label;
pub use manager::StorageManager;
pub use patch::InstancePatch;
pub use reconcile::{
    EngineReconciler, ExecutionCriteria, ExecutionEngine, ExecutionSnapshot,
    InMemoryExecutionEngine, ReconciliationEvent, ReconciliationRecord, ReconciliationState,
};
pub use storage::{
    AttachmentRepository, InMemoryStorage, InstanceQuery, InstanceRepository, Page, PageRequest,
    ProcessRepository, SubmissionRepository,
};
pub use tasks::TaskSetManager;

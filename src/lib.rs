// Process Desk - Rust Edition
// Process-instance lifecycle and concurrency-safe persistence for form-driven workflows

//! # Process Desk Library
//!
//! This is the library root for Process Desk, the state-machine and persistence core of a
//! business-process management system. Process instances are opened, carry human tasks
//! that get assigned, claimed and completed, and are finally archived. An external
//! execution engine decides control flow; this crate keeps the durable, query-able mirror.
//!
//! ## Core Components
//!
//! ### Domain Models
//! - [`ProcessInstance`]: The durable record for one running process
//! - [`Task`] / [`TaskSet`]: Human work items owned by an instance
//! - [`Operation`] / [`OperationLog`]: Append-only audit trail of lifecycle transitions
//! - [`Submission`] / [`Attachment`] / [`Validation`]: User input captured by forms
//!
//! ### Storage Layer
//! - [`ProcessInstanceStore`]: create / get / partial-merge update keyed by instance id
//! - [`InMemoryStorage`]: Document store implementation used for development and tests
//!
//! ### Orchestration
//! - [`StorageManager`]: The single entry point for request-handling code
//! - [`TaskSetManager`]: Computes and applies task-set deltas
//! - [`EngineReconciler`]: Bridges the execution engine and the local mirror
//!
//! **Usage Example:**
//! ```rust
//! use process_desk::{ProcessStatus, ProcessInstance, Process};
//!
//! let process = Process::new("expense", "Expense Report");
//! let instance = ProcessInstance::builder(&process, "deployment-1").build();
//! assert_eq!(instance.process_status, ProcessStatus::Open);
//! ```

// Core domain models
pub mod models;

// Storage, orchestration and reconciliation
pub mod engine;

// Configuration loading
pub mod config;

pub use models::{
    ActionType, Attachment, AttachmentId, AttachmentKind, Entity, FieldData, Notification,
    Operation, OperationLog, OperationResult, OperationType, Process, ProcessDeployment,
    ProcessInstance, ProcessInstanceId, ProcessStatus, Submission, Task, TaskId, TaskSet,
    Validation,
};

pub use engine::{
    events::{EventBus, LifecycleEventType, NotificationEvent, NotificationService},
    instance_store::{ProcessInstanceStore, DEFAULT_PAGE_SIZE},
    labels::instance_label,
    manager::StorageManager,
    patch::InstancePatch,
    reconcile::{
        EngineReconciler, ExecutionCriteria, ExecutionEngine, ExecutionSnapshot,
        InMemoryExecutionEngine, ReconciliationEvent, ReconciliationRecord, ReconciliationState,
    },
    storage::{
        AttachmentRepository, InMemoryStorage, InstanceQuery, InstanceRepository, Page,
        PageRequest, ProcessRepository, SubmissionRepository,
    },
    tasks::TaskSetManager,
};

pub use crate::config::{ConcurrencyMode, ProcessDeskConfig};

use thiserror::Error;

/// Error type for every operation in this crate
///
/// Errors are typed and propagate to the caller unmodified. Mapping them to
/// user-visible responses is the job of the request-handling layer.
#[derive(Error, Debug)]
pub enum ProcessDeskError {
    /// The referenced process definition does not exist
    #[error("Process not found: {key}")]
    ProcessNotFound { key: String },

    /// The referenced deployment does not exist
    #[error("Deployment not found: {id}")]
    DeploymentNotFound { id: String },

    /// The referenced process instance does not exist
    #[error("Process instance not found: {id}")]
    InstanceNotFound { id: String },

    /// The referenced attachment does not exist or is not owned by the instance
    #[error("Attachment not found: {id}")]
    AttachmentNotFound { id: String },

    /// The store rejected a write (version mismatch, set-once field, duplicate id)
    #[error("Conflict on process instance {id}: {reason}")]
    Conflict { id: String, reason: String },

    /// Error when the reconciliation state machine is asked for an illegal move
    #[error("Invalid reconciliation transition from {from} to {to} via {transition}")]
    InvalidTransition {
        from: String,
        to: String,
        transition: String,
    },

    /// Error when invalid input is provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The execution engine failed or refused a request
    #[error("Engine error: {0}")]
    Engine(String),

    /// Storage-related errors (connectivity, backend failures)
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration could not be loaded or deserialized
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),
}

impl ProcessDeskError {
    /// True for the four "referenced entity does not exist" variants
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ProcessDeskError::ProcessNotFound { .. }
                | ProcessDeskError::DeploymentNotFound { .. }
                | ProcessDeskError::InstanceNotFound { .. }
                | ProcessDeskError::AttachmentNotFound { .. }
        )
    }

    /// Whether a caller may repeat the request.
    ///
    /// Updates are idempotent merges, so storage failures and conflicts can be
    /// retried as-is. Missing entities and bad input cannot.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProcessDeskError::Storage(_)
                | ProcessDeskError::Conflict { .. }
                | ProcessDeskError::Engine(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ProcessDeskError>;

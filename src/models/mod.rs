// Core domain models for Process Desk
// Plain value types shared by the store, the orchestrator and the request layer

//! # Domain Models Module
//!
//! Value types only: no I/O, no locking. Everything here serializes with
//! serde so a document store can persist it as-is.

// Identifiers and ProcessStatus
pub mod state;

// Task, TaskBuilder and the per-instance TaskSet
pub mod task;

// Operation, OperationType, OperationLog and OperationResult
pub mod operation;

// FieldData, Submission, Attachment, Validation and ActionType
pub mod submission;

// Process, ProcessDeployment and Entity
pub mod process;

// Notification templates and their triggering lifecycle events
pub mod notification;

// ProcessInstance and its builder
pub mod instance;

pub use state::{AttachmentId, ProcessInstanceId, ProcessStatus, TaskId};

pub use task::{Task, TaskBuilder, TaskSet};

pub use operation::{Operation, OperationLog, OperationResult, OperationType};

pub use submission::{ActionType, Attachment, AttachmentKind, FieldData, Submission, Validation};

pub use process::{Entity, EntityKind, Process, ProcessDeployment};

pub use notification::{LifecycleEventType, Notification};

pub use instance::{ProcessInstance, ProcessInstanceBuilder};

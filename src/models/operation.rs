// Operation log - the audit trail of lifecycle transitions

//! # Operation Models
//!
//! Every state-changing request against a process instance (assign, claim,
//! complete, reject, cancel, update, activation, suspension) leaves one
//! [`Operation`] in the instance's [`OperationLog`]. The log is append-only:
//! insertion order is the audit order and entries are never edited.
//!
//! [`OperationResult`] is the value object produced by business-rule evaluation
//! upstream of this crate. It tells the storage manager which application
//! status to move to and which task (as the engine sees it) was affected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::Task;

/// Kind of lifecycle transition recorded by an [`Operation`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Assign,
    Claim,
    Complete,
    Reject,
    Cancel,
    Update,
    Activation,
    Suspension,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Assign => "ASSIGN",
            OperationType::Claim => "CLAIM",
            OperationType::Complete => "COMPLETE",
            OperationType::Reject => "REJECT",
            OperationType::Cancel => "CANCEL",
            OperationType::Update => "UPDATE",
            OperationType::Activation => "ACTIVATION",
            OperationType::Suspension => "SUSPENSION",
        }
    }

    /// Operations that act on the instance as a whole rather than one task
    pub fn is_instance_level(&self) -> bool {
        matches!(
            self,
            OperationType::Cancel | OperationType::Activation | OperationType::Suspension
        )
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,
    pub operation_type: OperationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub acting_user_id: String,
}

impl Operation {
    /// New operation with a generated id, stamped now
    pub fn new<S: Into<String>>(
        operation_type: OperationType,
        explanation: Option<String>,
        acting_user_id: S,
    ) -> Self {
        Operation {
            id: Uuid::new_v4(),
            operation_type,
            explanation,
            timestamp: Utc::now(),
            acting_user_id: acting_user_id.into(),
        }
    }
}

/// Append-only sequence of operations
///
/// Entries cannot be removed or edited. Appending an operation whose id is
/// already present is a no-op, so a retried update never duplicates an entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationLog(Vec<Operation>);

impl OperationLog {
    pub fn new() -> Self {
        OperationLog(Vec::new())
    }

    /// Append unless an entry with the same id exists. Returns whether it was added.
    pub fn append(&mut self, operation: Operation) -> bool {
        if self.contains(&operation.id) {
            return false;
        }
        self.0.push(operation);
        true
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.0.iter().any(|op| &op.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.0.iter()
    }

    pub fn last(&self) -> Option<&Operation> {
        self.0.last()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Operation] {
        &self.0
    }
}

/// Outcome of business-rule evaluation for one operation request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Application status to move to, if the rules decided one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_status_explanation: Option<String>,

    /// The affected task as the execution engine reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
}

impl OperationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_application_status<S: Into<String>>(mut self, status: S) -> Self {
        self.application_status = Some(status.into());
        self
    }

    pub fn with_explanation<S: Into<String>>(mut self, explanation: S) -> Self {
        self.application_status_explanation = Some(explanation.into());
        self
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.task = Some(task);
        self
    }
}

// Identifiers and structural status for process instances
//
// Process instances, tasks and attachments are referred to by string ids.
// Instance ids are generated locally at creation, task ids are assigned by
// the execution engine, attachment ids are generated when content is stored.
//
// ProcessStatus is the structural lifecycle of an instance:
//
// ```
//   [OPEN] --suspend--> [SUSPENDED] --activate--> [OPEN]
//     |                                             |
//     +--cancel--> [CANCELLED]        archive--> [COMPLETE]
// ```
//
// The business-meaningful application status is a free-form string kept
// alongside it on the instance.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a process instance, immutable once assigned
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessInstanceId(pub String);

impl ProcessInstanceId {
    /// Generate a fresh random id
    pub fn generate() -> Self {
        ProcessInstanceId(Uuid::new_v4().to_string())
    }

    /// Get the identifier as a string slice
    ///
    /// ```rust
    /// # use process_desk::ProcessInstanceId;
    /// let id = ProcessInstanceId::from("pi-1");
    /// assert_eq!(id.as_str(), "pi-1");
    /// ```
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProcessInstanceId {
    fn from(s: &str) -> Self {
        ProcessInstanceId(s.to_string())
    }
}

impl From<String> for ProcessInstanceId {
    fn from(s: String) -> Self {
        ProcessInstanceId(s)
    }
}

impl std::fmt::Display for ProcessInstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Engine-assigned identifier of a user task
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        TaskId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        TaskId(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        TaskId(s)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a stored attachment
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttachmentId(pub String);

impl AttachmentId {
    pub fn generate() -> Self {
        AttachmentId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AttachmentId {
    fn from(s: &str) -> Self {
        AttachmentId(s.to_string())
    }
}

impl From<String> for AttachmentId {
    fn from(s: String) -> Self {
        AttachmentId(s)
    }
}

impl std::fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Structural status of a process instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    Open,
    Complete,
    Cancelled,
    Suspended,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Open => "OPEN",
            ProcessStatus::Complete => "COMPLETE",
            ProcessStatus::Cancelled => "CANCELLED",
            ProcessStatus::Suspended => "SUSPENDED",
        }
    }

    /// Complete and cancelled instances accept no further task work
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessStatus::Complete | ProcessStatus::Cancelled)
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

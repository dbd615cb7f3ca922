// Notification templates and the lifecycle events that trigger them

use serde::{Deserialize, Serialize};

use super::operation::OperationType;

/// Lifecycle event a notification can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventType {
    InstanceCreated,
    TaskAssigned,
    TaskClaimed,
    TaskCompleted,
    TaskRejected,
    InstanceCancelled,
    InstanceUpdated,
    InstanceActivated,
    InstanceSuspended,
    InstanceArchived,
    AttachmentRemoved,
}

impl From<OperationType> for LifecycleEventType {
    fn from(operation_type: OperationType) -> Self {
        match operation_type {
            OperationType::Assign => LifecycleEventType::TaskAssigned,
            OperationType::Claim => LifecycleEventType::TaskClaimed,
            OperationType::Complete => LifecycleEventType::TaskCompleted,
            OperationType::Reject => LifecycleEventType::TaskRejected,
            OperationType::Cancel => LifecycleEventType::InstanceCancelled,
            OperationType::Update => LifecycleEventType::InstanceUpdated,
            OperationType::Activation => LifecycleEventType::InstanceActivated,
            OperationType::Suspension => LifecycleEventType::InstanceSuspended,
        }
    }
}

/// Email-style notification configured on a deployment
///
/// Templates are rendered by the notification subsystem; this crate only
/// supplies the context map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub name: String,
    pub trigger: LifecycleEventType,
    pub recipients: Vec<String>,
    pub subject_template: String,
    pub body_template: String,
}

impl Notification {
    pub fn new<N: Into<String>>(name: N, trigger: LifecycleEventType) -> Self {
        Notification {
            name: name.into(),
            trigger,
            recipients: Vec::new(),
            subject_template: String::new(),
            body_template: String::new(),
        }
    }

    pub fn to<S: Into<String>>(mut self, recipient: S) -> Self {
        self.recipients.push(recipient.into());
        self
    }

    pub fn with_subject<S: Into<String>>(mut self, subject: S) -> Self {
        self.subject_template = subject.into();
        self
    }

    pub fn with_body<S: Into<String>>(mut self, body: S) -> Self {
        self.body_template = body.into();
        self
    }
}

// User input captured by forms: submissions, attachments and validations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::process::{Process, ProcessDeployment};
use super::state::{AttachmentId, ProcessInstanceId, TaskId};
use super::task::Task;

/// Field name to ordered values.
///
/// Keys are unique; the order of values within one field is significant
/// (multi-valued inputs keep the order the user entered them in).
pub type FieldData = HashMap<String, Vec<serde_json::Value>>;

/// What the user asked for when posting a form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Create,
    Complete,
    Reject,
    Save,
    /// Only attachments change; posted field values are ignored
    Attach,
    Validate,
}

/// Stored content of an attachment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttachmentKind {
    File {
        location: String,
        content_type: String,
    },
    Text {
        body: String,
    },
}

/// Opaque content reference owned by one process instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: AttachmentId,
    /// Form field the attachment was uploaded through
    pub name: String,
    pub kind: AttachmentKind,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl Attachment {
    pub fn file<N: Into<String>, L: Into<String>, C: Into<String>, U: Into<String>>(
        name: N,
        location: L,
        content_type: C,
        user_id: U,
    ) -> Self {
        Attachment {
            id: AttachmentId::generate(),
            name: name.into(),
            kind: AttachmentKind::File {
                location: location.into(),
                content_type: content_type.into(),
            },
            user_id: user_id.into(),
            created_at: Utc::now(),
        }
    }

    pub fn text<N: Into<String>, B: Into<String>, U: Into<String>>(
        name: N,
        body: B,
        user_id: U,
    ) -> Self {
        Attachment {
            id: AttachmentId::generate(),
            name: name.into(),
            kind: AttachmentKind::Text { body: body.into() },
            user_id: user_id.into(),
            created_at: Utc::now(),
        }
    }
}

/// A batch of field values captured at one point in time
///
/// Immutable once stored; kept independently of the instance for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub process_definition_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_instance_id: Option<ProcessInstanceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub action: ActionType,
    pub data: FieldData,
    /// Overrides the computed instance label when set and non-blank
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_instance_label: Option<String>,
    #[serde(default)]
    pub attachment_ids: Vec<AttachmentId>,
    pub submitter_id: String,
    pub submitted_at: DateTime<Utc>,
}

impl Submission {
    pub fn new<K: Into<String>, U: Into<String>>(
        process_definition_key: K,
        action: ActionType,
        data: FieldData,
        submitter_id: U,
    ) -> Self {
        Submission {
            id: Uuid::new_v4(),
            process_definition_key: process_definition_key.into(),
            process_instance_id: None,
            task_id: None,
            action,
            data,
            process_instance_label: None,
            attachment_ids: Vec::new(),
            submitter_id: submitter_id.into(),
            submitted_at: Utc::now(),
        }
    }

    pub fn for_instance(mut self, id: ProcessInstanceId) -> Self {
        self.process_instance_id = Some(id);
        self
    }

    pub fn for_task(mut self, id: TaskId) -> Self {
        self.task_id = Some(id);
        self
    }

    pub fn with_label<S: Into<String>>(mut self, label: S) -> Self {
        self.process_instance_label = Some(label.into());
        self
    }

    pub fn with_attachments(mut self, ids: Vec<AttachmentId>) -> Self {
        self.attachment_ids = ids;
        self
    }

    /// The label override, if it carries any text
    pub fn label_override(&self) -> Option<&str> {
        self.process_instance_label
            .as_deref()
            .map(str::trim)
            .filter(|label| !label.is_empty())
    }
}

/// Output of the (external) validation subsystem for one form post
///
/// Field contents are already validated; this crate only checks that the
/// referenced process, deployment and instance exist.
#[derive(Debug, Clone)]
pub struct Validation {
    pub process: Process,
    pub deployment: ProcessDeployment,
    pub instance_id: Option<ProcessInstanceId>,
    pub task: Option<Task>,
    pub submission: Submission,
    /// Validated values to merge into the instance
    pub data: FieldData,
    /// Files and text blocks found in the post
    pub attachments: Vec<Attachment>,
    /// Instance version the form was rendered from, if the caller tracked it
    pub instance_version: Option<u64>,
}

// Partial-merge updates for process instance documents

//! # Instance Patch
//!
//! An [`InstancePatch`] describes a field-level update: only the parts that
//! are present are applied, everything else keeps its stored value. A
//! document store executes it as one conditional update against a single
//! document (the in-memory store applies it under the entry's write guard),
//! so two callers touching disjoint fields never lose each other's writes.
//!
//! ## Field semantics
//!
//! | Patch part                 | Effect on the stored document             |
//! |----------------------------|-------------------------------------------|
//! | scalar setters             | overwrite the field                       |
//! | `data`                     | overwrite only the listed field keys      |
//! | `task_upserts`             | replace or insert tasks by `task_id`      |
//! | `add_attachments`          | add-to-set                                |
//! | `remove_attachments`       | pull from set                             |
//! | `add_submission`           | add-to-set                                |
//! | `push_operation`           | append unless that operation id exists    |
//! | `engine_instance_id`       | set once; a different value is a conflict |
//! | `expected_version`         | compare-and-swap guard on the whole patch |
//!
//! A COMPLETE or CANCELLED instance never receives an open task: a patch that
//! would leave one there is rejected with `Conflict` as a whole.
//!
//! Every part is idempotent, so re-applying a patch that already landed
//! leaves the document (including its version) unchanged.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    AttachmentId, FieldData, Operation, ProcessInstance, ProcessStatus, Task,
};
use crate::{ProcessDeskError, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstancePatch {
    pub process_status: Option<ProcessStatus>,
    pub application_status: Option<String>,
    pub application_status_explanation: Option<String>,
    pub previous_application_status: Option<String>,
    pub process_instance_label: Option<String>,
    pub end_time: Option<DateTime<Utc>>,
    pub data: Option<FieldData>,
    pub task_upserts: Vec<Task>,
    pub add_attachments: Vec<AttachmentId>,
    pub remove_attachments: Vec<AttachmentId>,
    pub add_submission: Option<Uuid>,
    pub push_operation: Option<Operation>,
    pub engine_instance_id: Option<String>,
    pub expected_version: Option<u64>,
}

impl InstancePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_status(mut self, status: ProcessStatus) -> Self {
        self.process_status = Some(status);
        self
    }

    pub fn application_status(mut self, status: Option<String>) -> Self {
        self.application_status = status;
        self
    }

    pub fn application_status_explanation(mut self, explanation: Option<String>) -> Self {
        self.application_status_explanation = explanation;
        self
    }

    pub fn previous_application_status(mut self, status: Option<String>) -> Self {
        self.previous_application_status = status;
        self
    }

    pub fn label<S: Into<String>>(mut self, label: S) -> Self {
        self.process_instance_label = Some(label.into());
        self
    }

    pub fn end_time(mut self, when: DateTime<Utc>) -> Self {
        self.end_time = Some(when);
        self
    }

    pub fn data(mut self, data: FieldData) -> Self {
        self.data = Some(data);
        self
    }

    pub fn upsert_task(mut self, task: Task) -> Self {
        self.task_upserts.push(task);
        self
    }

    pub fn upsert_tasks<I: IntoIterator<Item = Task>>(mut self, tasks: I) -> Self {
        self.task_upserts.extend(tasks);
        self
    }

    pub fn add_attachments<I: IntoIterator<Item = AttachmentId>>(mut self, ids: I) -> Self {
        self.add_attachments.extend(ids);
        self
    }

    pub fn remove_attachment(mut self, id: AttachmentId) -> Self {
        self.remove_attachments.push(id);
        self
    }

    pub fn add_submission(mut self, id: Uuid) -> Self {
        self.add_submission = Some(id);
        self
    }

    pub fn push_operation(mut self, operation: Operation) -> Self {
        self.push_operation = Some(operation);
        self
    }

    pub fn engine_instance_id<S: Into<String>>(mut self, id: S) -> Self {
        self.engine_instance_id = Some(id.into());
        self
    }

    /// Reject the update unless the stored version equals `version`
    pub fn expect_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    /// True when the patch carries no field change at all
    pub fn is_empty(&self) -> bool {
        self.process_status.is_none()
            && self.application_status.is_none()
            && self.application_status_explanation.is_none()
            && self.previous_application_status.is_none()
            && self.process_instance_label.is_none()
            && self.end_time.is_none()
            && self.data.is_none()
            && self.task_upserts.is_empty()
            && self.add_attachments.is_empty()
            && self.remove_attachments.is_empty()
            && self.add_submission.is_none()
            && self.push_operation.is_none()
            && self.engine_instance_id.is_none()
    }

    /// Apply this patch to `instance` in place.
    ///
    /// Returns `Ok(true)` if the document changed, in which case the version
    /// is bumped and `last_modified_time` restamped. On error the instance is
    /// left untouched.
    pub fn apply_to(&self, instance: &mut ProcessInstance) -> Result<bool> {
        if let Some(expected) = self.expected_version {
            if instance.version != expected {
                return Err(ProcessDeskError::Conflict {
                    id: instance.process_instance_id.to_string(),
                    reason: format!(
                        "expected version {} but found {}",
                        expected, instance.version
                    ),
                });
            }
        }

        if let (Some(current), Some(requested)) =
            (&instance.engine_instance_id, &self.engine_instance_id)
        {
            if current != requested {
                return Err(ProcessDeskError::Conflict {
                    id: instance.process_instance_id.to_string(),
                    reason: format!(
                        "engine instance id already set to {}, refusing {}",
                        current, requested
                    ),
                });
            }
        }

        let status = self.process_status.unwrap_or(instance.process_status);
        if status.is_terminal() {
            if let Some(task) = self.task_upserts.iter().find(|task| task.is_open()) {
                return Err(ProcessDeskError::Conflict {
                    id: instance.process_instance_id.to_string(),
                    reason: format!("instance is {}, refusing open task {}", status, task.task_id),
                });
            }
        }

        let before = instance.clone();

        if let Some(status) = self.process_status {
            instance.process_status = status;
        }
        if let Some(status) = &self.application_status {
            instance.application_status = Some(status.clone());
        }
        if let Some(explanation) = &self.application_status_explanation {
            instance.application_status_explanation = Some(explanation.clone());
        }
        if let Some(previous) = &self.previous_application_status {
            instance.previous_application_status = Some(previous.clone());
        }
        if let Some(label) = &self.process_instance_label {
            instance.process_instance_label = label.clone();
        }
        if let Some(end) = self.end_time {
            instance.end_time = Some(end);
        }
        if let Some(data) = &self.data {
            for (field, values) in data {
                instance.data.insert(field.clone(), values.clone());
            }
        }
        for task in &self.task_upserts {
            instance.tasks.upsert(task.clone());
        }
        for id in &self.add_attachments {
            instance.attachment_ids.insert(id.clone());
        }
        for id in &self.remove_attachments {
            instance.attachment_ids.remove(id);
        }
        if let Some(id) = self.add_submission {
            instance.submission_ids.insert(id);
        }
        if let Some(operation) = &self.push_operation {
            instance.operations.append(operation.clone());
        }
        if instance.engine_instance_id.is_none() {
            if let Some(id) = &self.engine_instance_id {
                instance.engine_instance_id = Some(id.clone());
            }
        }

        if *instance == before {
            return Ok(false);
        }
        instance.version += 1;
        instance.last_modified_time = Utc::now();
        Ok(true)
    }
}

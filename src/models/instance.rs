// Process instance - the durable record of one running process

//! # Process Instance Model
//!
//! A [`ProcessInstance`] is the document this crate persists for each
//! running (or finished) process: its statuses, the submitted field data,
//! attachment references, the live task set and the operation log.
//!
//! Instances are created OPEN by the storage manager, changed only through
//! partial-merge updates, and never deleted. Archival marks them COMPLETE.
//!
//! ## Invariant
//!
//! `process_status == COMPLETE` implies `end_time` is set and no task in
//! `tasks` is open. [`ProcessInstance::check_invariants`] verifies it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::operation::OperationLog;
use super::process::Process;
use super::state::{AttachmentId, ProcessInstanceId, ProcessStatus};
use super::submission::FieldData;
use super::task::{Task, TaskSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInstance {
    /// Assigned at creation, never changes
    pub process_instance_id: ProcessInstanceId,

    pub process_definition_key: String,

    /// Deployment this instance was started against
    pub deployment_id: String,

    pub process_instance_label: String,

    pub process_status: ProcessStatus,

    /// Business-meaningful, process-specific status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_status_explanation: Option<String>,

    /// Application status held while the instance is suspended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_application_status: Option<String>,

    #[serde(default)]
    pub data: FieldData,

    #[serde(default)]
    pub attachment_ids: BTreeSet<AttachmentId>,

    /// Submissions consumed by this instance, stored separately for audit
    #[serde(default)]
    pub submission_ids: BTreeSet<Uuid>,

    #[serde(default)]
    pub tasks: TaskSet,

    #[serde(default)]
    pub operations: OperationLog,

    /// Execution id in the external engine, set once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_instance_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator_id: Option<String>,

    pub start_time: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    pub last_modified_time: DateTime<Utc>,

    /// Bumped by the store on every update that changes the document
    #[serde(default)]
    pub version: u64,
}

impl ProcessInstance {
    /// Start building an OPEN instance of `process`
    pub fn builder<D: Into<String>>(process: &Process, deployment_id: D) -> ProcessInstanceBuilder {
        let now = Utc::now();
        ProcessInstanceBuilder {
            instance: ProcessInstance {
                process_instance_id: ProcessInstanceId::generate(),
                process_definition_key: process.process_definition_key.clone(),
                deployment_id: deployment_id.into(),
                process_instance_label: process.process_definition_label.clone(),
                process_status: ProcessStatus::Open,
                application_status: None,
                application_status_explanation: None,
                previous_application_status: None,
                data: FieldData::new(),
                attachment_ids: BTreeSet::new(),
                submission_ids: BTreeSet::new(),
                tasks: TaskSet::new(),
                operations: OperationLog::new(),
                engine_instance_id: None,
                initiator_id: None,
                start_time: now,
                end_time: None,
                last_modified_time: now,
                version: 0,
            },
        }
    }

    pub fn active_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.active()
    }

    /// First value of a field, the common case for single-valued inputs
    pub fn first_value(&self, field: &str) -> Option<&serde_json::Value> {
        self.data.get(field).and_then(|values| values.first())
    }

    pub fn has_attachment(&self, id: &AttachmentId) -> bool {
        self.attachment_ids.contains(id)
    }

    /// Verify the COMPLETE invariant, returning a description of the first violation
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        if self.process_status == ProcessStatus::Complete {
            if self.end_time.is_none() {
                return Err(format!(
                    "instance {} is COMPLETE without an end time",
                    self.process_instance_id
                ));
            }
            if let Some(task) = self.tasks.active().next() {
                return Err(format!(
                    "instance {} is COMPLETE but task {} is still open",
                    self.process_instance_id, task.task_id
                ));
            }
        }
        Ok(())
    }
}

/// Fluent builder for [`ProcessInstance`]
#[derive(Debug, Clone)]
pub struct ProcessInstanceBuilder {
    instance: ProcessInstance,
}

impl ProcessInstanceBuilder {
    pub fn id(mut self, id: ProcessInstanceId) -> Self {
        self.instance.process_instance_id = id;
        self
    }

    pub fn label<S: Into<String>>(mut self, label: S) -> Self {
        self.instance.process_instance_label = label.into();
        self
    }

    pub fn application_status(mut self, status: Option<String>) -> Self {
        self.instance.application_status = status;
        self
    }

    pub fn data(mut self, data: FieldData) -> Self {
        self.instance.data = data;
        self
    }

    pub fn attachments<I: IntoIterator<Item = AttachmentId>>(mut self, ids: I) -> Self {
        self.instance.attachment_ids.extend(ids);
        self
    }

    pub fn submission(mut self, id: Uuid) -> Self {
        self.instance.submission_ids.insert(id);
        self
    }

    pub fn task(mut self, task: Task) -> Self {
        self.instance.tasks.upsert(task);
        self
    }

    pub fn initiator<S: Into<String>>(mut self, user_id: S) -> Self {
        self.instance.initiator_id = Some(user_id.into());
        self
    }

    pub fn start_time(mut self, start: DateTime<Utc>) -> Self {
        self.instance.start_time = start;
        self.instance.last_modified_time = start;
        self
    }

    pub fn build(self) -> ProcessInstance {
        self.instance
    }
}

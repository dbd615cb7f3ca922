// Storage abstraction for process instances and their satellites
// This defines the document-oriented repository interface and an in-memory backend

//! # Storage Abstraction Layer
//!
//! The storage layer follows the **Repository Pattern**:
//! - [`InstanceRepository`]: process instance documents with field-level updates
//! - [`AttachmentRepository`]: attachment content, owned by instances
//! - [`SubmissionRepository`]: immutable submission records kept for audit
//! - [`ProcessRepository`]: process definitions and their deployments
//!
//! [`InMemoryStorage`] implements all four and is what tests and the admin
//! demo run against. A database-backed implementation translates an
//! [`InstancePatch`] into its native single-document update command.
//!
//! ## Thread Safety
//!
//! Documents live in [`DashMap`]s. An update takes the write guard of one
//! entry only, so updates to different instances never wait on each other
//! and updates to the same instance are applied one at a time, each on the
//! freshest stored document. The repository is the only place that happens;
//! callers never read, modify and write back.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use super::patch::InstancePatch;
use crate::models::{
    Attachment, AttachmentId, Process, ProcessDeployment, ProcessInstance, ProcessInstanceId,
    ProcessStatus, Submission,
};
use crate::{ProcessDeskError, Result};

/// Criteria for instance queries; `None` fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceQuery {
    pub process_definition_key: Option<String>,
    pub process_status: Option<ProcessStatus>,
    pub application_status: Option<String>,
    /// Matches instances with an open task assigned to this user
    pub assignee_id: Option<String>,
    pub engine_instance_id: Option<String>,
}

impl InstanceQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process<S: Into<String>>(mut self, key: S) -> Self {
        self.process_definition_key = Some(key.into());
        self
    }

    pub fn status(mut self, status: ProcessStatus) -> Self {
        self.process_status = Some(status);
        self
    }

    pub fn application_status<S: Into<String>>(mut self, status: S) -> Self {
        self.application_status = Some(status.into());
        self
    }

    pub fn assignee<S: Into<String>>(mut self, user_id: S) -> Self {
        self.assignee_id = Some(user_id.into());
        self
    }

    pub fn engine_instance<S: Into<String>>(mut self, id: S) -> Self {
        self.engine_instance_id = Some(id.into());
        self
    }

    pub fn matches(&self, instance: &ProcessInstance) -> bool {
        self.process_definition_key
            .as_ref()
            .map_or(true, |key| &instance.process_definition_key == key)
            && self
                .process_status
                .map_or(true, |status| instance.process_status == status)
            && self.application_status.as_ref().map_or(true, |status| {
                instance.application_status.as_ref() == Some(status)
            })
            && self.assignee_id.as_ref().map_or(true, |user| {
                instance
                    .active_tasks()
                    .any(|task| task.assignee_id.as_ref() == Some(user))
            })
            && self.engine_instance_id.as_ref().map_or(true, |id| {
                instance.engine_instance_id.as_ref() == Some(id)
            })
    }
}

/// Zero-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: usize,
    pub size: usize,
}

impl PageRequest {
    pub fn first(size: usize) -> Self {
        PageRequest { page: 0, size }
    }
}

/// One page of query results
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub size: usize,
    /// Number of matches across all pages
    pub total: usize,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        (self.page + 1) * self.size < self.total
    }

    pub fn next_page(&self) -> Option<PageRequest> {
        self.has_next().then(|| PageRequest {
            page: self.page + 1,
            size: self.size,
        })
    }
}

#[async_trait]
pub trait InstanceRepository: Send + Sync {
    /// Returns `Ok(None)` when no document has that id
    async fn find_one(&self, id: &ProcessInstanceId) -> Result<Option<ProcessInstance>>;

    /// Insert a new document; fails with `Conflict` if the id is taken
    async fn save(&self, instance: ProcessInstance) -> Result<ProcessInstance>;

    /// Apply a partial-merge patch atomically to one document.
    ///
    /// Returns the merged document, or `Ok(None)` when the id is unknown.
    async fn update(
        &self,
        id: &ProcessInstanceId,
        patch: &InstancePatch,
    ) -> Result<Option<ProcessInstance>>;

    /// Query one page, ordered by start time then id
    async fn find_page(
        &self,
        query: &InstanceQuery,
        page: PageRequest,
    ) -> Result<Page<ProcessInstance>>;
}

#[async_trait]
pub trait AttachmentRepository: Send + Sync {
    async fn save_attachment(&self, attachment: Attachment) -> Result<Attachment>;
    async fn find_attachment(&self, id: &AttachmentId) -> Result<Option<Attachment>>;
}

#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    async fn save_submission(&self, submission: Submission) -> Result<Submission>;
    async fn find_submission(&self, id: &Uuid) -> Result<Option<Submission>>;
}

#[async_trait]
pub trait ProcessRepository: Send + Sync {
    async fn find_process(&self, key: &str) -> Result<Option<Process>>;
    async fn find_deployment(&self, deployment_id: &str) -> Result<Option<ProcessDeployment>>;
    async fn save_process(&self, process: Process) -> Result<Process>;
    async fn save_deployment(&self, deployment: ProcessDeployment) -> Result<ProcessDeployment>;
}

/// In-memory document store for development and testing
///
/// - **Not persistent**: data is lost when the process exits
/// - **Not distributed**: one process only
#[derive(Default)]
pub struct InMemoryStorage {
    instances: DashMap<ProcessInstanceId, ProcessInstance>,
    attachments: DashMap<AttachmentId, Attachment>,
    submissions: DashMap<Uuid, Submission>,
    processes: DashMap<String, Process>,
    deployments: DashMap<String, ProcessDeployment>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

#[async_trait]
impl InstanceRepository for InMemoryStorage {
    async fn find_one(&self, id: &ProcessInstanceId) -> Result<Option<ProcessInstance>> {
        Ok(self.instances.get(id).map(|entry| entry.value().clone()))
    }

    async fn save(&self, instance: ProcessInstance) -> Result<ProcessInstance> {
        use dashmap::mapref::entry::Entry;

        match self.instances.entry(instance.process_instance_id.clone()) {
            Entry::Occupied(_) => Err(ProcessDeskError::Conflict {
                id: instance.process_instance_id.to_string(),
                reason: "an instance with this id already exists".to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(instance.clone());
                Ok(instance)
            }
        }
    }

    async fn update(
        &self,
        id: &ProcessInstanceId,
        patch: &InstancePatch,
    ) -> Result<Option<ProcessInstance>> {
        let Some(mut entry) = self.instances.get_mut(id) else {
            return Ok(None);
        };

        // Merge on a scratch copy so a rejected patch leaves the document untouched
        let mut merged = entry.value().clone();
        let changed = patch.apply_to(&mut merged)?;
        if changed {
            *entry.value_mut() = merged.clone();
        }
        debug!(instance_id = %id, changed, version = merged.version, "applied instance patch");
        Ok(Some(merged))
    }

    async fn find_page(
        &self,
        query: &InstanceQuery,
        page: PageRequest,
    ) -> Result<Page<ProcessInstance>> {
        if page.size == 0 {
            return Err(ProcessDeskError::InvalidInput(
                "page size must be positive".to_string(),
            ));
        }

        let mut matches: Vec<ProcessInstance> = self
            .instances
            .iter()
            .filter(|entry| query.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matches.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.process_instance_id.cmp(&b.process_instance_id))
        });

        let total = matches.len();
        let items = matches
            .into_iter()
            .skip(page.page * page.size)
            .take(page.size)
            .collect();

        Ok(Page {
            items,
            page: page.page,
            size: page.size,
            total,
        })
    }
}

#[async_trait]
impl AttachmentRepository for InMemoryStorage {
    async fn save_attachment(&self, attachment: Attachment) -> Result<Attachment> {
        self.attachments
            .insert(attachment.id.clone(), attachment.clone());
        Ok(attachment)
    }

    async fn find_attachment(&self, id: &AttachmentId) -> Result<Option<Attachment>> {
        Ok(self.attachments.get(id).map(|entry| entry.value().clone()))
    }
}

#[async_trait]
impl SubmissionRepository for InMemoryStorage {
    async fn save_submission(&self, submission: Submission) -> Result<Submission> {
        // Submissions are immutable; a repeated save of the same id keeps the first copy
        self.submissions
            .entry(submission.id)
            .or_insert_with(|| submission.clone());
        Ok(submission)
    }

    async fn find_submission(&self, id: &Uuid) -> Result<Option<Submission>> {
        Ok(self.submissions.get(id).map(|entry| entry.value().clone()))
    }
}

#[async_trait]
impl ProcessRepository for InMemoryStorage {
    async fn find_process(&self, key: &str) -> Result<Option<Process>> {
        Ok(self.processes.get(key).map(|entry| entry.value().clone()))
    }

    async fn find_deployment(&self, deployment_id: &str) -> Result<Option<ProcessDeployment>> {
        Ok(self
            .deployments
            .get(deployment_id)
            .map(|entry| entry.value().clone()))
    }

    async fn save_process(&self, process: Process) -> Result<Process> {
        self.processes
            .insert(process.process_definition_key.clone(), process.clone());
        Ok(process)
    }

    async fn save_deployment(&self, deployment: ProcessDeployment) -> Result<ProcessDeployment> {
        self.deployments
            .insert(deployment.deployment_id.clone(), deployment.clone());
        Ok(deployment)
    }
}

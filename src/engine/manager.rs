// Storage manager - the single entry point request-handling code talks to

//! # Storage Manager
//!
//! Orchestrates every lifecycle write: instance creation, operations
//! (assign, claim, complete, reject, cancel, update, activation, suspension),
//! form saves and attachments, archival and attachment removal.
//!
//! Each public operation checks that the referenced process, deployment and
//! instance exist, builds one [`InstancePatch`] and issues exactly one
//! atomic update through the [`ProcessInstanceStore`]. Nothing is retried
//! here; a caller may repeat a request because merges are idempotent.
//!
//! Attachments are written before the instance and the pair is not
//! transactional. If the instance write fails the attachments stay behind as
//! orphans and a warning is logged.
//!
//! Notifications are dispatched after a successful write and never fail the
//! operation.
//!
//! With an [`EngineReconciler`] attached, CANCEL stops the engine execution
//! before the local document is marked CANCELLED.

use chrono::Utc;
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::events::NotificationService;
use super::instance_store::ProcessInstanceStore;
use super::labels::instance_label;
use super::patch::InstancePatch;
use super::reconcile::EngineReconciler;
use super::storage::{
    AttachmentRepository, InstanceRepository, ProcessRepository, SubmissionRepository,
};
use super::tasks::TaskSetManager;
use crate::config::ConcurrencyMode;
use crate::models::{
    ActionType, Attachment, AttachmentId, Entity, FieldData, LifecycleEventType, Operation,
    OperationResult, OperationType, Process, ProcessDeployment, ProcessInstance, ProcessStatus,
    Submission, Task, Validation,
};
use crate::{ProcessDeskError, Result};

pub struct StorageManager {
    processes: Arc<dyn ProcessRepository>,
    attachments: Arc<dyn AttachmentRepository>,
    submissions: Arc<dyn SubmissionRepository>,
    store: Arc<ProcessInstanceStore>,
    tasks: TaskSetManager,
    notifications: Arc<dyn NotificationService>,
    reconciler: Option<Arc<EngineReconciler>>,
    concurrency: ConcurrencyMode,
}

impl StorageManager {
    pub fn new(
        processes: Arc<dyn ProcessRepository>,
        attachments: Arc<dyn AttachmentRepository>,
        submissions: Arc<dyn SubmissionRepository>,
        store: Arc<ProcessInstanceStore>,
        notifications: Arc<dyn NotificationService>,
    ) -> Self {
        Self {
            processes,
            attachments,
            submissions,
            tasks: TaskSetManager::new(store.clone()),
            store,
            notifications,
            reconciler: None,
            concurrency: ConcurrencyMode::default(),
        }
    }

    /// Wire every repository to one backend that implements them all
    pub fn with_backend<B>(backend: Arc<B>, notifications: Arc<dyn NotificationService>) -> Self
    where
        B: InstanceRepository
            + AttachmentRepository
            + SubmissionRepository
            + ProcessRepository
            + 'static,
    {
        let store = Arc::new(ProcessInstanceStore::new(backend.clone()));
        Self::new(
            backend.clone(),
            backend.clone(),
            backend,
            store,
            notifications,
        )
    }

    pub fn with_concurrency(mut self, mode: ConcurrencyMode) -> Self {
        self.concurrency = mode;
        self
    }

    /// Propagate CANCEL to the execution engine through `reconciler`
    pub fn with_reconciler(mut self, reconciler: Arc<EngineReconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn store(&self) -> &Arc<ProcessInstanceStore> {
        &self.store
    }

    pub fn tasks(&self) -> &TaskSetManager {
        &self.tasks
    }

    pub fn concurrency(&self) -> ConcurrencyMode {
        self.concurrency
    }

    /// Create a new OPEN instance of `process` against `deployment`
    pub async fn create(
        &self,
        process: &Process,
        deployment: &ProcessDeployment,
        data: FieldData,
        attachments: Vec<Attachment>,
        submission: Option<Submission>,
        initiator: &Entity,
    ) -> Result<ProcessInstance> {
        self.require_process(&process.process_definition_key).await?;
        self.require_deployment(&deployment.deployment_id).await?;
        if deployment.process_definition_key != process.process_definition_key {
            return Err(ProcessDeskError::InvalidInput(format!(
                "deployment {} belongs to process {}, not {}",
                deployment.deployment_id,
                deployment.process_definition_key,
                process.process_definition_key
            )));
        }

        let attachment_ids = self.persist_attachments(&attachments).await?;
        let submission_id = match &submission {
            Some(submission) => Some(self.submissions.save_submission(submission.clone()).await?.id),
            None => None,
        };

        let label = instance_label(process, &data, submission.as_ref());
        let mut builder = ProcessInstance::builder(process, deployment.deployment_id.clone())
            .label(label)
            .application_status(deployment.initiation_status.clone())
            .data(data)
            .attachments(attachment_ids.clone())
            .initiator(initiator.entity_id.clone());
        if let Some(id) = submission_id {
            builder = builder.submission(id);
        }
        let instance = builder.build();

        let created = match self.store.create(instance).await {
            Ok(created) => created,
            Err(err) => {
                self.warn_orphans(&attachment_ids, &err);
                return Err(err);
            }
        };

        self.notify(Some(deployment), &created, LifecycleEventType::InstanceCreated)
            .await;
        Ok(created)
    }

    /// Record one lifecycle operation against `instance`
    pub async fn store_operation(
        &self,
        operation_type: OperationType,
        result: &OperationResult,
        instance: &ProcessInstance,
        principal: &Entity,
    ) -> Result<ProcessInstance> {
        let id = &instance.process_instance_id;
        let current = self.store.get(id).await?;

        let deployment = if operation_type == OperationType::Cancel {
            Some(self.require_deployment(&current.deployment_id).await?)
        } else {
            None
        };
        let cancellation_status = deployment
            .as_ref()
            .and_then(|deployment| deployment.cancellation_status.as_deref());

        let mut patch = status_patch(operation_type, result, &current, cancellation_status);

        if operation_type == OperationType::Cancel {
            if let Some(reconciler) = &self.reconciler {
                reconciler
                    .cancel_execution(&current, result.application_status_explanation.as_deref())
                    .await?;
            }
        }

        // ASSIGN and UPDATE leave the task set alone
        if !matches!(operation_type, OperationType::Assign | OperationType::Update) {
            patch = patch.upsert_tasks(TaskSetManager::delta(
                operation_type,
                &current.tasks,
                result.task.as_ref(),
            ));
        }

        let operation = Operation::new(
            operation_type,
            result.application_status_explanation.clone(),
            principal.entity_id.clone(),
        );
        patch = self.guard(patch.push_operation(operation), instance);

        let updated = self.store.update(id, &patch).await?;
        info!(
            instance_id = %id,
            operation = %operation_type,
            status = %updated.process_status,
            application_status = updated.application_status.as_deref().unwrap_or(""),
            user = %principal.entity_id,
            "stored operation"
        );

        self.notify(deployment.as_ref(), &updated, operation_type.into())
            .await;
        Ok(updated)
    }

    /// Store a validated form post against an existing instance.
    ///
    /// `ActionType::Attach` only adds the attachments; the posted data is
    /// not merged. In `VersionChecked` mode the write is guarded by
    /// `validation.instance_version`; a validation without one is merged
    /// last-write-wins.
    pub async fn store_validation(
        &self,
        validation: &Validation,
        action: ActionType,
    ) -> Result<ProcessInstance> {
        let id = validation.instance_id.as_ref().ok_or_else(|| {
            ProcessDeskError::InvalidInput("validation does not reference a process instance".into())
        })?;
        self.require_process(&validation.process.process_definition_key)
            .await?;
        let deployment = self
            .require_deployment(&validation.deployment.deployment_id)
            .await?;
        self.store.get(id).await?;

        let attachment_ids = self.persist_attachments(&validation.attachments).await?;
        let submission = self
            .submissions
            .save_submission(validation.submission.clone())
            .await?;

        let mut patch = InstancePatch::new()
            .add_attachments(attachment_ids.clone())
            .add_submission(submission.id);
        if action != ActionType::Attach {
            patch = patch.data(validation.data.clone());
        }
        let patch = match (self.concurrency, validation.instance_version) {
            (ConcurrencyMode::VersionChecked, Some(version)) => patch.expect_version(version),
            _ => patch,
        };

        let updated = match self.store.update(id, &patch).await {
            Ok(updated) => updated,
            Err(err) => {
                self.warn_orphans(&attachment_ids, &err);
                return Err(err);
            }
        };
        debug!(
            instance_id = %id,
            action = ?action,
            attachments = attachment_ids.len(),
            "stored validation"
        );

        self.notify(Some(&deployment), &updated, LifecycleEventType::InstanceUpdated)
            .await;
        Ok(updated)
    }

    /// Mark `instance` COMPLETE with its deployment's completion status
    pub async fn archive(
        &self,
        instance: &ProcessInstance,
        data: FieldData,
    ) -> Result<ProcessInstance> {
        let id = &instance.process_instance_id;
        let current = self.store.get(id).await?;
        let deployment = self.require_deployment(&current.deployment_id).await?;

        let closed: Vec<Task> = current.active_tasks().map(Task::deactivated).collect();
        let patch = InstancePatch::new()
            .process_status(ProcessStatus::Complete)
            .end_time(current.end_time.unwrap_or_else(Utc::now))
            .application_status(deployment.completion_status.clone())
            .data(data)
            .upsert_tasks(closed);
        let patch = self.guard(patch, instance);

        let archived = self.store.update(id, &patch).await?;
        info!(instance_id = %id, "archived process instance");

        self.notify(Some(&deployment), &archived, LifecycleEventType::InstanceArchived)
            .await;
        Ok(archived)
    }

    /// Remove one attachment reference from `instance`
    pub async fn minus_attachment(
        &self,
        instance: &ProcessInstance,
        attachment_id: &AttachmentId,
        principal: &Entity,
    ) -> Result<ProcessInstance> {
        let id = &instance.process_instance_id;
        let current = self.store.get(id).await?;
        if !current.has_attachment(attachment_id) {
            return Err(ProcessDeskError::AttachmentNotFound {
                id: attachment_id.to_string(),
            });
        }

        let patch = self.guard(
            InstancePatch::new().remove_attachment(attachment_id.clone()),
            instance,
        );
        let updated = self.store.update(id, &patch).await?;
        info!(
            instance_id = %id,
            attachment_id = %attachment_id,
            user = %principal.entity_id,
            "removed attachment"
        );

        self.notify(None, &updated, LifecycleEventType::AttachmentRemoved)
            .await;
        Ok(updated)
    }

    /// Upsert one task as reported. Returns false, touching nothing, for `None`.
    pub async fn store_task(&self, instance: &ProcessInstance, task: Option<Task>) -> Result<bool> {
        let Some(task) = task else {
            return Ok(false);
        };
        let task_id = task.task_id.clone();
        self.store
            .update(
                &instance.process_instance_id,
                &InstancePatch::new().upsert_task(task),
            )
            .await?;
        debug!(instance_id = %instance.process_instance_id, task_id = %task_id, "stored task");
        Ok(true)
    }

    async fn require_process(&self, key: &str) -> Result<Process> {
        self.processes
            .find_process(key)
            .await?
            .ok_or_else(|| ProcessDeskError::ProcessNotFound {
                key: key.to_string(),
            })
    }

    async fn require_deployment(&self, deployment_id: &str) -> Result<ProcessDeployment> {
        self.processes
            .find_deployment(deployment_id)
            .await?
            .ok_or_else(|| ProcessDeskError::DeploymentNotFound {
                id: deployment_id.to_string(),
            })
    }

    async fn persist_attachments(&self, attachments: &[Attachment]) -> Result<Vec<AttachmentId>> {
        let saved = try_join_all(
            attachments
                .iter()
                .cloned()
                .map(|attachment| self.attachments.save_attachment(attachment)),
        )
        .await?;
        Ok(saved.into_iter().map(|attachment| attachment.id).collect())
    }

    fn guard(&self, patch: InstancePatch, seen: &ProcessInstance) -> InstancePatch {
        match self.concurrency {
            ConcurrencyMode::LastWriteWins => patch,
            ConcurrencyMode::VersionChecked => patch.expect_version(seen.version),
        }
    }

    fn warn_orphans(&self, attachment_ids: &[AttachmentId], err: &ProcessDeskError) {
        if attachment_ids.is_empty() {
            return;
        }
        let ids: Vec<&str> = attachment_ids.iter().map(AttachmentId::as_str).collect();
        warn!(
            attachments = ?ids,
            error = %err,
            "instance write failed after attachments were stored; attachments are orphaned"
        );
    }

    async fn notify(
        &self,
        deployment: Option<&ProcessDeployment>,
        instance: &ProcessInstance,
        event: LifecycleEventType,
    ) {
        let looked_up;
        let deployment = match deployment {
            Some(deployment) => deployment,
            None => match self.processes.find_deployment(&instance.deployment_id).await {
                Ok(Some(found)) => {
                    looked_up = found;
                    &looked_up
                }
                Ok(None) => {
                    debug!(deployment_id = %instance.deployment_id, "no deployment, skipping notifications");
                    return;
                }
                Err(err) => {
                    warn!(deployment_id = %instance.deployment_id, error = %err, "could not load notifications");
                    return;
                }
            },
        };

        let matching: Vec<_> = deployment
            .notifications
            .iter()
            .filter(|notification| notification.trigger == event)
            .collect();
        if matching.is_empty() {
            return;
        }

        let context = notification_context(instance);
        for notification in matching {
            if !self.notifications.send(notification, &context, event).await {
                debug!(
                    instance_id = %instance.process_instance_id,
                    notification = %notification.name,
                    "notification not delivered"
                );
            }
        }
    }
}

/// Status fields implied by `operation_type`, as a patch
fn status_patch(
    operation_type: OperationType,
    result: &OperationResult,
    current: &ProcessInstance,
    cancellation_status: Option<&str>,
) -> InstancePatch {
    let patch = InstancePatch::new()
        .application_status_explanation(result.application_status_explanation.clone());

    match operation_type {
        OperationType::Suspension => patch
            .process_status(ProcessStatus::Suspended)
            .previous_application_status(current.application_status.clone())
            .application_status(result.application_status.clone()),
        OperationType::Activation => patch
            .process_status(ProcessStatus::Open)
            .application_status(
                result
                    .application_status
                    .clone()
                    .or_else(|| current.previous_application_status.clone()),
            ),
        OperationType::Cancel => patch
            .process_status(ProcessStatus::Cancelled)
            .end_time(current.end_time.unwrap_or_else(Utc::now))
            .application_status(
                result
                    .application_status
                    .clone()
                    .or_else(|| cancellation_status.map(str::to_string)),
            ),
        _ => patch.application_status(result.application_status.clone()),
    }
}

fn notification_context(instance: &ProcessInstance) -> HashMap<String, String> {
    let mut context = HashMap::from([
        (
            "process_instance_id".to_string(),
            instance.process_instance_id.to_string(),
        ),
        (
            "process_instance_label".to_string(),
            instance.process_instance_label.clone(),
        ),
        (
            "process_definition_key".to_string(),
            instance.process_definition_key.clone(),
        ),
        (
            "process_status".to_string(),
            instance.process_status.to_string(),
        ),
    ]);
    if let Some(status) = &instance.application_status {
        context.insert("application_status".to_string(), status.clone());
    }
    if let Some(initiator) = &instance.initiator_id {
        context.insert("initiator_id".to_string(), initiator.clone());
    }
    context
}

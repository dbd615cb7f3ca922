// Task set manager - derives task deltas for lifecycle operations

//! # Task Set Manager
//!
//! Turns an [`OperationType`] plus the task the engine reported into the list
//! of task upserts that belong in an instance patch. All writes go through
//! [`ProcessInstanceStore::update`]; this module never touches a repository.
//!
//! The engine is authoritative for assignment: when it reports a task whose
//! assignee differs from the local copy, the engine's assignee is kept.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use super::instance_store::ProcessInstanceStore;
use super::patch::InstancePatch;
use crate::models::{OperationType, ProcessInstance, ProcessInstanceId, Task, TaskSet};
use crate::Result;

pub struct TaskSetManager {
    store: Arc<ProcessInstanceStore>,
}

impl TaskSetManager {
    pub fn new(store: Arc<ProcessInstanceStore>) -> Self {
        Self { store }
    }

    /// Task upserts implied by `operation` against the current `tasks`.
    ///
    /// Instance-level operations (CANCEL, ACTIVATION, SUSPENSION) yield no
    /// delta, and neither does a task operation without a reported task.
    pub fn delta(operation: OperationType, tasks: &TaskSet, reported: Option<&Task>) -> Vec<Task> {
        let Some(reported) = reported else {
            return Vec::new();
        };
        let local = tasks.get(&reported.task_id);

        match operation {
            OperationType::Assign | OperationType::Claim => {
                let base = local.unwrap_or(reported);
                let mut task = base.assigned_to(reported.assignee_id.clone());
                task.active = true;
                vec![task]
            }
            OperationType::Complete | OperationType::Reject => {
                let base = match local {
                    Some(task) => {
                        let assignee = reported
                            .assignee_id
                            .clone()
                            .or_else(|| task.assignee_id.clone());
                        task.assigned_to(assignee)
                    }
                    None => reported.clone(),
                };
                vec![base.completed_at(Utc::now())]
            }
            OperationType::Update => vec![reported.clone()],
            OperationType::Cancel | OperationType::Activation | OperationType::Suspension => {
                Vec::new()
            }
        }
    }

    /// Apply the delta for `operation` to the stored instance
    pub async fn apply(
        &self,
        id: &ProcessInstanceId,
        operation: OperationType,
        task: Option<&Task>,
    ) -> Result<ProcessInstance> {
        let current = self.store.get(id).await?;
        let delta = Self::delta(operation, &current.tasks, task);
        if delta.is_empty() {
            debug!(instance_id = %id, operation = %operation, "no task change");
            return Ok(current);
        }

        let patch = InstancePatch::new().upsert_tasks(delta);
        let updated = self.store.update(id, &patch).await?;
        info!(
            instance_id = %id,
            operation = %operation,
            active_tasks = updated.tasks.active().count(),
            "applied task change"
        );
        Ok(updated)
    }
}

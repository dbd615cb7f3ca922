// Human tasks and the per-instance task set

//! # Task Models
//!
//! A [`Task`] is one human work item inside a process instance. Tasks are
//! created when the execution engine reports a new user task, updated when
//! they are assigned, claimed or completed, and kept in the instance's
//! [`TaskSet`] after completion so history queries still see them.
//!
//! Tasks are value objects: they are built once through [`Task::builder`] and
//! every later change produces a new value that replaces the old entry in the
//! set by `task_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::state::TaskId;

/// One human work item owned by a single process instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Engine-assigned identity
    pub task_id: TaskId,

    /// Which user-task node of the process definition this task instantiates
    pub task_definition_key: String,

    /// Human readable label shown in task lists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_label: Option<String>,

    /// Current assignee, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,

    /// Users allowed to claim this task
    #[serde(default)]
    pub candidate_assignee_ids: BTreeSet<String>,

    /// Whether the task is still open for work
    pub active: bool,

    /// Whether the task was completed (or rejected)
    pub complete: bool,

    pub priority: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,

    pub start_time: DateTime<Utc>,

    /// Stamped when the task was completed or rejected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl Task {
    /// Start building an active, unassigned task
    pub fn builder<I: Into<TaskId>, K: Into<String>>(task_id: I, definition_key: K) -> TaskBuilder {
        TaskBuilder {
            task: Task {
                task_id: task_id.into(),
                task_definition_key: definition_key.into(),
                task_label: None,
                assignee_id: None,
                candidate_assignee_ids: BTreeSet::new(),
                active: true,
                complete: false,
                priority: 0,
                due_date: None,
                start_time: Utc::now(),
                end_time: None,
            },
        }
    }

    /// Active tasks show up in work queues; completed ones only in history
    pub fn is_open(&self) -> bool {
        self.active && !self.complete
    }

    /// Copy of this task assigned to someone else (or unassigned)
    pub fn assigned_to(&self, assignee_id: Option<String>) -> Task {
        Task {
            assignee_id,
            ..self.clone()
        }
    }

    /// Copy of this task marked finished
    pub fn completed_at(&self, when: DateTime<Utc>) -> Task {
        Task {
            active: false,
            complete: true,
            end_time: Some(when),
            ..self.clone()
        }
    }

    /// Copy of this task taken out of work queues without being completed
    pub fn deactivated(&self) -> Task {
        Task {
            active: false,
            ..self.clone()
        }
    }
}

/// Fluent builder for [`Task`]
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn label<S: Into<String>>(mut self, label: S) -> Self {
        self.task.task_label = Some(label.into());
        self
    }

    pub fn assignee<S: Into<String>>(mut self, assignee_id: S) -> Self {
        self.task.assignee_id = Some(assignee_id.into());
        self
    }

    pub fn candidate<S: Into<String>>(mut self, user_id: S) -> Self {
        self.task.candidate_assignee_ids.insert(user_id.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn due_date(mut self, due: DateTime<Utc>) -> Self {
        self.task.due_date = Some(due);
        self
    }

    pub fn start_time(mut self, start: DateTime<Utc>) -> Self {
        self.task.start_time = start;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

/// The tasks of one process instance, keyed by `task_id`
///
/// Completed tasks stay in the set; use [`TaskSet::active`] for work queues.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskSet(BTreeMap<TaskId, Task>);

impl TaskSet {
    pub fn new() -> Self {
        TaskSet(BTreeMap::new())
    }

    pub fn get(&self, task_id: &TaskId) -> Option<&Task> {
        self.0.get(task_id)
    }

    /// Replace the entry with the same `task_id`, or add it
    pub fn upsert(&mut self, task: Task) {
        self.0.insert(task.task_id.clone(), task);
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.0.contains_key(task_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.0.values()
    }

    /// Tasks still open for work
    pub fn active(&self) -> impl Iterator<Item = &Task> {
        self.0.values().filter(|task| task.is_open())
    }

    pub fn has_open_tasks(&self) -> bool {
        self.active().next().is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Task> for TaskSet {
    fn from_iter<T: IntoIterator<Item = Task>>(iter: T) -> Self {
        let mut set = TaskSet::new();
        for task in iter {
            set.upsert(task);
        }
        set
    }
}

// Process definitions, deployments and acting principals

//! # Process Models
//!
//! A [`Process`] is the business-level definition users start instances of.
//! Each process points at its current [`ProcessDeployment`], the versioned
//! configuration that binds the process to an engine definition and carries
//! the status strings applied on initiation, completion and cancellation.
//!
//! [`Entity`] is the acting principal (a user or the system itself) passed in
//! by the request layer.

use serde::{Deserialize, Serialize};

use super::notification::Notification;

/// Business-level process definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub process_definition_key: String,
    pub process_definition_label: String,

    /// Label template with `{{field}}` placeholders, e.g. `"Expense {{amount}}"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_label_template: Option<String>,

    /// Deployment new instances are started against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
}

impl Process {
    pub fn new<K: Into<String>, L: Into<String>>(key: K, label: L) -> Self {
        Process {
            process_definition_key: key.into(),
            process_definition_label: label.into(),
            instance_label_template: None,
            deployment_id: None,
        }
    }

    pub fn with_label_template<S: Into<String>>(mut self, template: S) -> Self {
        self.instance_label_template = Some(template.into());
        self
    }

    pub fn with_deployment<S: Into<String>>(mut self, deployment_id: S) -> Self {
        self.deployment_id = Some(deployment_id.into());
        self
    }
}

/// Versioned deployment configuration of a process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDeployment {
    pub deployment_id: String,
    pub process_definition_key: String,

    /// Definition key understood by the execution engine
    pub engine_process_definition_key: String,

    /// Application status set when an instance is created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiation_status: Option<String>,

    /// Application status set when an instance is archived
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_status: Option<String>,

    /// Application status used when a cancellation carries none of its own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_status: Option<String>,

    #[serde(default)]
    pub notifications: Vec<Notification>,
}

impl ProcessDeployment {
    pub fn new<I: Into<String>, K: Into<String>, E: Into<String>>(
        deployment_id: I,
        process_definition_key: K,
        engine_process_definition_key: E,
    ) -> Self {
        ProcessDeployment {
            deployment_id: deployment_id.into(),
            process_definition_key: process_definition_key.into(),
            engine_process_definition_key: engine_process_definition_key.into(),
            initiation_status: None,
            completion_status: None,
            cancellation_status: None,
            notifications: Vec::new(),
        }
    }

    pub fn with_initiation_status<S: Into<String>>(mut self, status: S) -> Self {
        self.initiation_status = Some(status.into());
        self
    }

    pub fn with_completion_status<S: Into<String>>(mut self, status: S) -> Self {
        self.completion_status = Some(status.into());
        self
    }

    pub fn with_cancellation_status<S: Into<String>>(mut self, status: S) -> Self {
        self.cancellation_status = Some(status.into());
        self
    }

    pub fn with_notification(mut self, notification: Notification) -> Self {
        self.notifications.push(notification);
        self
    }
}

/// Kind of acting principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    System,
}

/// The principal on whose behalf a request runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub kind: EntityKind,
}

impl Entity {
    pub fn user<S: Into<String>>(id: S) -> Self {
        Entity {
            entity_id: id.into(),
            display_name: None,
            kind: EntityKind::User,
        }
    }

    pub fn with_display_name<S: Into<String>>(mut self, name: S) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

// Notification dispatch for lifecycle events

//! # Event System
//!
//! The storage manager hands every configured [`Notification`] whose trigger
//! matches a lifecycle event to a [`NotificationService`]. Delivery is
//! fire-and-forget from the manager's side: `send` reports success as a
//! boolean and never returns an error.
//!
//! [`EventBus`] is the in-process implementation. It publishes
//! [`NotificationEvent`]s on a tokio broadcast channel so a mailer, an audit
//! sink or a test can subscribe.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::Notification;

pub use crate::models::LifecycleEventType;

/// One notification ready for rendering and delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub notification: Notification,
    pub context: HashMap<String, String>,
    pub event_type: LifecycleEventType,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Hand off one notification. Returns whether it was accepted.
    async fn send(
        &self,
        notification: &Notification,
        context: &HashMap<String, String>,
        event_type: LifecycleEventType,
    ) -> bool;
}

/// Broadcast-backed notification service
pub struct EventBus {
    sender: broadcast::Sender<NotificationEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `buffer` undelivered events per subscriber
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

#[async_trait]
impl NotificationService for EventBus {
    async fn send(
        &self,
        notification: &Notification,
        context: &HashMap<String, String>,
        event_type: LifecycleEventType,
    ) -> bool {
        let event = NotificationEvent {
            notification: notification.clone(),
            context: context.clone(),
            event_type,
            timestamp: Utc::now(),
        };

        match self.sender.send(event) {
            Ok(receivers) => {
                debug!(notification = %notification.name, receivers, "notification published");
                true
            }
            Err(_) => {
                debug!(notification = %notification.name, "no notification subscribers");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification() -> Notification {
        Notification::new("task-done", LifecycleEventType::TaskCompleted)
            .to("manager@example.com")
            .with_subject("{{label}} completed")
    }

    #[tokio::test]
    async fn test_send_without_subscribers_reports_false() {
        let bus = EventBus::new(8);
        let sent = bus
            .send(&notification(), &HashMap::new(), LifecycleEventType::TaskCompleted)
            .await;
        assert!(!sent);
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let context = HashMap::from([("label".to_string(), "Expense 100".to_string())]);

        assert!(
            bus.send(&notification(), &context, LifecycleEventType::TaskCompleted)
                .await
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, LifecycleEventType::TaskCompleted);
        assert_eq!(event.context["label"], "Expense 100");
        assert_eq!(event.notification.recipients, vec!["manager@example.com"]);
    }
}

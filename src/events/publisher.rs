use crate::state_machine::events::WorkflowEvent;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Broadcast publisher for inspection lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    /// `inspection.<event>` or `workflow.<event>`
    pub name: String,
    pub event: WorkflowEvent,
    pub subject_id: Uuid,
    pub tenant_id: String,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a lifecycle event for `subject_id`
    pub fn publish(
        &self,
        event: WorkflowEvent,
        subject_id: Uuid,
        tenant_id: &str,
        context: Value,
    ) -> Result<(), PublishError> {
        let published = PublishedEvent {
            name: event.published_name(),
            event,
            subject_id,
            tenant_id: tenant_id.to_string(),
            context,
            published_at: chrono::Utc::now(),
        };

        // No subscribers is fine; events are informational
        match self.sender.send(published) {
            Ok(_) | Err(broadcast::error::SendError(_)) => Ok(()),
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Error types for event publishing
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Event channel is closed")]
    ChannelClosed,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}

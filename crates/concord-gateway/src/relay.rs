use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use concord_store::{MessageBus, Payload};
use concord_types::events::InboundFrame;
use concord_types::models::{ChatMessage, UserProfile};

use crate::registry::{ConnectionRegistry, channel_topic};
use crate::store::MessageStore;

/// Per-message failures. None of these close the socket.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),

    #[error("failed to persist message: {0:#}")]
    Persist(anyhow::Error),

    /// The message is durable but never reached the bus. Clients recover it
    /// from channel history.
    #[error("message {id} stored but not published: {error:#}")]
    Publish { id: i64, error: anyhow::Error },
}

/// Persists inbound chat frames and publishes them to the channel's topic.
/// Delivery to sockets happens only through the bus, so a message reaches
/// every process's dispatch task the same way, this one included.
#[derive(Clone)]
pub struct Relay {
    registry: ConnectionRegistry,
    bus: Arc<dyn MessageBus>,
    messages: Arc<dyn MessageStore>,
    shutdown: CancellationToken,
}

impl Relay {
    pub fn new(bus: Arc<dyn MessageBus>, messages: Arc<dyn MessageStore>, shutdown: CancellationToken) -> Self {
        Self {
            registry: ConnectionRegistry::new(bus.clone()),
            bus,
            messages,
            shutdown,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Cancelled when the server shuts down; every socket loop exits on it.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Handles one inbound text frame from `author` on `channel_id`.
    ///
    /// Returns `Ok(None)` for empty content, which is neither stored nor
    /// broadcast.
    pub async fn handle_frame(
        &self,
        author: &UserProfile,
        channel_id: i64,
        raw: &str,
    ) -> Result<Option<ChatMessage>, RelayError> {
        let frame: InboundFrame = serde_json::from_str(raw)?;
        if frame.content.is_empty() {
            return Ok(None);
        }

        let message = self
            .messages
            .append(channel_id, author, &frame.content)
            .await
            .map_err(RelayError::Persist)?;

        self.publish(&message)
            .await
            .map_err(|error| RelayError::Publish { id: message.id, error })?;

        Ok(Some(message))
    }

    /// Serializes `message` onto its channel's topic.
    pub async fn publish(&self, message: &ChatMessage) -> anyhow::Result<usize> {
        let payload: Payload = serde_json::to_string(message)?.into();
        self.bus.publish(&channel_topic(message.channel_id), payload).await
    }
}

use serde::{Deserialize, Serialize};

/// Frame sent FROM client TO server over a channel socket.
///
/// A missing `content` field decodes to an empty string, which the relay
/// treats as a no-op.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundFrame {
    #[serde(default)]
    pub content: String,
}

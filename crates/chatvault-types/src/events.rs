use serde::{Deserialize, Serialize};

use crate::models::{Payload, RecordPatch};

/// Changes pushed into the local cache by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum SyncEvent {
    /// A new message arrived for a conversation
    MessageReceived {
        conversation_id: String,
        payload: Payload,
    },

    /// Delivery/read receipt or edit for a cached message
    MessageUpdated { id: i64, patch: RecordPatch },

    /// A message was deleted remotely
    MessageDeleted { id: i64 },

    /// Every message in a conversation was removed remotely
    ConversationCleared { conversation_id: String },

    /// Drop the whole local cache (logout, account switch)
    Reset,
}

impl SyncEvent {
    /// Returns the conversation this event is scoped to, if it names one.
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Self::MessageReceived {
                conversation_id, ..
            }
            | Self::ConversationCleared { conversation_id } => Some(conversation_id.as_str()),
            _ => None,
        }
    }
}

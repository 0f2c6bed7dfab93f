use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::moderation::ModerationStatus;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, full_name: String },

    /// Authoritative unread total, always read from the messages table
    UnreadCount { total: i64 },

    /// A message addressed to this user
    MessageCreate {
        id: Uuid,
        conversation_id: Uuid,
        sender_id: Uuid,
        sender_name: String,
        content: String,
        attachments: Vec<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The other participant read the conversation
    MessagesRead { conversation_id: Uuid, reader_id: Uuid },

    /// The other participant is typing
    TypingStart { conversation_id: Uuid, user_id: Uuid },

    /// One of this user's ads was approved or rejected
    AdModerated {
        ad_id: Uuid,
        moderation_status: ModerationStatus,
        notes: Option<String>,
    },

    /// A listing just went public (delivered to everyone)
    AdPublished {
        ad_id: Uuid,
        title: String,
        category: String,
        location: String,
    },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Indicate typing in a conversation
    StartTyping { conversation_id: Uuid },

    /// Mark every message received in a conversation as read
    MarkRead { conversation_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_use_adjacent_tagging() {
        let json = serde_json::to_value(GatewayEvent::UnreadCount { total: 3 }).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "UnreadCount", "data": { "total": 3 } }));
    }

    #[test]
    fn identify_command_parses() {
        let cmd: GatewayCommand =
            serde_json::from_str(r#"{"type":"Identify","data":{"token":"abc"}}"#).unwrap();
        assert!(matches!(cmd, GatewayCommand::Identify { token } if token == "abc"));
    }
}

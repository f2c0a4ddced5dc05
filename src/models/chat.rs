// src/models/chat.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Represents the 'chat_messages' table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ChatMessage {
    pub id: i64,
    pub course_id: i64,
    pub user_id: i64,
    pub username: String,
    pub body: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Query parameters for paging back through room history.
#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    /// Only messages with an id lower than this.
    pub before: Option<i64>,
    pub limit: Option<i64>,
}

/// Frames sent by clients over the room socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Message { body: String },
    Typing,
}

/// Events fanned out to every socket in a room.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    Message(ChatMessage),
    Join {
        course_id: i64,
        user_id: i64,
        username: String,
    },
    Leave {
        course_id: i64,
        user_id: i64,
        username: String,
    },
    Typing {
        course_id: i64,
        user_id: i64,
        username: String,
    },
    Error {
        message: String,
    },
}

impl RoomEvent {
    /// User that caused the event, if any.
    pub fn origin(&self) -> Option<i64> {
        match self {
            RoomEvent::Message(msg) => Some(msg.user_id),
            RoomEvent::Join { user_id, .. }
            | RoomEvent::Leave { user_id, .. }
            | RoomEvent::Typing { user_id, .. } => Some(*user_id),
            RoomEvent::Error { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_frames() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"message","body":"hello"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Message { ref body } if body == "hello"));

        let frame: ClientFrame = serde_json::from_str(r#"{"type":"typing"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Typing));

        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"shout"}"#).is_err());
    }

    #[test]
    fn events_are_tagged() {
        let event = RoomEvent::Join {
            course_id: 3,
            user_id: 9,
            username: "ferris".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "join");
        assert_eq!(value["course_id"], 3);
        assert_eq!(event.origin(), Some(9));

        let message = RoomEvent::Message(ChatMessage {
            id: 1,
            course_id: 3,
            user_id: 9,
            username: "ferris".to_string(),
            body: "hi".to_string(),
            created_at: chrono::Utc::now(),
        });
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["body"], "hi");
    }
}

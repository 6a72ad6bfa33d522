use serde::{Deserialize, Serialize};

use crate::room::models::{ChatMessage, Member, RoomSnapshot};
use crate::room::registry::ExtendMode;

/// Event names for WebSocket communication
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    // Client -> Server
    JoinRoom,
    SendMessage,
    SendImage,
    ExtendTime,
    LeaveRoom,

    // Server -> Client
    RoomJoined,
    JoinError,
    RoomExpired,
    UserJoined,
    UserLeft,
    NewMessage,
    TimeExtended,
    ExtensionError,
    MessageError,
    LeftRoom,
}

/// Envelope for every frame on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub event: EventType,
    pub payload: serde_json::Value,
}

/// Client-to-Server payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomPayload {
    pub room_key: String,
    pub image: String,
    pub selected_duration: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessagePayload {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendImagePayload {
    pub image_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendTimePayload {
    pub mode: ExtendMode,
}

/// Server-to-Client payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomJoinedPayload {
    pub success: bool,
    pub room: RoomSnapshot,
    pub user: Member,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomExpiredPayload {
    pub message: String,
    pub room_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterChangePayload {
    pub user: Member,
    pub total_users: usize,
    pub user_list: Vec<Member>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeExtendedPayload {
    pub mode: ExtendMode,
    pub new_duration: i64,
    pub extensions: u32,
    pub by: String,
    pub remaining_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeftRoomPayload {
    pub success: bool,
}

/// Helper functions for creating outbound frames
impl WireMessage {
    pub fn new(event: EventType, payload: serde_json::Value) -> Self {
        Self { event, payload }
    }

    /// Serialized form ready for the transport.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Create a `room-joined` frame carrying the full snapshot.
    pub fn room_joined(room: RoomSnapshot, user: Member) -> Self {
        let payload = RoomJoinedPayload {
            success: true,
            room,
            user,
        };
        Self::new(
            EventType::RoomJoined,
            serde_json::to_value(payload).unwrap(),
        )
    }

    /// Create a `join-error` frame.
    pub fn join_error(message: String) -> Self {
        let payload = ErrorPayload { message };
        Self::new(EventType::JoinError, serde_json::to_value(payload).unwrap())
    }

    /// Create a `room-expired` frame.
    pub fn room_expired(room_key: String, message: String) -> Self {
        let payload = RoomExpiredPayload { message, room_key };
        Self::new(
            EventType::RoomExpired,
            serde_json::to_value(payload).unwrap(),
        )
    }

    /// Create a `user-joined` roster update.
    pub fn user_joined(user: Member, total_users: usize, user_list: Vec<Member>) -> Self {
        let payload = RosterChangePayload {
            user,
            total_users,
            user_list,
        };
        Self::new(
            EventType::UserJoined,
            serde_json::to_value(payload).unwrap(),
        )
    }

    /// Create a `user-left` roster update.
    pub fn user_left(user: Member, total_users: usize, user_list: Vec<Member>) -> Self {
        let payload = RosterChangePayload {
            user,
            total_users,
            user_list,
        };
        Self::new(EventType::UserLeft, serde_json::to_value(payload).unwrap())
    }

    /// Create a `new-message` frame; the payload is the message itself.
    pub fn new_message(message: ChatMessage) -> Self {
        Self::new(
            EventType::NewMessage,
            serde_json::to_value(message).unwrap(),
        )
    }

    /// Create a `time-extended` notification.
    pub fn time_extended(
        mode: ExtendMode,
        new_duration: i64,
        extensions: u32,
        by: String,
        remaining_time: i64,
    ) -> Self {
        let payload = TimeExtendedPayload {
            mode,
            new_duration,
            extensions,
            by,
            remaining_time,
        };
        Self::new(
            EventType::TimeExtended,
            serde_json::to_value(payload).unwrap(),
        )
    }

    /// Create an `extension-error` frame.
    pub fn extension_error(message: String) -> Self {
        let payload = ErrorPayload { message };
        Self::new(
            EventType::ExtensionError,
            serde_json::to_value(payload).unwrap(),
        )
    }

    /// Create a `message-error` frame.
    pub fn message_error(message: String) -> Self {
        let payload = ErrorPayload { message };
        Self::new(
            EventType::MessageError,
            serde_json::to_value(payload).unwrap(),
        )
    }

    /// Create a `left-room` acknowledgement.
    pub fn left_room() -> Self {
        let payload = LeftRoomPayload { success: true };
        Self::new(EventType::LeftRoom, serde_json::to_value(payload).unwrap())
    }
}

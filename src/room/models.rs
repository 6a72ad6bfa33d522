use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hard cap on stored messages per room.
pub const HISTORY_HARD_CAP: usize = 500;

/// How many of the newest messages survive a trim. Trimming in batches
/// avoids shifting the history on every single append once the cap is hit.
pub const HISTORY_TRIM_TO: usize = 400;

/// Maximum characters in a text message after trimming.
pub const MAX_TEXT_CHARS: usize = 1000;

/// Maximum estimated decoded image size (5 MiB).
pub const MAX_IMAGE_BYTES: u64 = 5 * 1024 * 1024;

/// Budget added by an `add`-mode time extension.
pub const EXTENSION_STEP_MS: i64 = 5 * 60 * 1000;

const ORDINALS: [&str; 10] = [
    "One", "Two", "Three", "Four", "Five", "Six", "Seven", "Eight", "Nine", "Ten",
];

/// Display name for the n-th member to ever join a room (1-based).
/// The first ten get ordinal words, the rest a numeric fallback.
pub fn display_name(seq: u32) -> String {
    if (1..=10).contains(&seq) {
        format!("User {}", ORDINALS[(seq - 1) as usize])
    } else {
        format!("User #{}", seq)
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    System,
    User,
}

/// Message payload, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageBody {
    Text {
        text: String,
    },
    Image {
        #[serde(rename = "imageUrl")]
        image_url: String,
    },
}

/// A single chat message as stored in room history and broadcast to members.
///
/// `id` is the append timestamp in epoch millis; `seq` is a per-room counter
/// so that two messages landing in the same millisecond still order totally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub sender: Sender,
    #[serde(flatten)]
    pub body: MessageBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl ChatMessage {
    /// Text content, if this is a text message.
    pub fn text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text { text } => Some(text),
            MessageBody::Image { .. } => None,
        }
    }
}

/// A connection's participation record within a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    /// Connection id minted by the transport layer.
    pub id: String,
    /// Server-assigned display name, never reused within the room.
    pub username: String,
    pub join_time: i64,
    /// Payload the member submitted at join, echoed back to others.
    pub image: String,
    /// Join order, used to keep display rosters stable.
    pub seq: u32,
}

/// Full room state handed to a freshly joined member.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub key: String,
    pub image: String,
    pub messages: Vec<ChatMessage>,
    pub users: Vec<Member>,
    pub start_time: i64,
    pub duration: i64,
    pub extensions: u32,
    pub user_count: usize,
}

/// A time-boxed chat room. Owned exclusively by the registry.
#[derive(Debug, Clone)]
pub struct Room {
    pub key: String,
    /// Reference payload fixed at creation.
    pub image: String,
    pub members: HashMap<String, Member>,
    pub history: Vec<ChatMessage>,
    /// Creation time in epoch millis.
    pub start_time: i64,
    /// Total lifetime budget; grows via extensions.
    pub duration_ms: i64,
    pub extensions: u32,
    member_seq: u32,
    message_seq: u64,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn new(key: &str, image: &str, duration_minutes: i64, now_ms: i64) -> Self {
        Self {
            key: key.to_string(),
            image: image.to_string(),
            members: HashMap::new(),
            history: Vec::new(),
            start_time: now_ms,
            duration_ms: duration_minutes * 60_000,
            extensions: 0,
            member_seq: 0,
            message_seq: 0,
            created_at: DateTime::from_timestamp_millis(now_ms).unwrap_or_else(Utc::now),
        }
    }

    /// A room is joinable while its elapsed time is under budget.
    /// Derived on every check; expiry is never stored.
    pub fn is_valid(&self, now_ms: i64) -> bool {
        now_ms - self.start_time < self.duration_ms
    }

    /// Remaining budget in millis; negative once expired.
    pub fn remaining_ms(&self, now_ms: i64) -> i64 {
        self.duration_ms - (now_ms - self.start_time)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Members in join order, for display lists.
    pub fn roster(&self) -> Vec<Member> {
        let mut users: Vec<Member> = self.members.values().cloned().collect();
        users.sort_by_key(|m| m.seq);
        users
    }

    /// Connection ids of every current member.
    pub fn member_ids(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    /// Admits a connection, assigning the next display name in sequence.
    /// Sequence numbers are never reused within the room, even after leaves.
    pub fn admit(&mut self, connection_id: &str, image: &str, now_ms: i64) -> Member {
        self.member_seq += 1;
        let member = Member {
            id: connection_id.to_string(),
            username: display_name(self.member_seq),
            join_time: now_ms,
            image: image.to_string(),
            seq: self.member_seq,
        };
        self.members.insert(connection_id.to_string(), member.clone());
        member
    }

    /// Appends a message and applies the bounded-retention invariant:
    /// history never exceeds the hard cap, and crossing it trims down to
    /// the newest `HISTORY_TRIM_TO` entries in one batch.
    pub fn push_message(
        &mut self,
        sender: Sender,
        body: MessageBody,
        author: Option<&Member>,
        now_ms: i64,
    ) -> ChatMessage {
        let message = ChatMessage {
            id: now_ms,
            seq: self.message_seq,
            timestamp: DateTime::from_timestamp_millis(now_ms).unwrap_or_else(Utc::now),
            sender,
            body,
            username: author.map(|m| m.username.clone()),
            user_id: author.map(|m| m.id.clone()),
        };
        self.message_seq += 1;
        self.history.push(message.clone());
        if self.history.len() > HISTORY_HARD_CAP {
            let cut = self.history.len() - HISTORY_TRIM_TO;
            self.history.drain(..cut);
        }
        message
    }

    /// Appends a system announcement (join/leave/extension notices).
    pub fn push_system_text(&mut self, text: String, now_ms: i64) -> ChatMessage {
        self.push_message(Sender::System, MessageBody::Text { text }, None, now_ms)
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            key: self.key.clone(),
            image: self.image.clone(),
            messages: self.history.clone(),
            users: self.roster(),
            start_time: self.start_time,
            duration: self.duration_ms,
            extensions: self.extensions,
            user_count: self.members.len(),
        }
    }
}

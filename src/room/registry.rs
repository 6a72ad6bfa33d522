use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

use super::models::{
    ChatMessage, Member, MessageBody, Room, RoomSnapshot, Sender, EXTENSION_STEP_MS,
    MAX_IMAGE_BYTES, MAX_TEXT_CHARS,
};
use crate::shared::RelayError;

/// How a member asks for more time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtendMode {
    /// Unconditionally add five minutes.
    Add,
    /// Double the time left from now; rejected once the budget has lapsed.
    Double,
}

/// Result of checking a room key against the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomValidity {
    Valid,
    Expired,
    NotFound,
}

/// Everything the transport needs to announce a successful join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// Room state strictly after the member's own insertion.
    pub snapshot: RoomSnapshot,
    pub member: Member,
    pub join_message: ChatMessage,
    pub roster: Vec<Member>,
    pub total_users: usize,
    /// Members that were already present (excludes the joiner).
    pub others: Vec<String>,
    /// Every current member including the joiner.
    pub everyone: Vec<String>,
}

/// Result of removing a member; `None` at the call site means the
/// connection was not tracked (leave is idempotent).
#[derive(Debug, Clone)]
pub struct LeaveOutcome {
    pub room_key: String,
    pub member: Member,
    pub leave_message: ChatMessage,
    pub roster: Vec<Member>,
    pub total_users: usize,
    /// Members still present after the removal.
    pub remaining: Vec<String>,
    pub room_now_empty: bool,
}

/// A message appended to history together with its fan-out targets.
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub message: ChatMessage,
    pub recipients: Vec<String>,
}

/// Result of a successful time extension.
#[derive(Debug, Clone)]
pub struct ExtendOutcome {
    pub mode: ExtendMode,
    pub system_message: ChatMessage,
    pub new_duration: i64,
    pub extensions: u32,
    pub actor: String,
    pub remaining_ms: i64,
    pub recipients: Vec<String>,
}

/// One active room row in the stats projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomOverview {
    pub key: String,
    pub users: usize,
    pub messages: usize,
    /// Accumulated duration budget in whole minutes.
    pub duration: i64,
    pub extensions: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Remaining budget in millis, clamped at zero for display.
    pub time_remaining: i64,
}

/// Read-only projection of registry state.
#[derive(Debug, Clone)]
pub struct RegistryStats {
    pub active_rooms: usize,
    pub active_users: usize,
    pub rooms_created: u64,
    pub connected_users: i64,
    pub rooms: Vec<RoomOverview>,
}

struct RegistryInner {
    rooms: HashMap<String, Room>,
    /// connection id -> room key, for O(1) reverse lookup on disconnect.
    /// Never the source of truth for membership; rooms own their members.
    memberships: HashMap<String, String>,
    rooms_created: u64,
    connected_users: i64,
}

/// Process-wide room state. All lifecycle and relay mutations go through
/// here; each public method takes the lock once for its full
/// read-modify-write, so operations are atomic with respect to each other.
///
/// Methods take `now_ms` instead of reading the clock so expiry math is
/// deterministic under test.
pub struct RoomRegistry {
    inner: Mutex<RegistryInner>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                rooms: HashMap::new(),
                memberships: HashMap::new(),
                rooms_created: 0,
                connected_users: 0,
            }),
        }
    }

    /// Bumps the connected-user gauge; called once per accepted connection.
    pub fn connection_opened(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.connected_users += 1;
    }

    /// Resolves or creates the room, checks expiry, and admits the
    /// connection. Creation is idempotent for a present key; the `image`
    /// and `duration_minutes` arguments are ignored on reuse.
    pub fn join(
        &self,
        connection_id: &str,
        room_key: &str,
        image: &str,
        duration_minutes: i64,
        now_ms: i64,
    ) -> Result<JoinOutcome, RelayError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        if !inner.rooms.contains_key(room_key) {
            inner.rooms_created += 1;
            inner.rooms.insert(
                room_key.to_string(),
                Room::new(room_key, image, duration_minutes, now_ms),
            );
            info!(
                room_key = %room_key,
                duration_minutes = duration_minutes,
                total_created = inner.rooms_created,
                "Room created"
            );
        }

        let room = inner
            .rooms
            .get_mut(room_key)
            .ok_or(RelayError::RoomExpired)?;

        // Expiry gates new joins only; an expired room is never deleted
        // here. Cleanup owns deletion.
        if !room.is_valid(now_ms) {
            debug!(room_key = %room_key, "Join rejected, room expired");
            return Err(RelayError::RoomExpired);
        }

        let others = room.member_ids();
        let member = room.admit(connection_id, image, now_ms);
        let join_message =
            room.push_system_text(format!("{} joined the chat", member.username), now_ms);

        info!(
            room_key = %room_key,
            username = %member.username,
            total_users = room.member_count(),
            "Member joined room"
        );

        let outcome = JoinOutcome {
            snapshot: room.snapshot(),
            member,
            join_message,
            roster: room.roster(),
            total_users: room.member_count(),
            others,
            everyone: room.member_ids(),
        };

        inner
            .memberships
            .insert(connection_id.to_string(), room_key.to_string());

        Ok(outcome)
    }

    /// Removes the member behind `connection_id`, if any. Always clears the
    /// reverse mapping, so a second call for the same connection is a no-op.
    /// A non-voluntary leave decrements the connected-user gauge.
    pub fn leave(
        &self,
        connection_id: &str,
        voluntary: bool,
        now_ms: i64,
    ) -> Option<LeaveOutcome> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        if !voluntary {
            inner.connected_users -= 1;
        }

        let room_key = inner.memberships.remove(connection_id)?;
        let room = inner.rooms.get_mut(&room_key)?;
        let member = room.members.remove(connection_id)?;

        let verb = if voluntary { "left" } else { "disconnected from" };
        let leave_message =
            room.push_system_text(format!("{} {} the chat", member.username, verb), now_ms);

        info!(
            room_key = %room_key,
            username = %member.username,
            voluntary = voluntary,
            remaining = room.member_count(),
            "Member left room"
        );

        Some(LeaveOutcome {
            room_key: room_key.clone(),
            member,
            leave_message,
            roster: room.roster(),
            total_users: room.member_count(),
            remaining: room.member_ids(),
            room_now_empty: room.members.is_empty(),
        })
    }

    /// Validates, trims and appends a text message. A whitespace-only
    /// submission is discarded silently rather than broadcast.
    pub fn append_text(
        &self,
        connection_id: &str,
        raw_text: &str,
        now_ms: i64,
    ) -> Result<Option<AppendOutcome>, RelayError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let (room, member) = resolve_member(inner, connection_id)?;

        let text: String = raw_text.trim().chars().take(MAX_TEXT_CHARS).collect();
        if text.is_empty() {
            return Ok(None);
        }

        let message = room.push_message(
            Sender::User,
            MessageBody::Text { text },
            Some(&member),
            now_ms,
        );

        Ok(Some(AppendOutcome {
            message,
            recipients: room.member_ids(),
        }))
    }

    /// Validates and appends an image message. The decoded size is
    /// estimated as encoded length x 0.75, which is close enough for the
    /// 5 MiB threshold.
    pub fn append_image(
        &self,
        connection_id: &str,
        image_url: &str,
        now_ms: i64,
    ) -> Result<AppendOutcome, RelayError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let (room, member) = resolve_member(inner, connection_id)?;

        if !image_url.starts_with("data:image/") {
            return Err(RelayError::InvalidImage);
        }
        let estimated_bytes = (image_url.len() as f64 * 0.75) as u64;
        if estimated_bytes > MAX_IMAGE_BYTES {
            return Err(RelayError::ImageTooLarge);
        }

        let message = room.push_message(
            Sender::User,
            MessageBody::Image {
                image_url: image_url.to_string(),
            },
            Some(&member),
            now_ms,
        );

        Ok(AppendOutcome {
            message,
            recipients: room.member_ids(),
        })
    }

    /// Extends the room's duration budget. `Double` rejects without
    /// mutation once the remaining time has lapsed.
    pub fn extend(
        &self,
        connection_id: &str,
        mode: ExtendMode,
        now_ms: i64,
    ) -> Result<ExtendOutcome, RelayError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let (room, member) = resolve_member(inner, connection_id)?;

        let announcement = match mode {
            ExtendMode::Add => {
                room.duration_ms += EXTENSION_STEP_MS;
                room.extensions += 1;
                format!("{} added 5 minutes", member.username)
            }
            ExtendMode::Double => {
                let remaining = room.remaining_ms(now_ms);
                if remaining <= 0 {
                    return Err(RelayError::ExpiredExtension);
                }
                room.duration_ms += remaining;
                room.extensions += 1;
                format!("{} doubled the remaining time", member.username)
            }
        };

        let system_message = room.push_system_text(announcement, now_ms);

        info!(
            room_key = %room.key,
            mode = ?mode,
            new_duration_ms = room.duration_ms,
            extensions = room.extensions,
            "Room time extended"
        );

        Ok(ExtendOutcome {
            mode,
            system_message,
            new_duration: room.duration_ms,
            extensions: room.extensions,
            actor: member.username,
            remaining_ms: room.remaining_ms(now_ms),
            recipients: room.member_ids(),
        })
    }

    /// Advisory expiry check; never deletes anything.
    pub fn validate(&self, room_key: &str, now_ms: i64) -> RoomValidity {
        let inner = self.inner.lock().unwrap();
        match inner.rooms.get(room_key) {
            Some(room) if room.is_valid(now_ms) => RoomValidity::Valid,
            Some(_) => RoomValidity::Expired,
            None => RoomValidity::NotFound,
        }
    }

    /// Deletes the room only if it is still empty. A late join between
    /// scheduling and firing repopulates the room and makes this a no-op;
    /// cancellation normally prevents the race, this is the second guard.
    pub fn remove_if_empty(&self, room_key: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let empty = inner
            .rooms
            .get(room_key)
            .map(|room| room.members.is_empty())
            .unwrap_or(false);
        if empty {
            inner.rooms.remove(room_key);
            info!(room_key = %room_key, "Deleted empty room");
        }
        empty
    }

    /// Deletes every room that is both expired and empty, returning the
    /// removed keys so stray per-room timers can be cancelled.
    pub fn sweep_expired(&self, now_ms: i64) -> Vec<String> {
        let mut inner = self.inner.lock().unwrap();
        let removed: Vec<String> = inner
            .rooms
            .iter()
            .filter(|(_, room)| !room.is_valid(now_ms) && room.members.is_empty())
            .map(|(key, _)| key.clone())
            .collect();
        for key in &removed {
            inner.rooms.remove(key);
            info!(room_key = %key, "Swept expired room");
        }
        removed
    }

    /// Read-only projection for the stats surface.
    pub fn stats(&self, now_ms: i64) -> RegistryStats {
        let inner = self.inner.lock().unwrap();
        let rooms: Vec<RoomOverview> = inner
            .rooms
            .values()
            .map(|room| RoomOverview {
                key: room.key.clone(),
                users: room.member_count(),
                messages: room.history.len(),
                duration: room.duration_ms / 60_000,
                extensions: room.extensions,
                created_at: room.created_at,
                time_remaining: room.remaining_ms(now_ms).max(0),
            })
            .collect();
        RegistryStats {
            active_rooms: inner.rooms.len(),
            active_users: inner.rooms.values().map(|r| r.member_count()).sum(),
            rooms_created: inner.rooms_created,
            connected_users: inner.connected_users,
            rooms,
        }
    }

    /// Room key currently associated with a connection, if any.
    pub fn room_of(&self, connection_id: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.memberships.get(connection_id).cloned()
    }

    pub fn contains(&self, room_key: &str) -> bool {
        self.inner.lock().unwrap().rooms.contains_key(room_key)
    }
}

/// Resolves the caller's room and member record via the reverse mapping.
fn resolve_member<'a>(
    inner: &'a mut RegistryInner,
    connection_id: &str,
) -> Result<(&'a mut Room, Member), RelayError> {
    let room_key = inner
        .memberships
        .get(connection_id)
        .cloned()
        .ok_or(RelayError::NotInRoom)?;
    let room = inner
        .rooms
        .get_mut(&room_key)
        .ok_or(RelayError::NotInRoom)?;
    let member = room
        .members
        .get(connection_id)
        .cloned()
        .ok_or(RelayError::NotAMember)?;
    Ok((room, member))
}

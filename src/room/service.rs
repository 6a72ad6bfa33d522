use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::cleanup::{run_scheduled_cleanup, CleanupConfig, CleanupTimers};
use super::registry::{ExtendMode, RoomRegistry};
use crate::shared::{epoch_ms, RelayError};
use crate::websockets::{Transport, WireMessage};

/// Service gluing the registry to the transport: executes lifecycle and
/// relay operations, fans resulting events out to members, and owns the
/// deferred-cleanup scheduling.
pub struct RoomService {
    registry: Arc<RoomRegistry>,
    transport: Arc<dyn Transport>,
    timers: Arc<CleanupTimers>,
    config: CleanupConfig,
}

impl RoomService {
    pub fn new(
        registry: Arc<RoomRegistry>,
        transport: Arc<dyn Transport>,
        timers: Arc<CleanupTimers>,
        config: CleanupConfig,
    ) -> Self {
        Self {
            registry,
            transport,
            timers,
            config,
        }
    }

    /// Admits a connection into a room, creating the room on first join.
    ///
    /// Emits `room-joined` to the joiner, `user-joined` to the members that
    /// were already present, and the system join notice to everyone. The
    /// caller maps the error to `join-error`/`room-expired` frames.
    #[instrument(skip(self, image))]
    pub async fn join(
        &self,
        connection_id: &str,
        room_key: &str,
        image: &str,
        duration_minutes: i64,
    ) -> Result<(), RelayError> {
        if room_key.trim().is_empty() || image.is_empty() || duration_minutes < 0 {
            return Err(RelayError::InvalidJoinRequest);
        }

        let outcome = self
            .registry
            .join(connection_id, room_key, image, duration_minutes, epoch_ms())?;

        // The room is live again; any pending deferred deletion is void.
        self.cancel_cleanup(room_key);

        let joined = WireMessage::room_joined(outcome.snapshot, outcome.member.clone());
        self.transport
            .send_to(connection_id, &joined.encode())
            .await;

        let roster_update =
            WireMessage::user_joined(outcome.member, outcome.total_users, outcome.roster);
        self.transport
            .send_to_many(&outcome.others, &roster_update.encode())
            .await;

        let notice = WireMessage::new_message(outcome.join_message);
        self.transport
            .send_to_many(&outcome.everyone, &notice.encode())
            .await;

        Ok(())
    }

    /// Removes a connection from its room, if it is in one. Safe to call
    /// both for an explicit `leave-room` request and for the terminal
    /// disconnect; the second call is a no-op.
    #[instrument(skip(self))]
    pub async fn leave(&self, connection_id: &str, voluntary: bool) {
        let outcome = self.registry.leave(connection_id, voluntary, epoch_ms());

        if let Some(outcome) = outcome {
            let notice = WireMessage::new_message(outcome.leave_message);
            self.transport
                .send_to_many(&outcome.remaining, &notice.encode())
                .await;

            let roster_update =
                WireMessage::user_left(outcome.member, outcome.total_users, outcome.roster);
            self.transport
                .send_to_many(&outcome.remaining, &roster_update.encode())
                .await;

            if outcome.room_now_empty {
                self.schedule_cleanup(&outcome.room_key);
            }
        }

        // Acknowledge regardless; the transport drops sends to connections
        // that are already gone.
        self.transport
            .send_to(connection_id, &WireMessage::left_room().encode())
            .await;
    }

    /// Relays a text message to every member of the caller's room,
    /// including the caller.
    #[instrument(skip(self, raw_text))]
    pub async fn post_text(&self, connection_id: &str, raw_text: &str) -> Result<(), RelayError> {
        let outcome = self.registry.append_text(connection_id, raw_text, epoch_ms())?;

        if let Some(outcome) = outcome {
            let frame = WireMessage::new_message(outcome.message);
            self.transport
                .send_to_many(&outcome.recipients, &frame.encode())
                .await;
        } else {
            debug!(connection_id = %connection_id, "Discarded whitespace-only message");
        }
        Ok(())
    }

    /// Relays an image message; same fan-out as text.
    #[instrument(skip(self, image_url))]
    pub async fn post_image(&self, connection_id: &str, image_url: &str) -> Result<(), RelayError> {
        let outcome = self
            .registry
            .append_image(connection_id, image_url, epoch_ms())?;

        let frame = WireMessage::new_message(outcome.message);
        self.transport
            .send_to_many(&outcome.recipients, &frame.encode())
            .await;
        Ok(())
    }

    /// Extends the caller's room budget and announces it to the room.
    #[instrument(skip(self))]
    pub async fn extend_time(
        &self,
        connection_id: &str,
        mode: ExtendMode,
    ) -> Result<(), RelayError> {
        let outcome = self.registry.extend(connection_id, mode, epoch_ms())?;

        let notice = WireMessage::new_message(outcome.system_message);
        self.transport
            .send_to_many(&outcome.recipients, &notice.encode())
            .await;

        let extended = WireMessage::time_extended(
            outcome.mode,
            outcome.new_duration,
            outcome.extensions,
            outcome.actor,
            outcome.remaining_ms,
        );
        self.transport
            .send_to_many(&outcome.recipients, &extended.encode())
            .await;
        Ok(())
    }

    /// Arms the one-shot deferred deletion for an emptied room, replacing
    /// any previous timer for the same key.
    pub fn schedule_cleanup(&self, room_key: &str) {
        let registry = Arc::clone(&self.registry);
        let timers = Arc::clone(&self.timers);
        let key = room_key.to_string();
        let grace = self.config.grace;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            run_scheduled_cleanup(&registry, &timers, &key);
        });
        self.timers.arm(room_key, handle);

        info!(
            room_key = %room_key,
            grace_secs = self.config.grace.as_secs(),
            "Scheduled room cleanup"
        );
    }

    /// Cancels a pending cleanup; no-op when none is armed.
    pub fn cancel_cleanup(&self, room_key: &str) {
        self.timers.cancel(room_key);
    }

    /// Whether a deferred deletion is currently pending for `room_key`.
    pub fn cleanup_pending(&self, room_key: &str) -> bool {
        self.timers.is_armed(room_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::registry::RoomValidity;
    use crate::websockets::{EventType, WireMessage};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::{mpsc, RwLock};

    /// Transport fake that records every frame per connection.
    struct RecordingTransport {
        sent: RwLock<HashMap<String, Vec<WireMessage>>>,
    }

    impl RecordingTransport {
        fn new() -> Self {
            Self {
                sent: RwLock::new(HashMap::new()),
            }
        }

        async fn events_for(&self, connection_id: &str) -> Vec<EventType> {
            self.sent
                .read()
                .await
                .get(connection_id)
                .map(|frames| frames.iter().map(|f| f.event).collect())
                .unwrap_or_default()
        }

        async fn frames_for(&self, connection_id: &str) -> Vec<WireMessage> {
            self.sent
                .read()
                .await
                .get(connection_id)
                .cloned()
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn add_connection(&self, _id: String, _sender: mpsc::UnboundedSender<String>) {}

        async fn remove_connection(&self, _id: &str) {}

        async fn send_to(&self, connection_id: &str, message: &str) {
            let frame: WireMessage = serde_json::from_str(message).unwrap();
            self.sent
                .write()
                .await
                .entry(connection_id.to_string())
                .or_default()
                .push(frame);
        }

        async fn send_to_many(&self, connection_ids: &[String], message: &str) {
            for connection_id in connection_ids {
                self.send_to(connection_id, message).await;
            }
        }
    }

    struct Harness {
        registry: Arc<RoomRegistry>,
        transport: Arc<RecordingTransport>,
        timers: Arc<CleanupTimers>,
        service: RoomService,
    }

    fn harness_with_grace(grace: Duration) -> Harness {
        let registry = Arc::new(RoomRegistry::new());
        let transport = Arc::new(RecordingTransport::new());
        let timers = Arc::new(CleanupTimers::new());
        let service = RoomService::new(
            registry.clone(),
            transport.clone(),
            timers.clone(),
            CleanupConfig {
                grace,
                sweep_interval: Duration::from_secs(3600),
            },
        );
        Harness {
            registry,
            transport,
            timers,
            service,
        }
    }

    fn harness() -> Harness {
        harness_with_grace(Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_join_notifies_joiner_and_existing_members() {
        let h = harness();

        h.service.join("conn-1", "r1", "imgA", 5).await.unwrap();
        assert_eq!(
            h.transport.events_for("conn-1").await,
            vec![EventType::RoomJoined, EventType::NewMessage]
        );

        h.service.join("conn-2", "r1", "imgB", 5).await.unwrap();

        // Existing member sees the roster update and the system notice.
        let events = h.transport.events_for("conn-1").await;
        assert!(events.contains(&EventType::UserJoined));
        assert_eq!(events.iter().filter(|e| **e == EventType::NewMessage).count(), 2);

        // The joiner gets the snapshot, not the user-joined broadcast.
        let events = h.transport.events_for("conn-2").await;
        assert!(events.contains(&EventType::RoomJoined));
        assert!(!events.contains(&EventType::UserJoined));

        let frames = h.transport.frames_for("conn-2").await;
        let joined = &frames[0];
        assert_eq!(joined.payload["room"]["userCount"], 2);
        assert_eq!(joined.payload["user"]["username"], "User Two");
    }

    #[tokio::test]
    async fn test_join_rejects_missing_fields_without_touching_state() {
        let h = harness();

        for (key, image, duration) in [("", "img", 5i64), ("r1", "", 5), ("r1", "img", -1)] {
            let err = h.service.join("conn-1", key, image, duration).await.unwrap_err();
            assert_eq!(err, RelayError::InvalidJoinRequest);
        }
        assert!(!h.registry.contains("r1"));
        assert!(h.transport.events_for("conn-1").await.is_empty());
    }

    #[tokio::test]
    async fn test_join_duration_zero_creates_expired_room() {
        let h = harness();

        let err = h.service.join("conn-1", "r1", "imgA", 0).await.unwrap_err();
        assert_eq!(err, RelayError::RoomExpired);

        assert_eq!(
            h.registry.validate("r1", epoch_ms()),
            RoomValidity::Expired
        );

        // Rejoining the lapsed key keeps failing.
        let err = h.service.join("conn-2", "r1", "imgA", 5).await.unwrap_err();
        assert_eq!(err, RelayError::RoomExpired);
    }

    #[tokio::test]
    async fn test_join_cancels_pending_cleanup() {
        let h = harness();

        h.service.join("conn-1", "r1", "imgA", 5).await.unwrap();
        h.service.leave("conn-1", true).await;
        assert!(h.service.cleanup_pending("r1"));

        h.service.join("conn-2", "r1", "imgA", 5).await.unwrap();
        assert!(!h.service.cleanup_pending("r1"));
        assert!(h.registry.contains("r1"));
    }

    #[tokio::test]
    async fn test_text_broadcast_reaches_everyone_including_sender() {
        let h = harness();
        h.service.join("conn-1", "r1", "imgA", 5).await.unwrap();
        h.service.join("conn-2", "r1", "imgB", 5).await.unwrap();

        h.service.post_text("conn-2", "hi").await.unwrap();

        for conn in ["conn-1", "conn-2"] {
            let frames = h.transport.frames_for(conn).await;
            let chat = frames
                .iter()
                .find(|f| f.event == EventType::NewMessage && f.payload["sender"] == "user")
                .unwrap();
            assert_eq!(chat.payload["text"], "hi");
            assert_eq!(chat.payload["username"], "User Two");
        }
    }

    #[tokio::test]
    async fn test_text_from_stranger_is_an_error_not_a_broadcast() {
        let h = harness();
        h.service.join("conn-1", "r1", "imgA", 5).await.unwrap();

        let err = h.service.post_text("stranger", "hi").await.unwrap_err();
        assert_eq!(err, RelayError::NotInRoom);

        let events = h.transport.events_for("conn-1").await;
        assert_eq!(events.iter().filter(|e| **e == EventType::NewMessage).count(), 1);
    }

    #[tokio::test]
    async fn test_image_validation_errors_do_not_broadcast() {
        let h = harness();
        h.service.join("conn-1", "r1", "imgA", 5).await.unwrap();

        let err = h
            .service
            .post_image("conn-1", "https://example.com/cat.png")
            .await
            .unwrap_err();
        assert_eq!(err, RelayError::InvalidImage);

        h.service
            .post_image("conn-1", "data:image/png;base64,iVBORw0KGgo=")
            .await
            .unwrap();

        let events = h.transport.events_for("conn-1").await;
        // join notice + the one valid image
        assert_eq!(events.iter().filter(|e| **e == EventType::NewMessage).count(), 2);
    }

    #[tokio::test]
    async fn test_extend_add_announces_to_the_room() {
        let h = harness();
        h.service.join("conn-1", "r1", "imgA", 5).await.unwrap();
        h.service.join("conn-2", "r1", "imgB", 5).await.unwrap();

        h.service.extend_time("conn-1", ExtendMode::Add).await.unwrap();

        for conn in ["conn-1", "conn-2"] {
            let frames = h.transport.frames_for(conn).await;
            let extended = frames
                .iter()
                .find(|f| f.event == EventType::TimeExtended)
                .unwrap();
            assert_eq!(extended.payload["mode"], "add");
            assert_eq!(extended.payload["extensions"], 1);
            assert_eq!(extended.payload["newDuration"], 10 * 60_000);
            assert_eq!(extended.payload["by"], "User One");
        }
    }

    #[tokio::test]
    async fn test_extend_double_on_expired_room_reports_error_only() {
        let h = harness();
        // Joining a 0-minute room fails, so build an expired-with-member
        // state via a normal join and a lapsed clock is not available here;
        // instead use `add` first, then exercise the double-rejection path
        // through the registry's deterministic clock.
        h.service.join("conn-1", "r1", "imgA", 5).await.unwrap();

        let err = h
            .registry
            .extend("conn-1", ExtendMode::Double, epoch_ms() + 10 * 60_000)
            .unwrap_err();
        assert_eq!(err, RelayError::ExpiredExtension);

        // No extension broadcast went out.
        let events = h.transport.events_for("conn-1").await;
        assert!(!events.contains(&EventType::TimeExtended));
    }

    #[tokio::test]
    async fn test_leave_broadcasts_to_remaining_members_only() {
        let h = harness();
        h.service.join("conn-1", "r1", "imgA", 5).await.unwrap();
        h.service.join("conn-2", "r1", "imgB", 5).await.unwrap();

        h.service.leave("conn-1", true).await;

        let events = h.transport.events_for("conn-2").await;
        assert!(events.contains(&EventType::UserLeft));

        let frames = h.transport.frames_for("conn-2").await;
        let left = frames.iter().find(|f| f.event == EventType::UserLeft).unwrap();
        assert_eq!(left.payload["totalUsers"], 1);
        assert_eq!(left.payload["user"]["username"], "User One");

        // The leaver gets the ack but not the broadcast about themselves.
        let events = h.transport.events_for("conn-1").await;
        assert!(events.contains(&EventType::LeftRoom));
        assert!(!events.contains(&EventType::UserLeft));
    }

    #[tokio::test]
    async fn test_leave_twice_does_not_double_broadcast() {
        let h = harness();
        h.service.join("conn-1", "r1", "imgA", 5).await.unwrap();
        h.service.join("conn-2", "r1", "imgB", 5).await.unwrap();

        h.service.leave("conn-1", true).await;
        h.service.leave("conn-1", false).await;

        let events = h.transport.events_for("conn-2").await;
        assert_eq!(events.iter().filter(|e| **e == EventType::UserLeft).count(), 1);
    }

    #[tokio::test]
    async fn test_emptied_room_is_deleted_after_grace() {
        let h = harness_with_grace(Duration::from_millis(20));

        h.service.join("conn-1", "r1", "imgA", 5).await.unwrap();
        h.service.leave("conn-1", true).await;
        assert!(h.registry.contains("r1"));
        assert!(h.timers.is_armed("r1"));

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(!h.registry.contains("r1"));
        assert!(!h.timers.is_armed("r1"));
    }

    #[tokio::test]
    async fn test_fired_cleanup_spares_a_repopulated_room() {
        let h = harness();

        h.service.join("conn-1", "r1", "imgA", 5).await.unwrap();
        h.service.leave("conn-1", true).await;
        h.service.join("conn-2", "r1", "imgB", 5).await.unwrap();

        // Fire the timer body directly even though the join cancelled it;
        // the zero-member check is the second guard.
        run_scheduled_cleanup(&h.registry, &h.timers, "r1");

        assert!(h.registry.contains("r1"));
    }
}

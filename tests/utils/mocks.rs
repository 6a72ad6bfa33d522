use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

use flashroom::websockets::{EventType, Transport, WireMessage};

// ============================================================================
// Mock Infrastructure
// ============================================================================

/// Transport fake that records every outbound frame per connection instead
/// of writing to a socket.
#[derive(Clone)]
pub struct MockTransport {
    sent_frames: Arc<RwLock<HashMap<String, Vec<WireMessage>>>>,
    connected: Arc<RwLock<Vec<String>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            sent_frames: Arc::new(RwLock::new(HashMap::new())),
            connected: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn frames_for(&self, connection_id: &str) -> Vec<WireMessage> {
        self.sent_frames
            .read()
            .await
            .get(connection_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn events_for(&self, connection_id: &str) -> Vec<EventType> {
        self.frames_for(connection_id)
            .await
            .iter()
            .map(|f| f.event)
            .collect()
    }

    /// Last frame of the given event type sent to `connection_id`.
    pub async fn last_frame(&self, connection_id: &str, event: EventType) -> Option<WireMessage> {
        self.frames_for(connection_id)
            .await
            .into_iter()
            .filter(|f| f.event == event)
            .next_back()
    }

    pub async fn count_events(&self, connection_id: &str, event: EventType) -> usize {
        self.events_for(connection_id)
            .await
            .iter()
            .filter(|e| **e == event)
            .count()
    }

    pub async fn clear_frames(&self) {
        self.sent_frames.write().await.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn add_connection(&self, connection_id: String, _sender: mpsc::UnboundedSender<String>) {
        self.connected.write().await.push(connection_id);
    }

    async fn remove_connection(&self, connection_id: &str) {
        self.connected
            .write()
            .await
            .retain(|c| c != connection_id);
    }

    async fn send_to(&self, connection_id: &str, message: &str) {
        let frame: WireMessage =
            serde_json::from_str(message).expect("outbound frame should be valid JSON");
        self.sent_frames
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

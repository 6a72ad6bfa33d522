use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Capability the relay core uses to reach connected clients. The core
/// never touches concrete connection objects; production wires this to
/// per-connection channels and tests substitute a recording fake.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn add_connection(&self, connection_id: String, sender: mpsc::UnboundedSender<String>);

    async fn remove_connection(&self, connection_id: &str);

    /// Delivers to a single connection; silently dropped if it is gone.
    async fn send_to(&self, connection_id: &str, message: &str);

    /// Delivers to each listed connection, preserving call order.
    async fn send_to_many(&self, connection_ids: &[String], message: &str);
}

pub struct InMemoryTransport {
    // connection id -> outbound sender
    connections: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<String>>>>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn add_connection(&self, connection_id: String, sender: mpsc::UnboundedSender<String>) {
        let mut connections = self.connections.write().await;
        connections.insert(connection_id, sender);
    }

    async fn remove_connection(&self, connection_id: &str) {
        let mut connections = self.connections.write().await;
        connections.remove(connection_id);
    }

    async fn send_to(&self, connection_id: &str, message: &str) {
        let connections = self.connections.read().await;
        if let Some(sender) = connections.get(connection_id) {
            let _ = sender.send(message.to_string());
        }
    }

    async fn send_to_many(&self, connection_ids: &[String], message: &str) {
        let connections = self.connections.read().await;
        for connection_id in connection_ids {
            if let Some(sender) = connections.get(connection_id) {
                let _ = sender.send(message.to_string());
            }
        }
    }
}

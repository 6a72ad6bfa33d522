pub mod mocks;

#[allow(unused_imports)]
pub use mocks::MockTransport;

use std::sync::Arc;
use std::time::Duration;

use flashroom::room::{CleanupConfig, CleanupTimers, RoomRegistry, RoomService};

/// A fully wired relay stack with the recording transport swapped in.
pub struct TestApp {
    pub registry: Arc<RoomRegistry>,
    pub transport: Arc<MockTransport>,
    pub timers: Arc<CleanupTimers>,
    pub service: Arc<RoomService>,
}

impl TestApp {
    pub fn new() -> Self {
        // Long grace and sweep so nothing fires unless a test asks for it.
        Self::with_grace(Duration::from_secs(3600))
    }

    pub fn with_grace(grace: Duration) -> Self {
        let registry = Arc::new(RoomRegistry::new());
        let transport = Arc::new(MockTransport::new());
        let timers = Arc::new(CleanupTimers::new());
        let service = Arc::new(RoomService::new(
            registry.clone(),
            transport.clone(),
            timers.clone(),
            CleanupConfig {
                grace,
                sweep_interval: Duration::from_secs(3600),
            },
        ));
        Self {
            registry,
            transport,
            timers,
            service,
        }
    }

    /// Join with the defaults most scenarios use: a 5-minute room.
    pub async fn join(&self, connection_id: &str, room_key: &str) {
        self.service
            .join(connection_id, room_key, "data:image/png;base64,QUJD", 5)
            .await
            .expect("join should succeed");
    }
}

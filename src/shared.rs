use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::room::registry::RoomRegistry;
use crate::room::service::RoomService;
use crate::websockets::Transport;

/// Shared application state containing all dependencies
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
    pub service: Arc<RoomService>,
    pub transport: Arc<dyn Transport>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        registry: Arc<RoomRegistry>,
        service: Arc<RoomService>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            registry,
            service,
            transport,
            started_at: Instant::now(),
        }
    }
}

/// Current wall-clock time in epoch millis. All expiry math subtracts
/// these values, so the same scale must be used everywhere.
pub fn epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Recoverable relay errors. Each is reported back to the originating
/// connection only; shared state is never mutated on the error path.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayError {
    #[error("Missing required join fields")]
    InvalidJoinRequest,

    #[error("This room has expired")]
    RoomExpired,

    #[error("You are not in a room")]
    NotInRoom,

    #[error("You are not a member of this room")]
    NotAMember,

    #[error("Payload is not a recognized image")]
    InvalidImage,

    #[error("Image is too large")]
    ImageTooLarge,

    #[error("Cannot double an expired time budget")]
    ExpiredExtension,
}

// Library crate for the flashroom relay server
// This file exposes the public API for integration tests

pub mod room;
pub mod shared;
pub mod stats;
pub mod websockets;

// Re-export commonly used types for easier access in tests
pub use room::{
    models::{ChatMessage, Member, Room, RoomSnapshot},
    CleanupConfig, CleanupTimers, ExtendMode, RoomRegistry, RoomService,
};
pub use shared::{AppState, RelayError};
pub use websockets::{
    EventType, InMemoryTransport, RelayReceiveHandler, Transport, WireMessage,
};

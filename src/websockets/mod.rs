// Public API
pub use connection_manager::{InMemoryTransport, Transport};
pub use handler::{websocket_handler, RelayReceiveHandler};
pub use messages::{EventType, WireMessage};
pub use socket::InboundHandler;

// Internal modules
mod connection_manager;
mod handler;
pub mod messages;
mod socket;

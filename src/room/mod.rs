// Public API - what other modules can use
pub use cleanup::{start_sweep_task, CleanupConfig, CleanupTimers};
pub use registry::{ExtendMode, RoomRegistry, RoomValidity};
pub use service::RoomService;

// Internal modules
pub mod cleanup;
pub mod models;
pub mod registry;
pub mod service;

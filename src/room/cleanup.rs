use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, instrument};

use super::registry::RoomRegistry;
use crate::shared::epoch_ms;

/// Configuration for deferred and periodic room cleanup
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// How long an emptied room is kept before deletion
    pub grace: Duration,
    /// How often the expired-room sweep runs
    pub sweep_interval: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(2 * 60),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Pending one-shot cleanup timers, keyed by room key.
///
/// Arming replaces any previous timer for the key; cancelling a key with
/// no timer is a no-op. The table only tracks handles, it never decides
/// whether a room actually gets deleted.
pub struct CleanupTimers {
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Default for CleanupTimers {
    fn default() -> Self {
        Self::new()
    }
}

impl CleanupTimers {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Stores a timer for `room_key`, aborting any previous one.
    pub fn arm(&self, room_key: &str, handle: JoinHandle<()>) {
        let mut handles = self.handles.lock().unwrap();
        if let Some(previous) = handles.insert(room_key.to_string(), handle) {
            previous.abort();
        }
        debug!(room_key = %room_key, "Cleanup timer armed");
    }

    /// Aborts and forgets the timer for `room_key`, if one is pending.
    pub fn cancel(&self, room_key: &str) {
        let mut handles = self.handles.lock().unwrap();
        if let Some(handle) = handles.remove(room_key) {
            handle.abort();
            debug!(room_key = %room_key, "Cleanup timer cancelled");
        }
    }

    /// Drops the table entry without aborting; used by a timer that has
    /// already fired.
    pub fn forget(&self, room_key: &str) {
        self.handles.lock().unwrap().remove(room_key);
    }

    pub fn is_armed(&self, room_key: &str) -> bool {
        self.handles.lock().unwrap().contains_key(room_key)
    }
}

/// Body of a fired per-room cleanup timer. Deletes the room only if it is
/// still empty; a late join that slipped past cancellation wins.
/// Callable directly from tests to fire a timer deterministically.
pub fn run_scheduled_cleanup(registry: &RoomRegistry, timers: &CleanupTimers, room_key: &str) {
    timers.forget(room_key);
    if registry.remove_if_empty(room_key) {
        info!(room_key = %room_key, "Cleaned up empty room");
    } else {
        debug!(room_key = %room_key, "Cleanup fired but room was repopulated or gone");
    }
}

/// One sweep pass: reclaims rooms that are both expired and empty, and
/// cancels any stray per-room timer left behind for them.
pub fn sweep_expired_rooms(
    registry: &RoomRegistry,
    timers: &CleanupTimers,
    now_ms: i64,
) -> usize {
    let removed = registry.sweep_expired(now_ms);
    for room_key in &removed {
        timers.cancel(room_key);
    }
    removed.len()
}

/// Starts the background sweep that guarantees eventual reclamation of
/// rooms whose per-room timer never fired.
#[instrument(skip(registry, timers))]
pub async fn start_sweep_task(
    registry: Arc<RoomRegistry>,
    timers: Arc<CleanupTimers>,
    config: CleanupConfig,
) {
    info!(
        sweep_interval_secs = config.sweep_interval.as_secs(),
        "Starting expired-room sweep task"
    );

    let mut ticker = interval(config.sweep_interval);

    loop {
        ticker.tick().await;

        let swept = sweep_expired_rooms(&registry, &timers, epoch_ms());
        if swept > 0 {
            info!(swept = swept, "Expired-room sweep completed");
        }
    }
}

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::room::registry::RoomOverview;
use crate::shared::{epoch_ms, AppState};

/// Compact counters for the lightweight `/stats` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub active_rooms: usize,
    pub active_users: usize,
    pub total_created: u64,
}

/// Full projection served at `/api/stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsDetail {
    pub total_rooms: usize,
    pub total_active_users: usize,
    pub total_rooms_created: u64,
    pub total_users_connected: i64,
    pub active_rooms: Vec<RoomOverview>,
    pub server_uptime: f64,
}

/// GET /stats
pub async fn stats_summary(State(state): State<AppState>) -> Json<StatsSummary> {
    let stats = state.registry.stats(epoch_ms());
    Json(StatsSummary {
        active_rooms: stats.active_rooms,
        active_users: stats.active_users,
        total_created: stats.rooms_created,
    })
}

/// GET /api/stats
pub async fn stats_detail(State(state): State<AppState>) -> Json<StatsDetail> {
    let stats = state.registry.stats(epoch_ms());
    debug!(
        active_rooms = stats.active_rooms,
        active_users = stats.active_users,
        "Serving stats projection"
    );
    Json(StatsDetail {
        total_rooms: stats.active_rooms,
        total_active_users: stats.active_users,
        total_rooms_created: stats.rooms_created,
        total_users_connected: stats.connected_users,
        active_rooms: stats.rooms,
        server_uptime: state.started_at.elapsed().as_secs_f64(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::{CleanupConfig, CleanupTimers, RoomRegistry, RoomService};
    use crate::websockets::{InMemoryTransport, Transport};
    use std::sync::Arc;

    fn test_state() -> AppState {
        let registry = Arc::new(RoomRegistry::new());
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        let timers = Arc::new(CleanupTimers::new());
        let service = Arc::new(RoomService::new(
            registry.clone(),
            transport.clone(),
            timers,
            CleanupConfig::default(),
        ));
        AppState::new(registry, service, transport)
    }

    #[tokio::test]
    async fn test_summary_counts_rooms_and_users() {
        let state = test_state();
        state.registry.join("conn-1", "r1", "img", 5, epoch_ms()).unwrap();
        state.registry.join("conn-2", "r1", "img", 5, epoch_ms()).unwrap();
        state.registry.join("conn-3", "r2", "img", 5, epoch_ms()).unwrap();

        let Json(summary) = stats_summary(State(state)).await;
        assert_eq!(summary.active_rooms, 2);
        assert_eq!(summary.active_users, 3);
        assert_eq!(summary.total_created, 2);
    }

    #[tokio::test]
    async fn test_detail_lists_room_rows() {
        let state = test_state();
        state.registry.join("conn-1", "r1", "img", 5, epoch_ms()).unwrap();

        let Json(detail) = stats_detail(State(state)).await;
        assert_eq!(detail.active_rooms.len(), 1);

        let row = &detail.active_rooms[0];
        assert_eq!(row.key, "r1");
        assert_eq!(row.users, 1);
        assert_eq!(row.duration, 5);
        assert!(row.time_remaining > 0);
        assert!(detail.server_uptime >= 0.0);
    }

    #[test]
    fn test_wire_shape_matches_contract() {
        let summary = StatsSummary {
            active_rooms: 1,
            active_users: 2,
            total_created: 3,
        };
        let value = serde_json::to_value(summary).unwrap();
        assert_eq!(value["activeRooms"], 1);
        assert_eq!(value["activeUsers"], 2);
        assert_eq!(value["totalCreated"], 3);
    }
}

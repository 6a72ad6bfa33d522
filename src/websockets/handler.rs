use async_trait::async_trait;
use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::room::service::RoomService;
use crate::shared::{AppState, RelayError};
use crate::websockets::messages::{
    EventType, ExtendTimePayload, JoinRoomPayload, SendImagePayload, SendMessagePayload,
    WireMessage,
};

use super::socket::{Connection, InboundHandler};
use super::Transport;

/// Routes inbound wire frames to the relay service. Every failure is
/// answered to the originating connection only, and nothing here can
/// panic the process.
pub struct RelayReceiveHandler {
    service: Arc<RoomService>,
    transport: Arc<dyn Transport>,
}

impl RelayReceiveHandler {
    pub fn new(service: Arc<RoomService>, transport: Arc<dyn Transport>) -> Self {
        Self { service, transport }
    }

    async fn answer(&self, connection_id: &str, frame: WireMessage) {
        self.transport.send_to(connection_id, &frame.encode()).await;
    }

    /// A failed join maps to `room-expired` for a lapsed room and
    /// `join-error` for everything else.
    async fn report_join_failure(&self, connection_id: &str, room_key: &str, error: RelayError) {
        let frame = match error {
            RelayError::RoomExpired => {
                WireMessage::room_expired(room_key.to_string(), error.to_string())
            }
            _ => WireMessage::join_error(error.to_string()),
        };
        self.answer(connection_id, frame).await;
    }
}

#[async_trait]
impl InboundHandler for RelayReceiveHandler {
    async fn handle_message(&self, connection_id: &str, message: String) {
        let frame = match serde_json::from_str::<WireMessage>(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(
                    connection_id = %connection_id,
                    error = %e,
                    "Failed to parse inbound frame"
                );
                return;
            }
        };

        match frame.event {
            EventType::JoinRoom => {
                match serde_json::from_value::<JoinRoomPayload>(frame.payload) {
                    Ok(payload) => {
                        if let Err(e) = self
                            .service
                            .join(
                                connection_id,
                                &payload.room_key,
                                &payload.image,
                                payload.selected_duration,
                            )
                            .await
                        {
                            self.report_join_failure(connection_id, &payload.room_key, e)
                                .await;
                        }
                    }
                    Err(e) => {
                        warn!(connection_id = %connection_id, error = %e, "Malformed join-room payload");
                        self.answer(
                            connection_id,
                            WireMessage::join_error(RelayError::InvalidJoinRequest.to_string()),
                        )
                        .await;
                    }
                }
            }
            EventType::SendMessage => {
                match serde_json::from_value::<SendMessagePayload>(frame.payload) {
                    Ok(payload) => {
                        if let Err(e) = self.service.post_text(connection_id, &payload.text).await {
                            self.answer(connection_id, WireMessage::message_error(e.to_string()))
                                .await;
                        }
                    }
                    Err(e) => {
                        warn!(connection_id = %connection_id, error = %e, "Malformed send-message payload");
                        self.answer(
                            connection_id,
                            WireMessage::message_error("Message could not be sent".to_string()),
                        )
                        .await;
                    }
                }
            }
            EventType::SendImage => {
                match serde_json::from_value::<SendImagePayload>(frame.payload) {
                    Ok(payload) => {
                        if let Err(e) = self
                            .service
                            .post_image(connection_id, &payload.image_url)
                            .await
                        {
                            self.answer(connection_id, WireMessage::message_error(e.to_string()))
                                .await;
                        }
                    }
                    Err(e) => {
                        warn!(connection_id = %connection_id, error = %e, "Malformed send-image payload");
                        self.answer(
                            connection_id,
                            WireMessage::message_error("Image could not be sent".to_string()),
                        )
                        .await;
                    }
                }
            }
            EventType::ExtendTime => {
                match serde_json::from_value::<ExtendTimePayload>(frame.payload) {
                    Ok(payload) => {
                        if let Err(e) = self
                            .service
                            .extend_time(connection_id, payload.mode)
                            .await
                        {
                            self.answer(connection_id, WireMessage::extension_error(e.to_string()))
                                .await;
                        }
                    }
                    Err(e) => {
                        warn!(connection_id = %connection_id, error = %e, "Malformed extend-time payload");
                        self.answer(
                            connection_id,
                            WireMessage::extension_error("Time could not be extended".to_string()),
                        )
                        .await;
                    }
                }
            }
            EventType::LeaveRoom => {
                self.service.leave(connection_id, true).await;
            }
            _ => {
                debug!(
                    connection_id = %connection_id,
                    event = ?frame.event,
                    "Unhandled inbound event"
                );
            }
        }
    }
}

/// WebSocket endpoint. No authentication: identity is the connection id
/// minted here, and display names are assigned by the room on join.
pub async fn websocket_handler(ws: WebSocketUpgrade, State(app_state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_websocket_connection(socket, app_state))
}

/// Handle the upgraded WebSocket connection
async fn handle_websocket_connection(socket: axum::extract::ws::WebSocket, app_state: AppState) {
    let connection_id = Uuid::new_v4().to_string();
    app_state.registry.connection_opened();

    info!(
        connection_id = %connection_id,
        "WebSocket connection established"
    );

    // Create the outbound channel (app -> client) and register it
    let (outbound_sender, outbound_receiver) = mpsc::unbounded_channel::<String>();
    app_state
        .transport
        .add_connection(connection_id.clone(), outbound_sender)
        .await;

    let inbound_handler = Arc::new(RelayReceiveHandler::new(
        app_state.service.clone(),
        app_state.transport.clone(),
    ));

    let connection = Connection::new(
        connection_id.clone(),
        Box::new(socket),
        outbound_receiver,
        inbound_handler,
    );

    // Run the connection until disconnect
    match connection.run().await {
        Ok(()) => {
            info!(
                connection_id = %connection_id,
                "WebSocket connection closed cleanly"
            );
        }
        Err(e) => {
            warn!(
                connection_id = %connection_id,
                error = ?e,
                "WebSocket connection error"
            );
        }
    }

    // Cleanup: deregister first so broadcasts stop targeting the dead
    // connection, then run the terminal (non-voluntary) leave exactly once.
    app_state
        .transport
        .remove_connection(&connection_id)
        .await;
    app_state.service.leave(&connection_id, false).await;
}

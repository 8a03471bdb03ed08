//! The `/ws` endpoint: upgrade, event forwarding, and cleanup.
//!
//! Every connection gets its own bus subscription, so slow clients lag
//! independently: when a subscriber's mailbox overflows, its oldest
//! undelivered events drop, the connection's lag counter grows, and the
//! stream continues in order. Client messages are ignored except as
//! keepalives.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

use tempo_core::types::DbId;
use tempo_events::{EventBus, EventFilter, RunEvent};

use crate::state::AppState;
use crate::ws::manager::WsManager;

/// Optional subscription filter taken from the query string.
#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub script_id: Option<DbId>,
}

/// HTTP handler that upgrades the connection to WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let filter = EventFilter {
        script_id: params.script_id,
        kinds: None,
    };
    ws.on_upgrade(move |socket| {
        handle_socket(socket, state.ws_manager, state.event_bus, filter)
    })
}

/// Manage a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Registers the connection with `WsManager`.
///   2. Spawns a sender task forwarding manager-channel messages to the sink.
///   3. Spawns a forwarder task pumping bus events into the channel.
///   4. Processes inbound messages (keepalives only) on the current task.
///   5. Cleans up on disconnect.
async fn handle_socket(
    socket: WebSocket,
    ws_manager: Arc<WsManager>,
    bus: Arc<EventBus>,
    filter: EventFilter,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    let mut rx = ws_manager.add(conn_id.clone()).await;
    let (mut sink, mut stream) = socket.split();

    // Sender task: forward channel messages to the WebSocket sink.
    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
        }
    });

    // Forwarder task: pump bus events into the connection channel.
    let forward_manager = Arc::clone(&ws_manager);
    let forward_conn_id = conn_id.clone();
    let forward_task = tokio::spawn(async move {
        let mut events = bus.subscribe();
        loop {
            match events.recv().await {
                Ok(event) => {
                    if !filter.matches(&event) {
                        continue;
                    }
                    let text = render_event(&event);
                    if !forward_manager
                        .send_to(&forward_conn_id, Message::Text(text.into()))
                        .await
                    {
                        break;
                    }
                }
                Err(RecvError::Lagged(dropped)) => {
                    let total = forward_manager.record_lag(&forward_conn_id, dropped).await;
                    tracing::warn!(
                        conn_id = %forward_conn_id,
                        dropped,
                        total_lag = total,
                        "slow WebSocket subscriber dropped events"
                    );
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Receiver loop: inbound messages are keepalives only.
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(_msg) => {
                // Ignored; the stream is server-push only.
            }
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    ws_manager.remove(&conn_id).await;
    send_task.abort();
    forward_task.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}

/// Render an event as the wire-format JSON object
/// `{type, timestamp, data}`.
fn render_event(event: &RunEvent) -> String {
    let mut data = match &event.payload {
        serde_json::Value::Object(map) => map.clone(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("payload".to_string(), other.clone());
            map
        }
    };
    data.insert("script_id".to_string(), event.script_id.into());
    if let Some(execution_id) = event.execution_id {
        data.insert("execution_id".to_string(), execution_id.into());
    }

    serde_json::json!({
        "type": event.kind.as_str(),
        "timestamp": event.timestamp,
        "data": data,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempo_events::EventKind;

    #[test]
    fn wire_format_is_type_timestamp_data() {
        let event = RunEvent::new(EventKind::RunStarted, 7)
            .with_execution(3)
            .with_payload(serde_json::json!({"script_name": "demo"}));

        let rendered: serde_json::Value =
            serde_json::from_str(&render_event(&event)).expect("valid JSON");

        assert_eq!(rendered["type"], "run.started");
        assert!(rendered["timestamp"].is_string());
        assert_eq!(rendered["data"]["script_id"], 7);
        assert_eq!(rendered["data"]["execution_id"], 3);
        assert_eq!(rendered["data"]["script_name"], "demo");
    }
}

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use iotsim_core::types::DbId;

use crate::state::AppState;
use crate::ws::manager::Subscription;
use crate::ws::message::WsEvent;

/// GET /ws/simulation
///
/// Receives every project's logs plus global status pushes.
pub async fn global_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, Subscription::Global))
}

/// GET /simulation/{project_id}/logs
///
/// Receives one project's logs and status. The retained history for the
/// project is replayed before live events.
pub async fn project_logs_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(project_id): Path<DbId>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, Subscription::Project(project_id)))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Registers with the manager, replays history for project subscriptions,
/// then forwards channel messages to the sink until either side closes.
async fn handle_socket(socket: WebSocket, state: AppState, subscription: Subscription) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, ?subscription, "WebSocket connected");

    let (mut rx, backlog) = state
        .ws_manager
        .add_with_backlog(conn_id.clone(), subscription, &state.log_history)
        .await;
    let (mut sink, mut stream) = socket.split();

    for event in backlog {
        let Some(msg) = WsEvent::SimulationLog(event).to_message() else {
            continue;
        };
        if sink.send(msg).await.is_err() {
            state.ws_manager.remove(&conn_id).await;
            tracing::debug!(conn_id = %conn_id, "WebSocket closed during replay");
            return;
        }
    }

    if let Subscription::Project(project_id) = subscription {
        if let Some(status) = state.registry.status(project_id).await {
            if let Some(msg) = WsEvent::ProjectStatusUpdate(status).to_message() {
                let _ = sink.send(msg).await;
            }
        }
    }

    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            // Clients only listen; inbound text is ignored.
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    state.ws_manager.remove(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}

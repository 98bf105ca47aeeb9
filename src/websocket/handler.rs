use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::types::{ClientMessage, ConnectionStatusData, Event, FeedStatus};
use crate::AppState;

/// WebSocket upgrade handler for `/ws/accounts/:account_id`.
///
/// The verified account id is supplied by the identity layer in front of
/// this server; here it arrives as the path parameter.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(account_id): Path<i64>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, account_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, account_id: i64) {
    let (mut sender, mut receiver) = socket.split();

    // Channel feeding this client's send task
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let conn_id = state.registry.register(account_id, tx);
    info!("Viewer connected: {} (account {})", conn_id, account_id);

    // Forward queued frames to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    state.registry.mark_open(conn_id);
    state.registry.send_to(
        conn_id,
        &Event::ConnectionStatus(ConnectionStatusData {
            account_id,
            status: FeedStatus::Connected,
        }),
    );

    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                state.registry.touch(conn_id);
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Ping) => {
                        state.registry.send_to(conn_id, &Event::Pong);
                    }
                    Ok(ClientMessage::Pong) => {}
                    Err(e) => {
                        debug!("Unparseable message from {}: {}", conn_id, e);
                    }
                }
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                state.registry.touch(conn_id);
            }
            Ok(Message::Close(_)) => {
                info!("Viewer disconnecting: {}", conn_id);
                break;
            }
            Err(e) => {
                error!("WebSocket error for {}: {}", conn_id, e);
                break;
            }
            _ => {}
        }
    }

    state.registry.deregister(conn_id);
    send_task.abort();
    info!("Viewer disconnected: {} (account {})", conn_id, account_id);
}

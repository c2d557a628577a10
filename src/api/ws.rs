//! Live event stream for dashboards.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::AppState;
use crate::events::DeskEvent;
use crate::pipeline::Desk;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket client connecting");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn hello(desk: &Desk) -> DeskEvent {
    let open_tickets = match desk.db().open_tickets().await {
        Ok(open) => open.len(),
        Err(e) => {
            warn!(error = %e, "Could not count open tickets for hello");
            0
        }
    };
    DeskEvent::Hello { open_tickets }
}

async fn send_event(socket: &mut WebSocket, event: &DeskEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize desk event");
            true
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    // Subscribe before the hello so nothing published in between is lost.
    let mut rx = state.desk.events().subscribe();

    if !send_event(&mut socket, &hello(&state.desk).await).await {
        warn!("Failed to send hello, client disconnected");
        return;
    }
    info!("WebSocket client connected");

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !send_event(&mut socket, &event).await {
                            debug!("Client disconnected during send");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(missed = n, "WS client lagged behind broadcast");
                        // A fresh hello lets the client refetch.
                        if !send_event(&mut socket, &hello(&state.desk).await).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    // The stream is one-way; client text is ignored.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

// src/handlers/live_handler.rs
//
// WebSocket side of the live channel. Observers subscribe to one ride per
// connection and receive location, status and code-verified events as JSON
// text frames. Frames are notifications, not state: a client that was
// disconnected re-fetches the ride when it rejoins.
use axum::{
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use nanoid::nanoid;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    errors::{RideError, RideResult},
    services::live_channel::RideEvent,
    state::AppState,
};

/// Upgrades `GET /rides/{id}/live` to a WebSocket. Events carry no pickup
/// code, so subscription needs a valid ride id but no caller identity.
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    Path(ride_id): Path<String>,
    ws: WebSocketUpgrade,
) -> RideResult<Response> {
    if state.store.get(&ride_id).await?.is_none() {
        return Err(RideError::ride_not_found(&ride_id));
    }

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, ride_id)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, ride_id: String) {
    let observer_id = nanoid!(10);
    info!("Observer {} joined ride {}", observer_id, ride_id);

    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.events.join(&ride_id).await;

    // Connection confirmation
    let joined = RideEvent::Joined {
        ride_id: ride_id.clone(),
        observer_id: observer_id.clone(),
    };
    match serde_json::to_string(&joined) {
        Ok(json) => {
            if sender.send(Message::Text(json)).await.is_err() {
                warn!("Observer {} dropped before the join confirmation", observer_id);
                drop(rx);
                state.events.leave(&ride_id).await;
                return;
            }
        }
        Err(e) => {
            warn!("Could not serialize join event: {}", e);
        }
    }

    // Forward hub events to this observer until either side goes away
    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => {
                        if sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Could not serialize ride event: {}", e),
                },
                // Falling behind loses the oldest frames; delivery resumes
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Observer lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Drain the client side; no commands arrive over this socket
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.events.leave(&ride_id).await;
    info!("Observer {} left ride {}", observer_id, ride_id);
}

//! WebSocket viewers of the shared tail.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::hub::{Outbound, Subscription};
use crate::state::AppState;

/// Handle WebSocket upgrade request for /ws.
pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Result<Response, ServerError> {
    let subscription = state.hub().register()?;

    Ok(ws.on_upgrade(move |socket| handle_ws_connection(socket, state, subscription)))
}

/// Serve one viewer until it goes away.
async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>, mut subscription: Subscription) {
    let id = subscription.id();
    let liveness_timeout = state.config().liveness_timeout;
    let shutdown = state.shutdown_token().clone();
    let (mut sender, mut receiver) = socket.split();
    let mut last_heard = Instant::now();

    info!(subscriber = id, "viewer connected");

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }

            outbound = subscription.recv() => {
                let message = match outbound {
                    Some(Outbound::Frame(frame)) => Message::Text(frame),
                    Some(Outbound::Probe) => {
                        if is_expired(last_heard, liveness_timeout) {
                            warn!(subscriber = id, "viewer unresponsive, closing");
                            let _ = sender.send(Message::Close(None)).await;
                            break;
                        }
                        Message::Ping(Bytes::new())
                    }
                    None => break,
                };
                if let Err(e) = sender.send(message).await {
                    debug!(subscriber = id, error = %e, "send failed");
                    break;
                }
            }

            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    // Data frames carry nothing for us; any frame proves liveness.
                    Some(Ok(_)) => last_heard = Instant::now(),
                    Some(Err(e)) => {
                        debug!(subscriber = id, error = %e, "receive failed");
                        break;
                    }
                }
            }
        }
    }

    drop(subscription);
    info!(subscriber = id, "viewer disconnected");
}

fn is_expired(last_heard: Instant, timeout: Option<Duration>) -> bool {
    timeout.is_some_and(|timeout| last_heard.elapsed() > timeout)
}

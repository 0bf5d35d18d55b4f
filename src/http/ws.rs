use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tracing::{debug, warn};

use crate::app::Application;

pub async fn handler(ws: WebSocketUpgrade, State(app): State<Arc<Application>>) -> Response {
    ws.on_upgrade(move |socket| fan_out(socket, app))
}

async fn fan_out(mut socket: WebSocket, app: Arc<Application>) {
    let mut sub = app.bus.subscribe();
    debug!(subscriber_id = sub.id, "websocket client subscribed to event bus");

    loop {
        tokio::select! {
            event = sub.recv() => {
                let Some(event) = event else { break };
                let payload = match serde_json::to_string(&event) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "failed to serialize bus event");
                        continue;
                    }
                };
                if socket.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    app.bus.unsubscribe(sub.id);
}

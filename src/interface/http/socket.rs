use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::handlers::AppState;
use crate::application::SubscriptionRegistry;
use crate::domain::{ClientMessage, SubscriberId};

/// Handler for GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let registry = state.monitoring_service.registry().clone();
    ws.on_upgrade(move |socket| handle_socket(socket, registry))
}

async fn handle_socket(socket: WebSocket, registry: SubscriptionRegistry) {
    let (mut sink, mut stream) = socket.split();
    let (outbox, mut inbox) = mpsc::unbounded_channel();
    let subscriber = registry.connect(outbox);
    info!("Client connected ({})", subscriber);

    let mut writer = tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode update: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            // outbox closed by shutdown, or the peer stopped accepting writes
            _ = &mut writer => break,
        };
        match frame {
            Some(Ok(Message::Text(text))) => handle_frame(&registry, subscriber, text.as_str()),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("WebSocket error: {}", e);
                break;
            }
        }
    }

    registry.disconnect(subscriber);
    writer.abort();
    info!("Client disconnected ({})", subscriber);
}

/// Apply one inbound frame. Malformed frames are logged and dropped.
fn handle_frame(registry: &SubscriptionRegistry, subscriber: SubscriberId, text: &str) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("Error parsing WebSocket message: {}", e);
            return;
        }
    };
    if message.container_id().is_empty() {
        warn!("Ignoring message without a container id from {}", subscriber);
        return;
    }

    debug!("{} sent {:?}", subscriber, message);
    match message {
        ClientMessage::Subscribe {
            container_id,
            refresh_rate,
        } => registry.subscribe(subscriber, container_id, refresh_rate),
        ClientMessage::Unsubscribe { container_id } => registry.unsubscribe(subscriber, &container_id),
    }
}

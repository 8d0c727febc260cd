//! WebSocket endpoint for the on-device front end.
//!
//! - Agent → UI: lifecycle notifications as JSON
//! - UI → Agent: commands, either a bare tag or `{"command": "..."}`

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};

use crate::api::AppState;
use crate::command::{Command, CommandQueue};
use crate::notify::NotificationEvent;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let events = state.events.subscribe();
    let commands = state.orchestrator.commands().clone();
    ws.on_upgrade(move |socket| handle_socket(socket, events, commands))
}

/// Handle a WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    mut rx: broadcast::Receiver<NotificationEvent>,
    commands: Arc<CommandQueue>,
) {
    info!("New WebSocket client connected");

    let (mut sender, mut receiver) = socket.split();

    // Forward notifications to this client
    let mut send_task = tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("WebSocket client lagging, skipped {} event(s)", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize event: {:?}", e);
                }
            }
        }
    });

    // Queue incoming commands for the next poll
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => queue_message(&commands, text.as_str()),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish (connection closed or error)
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("WebSocket client disconnected");
}

fn queue_message(commands: &CommandQueue, text: &str) {
    match Command::parse_message(text) {
        Command::Unknown => warn!("Ignoring unknown WebSocket command: {}", text.trim()),
        command => {
            info!(command = %command, "Command received over WebSocket");
            commands.push(command);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{create_router, test_support::offline_state};
    use crate::notify::EventSink;
    use tempfile::TempDir;
    use tokio_tungstenite::tungstenite;

    #[test]
    fn test_queue_message_filters_unknown() {
        let queue = CommandQueue::new();
        queue_message(&queue, "install_now");
        queue_message(&queue, r#"{"command": "rollback"}"#);
        queue_message(&queue, "reboot");
        assert_eq!(queue.drain(), vec![Command::InstallNow, Command::Rollback]);
    }

    #[tokio::test]
    async fn test_socket_streams_events_and_queues_commands() {
        let temp = TempDir::new().unwrap();
        let state = offline_state(&temp);
        let app = create_router(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
            .await
            .unwrap();

        socket
            .send(tungstenite::Message::Text("cancel_update".into()))
            .await
            .unwrap();

        // The subscription exists once the upgrade completed.
        state
            .events
            .publish(NotificationEvent::update_in_progress("1.1.0", 30));

        let frame = tokio::time::timeout(std::time::Duration::from_secs(5), socket.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let event: NotificationEvent = serde_json::from_str(frame.to_text().unwrap()).unwrap();
        assert_eq!(event.progress, Some(30));

        for _ in 0..100 {
            if !state.orchestrator.commands().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(
            state.orchestrator.commands().drain(),
            vec![Command::CancelUpdate]
        );
    }
}

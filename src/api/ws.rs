//! WebSocket feed of workflow events, with operator actions in the other direction.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::AppState;
use crate::workflow::BatchController;

/// Actions a client can send over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum WorkflowAction {
    StartBatch,
    Edit,
    SubmitEdit { instructions: String },
    CancelEdit,
    Send,
    Retry,
    Cancel,
    Reset,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state.controller))
}

async fn handle_socket(mut socket: WebSocket, controller: Arc<BatchController>) {
    info!("WebSocket client connected");

    // Subscribe first so nothing between the sync and the first event is lost
    let mut rx = controller.subscribe();

    if !send_sync(&mut socket, &controller).await {
        warn!("Failed to send initial sync, client disconnected");
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                debug!("Client disconnected during send");
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(missed = n, "WS client lagged behind broadcast");
                        if !send_sync(&mut socket, &controller).await {
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
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&text, &controller);
                    }
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
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

async fn send_sync(socket: &mut WebSocket, controller: &BatchController) -> bool {
    let snapshot = controller.snapshot().await;
    let sync = serde_json::json!({ "type": "workflow_sync", "workflow": snapshot });
    socket.send(Message::Text(sync.to_string().into())).await.is_ok()
}

/// Run the action in the background; its outcome reaches the client as events.
fn handle_client_message(text: &str, controller: &Arc<BatchController>) {
    let action = match serde_json::from_str::<WorkflowAction>(text) {
        Ok(action) => action,
        Err(e) => {
            debug!(error = %e, text = text, "Unrecognized WS message from client");
            return;
        }
    };

    let controller = Arc::clone(controller);
    tokio::spawn(async move {
        debug!(action = ?action, "WS action");
        let result = match action {
            WorkflowAction::StartBatch => controller.start_batch().await.map(drop),
            WorkflowAction::Edit => controller.edit().await.map(drop),
            WorkflowAction::SubmitEdit { instructions } => {
                match controller.set_edit_instructions(instructions).await {
                    Ok(_) => controller.submit_edit().await.map(drop),
                    Err(e) => Err(e),
                }
            }
            WorkflowAction::CancelEdit => controller.cancel_edit().await.map(drop),
            WorkflowAction::Send => controller.send().await.map(drop),
            WorkflowAction::Retry => controller.retry().await.map(drop),
            WorkflowAction::Cancel => controller.cancel_in_flight().await,
            WorkflowAction::Reset => controller.reset().await.map(drop),
        };
        if let Err(e) = result {
            warn!(error = %e, "WS action failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_parse_from_tagged_json() {
        assert!(matches!(
            serde_json::from_str::<WorkflowAction>(r#"{"action": "send"}"#),
            Ok(WorkflowAction::Send)
        ));
        match serde_json::from_str::<WorkflowAction>(
            r#"{"action": "submit_edit", "instructions": "make formal"}"#,
        ) {
            Ok(WorkflowAction::SubmitEdit { instructions }) => assert_eq!(instructions, "make formal"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(serde_json::from_str::<WorkflowAction>(r#"{"action": "explode"}"#).is_err());
    }
}

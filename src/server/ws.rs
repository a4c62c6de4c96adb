use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::api::AppState;
use crate::errors::OrchestratorError;
use crate::orchestrator::{ClientCommand, ClientEvent, Orchestrator};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    pub user_id: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params))
}

/// A fresh session id per connection. Clients never choose it, so no two
/// sockets share a session and closing one cannot touch another's work.
fn socket_session_id() -> String {
    format!("ws:{}", uuid::Uuid::new_v4())
}

/// One socket is one session. Closing the socket closes the session.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, params: WsParams) {
    let session_id = socket_session_id();
    let user_id = params
        .user_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "anonymous".to_string());
    info!(session_id, user_id, "client connected");

    let orchestrator = state.orchestrator.clone();
    let events = orchestrator.open_session(&session_id);
    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, events, &orchestrator, &session_id, &user_id).await;

    orchestrator.close_session(&session_id);
    info!(session_id, "client disconnected");
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Forwards session events to the client, hands client commands to the
/// orchestrator and pings periodically. If no Pong is received within
/// [`PONG_TIMEOUT`] after a Ping is sent, the connection is considered dead.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut events: mpsc::UnboundedReceiver<ClientEvent>,
    orchestrator: &Orchestrator,
    session_id: &str,
    user_id: &str,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    debug!(session_id, "pong timeout");
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            event = events.recv() => {
                let Some(event) = event else { break };
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(session_id, error = %e, "failed to serialize event"),
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let orchestrator = orchestrator.clone();
                        let session_id = session_id.to_string();
                        let user_id = user_id.to_string();
                        let text = text.to_string();
                        // Commands can wait on the classifier; keep the loop free.
                        tokio::spawn(async move {
                            handle_client_message(&orchestrator, &session_id, &user_id, &text).await;
                        });
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(session_id, error = %e, "socket error");
                        break;
                    }
                }
            }
        }
    }
}

/// Parse and execute one client message. Outcomes reach the client as
/// session events.
pub async fn handle_client_message(
    orchestrator: &Orchestrator,
    session_id: &str,
    user_id: &str,
    text: &str,
) {
    let command = match serde_json::from_str::<ClientCommand>(text) {
        Ok(command) => command,
        Err(e) => {
            debug!(session_id, error = %e, "invalid client message");
            orchestrator.notify(session_id, format!("Unrecognized message: {}", e));
            return;
        }
    };

    let result = match command {
        ClientCommand::SendCommand(mut request) => {
            if request.user_id.trim().is_empty() {
                request.user_id = user_id.to_string();
            }
            orchestrator.submit(session_id, request).await.map(|_| ())
        }
        ClientCommand::RefreshJob { job_id } => {
            orchestrator
                .refresh_job(session_id, &job_id)
                .await
                .map(|job| {
                    orchestrator.notify(
                        session_id,
                        format!("Job {} is {}", job.id, job.status),
                    )
                })
        }
        ClientCommand::RetryJob { job_id } => {
            orchestrator.retry_job(session_id, &job_id).await.map(|_| ())
        }
    };

    if let Err(e) = result {
        match &e {
            OrchestratorError::Store(store) => warn!(session_id, error = %store, "client command failed"),
            OrchestratorError::NotRetryable { .. } => debug!(session_id, error = %e, "retry refused"),
        }
        orchestrator.notify(session_id, e.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChatopsConfig;
    use crate::store::SqliteJobStore;
    use chatops_common::JobStatus;

    fn orchestrator() -> Orchestrator {
        let store = Arc::new(SqliteJobStore::new_in_memory().unwrap());
        Orchestrator::from_config(&ChatopsConfig::default(), store).unwrap()
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event in time")
            .expect("open channel")
    }

    async fn collect_until<F>(rx: &mut mpsc::UnboundedReceiver<ClientEvent>, done: F) -> Vec<ClientEvent>
    where
        F: Fn(&ClientEvent) -> bool,
    {
        let mut events = Vec::new();
        loop {
            let event = next_event(rx).await;
            let stop = done(&event);
            events.push(event);
            if stop {
                return events;
            }
        }
    }

    #[test]
    fn test_socket_sessions_are_never_shared() {
        let a = socket_session_id();
        let b = socket_session_id();
        assert!(a.starts_with("ws:"));
        assert_ne!(a, b);

        // A client-supplied session id is not part of the query.
        let params: WsParams =
            serde_json::from_value(serde_json::json!({"user_id": "carol", "session_id": "http:alice"}))
                .unwrap();
        assert_eq!(params.user_id.as_deref(), Some("carol"));
    }

    #[tokio::test]
    async fn test_send_command_uses_session_user() {
        let orchestrator = orchestrator();
        let mut rx = orchestrator.open_session("ws:1");

        handle_client_message(
            &orchestrator,
            "ws:1",
            "carol",
            r#"{"type":"sendCommand","data":{"command":"restart frontend"}}"#,
        )
        .await;

        let events = collect_until(&mut rx, |e| matches!(e, ClientEvent::StatusUpdated { .. })).await;
        assert_eq!(events[0], ClientEvent::TypingStarted);
        let job = match events.last() {
            Some(ClientEvent::StatusUpdated { job }) => job.clone(),
            other => panic!("Expected StatusUpdated, got {other:?}"),
        };
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.user_id, "carol");
        orchestrator.close_session("ws:1");
    }

    #[tokio::test]
    async fn test_busy_session_gets_rejection_event() {
        let orchestrator = orchestrator();
        let mut rx = orchestrator.open_session("ws:2");
        let send = r#"{"type":"sendCommand","data":{"command":"restart frontend"}}"#;

        handle_client_message(&orchestrator, "ws:2", "carol", send).await;
        handle_client_message(&orchestrator, "ws:2", "carol", send).await;

        let events = collect_until(&mut rx, |e| matches!(e, ClientEvent::BusyRejected { .. })).await;
        match events.last() {
            Some(ClientEvent::BusyRejected { active_job_id, .. }) => assert!(active_job_id.is_some()),
            other => panic!("Expected BusyRejected, got {other:?}"),
        }
        orchestrator.close_session("ws:2");
    }

    #[tokio::test]
    async fn test_invalid_message_is_answered() {
        let orchestrator = orchestrator();
        let mut rx = orchestrator.open_session("ws:3");
        handle_client_message(&orchestrator, "ws:3", "carol", "not json").await;
        match next_event(&mut rx).await {
            ClientEvent::ResponseAdded { text, .. } => assert!(text.starts_with("Unrecognized message")),
            other => panic!("Expected ResponseAdded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refresh_unknown_job_reports_error() {
        let orchestrator = orchestrator();
        let mut rx = orchestrator.open_session("ws:4");
        handle_client_message(
            &orchestrator,
            "ws:4",
            "carol",
            r#"{"type":"refreshJob","data":{"job_id":"missing"}}"#,
        )
        .await;
        match next_event(&mut rx).await {
            ClientEvent::ResponseAdded { text, .. } => assert!(text.contains("not found")),
            other => panic!("Expected ResponseAdded, got {other:?}"),
        }
    }
}

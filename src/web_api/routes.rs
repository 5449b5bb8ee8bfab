//! API Routes

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::{ApiResponse, TrackHistoryResponse};
use crate::session_registry::SessionSnapshot;
use crate::state::AppState;
use crate::stream_orchestrator::{InboundEvent, StreamOrchestrator};

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Sessions
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/:session_id/tracks/:track_id", get(get_track_history))
        // Stream
        .route("/ws", get(websocket_handler))
        .with_state(state)
}

// ========================================
// Sessions
// ========================================

async fn list_sessions(State(state): State<AppState>) -> Json<ApiResponse<Vec<SessionSnapshot>>> {
    Json(ApiResponse::success(state.registry.sessions().await))
}

async fn get_track_history(
    State(state): State<AppState>,
    Path((session_id, track_id)): Path<(String, u64)>,
) -> Result<Json<ApiResponse<TrackHistoryResponse>>> {
    let history = state
        .tracker
        .history(&session_id, track_id)
        .ok_or_else(|| Error::NotFound(format!("track {} in session {}", track_id, session_id)))?;

    Ok(Json(ApiResponse::success(TrackHistoryResponse {
        session_id,
        track_id,
        history: history.into_iter().map(|(x, y)| [x, y]).collect(),
    })))
}

// ========================================
// WebSocket
// ========================================

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut sender, receiver) = socket.split();

    let orchestrator = Arc::new(StreamOrchestrator::new(state));
    let (mut conn, mut rx) = orchestrator.open().await;
    let conn_id = conn.id;

    // Forward queued replies and broadcasts to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    let inbound = receiver.filter_map(move |result| async move {
        match result {
            Ok(Message::Text(text)) => Some(InboundEvent::Text(text)),
            Ok(Message::Close(_)) => Some(InboundEvent::Closed),
            Ok(Message::Ping(data)) => {
                // Pong is handled automatically by axum
                tracing::trace!("Received ping: {:?}", data);
                None
            }
            Ok(_) => {
                tracing::debug!(connection_id = %conn_id, "Ignoring non-text frame");
                None
            }
            Err(e) => Some(InboundEvent::Failed(e.to_string())),
        }
    });

    let driver = orchestrator.clone();
    let mut recv_task = tokio::spawn(async move {
        driver.run(&mut conn, inbound).await;
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    orchestrator.close(&conn_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference_client::{BoundaryError, InferenceBackend, InferenceRequest, InferenceResponse};
    use crate::state::{AppConfig, GuardLimits};
    use async_trait::async_trait;

    struct OfflineBackend;

    #[async_trait]
    impl InferenceBackend for OfflineBackend {
        async fn infer(&self, _request: &InferenceRequest) -> std::result::Result<InferenceResponse, BoundaryError> {
            Err(BoundaryError::Connection("offline".to_string()))
        }

        async fn health_check(&self) -> bool {
            false
        }
    }

    fn state() -> AppState {
        let config = AppConfig {
            inference_url: "http://localhost:3000".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            return_annotated: false,
        };
        AppState::new(config, GuardLimits::default(), Arc::new(OfflineBackend))
    }

    #[tokio::test]
    async fn test_health_reports_inference_and_connections() {
        let state = state();
        let (id, _rx) = state.registry.connect().await;
        state.registry.activate(&id, "s1").await;

        let Json(health) = super::super::health_check(State(state)).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.active_connections, 1);
        assert!(!health.inference_connected);
    }

    #[tokio::test]
    async fn test_list_sessions() {
        let state = state();
        let (id, _rx) = state.registry.connect().await;
        state.registry.activate(&id, "cam-7").await;

        let Json(resp) = list_sessions(State(state)).await;
        let sessions = resp.data.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, "cam-7");
    }

    #[tokio::test]
    async fn test_track_history_lookup() {
        let state = state();
        let id = state.tracker.assign("s1", [0.0, 0.0, 20.0, 20.0]);
        state.tracker.assign("s1", [4.0, 0.0, 24.0, 20.0]);

        let Json(resp) = get_track_history(State(state.clone()), Path(("s1".to_string(), id)))
            .await
            .unwrap();
        let track = resp.data.unwrap();
        assert_eq!(track.history, vec![[10.0, 10.0], [14.0, 10.0]]);

        let missing = get_track_history(State(state), Path(("s1".to_string(), id + 100))).await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }
}

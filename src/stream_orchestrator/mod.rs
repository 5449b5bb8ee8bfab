//! StreamOrchestrator - Per-Connection Message Loop
//!
//! ## Responsibilities
//!
//! - Drive the CONNECTING -> ACTIVE -> CLOSED lifecycle of one connection
//! - Dispatch inbound messages by kind (handshake, frame, ping)
//! - Frame pipeline: validation, rate admission, inference, sanitization, tracking
//! - Degrade every per-frame failure into an error-bearing result
//! - Session teardown on close
//!
//! Messages of one connection are handled strictly in order; the only
//! suspension inside the frame pipeline is the inference call.

mod types;

pub use types::*;

use crate::detection_filter::{validate_frame_shape, DetectionFilter};
use crate::error::Error;
use crate::frame_validator::{validate_session_id, DecodedFrame, FramePayloadValidator};
use crate::inference_client::{BoundaryError, InferenceRequest};
use crate::state::AppState;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

const CONNECTED_MESSAGE: &str = "Connected to streaming server";

/// One client connection as seen by the orchestrator
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: Uuid,
    /// Set once the handshake succeeds
    pub session_id: Option<String>,
}

/// StreamOrchestrator instance
pub struct StreamOrchestrator {
    state: AppState,
    validator: FramePayloadValidator,
    filter: DetectionFilter,
}

impl StreamOrchestrator {
    /// Create new StreamOrchestrator over the shared application state
    pub fn new(state: AppState) -> Self {
        let validator = FramePayloadValidator::new(state.limits.clone(), state.rate_budget.clone());
        let filter = DetectionFilter::new(state.limits.clone());
        Self {
            state,
            validator,
            filter,
        }
    }

    /// Register a new connection in CONNECTING state
    pub async fn open(&self) -> (Connection, mpsc::UnboundedReceiver<String>) {
        let (id, rx) = self.state.registry.connect().await;
        (
            Connection {
                id,
                session_id: None,
            },
            rx,
        )
    }

    /// Handle one inbound text message, returning the reply if there is one
    pub async fn handle_message(&self, conn: &mut Connection, text: &str) -> Option<OutboundMessage> {
        let message = match InboundMessage::parse(text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(connection_id = %conn.id, error = %e, "Discarding message");
                return None;
            }
        };

        let Some(session_id) = conn.session_id.clone() else {
            return self.handle_handshake(conn, message).await;
        };

        match message {
            InboundMessage::Frame { data } => Some(self.process_frame(conn, &session_id, data).await),
            InboundMessage::Ping => Some(OutboundMessage::Pong),
            InboundMessage::Handshake { .. } => {
                tracing::debug!(session_id = %session_id, "Ignoring repeated handshake");
                None
            }
            InboundMessage::Unknown(kind) => {
                tracing::debug!(session_id = %session_id, kind = %kind, "Ignoring unknown message");
                None
            }
        }
    }

    async fn handle_handshake(&self, conn: &mut Connection, message: InboundMessage) -> Option<OutboundMessage> {
        let InboundMessage::Handshake { session_id } = message else {
            tracing::debug!(connection_id = %conn.id, "Message before handshake ignored");
            return None;
        };

        if let Err(e) = validate_session_id(&session_id, self.state.limits.max_session_id_length) {
            let err = Error::Protocol(e.to_string());
            tracing::warn!(connection_id = %conn.id, error = %err, "Rejected handshake");
            return None;
        }

        if !self.state.registry.activate(&conn.id, &session_id).await {
            tracing::warn!(connection_id = %conn.id, "Handshake on a connection that is not connecting");
            return None;
        }

        conn.session_id = Some(session_id.clone());
        Some(OutboundMessage::Connected {
            session_id,
            message: CONNECTED_MESSAGE.to_string(),
        })
    }

    /// Run one frame through the full pipeline
    async fn process_frame(&self, conn: &Connection, session_id: &str, data: Value) -> OutboundMessage {
        let now = Instant::now();

        // Image decoding is CPU-bound; keep it off the async workers
        let validated = tokio::task::spawn_blocking({
            let validator = self.validator.clone();
            let session_id = session_id.to_string();
            move || {
                let result = validator.validate(&data, &session_id, now);
                (result, data)
            }
        })
        .await;

        let (result, data) = match validated {
            Ok(v) => v,
            Err(e) => {
                let err = Error::Internal(format!("Task join error: {}", e));
                tracing::error!(session_id = %session_id, error = %err, "Frame validation aborted");
                return OutboundMessage::failed_frame(session_id, err.to_string());
            }
        };

        let frame = match result {
            Ok(frame) => frame,
            Err(rejection) => {
                let err = Error::from(rejection);
                if matches!(err, Error::RateLimited { .. }) {
                    tracing::debug!(session_id = %session_id, "Frame dropped by rate limit");
                } else {
                    tracing::warn!(session_id = %session_id, error = %err, "Frame rejected");
                }
                return OutboundMessage::failed_frame(session_id, err.to_string());
            }
        };

        // validated above, so the payload is a string
        let encoded = match data {
            Value::String(s) => s,
            _ => String::new(),
        };
        let request = InferenceRequest {
            frame: encoded,
            session_id: session_id.to_string(),
            return_annotated: self.state.config.return_annotated,
        };

        let response = match tokio::time::timeout(
            self.state.limits.inference_timeout,
            self.state.inference.infer(&request),
        )
        .await
        {
            Ok(Ok(resp)) => {
                // counted once the detector has answered
                let rate = self.state.rate_budget.current_rate(session_id, now);
                self.state.registry.record_frame(&conn.id, rate).await;

                match resp.remote_error() {
                    Some(remote) => Err(BoundaryError::Remote(remote.to_string())),
                    None => Ok(resp),
                }
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BoundaryError::Timeout),
        };

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                let err = Error::Transport(e);
                tracing::error!(
                    session_id = %session_id,
                    retryable = err.is_retryable(),
                    error = %err,
                    "Inference failed"
                );
                return OutboundMessage::failed_frame(session_id, err.to_string());
            }
        };

        check_frame_shape(session_id, &response.frame_shape, &frame);

        let batch = self.filter.sanitize(&response.detections, frame.height, frame.width);
        for warning in &batch.warnings {
            tracing::warn!(session_id = %session_id, warning = %warning, "Detection sanitized");
        }

        let mut detections = batch.detections;
        self.state.tracker.assign_all(session_id, &mut detections);

        tracing::debug!(
            session_id = %session_id,
            detections = detections.len(),
            "Frame processed"
        );

        OutboundMessage::DetectionResult {
            session_id: session_id.to_string(),
            detections,
            annotated_frame: response.annotated_frame.filter(|f| !f.is_empty()),
            timestamp: response.timestamp,
            error: None,
        }
    }

    /// Consume inbound events until the client goes away
    ///
    /// Replies are queued on the connection's outbound channel. Teardown is
    /// left to [`StreamOrchestrator::close`] so it also runs when this future
    /// is cancelled.
    pub async fn run<S>(&self, conn: &mut Connection, inbound: S)
    where
        S: Stream<Item = InboundEvent>,
    {
        futures::pin_mut!(inbound);

        while let Some(event) = inbound.next().await {
            match event {
                InboundEvent::Text(text) => {
                    let Some(reply) = self.handle_message(conn, &text).await else {
                        continue;
                    };
                    if !self.state.registry.send(&conn.id, &reply).await {
                        tracing::warn!(connection_id = %conn.id, "Outbound channel closed");
                        break;
                    }
                }
                InboundEvent::Closed => break,
                InboundEvent::Failed(e) => {
                    tracing::warn!(connection_id = %conn.id, error = %e, "Connection error");
                    break;
                }
            }
        }
    }

    /// Tear down a connection and, if it was the session's last, its per-session state
    pub async fn close(&self, connection_id: &Uuid) {
        let Some(departure) = self.state.registry.disconnect(connection_id).await else {
            return;
        };
        if departure.last_for_session {
            self.state.rate_budget.reset(&departure.session_id);
            self.state.tracker.reset_session(&departure.session_id);
        }
    }
}

fn check_frame_shape(session_id: &str, shape: &Value, frame: &DecodedFrame) {
    match validate_frame_shape(shape) {
        Ok((height, width)) if (height, width) != (frame.height, frame.width) => {
            tracing::warn!(
                session_id = %session_id,
                reported_height = height,
                reported_width = width,
                height = frame.height,
                width = frame.width,
                "Inference frame shape differs from decoded frame"
            );
        }
        Ok(_) => {}
        Err(e) => tracing::debug!(session_id = %session_id, error = %e, "Unusable frame shape"),
    }
}

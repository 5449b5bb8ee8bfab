//! InferenceClient - Detector Boundary Adapter
//!
//! ## Responsibilities
//!
//! - Send frames to the external detection service
//! - Parse raw detection responses
//! - Translate timeouts, connection failures and error statuses into typed errors
//!
//! The detector is opaque: its detections are untrusted and go through the
//! DetectionFilter before anything else looks at them.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Frame sent to the detector
#[derive(Debug, Clone, Serialize)]
pub struct InferenceRequest {
    /// Encoded frame exactly as the client sent it
    pub frame: String,
    pub session_id: String,
    pub return_annotated: bool,
}

/// Detector reply; every field is optional on the wire
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceResponse {
    /// Raw detection records, not yet sanitized
    #[serde(default)]
    pub detections: Vec<Value>,

    /// `[height, width]` as the detector saw the frame
    #[serde(default)]
    pub frame_shape: Value,

    #[serde(default)]
    pub timestamp: f64,

    #[serde(default)]
    pub session_id: String,

    #[serde(default)]
    pub annotated_frame: Option<String>,

    #[serde(default)]
    pub error: Option<String>,
}

impl InferenceResponse {
    /// Error reported by the detector itself, if any
    pub fn remote_error(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }
}

/// Failure at the detector boundary
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BoundaryError {
    #[error("Processing timeout")]
    Timeout,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Processing error: {0}")]
    Status(u16),

    #[error("Invalid inference response: {0}")]
    Decode(String),

    #[error("Inference error: {0}")]
    Remote(String),
}

/// External detector
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Run detection on one frame
    async fn infer(&self, request: &InferenceRequest) -> std::result::Result<InferenceResponse, BoundaryError>;

    /// Whether the detector answers its health probe
    async fn health_check(&self) -> bool;
}

/// Request envelope expected by the detection service
#[derive(Serialize)]
struct Envelope<'a> {
    data: &'a InferenceRequest,
}

/// HTTP client for the detection service
pub struct HttpInferenceClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpInferenceClient {
    /// Create new client with the default 30s timeout
    pub fn new(base_url: String) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    /// Create new client with custom timeout
    pub fn with_timeout(base_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Get base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn classify(err: reqwest::Error) -> BoundaryError {
    if err.is_timeout() {
        BoundaryError::Timeout
    } else if err.is_decode() {
        BoundaryError::Decode(err.to_string())
    } else {
        BoundaryError::Connection(err.to_string())
    }
}

#[async_trait]
impl InferenceBackend for HttpInferenceClient {
    async fn infer(&self, request: &InferenceRequest) -> std::result::Result<InferenceResponse, BoundaryError> {
        let url = format!("{}/process_video_frame", self.base_url);

        let resp = self
            .client
            .post(&url)
            .json(&Envelope { data: request })
            .send()
            .await
            .map_err(|e| {
                let err = classify(e);
                tracing::error!(session_id = %request.session_id, error = %err, "Inference request failed");
                err
            })?;

        if resp.status() != reqwest::StatusCode::OK {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(
                session_id = %request.session_id,
                status = %status,
                body = %body,
                "Inference service returned an error status"
            );
            return Err(BoundaryError::Status(status.as_u16()));
        }

        resp.json::<InferenceResponse>().await.map_err(classify)
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/healthz", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

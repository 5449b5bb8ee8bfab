//! Data models for the HTTP API

use serde::{Deserialize, Serialize};

/// API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    pub active_connections: u64,
    pub inference_connected: bool,
}

/// Centroid history of one track
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackHistoryResponse {
    pub session_id: String,
    pub track_id: u64,
    /// `[x, y]` pairs, oldest first
    pub history: Vec<[f64; 2]>,
}

//! Application state
//!
//! Holds all shared components, configuration and guardrail limits

use crate::centroid_tracker::CentroidTracker;
use crate::inference_client::InferenceBackend;
use crate::rate_budget::{RateBudget, DEFAULT_MAX_PER_SECOND};
use crate::session_registry::SessionRegistry;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Inference service URL
    pub inference_url: String,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Ask the inference service for an annotated frame
    pub return_annotated: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            inference_url: std::env::var("INFERENCE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8765),
            return_annotated: std::env::var("RETURN_ANNOTATED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
        }
    }
}

/// Limits enforced on inbound frames and outbound detections
#[derive(Debug, Clone)]
pub struct GuardLimits {
    /// Maximum encoded and decoded frame size in bytes
    pub max_frame_size: usize,
    /// Minimum encoded payload length
    pub min_encoded_length: usize,
    pub min_frame_dimension: u32,
    pub max_frame_dimension: u32,
    pub max_fps_per_session: u32,
    pub min_confidence: f64,
    /// Minimum bbox area in px² after clamping
    pub min_bbox_area: f64,
    pub max_detections_per_frame: usize,
    /// Boxes covering more than this share of the frame are flagged
    pub max_bbox_size_ratio: f64,
    /// Centroid distance (px) under which a detection keeps its track id
    pub track_match_distance: f64,
    pub track_history_depth: usize,
    pub inference_timeout: Duration,
    pub max_session_id_length: usize,
    pub stats_interval: Duration,
}

impl Default for GuardLimits {
    fn default() -> Self {
        Self {
            max_frame_size: 10 * 1024 * 1024,
            min_encoded_length: 100,
            min_frame_dimension: 32,
            max_frame_dimension: 4096,
            max_fps_per_session: DEFAULT_MAX_PER_SECOND,
            min_confidence: 0.3,
            min_bbox_area: 100.0,
            max_detections_per_frame: 100,
            max_bbox_size_ratio: 0.95,
            track_match_distance: 50.0,
            track_history_depth: 30,
            inference_timeout: Duration::from_secs(30),
            max_session_id_length: 256,
            stats_interval: Duration::from_millis(1000),
        }
    }
}

impl GuardLimits {
    /// Defaults overridden by any limit present in the environment
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_frame_size: env_or("MAX_FRAME_SIZE", d.max_frame_size),
            min_encoded_length: env_or("MIN_ENCODED_LENGTH", d.min_encoded_length),
            min_frame_dimension: env_or("MIN_FRAME_DIMENSION", d.min_frame_dimension),
            max_frame_dimension: env_or("MAX_FRAME_DIMENSION", d.max_frame_dimension),
            max_fps_per_session: env_or("MAX_FPS_PER_SESSION", d.max_fps_per_session),
            min_confidence: env_or("MIN_CONFIDENCE", d.min_confidence),
            min_bbox_area: env_or("MIN_BBOX_AREA", d.min_bbox_area),
            max_detections_per_frame: env_or("MAX_DETECTIONS_PER_FRAME", d.max_detections_per_frame),
            max_bbox_size_ratio: env_or("MAX_BBOX_SIZE_RATIO", d.max_bbox_size_ratio),
            track_match_distance: env_or("TRACK_MATCH_DISTANCE", d.track_match_distance),
            track_history_depth: env_or("TRACK_HISTORY_DEPTH", d.track_history_depth),
            inference_timeout: Duration::from_secs(env_or(
                "INFERENCE_TIMEOUT_SECS",
                d.inference_timeout.as_secs(),
            )),
            max_session_id_length: env_or("MAX_SESSION_ID_LENGTH", d.max_session_id_length),
            stats_interval: Duration::from_millis(env_or(
                "STATS_INTERVAL_MS",
                d.stats_interval.as_millis() as u64,
            )),
        }
    }
}

fn env_or<T: FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key = %key, value = %raw, "Unparsable limit, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Guardrail limits
    pub limits: Arc<GuardLimits>,
    /// Per-session frame admission
    pub rate_budget: Arc<RateBudget>,
    /// Per-session identity assignment
    pub tracker: Arc<CentroidTracker>,
    /// Session lifecycle and connection bookkeeping
    pub registry: Arc<SessionRegistry>,
    /// External detector
    pub inference: Arc<dyn InferenceBackend>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire up fresh registries around an inference backend
    pub fn new(
        config: AppConfig,
        limits: GuardLimits,
        inference: Arc<dyn InferenceBackend>,
    ) -> Self {
        let limits = Arc::new(limits);
        Self {
            config,
            rate_budget: Arc::new(RateBudget::new()),
            tracker: Arc::new(CentroidTracker::new(
                limits.track_match_distance,
                limits.track_history_depth,
            )),
            registry: Arc::new(SessionRegistry::new()),
            limits,
            inference,
            started_at: Instant::now(),
        }
    }
}

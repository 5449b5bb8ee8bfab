//! Stream Guardrails Library
//!
//! Guardrail and session-tracking layer for real-time object detection streams
//!
//! ## Architecture (7 Components)
//!
//! 1. RateBudget - Per-session sliding-window admission
//! 2. FramePayloadValidator - Structural checks on inbound frames
//! 3. InferenceClient - External detector adapter
//! 4. DetectionFilter - Sanitization of untrusted detections
//! 5. CentroidTracker - Per-session identity assignment
//! 6. SessionRegistry - Connection lifecycle and stats fan-out
//! 7. StreamOrchestrator - Per-connection message loop
//!
//! WebAPI exposes the stream endpoint plus health and session inspection.
//!
//! ## Design Principles
//!
//! - Every per-session store is an explicit service in `AppState`
//! - Per-session locking only, never one lock across all sessions
//! - Per-frame failures are reported in-band and never close the connection

pub mod centroid_tracker;
pub mod detection_filter;
pub mod error;
pub mod frame_validator;
pub mod inference_client;
pub mod models;
pub mod rate_budget;
pub mod session_registry;
pub mod state;
pub mod stream_orchestrator;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;

//! RateBudget - Per-Session Sliding-Window Admission
//!
//! ## Responsibilities
//!
//! - Keep one window of request timestamps per session
//! - Admit or reject a request against a per-second limit
//! - Reset a session's window on disconnect
//!
//! ## Design
//!
//! - Sliding 1.0s horizon, no buckets: the count in any trailing second never
//!   exceeds the limit
//! - Rejected requests are not recorded
//! - Windows are locked per session; admission never suspends

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Length of the sliding window
pub const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Default admission limit
pub const DEFAULT_MAX_PER_SECOND: u32 = 30;

/// Request timestamps within the trailing window of one session
#[derive(Debug, Default)]
struct RateWindow {
    requests: VecDeque<Instant>,
}

impl RateWindow {
    fn evict_expired(&mut self, now: Instant) {
        while let Some(&oldest) = self.requests.front() {
            if now.saturating_duration_since(oldest) < RATE_WINDOW {
                break;
            }
            self.requests.pop_front();
        }
    }
}

/// RateBudget instance
pub struct RateBudget {
    windows: RwLock<HashMap<String, Arc<Mutex<RateWindow>>>>,
}

impl RateBudget {
    /// Create new RateBudget
    pub fn new() -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
        }
    }

    /// Admit one request for `session_id` at `now`
    pub fn admit(&self, session_id: &str, now: Instant, max_per_second: u32) -> bool {
        let window = self.get_or_create(session_id);
        let mut window = window.lock();
        window.evict_expired(now);

        if window.requests.len() >= max_per_second as usize {
            tracing::debug!(
                session_id = %session_id,
                in_window = window.requests.len(),
                max_per_second = max_per_second,
                "Rate limit exceeded"
            );
            return false;
        }

        window.requests.push_back(now);
        true
    }

    /// Number of admitted requests in the trailing window at `now`
    pub fn current_rate(&self, session_id: &str, now: Instant) -> usize {
        let window = match self.windows.read().get(session_id) {
            Some(window) => window.clone(),
            None => return 0,
        };
        let mut window = window.lock();
        window.evict_expired(now);
        window.requests.len()
    }

    /// Forget a session's window
    pub fn reset(&self, session_id: &str) {
        if self.windows.write().remove(session_id).is_some() {
            tracing::debug!(session_id = %session_id, "Rate window reset");
        }
    }

    /// Number of sessions with a window
    pub fn session_count(&self) -> usize {
        self.windows.read().len()
    }

    fn get_or_create(&self, session_id: &str) -> Arc<Mutex<RateWindow>> {
        {
            let windows = self.windows.read();
            if let Some(window) = windows.get(session_id) {
                return window.clone();
            }
        }

        let mut windows = self.windows.write();
        windows
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }
}

impl Default for RateBudget {
    fn default() -> Self {
        Self::new()
    }
}

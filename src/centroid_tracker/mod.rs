//! CentroidTracker - Cross-Frame Identity Assignment
//!
//! ## Responsibilities
//!
//! - Assign a stable track id to each detection of a session
//! - Keep a bounded centroid history per track
//!
//! ## Matching
//!
//! Greedy nearest neighbour on bbox centroids, one detection at a time, in the
//! order given. The nearest existing track closer than the match distance is
//! reused and its centroid overwritten immediately, so a later detection in the
//! same frame sees the updated position. Two detections nearest to the same
//! track therefore never share an id: the second one matches another track or
//! gets a new id. Ties on distance go to the lowest track id.
//!
//! Track ids come from one counter for the whole tracker and are never reused,
//! across sessions or after a session reset.

use crate::detection_filter::Detection;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A centroid in frame pixels
pub type Point = (f64, f64);

/// One identity within a session
#[derive(Debug, Clone, Serialize)]
pub struct Track {
    pub track_id: u64,
    pub last_centroid: Point,
    /// Most recent centroids, oldest first
    pub history: VecDeque<Point>,
}

/// Live tracks of one session keyed by id
#[derive(Debug, Default)]
struct SessionTracks {
    tracks: BTreeMap<u64, Track>,
}

/// CentroidTracker instance
pub struct CentroidTracker {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionTracks>>>>,
    next_id: AtomicU64,
    match_distance: f64,
    history_depth: usize,
}

impl CentroidTracker {
    /// Create new tracker
    pub fn new(match_distance: f64, history_depth: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            match_distance,
            history_depth,
        }
    }

    /// Assign a track id to `bbox` ([x1, y1, x2, y2]) within `session_id`
    pub fn assign(&self, session_id: &str, bbox: [f64; 4]) -> u64 {
        let centroid = ((bbox[0] + bbox[2]) / 2.0, (bbox[1] + bbox[3]) / 2.0);
        let session = self.get_or_create(session_id);
        let mut session = session.lock();

        let mut matched: Option<(u64, f64)> = None;
        for (&id, track) in &session.tracks {
            let distance = euclidean(centroid, track.last_centroid);
            if distance < self.match_distance && matched.map_or(true, |(_, best)| distance < best) {
                matched = Some((id, distance));
            }
        }

        let track_id = match matched {
            Some((id, _)) => id,
            None => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(session_id = %session_id, track_id = id, "New track");
                session.tracks.insert(
                    id,
                    Track {
                        track_id: id,
                        last_centroid: centroid,
                        history: VecDeque::with_capacity(self.history_depth + 1),
                    },
                );
                id
            }
        };

        if let Some(track) = session.tracks.get_mut(&track_id) {
            track.last_centroid = centroid;
            track.history.push_back(centroid);
            while track.history.len() > self.history_depth {
                track.history.pop_front();
            }
        }

        track_id
    }

    /// Assign ids to a frame's detections, in order, overwriting `track_id`
    pub fn assign_all(&self, session_id: &str, detections: &mut [Detection]) {
        for detection in detections.iter_mut() {
            let id = self.assign(session_id, detection.bbox);
            detection.track_id = id.into();
        }
    }

    /// Centroid history of a track, oldest first
    pub fn history(&self, session_id: &str, track_id: u64) -> Option<Vec<Point>> {
        let session = self.sessions.read().get(session_id)?.clone();
        let session = session.lock();
        session
            .tracks
            .get(&track_id)
            .map(|t| t.history.iter().copied().collect())
    }

    /// Number of tracks a session has accumulated
    pub fn track_count(&self, session_id: &str) -> usize {
        match self.sessions.read().get(session_id) {
            Some(session) => session.lock().tracks.len(),
            None => 0,
        }
    }

    /// Drop all tracks of a session
    pub fn reset_session(&self, session_id: &str) {
        if let Some(session) = self.sessions.write().remove(session_id) {
            tracing::debug!(
                session_id = %session_id,
                tracks = session.lock().tracks.len(),
                "Tracker state reset"
            );
        }
    }

    fn get_or_create(&self, session_id: &str) -> Arc<Mutex<SessionTracks>> {
        {
            let sessions = self.sessions.read();
            if let Some(session) = sessions.get(session_id) {
                return session.clone();
            }
        }

        let mut sessions = self.sessions.write();
        sessions
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }
}

fn euclidean(a: Point, b: Point) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> CentroidTracker {
        CentroidTracker::new(50.0, 30)
    }

    fn square(cx: f64, cy: f64) -> [f64; 4] {
        [cx - 10.0, cy - 10.0, cx + 10.0, cy + 10.0]
    }

    #[test]
    fn test_small_move_keeps_id() {
        let t = tracker();
        let a = t.assign("s1", square(100.0, 100.0));
        let b = t.assign("s1", square(110.0, 100.0));
        assert_eq!(a, b);
    }

    #[test]
    fn test_large_jump_gets_new_id() {
        let t = tracker();
        let a = t.assign("s1", square(100.0, 100.0));
        let b = t.assign("s1", square(300.0, 100.0));
        assert_ne!(a, b);
        assert_eq!(t.track_count("s1"), 2);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let t = tracker();
        let a = t.assign("s1", square(100.0, 100.0));
        let b = t.assign("s1", square(150.0, 100.0));
        assert_ne!(a, b);
    }

    #[test]
    fn test_history_is_bounded() {
        let t = tracker();
        let mut id = None;
        for i in 0..40 {
            let assigned = t.assign("s1", square(100.0 + i as f64, 100.0));
            assert_eq!(*id.get_or_insert(assigned), assigned);
        }
        let history = t.history("s1", id.unwrap()).unwrap();
        assert_eq!(history.len(), 30);
        // oldest evicted first
        assert_eq!(history[0], (110.0, 100.0));
        assert_eq!(history[29], (139.0, 100.0));
    }

    #[test]
    fn test_ids_unique_across_sessions() {
        let t = tracker();
        let a = t.assign("s1", square(100.0, 100.0));
        let b = t.assign("s2", square(100.0, 100.0));
        assert_ne!(a, b);
        assert_eq!(t.assign("s2", square(101.0, 100.0)), b);
    }

    #[test]
    fn test_greedy_first_detection_claims_track() {
        let t = tracker();
        let original = t.assign("s1", square(100.0, 100.0));

        // both new detections are nearest to the original track; the first claims it
        // and moves it, so the second is now too far and spawns a new identity
        let first = t.assign("s1", square(130.0, 100.0));
        let second = t.assign("s1", square(80.0, 100.0));

        assert_eq!(first, original);
        assert_ne!(second, original);
    }

    #[test]
    fn test_picks_nearest_of_several() {
        let t = tracker();
        let left = t.assign("s1", square(100.0, 100.0));
        let right = t.assign("s1", square(160.0, 100.0));
        assert_ne!(left, right);
        assert_eq!(t.assign("s1", square(140.0, 100.0)), right);
    }

    #[test]
    fn test_reset_does_not_reuse_ids() {
        let t = tracker();
        let a = t.assign("s1", square(100.0, 100.0));
        t.reset_session("s1");
        assert_eq!(t.track_count("s1"), 0);
        assert!(t.history("s1", a).is_none());
        let b = t.assign("s1", square(100.0, 100.0));
        assert!(b > a);
    }
}

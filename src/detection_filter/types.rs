//! DetectionFilter types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A sanitized detection
///
/// `bbox` and `confidence` are coerced to floats and clamped into the frame;
/// the remaining fields are carried through exactly as the detector sent them.
/// `track_id` is overwritten by the tracker before the detection leaves the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// [x1, y1, x2, y2] with x1 < x2, y1 < y2
    pub bbox: [f64; 4],
    pub confidence: f64,
    pub class_id: Value,
    pub class_name: Value,
    pub track_id: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Detection {
    /// Geometric centre of the bbox
    pub fn centroid(&self) -> (f64, f64) {
        let [x1, y1, x2, y2] = self.bbox;
        ((x1 + x2) / 2.0, (y1 + y2) / 2.0)
    }
}

/// Silent rejections, logged but never reported as warnings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RejectionCounts {
    pub low_confidence: usize,
    pub malformed_bbox: usize,
    pub too_small: usize,
    pub out_of_bounds: usize,
}

impl RejectionCounts {
    pub fn any(&self) -> bool {
        self.low_confidence + self.malformed_bbox + self.too_small + self.out_of_bounds > 0
    }
}

/// Result of sanitizing one batch
#[derive(Debug, Clone, Default)]
pub struct SanitizedBatch {
    /// Accepted detections, in input order unless the cap re-ranked them
    pub detections: Vec<Detection>,
    pub warnings: Vec<String>,
    pub rejected: RejectionCounts,
}

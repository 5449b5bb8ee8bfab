//! DetectionFilter - Outbound Detection Guardrail
//!
//! ## Responsibilities
//!
//! - Drop detections with low confidence, malformed or tiny boxes
//! - Clamp boxes that overshoot the frame slightly; drop those that overshoot a lot
//! - Require class/track fields, coerce numeric fields to floats
//! - Cap the batch size, keeping the most confident detections
//!
//! Every detection leaving this filter lies fully inside the frame, and running a
//! sanitized batch through the filter again neither drops nor clamps anything.

mod types;

pub use types::*;

use crate::state::GuardLimits;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Share of width/height a box may overshoot the frame and still be clamped
const CLAMP_TOLERANCE: f64 = 0.1;

/// Fields the detector must provide besides bbox and confidence
const REQUIRED_FIELDS: [&str; 3] = ["class_id", "class_name", "track_id"];

/// DetectionFilter instance
pub struct DetectionFilter {
    limits: Arc<GuardLimits>,
}

impl DetectionFilter {
    /// Create new DetectionFilter
    pub fn new(limits: Arc<GuardLimits>) -> Self {
        Self { limits }
    }

    /// Sanitize raw detector output against a `frame_height` x `frame_width` envelope
    pub fn sanitize(&self, detections: &[Value], frame_height: u32, frame_width: u32) -> SanitizedBatch {
        let h = frame_height as f64;
        let w = frame_width as f64;
        let mut batch = SanitizedBatch::default();

        for (i, det) in detections.iter().enumerate() {
            if let Some(detection) = self.check_one(i, det, h, w, &mut batch) {
                batch.detections.push(detection);
            }
        }

        let max = self.limits.max_detections_per_frame;
        if batch.detections.len() > max {
            // stable: equal confidences keep their input order
            batch
                .detections
                .sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
            let removed = batch.detections.len() - max;
            batch.detections.truncate(max);
            batch.warnings.push(format!(
                "Limit of {} detections per frame exceeded: {} lowest-confidence detections removed",
                max, removed
            ));
        }

        if batch.rejected.any() {
            tracing::debug!(
                kept = batch.detections.len(),
                low_confidence = batch.rejected.low_confidence,
                malformed_bbox = batch.rejected.malformed_bbox,
                too_small = batch.rejected.too_small,
                out_of_bounds = batch.rejected.out_of_bounds,
                "Detections rejected"
            );
        }

        batch
    }

    fn check_one(
        &self,
        i: usize,
        det: &Value,
        h: f64,
        w: f64,
        batch: &mut SanitizedBatch,
    ) -> Option<Detection> {
        let Some(record) = det.as_object() else {
            batch.warnings.push(format!("Detection {} is not an object, ignored", i));
            return None;
        };

        // 1. Confidence
        let confidence = match record.get("confidence") {
            None => 0.0,
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(other) => {
                batch
                    .warnings
                    .push(format!("Detection {} has invalid confidence: {}", i, other));
                return None;
            }
        };
        if confidence < self.limits.min_confidence {
            batch.rejected.low_confidence += 1;
            return None;
        }

        // 2. Box shape
        let coords = match record.get("bbox") {
            None => &[][..],
            Some(Value::Array(coords)) => coords.as_slice(),
            Some(_) => {
                batch
                    .warnings
                    .push(format!("Detection {} has invalid bbox (not a list)", i));
                return None;
            }
        };
        if coords.len() != 4 {
            batch.warnings.push(format!(
                "Detection {} has bbox with wrong length: {} (expected 4)",
                i,
                coords.len()
            ));
            batch.rejected.malformed_bbox += 1;
            return None;
        }
        let Some([mut x1, mut y1, mut x2, mut y2]) = coerce_bbox(coords) else {
            batch.warnings.push(format!(
                "Detection {} has invalid bbox coordinates: {}",
                i,
                Value::Array(coords.to_vec())
            ));
            batch.rejected.malformed_bbox += 1;
            return None;
        };
        if x1 >= x2 || y1 >= y2 {
            batch.warnings.push(format!(
                "Detection {} has inverted bbox: ({}, {}, {}, {})",
                i, x1, y1, x2, y2
            ));
            batch.rejected.malformed_bbox += 1;
            return None;
        }

        // 3. Frame envelope
        if x1 < 0.0 || y1 < 0.0 || x2 > w || y2 > h {
            let (tol_w, tol_h) = (w * CLAMP_TOLERANCE, h * CLAMP_TOLERANCE);
            if x1 < -tol_w || y1 < -tol_h || x2 > w + tol_w || y2 > h + tol_h {
                batch.rejected.out_of_bounds += 1;
                return None;
            }
            x1 = x1.clamp(0.0, w);
            y1 = y1.clamp(0.0, h);
            x2 = x2.clamp(0.0, w);
            y2 = y2.clamp(0.0, h);
            batch
                .warnings
                .push(format!("Detection {}: bbox clamped into frame", i));
        }

        // 4. Area
        let area = (x2 - x1) * (y2 - y1);
        if area < self.limits.min_bbox_area {
            batch.rejected.too_small += 1;
            return None;
        }
        let frame_area = w * h;
        let ratio = if frame_area > 0.0 { area / frame_area } else { 0.0 };
        if ratio > self.limits.max_bbox_size_ratio {
            batch.warnings.push(format!(
                "Detection {}: bbox covers {:.1}% of the frame, possibly spurious",
                i,
                ratio * 100.0
            ));
        }

        // 5. Required fields
        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| !record.contains_key(*field))
            .collect();
        if !missing.is_empty() {
            batch
                .warnings
                .push(format!("Detection {} is missing fields: {:?}", i, missing));
            return None;
        }

        let mut extra: Map<String, Value> = record.clone();
        extra.remove("bbox");
        extra.remove("confidence");
        let mut take = |field: &str| extra.remove(field).unwrap_or(Value::Null);
        let class_id = take("class_id");
        let class_name = take("class_name");
        let track_id = take("track_id");

        Some(Detection {
            bbox: [x1, y1, x2, y2],
            confidence,
            class_id,
            class_name,
            track_id,
            extra,
        })
    }
}

/// Coerce four coordinates to finite floats; numeric strings are accepted
fn coerce_bbox(coords: &[Value]) -> Option<[f64; 4]> {
    let mut out = [0.0; 4];
    for (slot, value) in out.iter_mut().zip(coords) {
        let v = match value {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        if !v.is_finite() {
            return None;
        }
        *slot = v;
    }
    Some(out)
}

/// Validate a detector-reported `[height, width]`
pub fn validate_frame_shape(shape: &Value) -> Result<(u32, u32), String> {
    let Some(items) = shape.as_array() else {
        return Err("Frame shape must be a list".to_string());
    };
    if items.len() != 2 {
        return Err(format!("Frame shape must have 2 elements, got {}", items.len()));
    }

    let as_dim = |v: &Value| -> Option<i64> {
        v.as_i64().or_else(|| {
            v.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        })
    };
    let (Some(h), Some(w)) = (as_dim(&items[0]), as_dim(&items[1])) else {
        return Err("Frame shape must contain only integers".to_string());
    };
    if h <= 0 || w <= 0 || h > u32::MAX as i64 || w > u32::MAX as i64 {
        return Err(format!("Invalid frame shape: {}x{} (must be > 0)", w, h));
    }

    Ok((h as u32, w as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter() -> DetectionFilter {
        DetectionFilter::new(Arc::new(GuardLimits::default()))
    }

    fn det(bbox: [f64; 4], confidence: f64) -> Value {
        json!({
            "bbox": bbox,
            "confidence": confidence,
            "class_id": 0,
            "class_name": "person",
            "track_id": 7
        })
    }

    #[test]
    fn test_keeps_valid_detection() {
        let batch = filter().sanitize(&[det([10.0, 20.0, 110.0, 220.0], 0.9)], 480, 640);
        assert_eq!(batch.detections.len(), 1);
        assert!(batch.warnings.is_empty());
        let d = &batch.detections[0];
        assert_eq!(d.bbox, [10.0, 20.0, 110.0, 220.0]);
        assert_eq!(d.class_name, json!("person"));
        assert_eq!(d.centroid(), (60.0, 120.0));
    }

    #[test]
    fn test_drops_low_confidence_silently() {
        let batch = filter().sanitize(&[det([10.0, 10.0, 100.0, 100.0], 0.29)], 480, 640);
        assert!(batch.detections.is_empty());
        assert!(batch.warnings.is_empty());
        assert_eq!(batch.rejected.low_confidence, 1);
    }

    #[test]
    fn test_drops_far_out_of_bounds() {
        let f = filter();
        // 11% past the right edge
        let right = f.sanitize(&[det([500.0, 10.0, 710.4, 100.0], 0.9)], 480, 640);
        // entirely left of the frame
        let left = f.sanitize(&[det([-200.0, 10.0, -100.0, 100.0], 0.9)], 480, 640);
        // 11% past the bottom edge
        let bottom = f.sanitize(&[det([10.0, 400.0, 100.0, 533.0], 0.9)], 480, 640);

        for batch in [right, left, bottom] {
            assert!(batch.detections.is_empty());
            assert!(batch.warnings.is_empty());
            assert_eq!(batch.rejected.out_of_bounds, 1);
        }
    }

    #[test]
    fn test_clamps_slight_overshoot() {
        // 5% beyond the right and top edges
        let batch = filter().sanitize(&[det([600.0, -24.0, 672.0, 100.0], 0.8)], 480, 640);
        assert_eq!(batch.detections.len(), 1);
        assert_eq!(batch.detections[0].bbox, [600.0, 0.0, 640.0, 100.0]);
        assert_eq!(batch.warnings.len(), 1);
        assert!(batch.warnings[0].contains("clamped"));
    }

    #[test]
    fn test_sanitized_batch_is_stable_under_resanitizing() {
        let f = filter();
        let raw = vec![
            det([600.0, -24.0, 672.0, 100.0], 0.8),
            det([-30.0, 300.0, 80.0, 500.0], 0.5),
            det([1.5, 2.5, 30.25, 40.75], 0.31),
        ];
        let first = f.sanitize(&raw, 480, 640);
        assert_eq!(first.detections.len(), 3);

        let again: Vec<Value> = first
            .detections
            .iter()
            .map(|d| serde_json::to_value(d).unwrap())
            .collect();
        let second = f.sanitize(&again, 480, 640);

        assert_eq!(second.detections, first.detections);
        assert!(second.warnings.is_empty());
        assert!(!second.rejected.any());
    }

    #[test]
    fn test_malformed_boxes_warn_and_count() {
        let raw = vec![
            json!({"bbox": [1, 2, 3], "confidence": 0.9, "class_id": 0, "class_name": "a", "track_id": 0}),
            json!({"bbox": [1, "x", 3, 4], "confidence": 0.9, "class_id": 0, "class_name": "a", "track_id": 0}),
            det([100.0, 10.0, 50.0, 100.0], 0.9),
            json!({"bbox": "0,0,10,10", "confidence": 0.9, "class_id": 0, "class_name": "a", "track_id": 0}),
        ];
        let batch = filter().sanitize(&raw, 480, 640);
        assert!(batch.detections.is_empty());
        assert_eq!(batch.warnings.len(), 4);
        assert_eq!(batch.rejected.malformed_bbox, 3);
    }

    #[test]
    fn test_numeric_strings_are_coerced() {
        let raw = json!({
            "bbox": ["10", "10.5", 100, "200"],
            "confidence": 0.7,
            "class_id": 2,
            "class_name": "car",
            "track_id": 1,
            "source": "yolo"
        });
        let batch = filter().sanitize(&[raw], 480, 640);
        assert_eq!(batch.detections[0].bbox, [10.0, 10.5, 100.0, 200.0]);
        assert_eq!(batch.detections[0].extra.get("source"), Some(&json!("yolo")));
    }

    #[test]
    fn test_drops_tiny_boxes() {
        let batch = filter().sanitize(&[det([10.0, 10.0, 19.0, 20.0], 0.9)], 480, 640);
        assert!(batch.detections.is_empty());
        assert_eq!(batch.rejected.too_small, 1);
    }

    #[test]
    fn test_keeps_box_of_exactly_min_area() {
        let batch = filter().sanitize(&[det([10.0, 10.0, 20.0, 20.0], 0.9)], 480, 640);
        assert_eq!(batch.detections.len(), 1);
        assert!(batch.warnings.is_empty());
        assert!(!batch.rejected.any());
    }

    #[test]
    fn test_keeps_confidence_at_threshold() {
        let batch = filter().sanitize(&[det([10.0, 10.0, 100.0, 100.0], 0.3)], 480, 640);
        assert_eq!(batch.detections.len(), 1);
        assert_eq!(batch.rejected.low_confidence, 0);
    }

    #[test]
    fn test_clamps_overshoot_of_exactly_ten_percent() {
        let f = filter();
        // 64px past the right edge, 48px above the top
        let top_right = f.sanitize(&[det([600.0, -48.0, 704.0, 100.0], 0.9)], 480, 640);
        // 64px left of the frame, 48px below the bottom
        let bottom_left = f.sanitize(&[det([-64.0, 400.0, 100.0, 528.0], 0.9)], 480, 640);

        assert_eq!(top_right.detections[0].bbox, [600.0, 0.0, 640.0, 100.0]);
        assert_eq!(bottom_left.detections[0].bbox, [0.0, 400.0, 100.0, 480.0]);
        for batch in [top_right, bottom_left] {
            assert_eq!(batch.detections.len(), 1);
            assert_eq!(batch.warnings.len(), 1);
            assert_eq!(batch.rejected.out_of_bounds, 0);
        }
    }

    #[test]
    fn test_warns_on_near_full_frame_box() {
        let batch = filter().sanitize(&[det([0.0, 0.0, 640.0, 480.0], 0.9)], 480, 640);
        assert_eq!(batch.detections.len(), 1);
        assert_eq!(batch.warnings.len(), 1);
        assert!(batch.warnings[0].contains("100.0%"));
    }

    #[test]
    fn test_requires_class_and_track_fields() {
        let raw = json!({"bbox": [10, 10, 100, 100], "confidence": 0.9, "class_id": 1});
        let batch = filter().sanitize(&[raw], 480, 640);
        assert!(batch.detections.is_empty());
        assert_eq!(batch.warnings.len(), 1);
        assert!(batch.warnings[0].contains("class_name"));
        assert!(batch.warnings[0].contains("track_id"));
    }

    #[test]
    fn test_non_object_and_bad_confidence_warn() {
        let raw = vec![json!("nope"), json!({"bbox": [1, 1, 50, 50], "confidence": "high"})];
        let batch = filter().sanitize(&raw, 480, 640);
        assert!(batch.detections.is_empty());
        assert_eq!(batch.warnings.len(), 2);
        assert!(!batch.rejected.any());
    }

    #[test]
    fn test_caps_at_100_by_confidence() {
        let raw: Vec<Value> = (0..150)
            .map(|i| {
                let x = (i % 20) as f64 * 30.0;
                let y = (i / 20) as f64 * 50.0;
                det([x, y, x + 20.0, y + 20.0], 0.3 + (i as f64) * 0.004)
            })
            .collect();
        let batch = filter().sanitize(&raw, 480, 640);

        assert_eq!(batch.detections.len(), 100);
        assert_eq!(batch.warnings.len(), 1);
        assert!(batch.warnings[0].contains("50"));
        assert!(batch
            .detections
            .windows(2)
            .all(|pair| pair[0].confidence >= pair[1].confidence));
        // the 50 weakest (first 50 inputs) are gone
        assert!(batch.detections.iter().all(|d| d.confidence >= 0.3 + 50.0 * 0.004 - 1e-9));
    }

    #[test]
    fn test_cap_keeps_input_order_on_ties() {
        let limits = GuardLimits {
            max_detections_per_frame: 2,
            ..GuardLimits::default()
        };
        let f = DetectionFilter::new(Arc::new(limits));
        let mut raw = Vec::new();
        for track in 0..4 {
            let mut d = det([10.0 + track as f64 * 100.0, 10.0, 60.0 + track as f64 * 100.0, 60.0], 0.5);
            d["track_id"] = json!(track);
            raw.push(d);
        }
        let batch = f.sanitize(&raw, 480, 640);
        let order: Vec<Value> = batch.detections.iter().map(|d| d.track_id.clone()).collect();
        assert_eq!(order, vec![json!(0), json!(1)]);
    }

    #[test]
    fn test_frame_shape_validation() {
        assert_eq!(validate_frame_shape(&json!([480, 640])), Ok((480, 640)));
        assert_eq!(validate_frame_shape(&json!([480.0, 640.0])), Ok((480, 640)));
        assert!(validate_frame_shape(&json!([480])).is_err());
        assert!(validate_frame_shape(&json!([0, 640])).is_err());
        assert!(validate_frame_shape(&json!(["a", 640])).is_err());
        assert!(validate_frame_shape(&json!({"h": 1})).is_err());
    }
}

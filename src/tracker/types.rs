//! Gaze sample types as pushed by the tracker.
//!
//! Field names on the wire follow the device protocol (`fix`, `lefteye`,
//! `psize`, ...); the Rust side uses descriptive names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A 2-D coordinate in screen space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to `other`.
    pub fn distance_squared(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

/// Per-eye measurement within a frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EyeData {
    #[serde(default)]
    pub raw: Point,
    #[serde(default)]
    pub avg: Point,
    #[serde(rename = "psize", default)]
    pub pupil_size: f64,
    #[serde(rename = "pcenter", default)]
    pub pupil_center: Point,
}

/// One gaze sample from the device.
///
/// `received_at` is stamped locally when the frame arrives and is the only
/// clock used by time-windowed queries. A frame whose smoothed coordinate
/// has `x <= 0 && y <= 0` carries no valid gaze.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub time: f64,
    #[serde(rename = "fix", default)]
    pub is_fixated: bool,
    #[serde(default)]
    pub state: i64,
    #[serde(default)]
    pub raw: Point,
    #[serde(default)]
    pub avg: Point,
    #[serde(rename = "lefteye", default, skip_serializing_if = "Option::is_none")]
    pub left_eye: Option<EyeData>,
    #[serde(rename = "righteye", default, skip_serializing_if = "Option::is_none")]
    pub right_eye: Option<EyeData>,
    #[serde(rename = "receivedAt", alias = "GoTime", default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl Frame {
    /// Build a frame carrying only a gaze coordinate.
    pub fn with_gaze(x: f64, y: f64, received_at: DateTime<Utc>) -> Self {
        let point = Point::new(x, y);
        Self {
            timestamp: received_at.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            time: received_at.timestamp_millis() as f64,
            is_fixated: false,
            state: 0,
            raw: point,
            avg: point,
            left_eye: None,
            right_eye: None,
            received_at,
        }
    }

    /// Whether the frame reports a usable gaze position.
    pub fn has_gaze(&self) -> bool {
        !(self.avg.x <= 0.0 && self.avg.y <= 0.0)
    }

    /// The smoothed gaze position, or `None` for sentinel frames.
    pub fn gaze(&self) -> Option<Point> {
        self.has_gaze().then_some(self.avg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_decodes_device_fields() {
        let json = r#"{
            "timestamp": "2014-04-01 12:00:00.000",
            "time": 1234,
            "fix": true,
            "state": 7,
            "raw": {"x": 10.5, "y": 20.0},
            "avg": {"x": 11.0, "y": 21.0},
            "lefteye": {
                "raw": {"x": 1.0, "y": 2.0},
                "avg": {"x": 3.0, "y": 4.0},
                "psize": 17.5,
                "pcenter": {"x": 0.4, "y": 0.5}
            }
        }"#;

        let frame: Frame = serde_json::from_str(json).unwrap();
        assert!(frame.is_fixated);
        assert_eq!(frame.state, 7);
        assert_eq!(frame.avg, Point::new(11.0, 21.0));
        let left = frame.left_eye.unwrap();
        assert_eq!(left.pupil_size, 17.5);
        assert_eq!(left.pupil_center, Point::new(0.4, 0.5));
        assert!(frame.right_eye.is_none());
    }

    #[test]
    fn test_sentinel_frame_has_no_gaze() {
        let now = Utc::now();
        assert!(Frame::with_gaze(0.0, 0.0, now).gaze().is_none());
        assert!(Frame::with_gaze(-3.0, 0.0, now).gaze().is_none());
        // Only both coordinates being non-positive marks a sentinel.
        assert!(Frame::with_gaze(0.0, 12.0, now).has_gaze());
    }

    #[test]
    fn test_missing_avg_is_sentinel() {
        let frame: Frame = serde_json::from_str(r#"{"timestamp": "t"}"#).unwrap();
        assert!(!frame.has_gaze());
    }

    #[test]
    fn test_received_at_survives_log_round_trip() {
        let frame = Frame::with_gaze(5.0, 6.0, Utc::now());
        let line = serde_json::to_string(&frame).unwrap();
        assert!(line.contains("receivedAt"));

        let back: Frame = serde_json::from_str(&line).unwrap();
        assert_eq!(back.received_at, frame.received_at);
    }

    #[test]
    fn test_distance_squared() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert_eq!(a.distance_squared(&b), 25.0);
    }
}

//! "Was this region looked at?" checks against named screen rectangles.

use super::fixation::FixationEvent;
use crate::tracker::types::{Frame, Point};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named axis-aligned rectangle in screen space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub name: String,
}

impl CheckRegion {
    /// Inclusive on all four edges.
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }
}

/// Region name to whether any point fell inside it.
pub type CheckResult = BTreeMap<String, bool>;

/// Test `points` against every region. Every region appears in the result;
/// regions sharing a name are combined.
pub fn check_points<I>(regions: &[CheckRegion], points: I) -> CheckResult
where
    I: IntoIterator<Item = Point>,
{
    let mut result: CheckResult = regions
        .iter()
        .map(|region| (region.name.clone(), false))
        .collect();

    for point in points {
        for region in regions {
            if region.contains(point) {
                result.insert(region.name.clone(), true);
            }
        }
    }
    result
}

/// Check raw gaze received at or after `since`. Sentinel frames are ignored.
pub fn check_gaze(regions: &[CheckRegion], frames: &[Frame], since: DateTime<Utc>) -> CheckResult {
    let points = frames
        .iter()
        .filter(|frame| frame.received_at >= since)
        .filter_map(Frame::gaze);
    check_points(regions, points)
}

/// Check fixations that ended at or after `since`.
pub fn check_fixations(
    regions: &[CheckRegion],
    fixations: &[FixationEvent],
    since: DateTime<Utc>,
) -> CheckResult {
    let points = fixations
        .iter()
        .filter(|event| event.time >= since)
        .map(FixationEvent::point);
    check_points(regions, points)
}

//! Fixation detection over a chronological frame sequence.
//!
//! Consecutive valid frames that stay within `max_distance` pixels of the
//! previous frame form a cluster. A cluster is reported as a fixation when
//! it has at least two frames and spans at least `min_duration_ms`, both
//! when gaze moves away and for the cluster still open at the end.

use crate::tracker::types::{Frame, Point};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default cluster radius in pixels.
pub const DEFAULT_MAX_DISTANCE: f64 = 50.0;

/// Default minimum fixation length in milliseconds.
pub const DEFAULT_MIN_DURATION_MS: i64 = 100;

/// Detector parameters. Field names match the region check configuration
/// file (`"max distance"`, `"min msec"`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixationConfig {
    #[serde(
        rename = "max distance",
        alias = "max_distance",
        default = "default_max_distance"
    )]
    pub max_distance: f64,
    #[serde(
        rename = "min msec",
        alias = "min_duration_ms",
        default = "default_min_duration_ms"
    )]
    pub min_duration_ms: i64,
}

fn default_max_distance() -> f64 {
    DEFAULT_MAX_DISTANCE
}

fn default_min_duration_ms() -> i64 {
    DEFAULT_MIN_DURATION_MS
}

impl Default for FixationConfig {
    fn default() -> Self {
        Self {
            max_distance: DEFAULT_MAX_DISTANCE,
            min_duration_ms: DEFAULT_MIN_DURATION_MS,
        }
    }
}

/// A detected fixation: smoothed centroid and the time of its last frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixationEvent {
    pub x: f64,
    pub y: f64,
    pub time: DateTime<Utc>,
}

impl FixationEvent {
    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Cluster being accumulated during the pass.
struct Cluster {
    centroid: Point,
    previous: Point,
    members: u32,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Cluster {
    fn open(point: Point, time: DateTime<Utc>) -> Self {
        Self {
            centroid: point,
            previous: point,
            members: 1,
            start: time,
            end: time,
        }
    }

    /// Fold a nearby point into the running mean.
    fn absorb(&mut self, point: Point, time: DateTime<Utc>) {
        let weight = 1.0 / (1.0 + self.members as f64);
        self.centroid.x = (1.0 - weight) * self.centroid.x + weight * point.x;
        self.centroid.y = (1.0 - weight) * self.centroid.y + weight * point.y;
        self.members += 1;
        self.previous = point;
        self.end = time;
    }

    fn qualifies(&self, min_duration: Duration) -> bool {
        self.members >= 2 && self.end - self.start >= min_duration
    }

    fn event(&self) -> FixationEvent {
        FixationEvent {
            x: self.centroid.x,
            y: self.centroid.y,
            time: self.end,
        }
    }
}

/// Group `frames` (oldest first) into fixations, oldest first.
///
/// Sentinel frames are skipped. Single forward pass; the result depends
/// only on the frames and `config`.
pub fn detect_fixations<'a, I>(frames: I, config: &FixationConfig) -> Vec<FixationEvent>
where
    I: IntoIterator<Item = &'a Frame>,
{
    let max_distance_sq = config.max_distance * config.max_distance;
    // Only i64::MIN is out of range; it means "any duration".
    let min_duration = Duration::try_milliseconds(config.min_duration_ms).unwrap_or(Duration::MIN);

    let mut events = Vec::new();
    let mut cluster: Option<Cluster> = None;
    let mut valid_frames = 0usize;
    let mut micro_moves = 0usize;

    for frame in frames {
        let Some(point) = frame.gaze() else {
            continue;
        };
        valid_frames += 1;
        let time = frame.received_at;

        match cluster.as_mut() {
            Some(current) if current.previous.distance_squared(&point) <= max_distance_sq => {
                current.absorb(point, time);
                micro_moves += 1;
            }
            Some(current) => {
                // Gaze moved somewhere else.
                if current.qualifies(min_duration) {
                    events.push(current.event());
                }
                cluster = Some(Cluster::open(point, time));
            }
            None => cluster = Some(Cluster::open(point, time)),
        }
    }

    if let Some(last) = cluster.filter(|c| c.qualifies(min_duration)) {
        events.push(last.event());
    }

    debug!(
        fixations = events.len(),
        micro_moves, valid_frames, "fixation detection finished"
    );
    events
}

/// Keep only events at or after `since`.
pub fn fixations_since(events: &[FixationEvent], since: DateTime<Utc>) -> Vec<FixationEvent> {
    events
        .iter()
        .filter(|event| event.time >= since)
        .copied()
        .collect()
}

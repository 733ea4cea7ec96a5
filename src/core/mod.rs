//! Core analysis over buffered gaze frames.
//!
//! This module contains:
//! - The bounded frame buffer shared with the ingestion task
//! - Fixation detection
//! - Heat-map rendering
//! - Region checks against named rectangles

pub mod buffer;
pub mod fixation;
pub mod heatmap;
pub mod regions;

// Re-export commonly used types
pub use buffer::{FrameBuffer, SharedFrameBuffer};
pub use fixation::{detect_fixations, fixations_since, FixationConfig, FixationEvent};
pub use heatmap::{encode_png, load_image, render_heatmap, Brush, HeatmapOptions, RenderError};
pub use regions::{check_fixations, check_gaze, check_points, CheckRegion, CheckResult};

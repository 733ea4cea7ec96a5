//! gaze-agent - streaming eye-tracker client with gaze analytics.
//!
//! This library keeps a persistent connection to an eye-tracker server,
//! buffers the most recent gaze frames, and answers questions about them:
//! where the user fixated, which screen regions were looked at, and what
//! the accumulated gaze looks like as a heat-map.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         gaze-agent                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │  │ Connection  │──▶│  Ingestion  │──▶│ FrameBuffer │        │
//! │  │ (heartbeat) │   │    task     │   │  (bounded)  │        │
//! │  └─────────────┘   └─────────────┘   └─────────────┘        │
//! │                           │                 │               │
//! │                           ▼                 ▼               │
//! │                    ┌─────────────┐   ┌─────────────┐        │
//! │                    │ Record log  │   │  Fixations  │        │
//! │                    │  (JSONL)    │   │  Heat-map   │        │
//! │                    └─────────────┘   │  Regions    │        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use gaze_agent::tracker::TrackerSession;
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = TrackerSession::connect("localhost:6555", Duration::from_secs(30)).await?;
//! session.start_ingestion().await?;
//!
//! // Frames can be read from session.buffer().snapshot()
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod recording;
pub mod replay;
pub mod tracker;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use config::{CheckConfig, Config, ConfigError, SharedCheckConfig};
pub use core::{
    detect_fixations, render_heatmap, Brush, CheckRegion, CheckResult, FixationConfig,
    FixationEvent, FrameBuffer, SharedFrameBuffer,
};
pub use recording::{JsonlLog, PageViewRecord, RecordSink, SharedRecordSink};
pub use tracker::{ConnectError, Frame, ProtocolError, SessionError, TrackerSession};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

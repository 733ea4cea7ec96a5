//! Eye-tracker client.
//!
//! This module contains:
//! - Gaze frame types and the JSON wire protocol
//! - The TCP connection with request/response and push modes
//! - Heartbeat and ingestion background tasks
//! - `TrackerSession`, which ties them to a frame buffer

pub mod connection;
pub mod error;
pub mod protocol;
pub mod session;
pub mod stats;
pub mod tasks;
pub mod types;

// Re-export commonly used types
pub use connection::Connection;
pub use error::{ConnectError, ProtocolError, SessionError};
pub use protocol::{Discard, FrameMessage, Request, Response, TrackerStatus};
pub use session::TrackerSession;
pub use stats::{IngestStats, IngestStatsSnapshot, SharedIngestStats};
pub use tasks::{spawn_heartbeat, spawn_ingestion, IngestExit};
pub use types::{EyeData, Frame, Point};

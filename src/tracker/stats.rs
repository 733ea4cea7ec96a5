//! Counters describing what the ingestion task has seen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Ingestion counters for the current session.
#[derive(Debug)]
pub struct IngestStats {
    /// Frames appended to the buffer
    frames_received: AtomicU64,
    /// Pushed messages skipped (heartbeats, status errors, no frame)
    messages_discarded: AtomicU64,
    /// Records the log sink failed to persist
    log_failures: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            messages_discarded: AtomicU64::new(0),
            log_failures: AtomicU64::new(0),
            session_start: Utc::now(),
        }
    }

    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discard(&self) {
        self.messages_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_log_failure(&self) {
        self.log_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            messages_discarded: self.messages_discarded.load(Ordering::Relaxed),
            log_failures: self.log_failures.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Ingestion Statistics:\n\
             - Frames received: {}\n\
             - Messages discarded: {}\n\
             - Log write failures: {}\n\
             - Session duration: {} seconds",
            stats.frames_received,
            stats.messages_discarded,
            stats.log_failures,
            stats.session_duration_secs
        )
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestStatsSnapshot {
    pub frames_received: u64,
    pub messages_discarded: u64,
    pub log_failures: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Thread-safe shared counters.
pub type SharedIngestStats = Arc<IngestStats>;

//! A tracker session: one connection, its frame buffer, and the two
//! background tasks that keep them alive.

use super::connection::Connection;
use super::error::{ConnectError, SessionError};
use super::protocol::TrackerStatus;
use super::stats::{IngestStats, SharedIngestStats};
use super::tasks::{spawn_heartbeat, spawn_ingestion, IngestExit};
use crate::core::buffer::{FrameBuffer, SharedFrameBuffer};
use crate::recording::SharedRecordSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Floor for the keepalive period when the tracker reports a tiny interval.
const MIN_HEARTBEAT_PERIOD: Duration = Duration::from_millis(10);

struct TaskHandle<T> {
    cancel: CancellationToken,
    handle: JoinHandle<T>,
}

/// Connection plus buffer plus background tasks.
///
/// Shutdown always runs ingestion first, then the heartbeat, then the
/// socket.
pub struct TrackerSession {
    connection: Arc<Connection>,
    buffer: SharedFrameBuffer,
    sink: Option<SharedRecordSink>,
    stats: SharedIngestStats,
    heartbeat: Option<TaskHandle<()>>,
    ingestion: Option<TaskHandle<IngestExit>>,
}

impl TrackerSession {
    /// Connect, start the keepalive at half the tracker's heartbeat
    /// interval, and size an empty buffer to hold `retention` worth of
    /// frames.
    pub async fn connect(address: &str, retention: Duration) -> Result<Self, ConnectError> {
        let connection = Arc::new(Connection::connect(address).await?);
        let status = connection.status().clone();

        let period = (status.heartbeat_interval / 2).max(MIN_HEARTBEAT_PERIOD);
        let cancel = CancellationToken::new();
        let handle = spawn_heartbeat(connection.clone(), period, cancel.clone());

        let capacity = FrameBuffer::capacity_for(retention, status.frame_rate);
        info!(
            capacity,
            retention_secs = retention.as_secs(),
            "frame buffer created"
        );

        Ok(Self {
            connection,
            buffer: SharedFrameBuffer::new(capacity),
            sink: None,
            stats: Arc::new(IngestStats::new()),
            heartbeat: Some(TaskHandle { cancel, handle }),
            ingestion: None,
        })
    }

    /// Persist every accepted frame message to `sink`. Takes effect on the
    /// next `start_ingestion`.
    pub fn with_sink(mut self, sink: SharedRecordSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Enable push mode (first call only) and start the ingestion task.
    ///
    /// Fails if ingestion is already running. After the task has stopped,
    /// for any reason, it can be started again.
    pub async fn start_ingestion(&mut self) -> Result<(), SessionError> {
        if self.is_ingesting() {
            return Err(SessionError::AlreadyIngesting);
        }
        if let Some(previous) = self.ingestion.take() {
            log_exit(previous.handle.await);
        }

        if !self.connection.is_push_mode() {
            self.connection.enable_push_mode().await?;
        }

        let cancel = CancellationToken::new();
        let handle = spawn_ingestion(
            self.connection.clone(),
            self.buffer.clone(),
            self.sink.clone(),
            self.stats.clone(),
            cancel.clone(),
        );
        self.ingestion = Some(TaskHandle { cancel, handle });
        Ok(())
    }

    pub fn is_ingesting(&self) -> bool {
        self.ingestion
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Cancel the ingestion task and wait for it to exit.
    ///
    /// Returns `None` when no task was started or it panicked.
    pub async fn stop_ingestion(&mut self) -> Option<IngestExit> {
        let task = self.ingestion.take()?;
        task.cancel.cancel();
        log_exit(task.handle.await)
    }

    /// Signal the heartbeat task to stop. Does not wait: a send already in
    /// flight completes on its own.
    pub fn stop_heartbeat(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.cancel.cancel();
            debug!("heartbeat stop requested");
        }
    }

    /// Stop ingestion, stop the heartbeat, then close the socket. Safe to
    /// call more than once.
    pub async fn close(&mut self) {
        self.stop_ingestion().await;
        self.stop_heartbeat();
        self.connection.close().await;
    }

    pub fn buffer(&self) -> &SharedFrameBuffer {
        &self.buffer
    }

    pub fn status(&self) -> &TrackerStatus {
        self.connection.status()
    }

    pub fn stats(&self) -> &SharedIngestStats {
        &self.stats
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }
}

impl Drop for TrackerSession {
    fn drop(&mut self) {
        if let Some(task) = self.ingestion.take() {
            task.cancel.cancel();
        }
        if let Some(task) = self.heartbeat.take() {
            task.cancel.cancel();
        }
    }
}

fn log_exit(joined: Result<IngestExit, tokio::task::JoinError>) -> Option<IngestExit> {
    match joined {
        Ok(exit) => {
            debug!(?exit, "ingestion task joined");
            Some(exit)
        }
        Err(e) => {
            warn!(error = %e, "ingestion task panicked");
            None
        }
    }
}

//! Background tasks bound to an open connection: keepalive and ingestion.
//!
//! Both loops stop at the next wait boundary once their token is
//! cancelled. Neither is ever pre-empted in the middle of a write.

use super::connection::Connection;
use super::error::ProtocolError;
use super::protocol::{FrameMessage, Request};
use super::stats::SharedIngestStats;
use crate::core::buffer::SharedFrameBuffer;
use crate::recording::{append_record, SharedRecordSink};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// How the ingestion task ended.
#[derive(Debug)]
pub enum IngestExit {
    /// Stopped through its cancellation token.
    Cancelled,
    /// Stopped by a decode or connection failure. The buffer keeps its
    /// last contents.
    Failed(ProtocolError),
}

impl IngestExit {
    pub fn is_failure(&self) -> bool {
        matches!(self, IngestExit::Failed(_))
    }
}

/// Send a heartbeat every `interval` until cancelled or a send fails.
pub fn spawn_heartbeat(
    connection: Arc<Connection>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(interval_ms = interval.as_millis() as u64, "heartbeat task started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("heartbeat task cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    trace!("sending heartbeat");
                    if let Err(e) = connection.send_request(&Request::heartbeat()).await {
                        warn!(error = %e, "heartbeat send failed, stopping keepalive");
                        break;
                    }
                }
            }
        }
    })
}

/// Decode pushed frames into `buffer` until cancelled or the stream fails.
///
/// The task holds the connection's read half for its whole lifetime.
pub fn spawn_ingestion(
    connection: Arc<Connection>,
    buffer: SharedFrameBuffer,
    sink: Option<SharedRecordSink>,
    stats: SharedIngestStats,
    cancel: CancellationToken,
) -> JoinHandle<IngestExit> {
    tokio::spawn(async move {
        let mut guard = connection.reader().await;
        let Some(reader) = guard.as_mut() else {
            return IngestExit::Failed(ProtocolError::Closed);
        };
        info!(address = %connection.address(), "ingestion started");

        loop {
            let mut message = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("ingestion cancelled");
                    return IngestExit::Cancelled;
                }
                next = reader.next_message::<FrameMessage>() => match next {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(error = %e, "ingestion stopped");
                        return IngestExit::Failed(e);
                    }
                },
            };

            let frame = match message.frame_mut() {
                Ok(frame) => {
                    frame.received_at = Utc::now();
                    frame.clone()
                }
                Err(reason) => {
                    debug!(?reason, "discarding pushed message");
                    stats.record_discard();
                    continue;
                }
            };

            if let Some(sink) = sink.as_deref() {
                if let Err(e) = append_record(sink, &message) {
                    debug!(error = %e, "failed to persist frame message");
                    stats.record_log_failure();
                }
            }

            trace!(x = frame.avg.x, y = frame.avg.y, "frame received");
            buffer.push(frame);
            stats.record_frame();
        }
    })
}

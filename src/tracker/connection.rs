//! TCP connection to the tracker.
//!
//! The connection owns both halves of the socket. Writes are serialized
//! through a mutex so the heartbeat task and request/response callers never
//! interleave bytes. The read half is locked for the duration of an
//! exchange, and for the whole lifetime of the ingestion task once push mode
//! is active.

use super::error::{ConnectError, ProtocolError};
use super::protocol::{
    MessageReader, MessageWriter, Request, Response, TrackerStatus, TrackerValues,
};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, trace};

pub(crate) type Reader = MessageReader<OwnedReadHalf>;
type Writer = MessageWriter<OwnedWriteHalf>;

/// An open, calibrated connection to the tracker.
#[derive(Debug)]
pub struct Connection {
    address: String,
    status: TrackerStatus,
    writer: Mutex<Option<Writer>>,
    reader: Mutex<Option<Reader>>,
    push_mode: AtomicBool,
}

impl Connection {
    /// Open a TCP connection and validate the tracker status.
    ///
    /// `address` is `host:port`.
    pub async fn connect(address: &str) -> Result<Self, ConnectError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|source| ConnectError::Io {
                address: address.to_string(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "could not disable Nagle on tracker socket");
        }

        let (read_half, write_half) = stream.into_split();
        let mut reader = MessageReader::new(read_half);
        let mut writer = MessageWriter::new(write_half);

        let response: Response<TrackerValues> =
            exchange(&mut reader, &mut writer, &Request::status()).await?;
        debug!(?response, "tracker status response");
        let status = TrackerStatus::try_from(response)?;

        info!(
            address,
            screen_width = status.screen_width,
            screen_height = status.screen_height,
            frame_rate = status.frame_rate,
            heartbeat_ms = status.heartbeat_interval.as_millis() as u64,
            "connected to tracker"
        );

        Ok(Self {
            address: address.to_string(),
            status,
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(Some(reader)),
            push_mode: AtomicBool::new(false),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Tracker state reported during the handshake.
    pub fn status(&self) -> &TrackerStatus {
        &self.status
    }

    pub fn is_push_mode(&self) -> bool {
        self.push_mode.load(Ordering::SeqCst)
    }

    /// Write one request.
    pub async fn send_request(&self, request: &Request) -> Result<(), ProtocolError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ProtocolError::Closed)?;
        trace!(category = %request.category, "sending request");
        writer.send(request).await
    }

    /// Wait for the next response. Unavailable while push mode is active.
    pub async fn receive_response<V: DeserializeOwned>(
        &self,
    ) -> Result<Response<V>, ProtocolError> {
        if self.is_push_mode() {
            return Err(ProtocolError::PushModeActive);
        }
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(ProtocolError::Closed)?;
        reader.next_message().await
    }

    /// Send a request and wait for its response.
    ///
    /// The read half stays locked across the exchange so that no other
    /// caller can consume the response.
    pub async fn request_response<V: DeserializeOwned>(
        &self,
        request: &Request,
    ) -> Result<Response<V>, ProtocolError> {
        if self.is_push_mode() {
            return Err(ProtocolError::PushModeActive);
        }
        let mut reader_guard = self.reader.lock().await;
        let reader = reader_guard.as_mut().ok_or(ProtocolError::Closed)?;

        self.send_request(request).await?;
        next_reply(reader, request).await
    }

    /// Switch the tracker to push mode. From now on every read on this
    /// connection is a pushed message.
    pub async fn enable_push_mode(&self) -> Result<(), ProtocolError> {
        self.send_request(&Request::enable_push()).await?;
        self.push_mode.store(true, Ordering::SeqCst);
        info!(address = %self.address, "push mode enabled");
        Ok(())
    }

    /// Lock the read half. Held by the ingestion task while it runs.
    pub(crate) async fn reader(&self) -> MutexGuard<'_, Option<Reader>> {
        self.reader.lock().await
    }

    /// Release the socket. Safe to call more than once.
    pub async fn close(&self) {
        let writer = self.writer.lock().await.take();
        let reader = self.reader.lock().await.take();

        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "tracker socket shutdown failed");
            }
            info!(address = %self.address, "tracker connection closed");
        }
        drop(reader);
    }

    pub async fn is_closed(&self) -> bool {
        self.writer.lock().await.is_none()
    }
}

async fn exchange<V: DeserializeOwned>(
    reader: &mut Reader,
    writer: &mut Writer,
    request: &Request,
) -> Result<Response<V>, ProtocolError> {
    writer.send(request).await?;
    next_reply(reader, request).await
}

/// Read until the reply to `request` arrives, skipping heartbeat
/// acknowledgements addressed to the keepalive task.
async fn next_reply<V: DeserializeOwned>(
    reader: &mut Reader,
    request: &Request,
) -> Result<Response<V>, ProtocolError> {
    loop {
        let response: Response<V> = reader.next_message().await?;
        if response.is_heartbeat() && !request.is_heartbeat() {
            trace!("skipping heartbeat acknowledgement");
            continue;
        }
        return Ok(response);
    }
}

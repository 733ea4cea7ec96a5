//! Tracker wire protocol: message schema and JSON stream codec.
//!
//! The device speaks JSON objects over TCP. Requests are written one per
//! line; responses are decoded at object boundaries from a byte buffer so
//! that both newline-separated and back-to-back objects are accepted.

use super::error::{ConnectError, ProtocolError};
use super::types::Frame;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Status code the tracker uses for success.
pub const STATUS_OK: u16 = 200;

pub const CATEGORY_TRACKER: &str = "tracker";
pub const CATEGORY_HEARTBEAT: &str = "heartbeat";

/// Fields queried by the status request, in protocol order.
pub const STATUS_FIELDS: [&str; 6] = [
    "push",
    "iscalibrated",
    "heartbeatinterval",
    "screenresw",
    "screenresh",
    "framerate",
];

const READ_CHUNK: usize = 4096;

// ============================================================================
// Requests
// ============================================================================

/// Payload of a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RequestValues {
    /// Names of the fields to read (`get` requests).
    Fields(Vec<String>),
    /// Push-mode switch (`set` requests).
    PushMode { push: bool, version: u32 },
}

/// A request sent to the tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<RequestValues>,
}

impl Request {
    /// Query the tracker state needed to open a session.
    pub fn status() -> Self {
        Self {
            category: CATEGORY_TRACKER.to_string(),
            request: Some("get".to_string()),
            values: Some(RequestValues::Fields(
                STATUS_FIELDS.iter().map(|f| f.to_string()).collect(),
            )),
        }
    }

    /// Ask the tracker to start streaming frames.
    pub fn enable_push() -> Self {
        Self {
            category: CATEGORY_TRACKER.to_string(),
            request: Some("set".to_string()),
            values: Some(RequestValues::PushMode {
                push: true,
                version: 1,
            }),
        }
    }

    /// Keepalive.
    pub fn heartbeat() -> Self {
        Self {
            category: CATEGORY_HEARTBEAT.to_string(),
            request: None,
            values: None,
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.category == CATEGORY_HEARTBEAT
    }
}

// ============================================================================
// Responses
// ============================================================================

/// A response or pushed message, typed by the shape of its `values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response<V> {
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(rename = "statuscode", default)]
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<V>,
}

impl<V> Response<V> {
    pub fn is_success(&self) -> bool {
        self.status_code == STATUS_OK
    }

    pub fn is_heartbeat(&self) -> bool {
        self.category == CATEGORY_HEARTBEAT
    }
}

/// Raw `values` of the status response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerValues {
    #[serde(default)]
    pub push: Option<bool>,
    #[serde(default)]
    pub iscalibrated: Option<bool>,
    #[serde(default)]
    pub heartbeatinterval: Option<f64>,
    #[serde(default)]
    pub screenresw: Option<f64>,
    #[serde(default)]
    pub screenresh: Option<f64>,
    #[serde(default)]
    pub framerate: Option<f64>,
}

/// Validated tracker state reported at connection time.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerStatus {
    pub push: bool,
    pub calibrated: bool,
    pub heartbeat_interval: Duration,
    pub screen_width: u32,
    pub screen_height: u32,
    /// Frames per second.
    pub frame_rate: f64,
}

impl TrackerStatus {
    /// Time between two consecutive frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate)
    }
}

fn positive(field: &'static str, value: Option<f64>) -> Result<f64, ConnectError> {
    let value = value.ok_or(ConnectError::MissingField(field))?;
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ConnectError::InvalidField { field, value })
    }
}

impl TryFrom<Response<TrackerValues>> for TrackerStatus {
    type Error = ConnectError;

    fn try_from(response: Response<TrackerValues>) -> Result<Self, Self::Error> {
        if !response.is_success() {
            return Err(ConnectError::Status(response.status_code));
        }
        let values = response.values.unwrap_or_default();

        let calibrated = values
            .iscalibrated
            .ok_or(ConnectError::MissingField("iscalibrated"))?;
        if !calibrated {
            return Err(ConnectError::NotCalibrated);
        }

        let interval_ms = positive("heartbeatinterval", values.heartbeatinterval)?;
        let width = positive("screenresw", values.screenresw)?;
        let height = positive("screenresh", values.screenresh)?;
        let frame_rate = positive("framerate", values.framerate)?;

        Ok(Self {
            push: values.push.unwrap_or(false),
            calibrated,
            heartbeat_interval: Duration::from_millis(interval_ms as u64),
            screen_width: width as u32,
            screen_height: height as u32,
            frame_rate,
        })
    }
}

/// `values` of a pushed frame message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<Frame>,
}

/// A message received while push mode is active.
pub type FrameMessage = Response<FrameValues>;

/// Why a pushed message was skipped. Never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    Heartbeat,
    Status(u16),
    MissingFrame,
}

impl FrameMessage {
    /// The frame carried by this message, or the reason it carries none.
    pub fn frame_mut(&mut self) -> Result<&mut Frame, Discard> {
        if !self.is_success() {
            return Err(Discard::Status(self.status_code));
        }
        if self.is_heartbeat() {
            return Err(Discard::Heartbeat);
        }
        self.values
            .as_mut()
            .and_then(|values| values.frame.as_mut())
            .ok_or(Discard::MissingFrame)
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Decodes complete JSON objects from a byte stream.
#[derive(Debug)]
pub struct MessageReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(READ_CHUNK),
        }
    }

    /// Wait for the next complete object and decode it as `T`.
    ///
    /// Cancel-safe: bytes already read stay buffered if the future is
    /// dropped.
    pub async fn next_message<T: DeserializeOwned>(&mut self) -> Result<T, ProtocolError> {
        loop {
            if let Some(message) = self.decode_buffered()? {
                return Ok(message);
            }
            self.buf.reserve(READ_CHUNK);
            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(ProtocolError::ConnectionClosed);
            }
        }
    }

    fn decode_buffered<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ProtocolError> {
        let mut stream =
            serde_json::Deserializer::from_slice(&self.buf).into_iter::<serde_json::Value>();
        let (value, consumed) = match stream.next() {
            None => {
                // Only whitespace left.
                self.buf.clear();
                return Ok(None);
            }
            Some(Ok(value)) => (value, stream.byte_offset()),
            Some(Err(e)) if e.is_eof() => return Ok(None),
            Some(Err(e)) => return Err(ProtocolError::Malformed(e)),
        };
        // A well-formed object of the wrong shape is consumed so the next
        // read starts past it.
        self.buf.drain(..consumed);
        serde_json::from_value(value)
            .map(Some)
            .map_err(ProtocolError::Malformed)
    }
}

/// Writes newline-terminated JSON objects.
#[derive(Debug)]
pub struct MessageWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), ProtocolError> {
        let mut bytes = serde_json::to_vec(message)?;
        bytes.push(b'\n');
        self.inner.write_all(&bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_encoding() {
        let status = serde_json::to_value(Request::status()).unwrap();
        assert_eq!(
            status,
            json!({
                "category": "tracker",
                "request": "get",
                "values": ["push", "iscalibrated", "heartbeatinterval",
                           "screenresw", "screenresh", "framerate"]
            })
        );

        let push = serde_json::to_value(Request::enable_push()).unwrap();
        assert_eq!(
            push,
            json!({"category": "tracker", "request": "set",
                   "values": {"push": true, "version": 1}})
        );

        let heartbeat = serde_json::to_value(Request::heartbeat()).unwrap();
        assert_eq!(heartbeat, json!({"category": "heartbeat"}));
    }

    fn status_response(values: serde_json::Value) -> Response<TrackerValues> {
        serde_json::from_value(json!({
            "category": "tracker",
            "request": "get",
            "statuscode": 200,
            "values": values
        }))
        .unwrap()
    }

    #[test]
    fn test_tracker_status_validation() {
        let status = TrackerStatus::try_from(status_response(json!({
            "push": false,
            "iscalibrated": true,
            "heartbeatinterval": 3000,
            "screenresw": 1920,
            "screenresh": 1080,
            "framerate": 30
        })))
        .unwrap();

        assert_eq!(status.heartbeat_interval, Duration::from_millis(3000));
        assert_eq!((status.screen_width, status.screen_height), (1920, 1080));
        assert_eq!(status.frame_interval(), Duration::from_secs_f64(1.0 / 30.0));
    }

    #[test]
    fn test_tracker_status_rejections() {
        let uncalibrated = TrackerStatus::try_from(status_response(json!({
            "iscalibrated": false,
            "heartbeatinterval": 3000,
            "screenresw": 1920,
            "screenresh": 1080,
            "framerate": 30
        })));
        assert!(matches!(uncalibrated, Err(ConnectError::NotCalibrated)));

        let missing = TrackerStatus::try_from(status_response(json!({
            "iscalibrated": true,
            "heartbeatinterval": 3000,
            "screenresw": 1920,
            "screenresh": 1080
        })));
        assert!(matches!(missing, Err(ConnectError::MissingField("framerate"))));

        let zero_interval = TrackerStatus::try_from(status_response(json!({
            "iscalibrated": true,
            "heartbeatinterval": 0,
            "screenresw": 1920,
            "screenresh": 1080,
            "framerate": 30
        })));
        assert!(matches!(
            zero_interval,
            Err(ConnectError::InvalidField { field: "heartbeatinterval", .. })
        ));

        let mut failed = status_response(json!({}));
        failed.status_code = 403;
        assert!(matches!(
            TrackerStatus::try_from(failed),
            Err(ConnectError::Status(403))
        ));
    }

    #[test]
    fn test_non_numeric_status_field_fails_decode() {
        let result: Result<Response<TrackerValues>, _> = serde_json::from_value(json!({
            "category": "tracker",
            "statuscode": 200,
            "values": {"framerate": "fast"}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_frame_message_classification() {
        let mut heartbeat: FrameMessage =
            serde_json::from_value(json!({"category": "heartbeat", "statuscode": 200})).unwrap();
        assert_eq!(heartbeat.frame_mut().unwrap_err(), Discard::Heartbeat);

        let mut failed: FrameMessage =
            serde_json::from_value(json!({"category": "tracker", "statuscode": 500})).unwrap();
        assert_eq!(failed.frame_mut().unwrap_err(), Discard::Status(500));

        let mut ack: FrameMessage = serde_json::from_value(
            json!({"category": "tracker", "request": "set", "statuscode": 200}),
        )
        .unwrap();
        assert_eq!(ack.frame_mut().unwrap_err(), Discard::MissingFrame);

        let mut frame: FrameMessage = serde_json::from_value(json!({
            "category": "tracker",
            "request": "get",
            "statuscode": 200,
            "values": {"frame": {"avg": {"x": 5.0, "y": 6.0}}}
        }))
        .unwrap();
        assert_eq!(frame.frame_mut().unwrap().avg.x, 5.0);
    }

    #[tokio::test]
    async fn test_reader_handles_split_and_concatenated_objects() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = MessageReader::new(rx);

        tokio::spawn(async move {
            tx.write_all(br#"{"category":"heart"#).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.write_all(br#"beat","statuscode":200}{"category":"tracker","statuscode":200}"#)
                .await
                .unwrap();
            tx.write_all(b"\n  ").await.unwrap();
        });

        let first: Response<FrameValues> = reader.next_message().await.unwrap();
        assert!(first.is_heartbeat());
        let second: Response<FrameValues> = reader.next_message().await.unwrap();
        assert_eq!(second.category, "tracker");

        let closed = reader.next_message::<Response<FrameValues>>().await;
        assert!(matches!(closed, Err(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_reader_rejects_malformed_json() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = MessageReader::new(rx);
        tx.write_all(b"{\"category\": ]").await.unwrap();

        let result = reader.next_message::<Response<FrameValues>>().await;
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_reader_skips_past_mistyped_object() {
        let (mut tx, rx) = tokio::io::duplex(256);
        let mut reader = MessageReader::new(rx);
        tx.write_all(b"{\"category\":\"tracker\",\"statuscode\":\"200\"}\n")
            .await
            .unwrap();
        tx.write_all(
            br#"{"category":"tracker","statuscode":200,"values":{"frame":{"avg":{"x":5.0,"y":6.0}}}}"#,
        )
        .await
        .unwrap();

        let first = reader.next_message::<FrameMessage>().await;
        assert!(matches!(first, Err(ProtocolError::Malformed(_))));

        let mut second: FrameMessage = reader.next_message().await.unwrap();
        assert_eq!(second.frame_mut().unwrap().avg.x, 5.0);
    }

    #[tokio::test]
    async fn test_writer_terminates_with_newline() {
        let (tx, mut rx) = tokio::io::duplex(256);
        let mut writer = MessageWriter::new(tx);
        writer.send(&Request::heartbeat()).await.unwrap();
        writer.shutdown().await.unwrap();

        let mut out = String::new();
        rx.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "{\"category\":\"heartbeat\"}\n");
    }
}

//! Append-only JSON-lines record log.
//!
//! Every frame message accepted by the ingestion task is written here as
//! received, plus a page-view record whenever the HTTP layer serves a static
//! page. The offline replay reads the same file back.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Destination for serialized records, one per line.
pub trait RecordSink: Send + Sync {
    fn append_line(&self, line: &str) -> io::Result<()>;
}

/// Thread-safe shared sink.
pub type SharedRecordSink = Arc<dyn RecordSink>;

/// Serialize `record` as one JSON line into `sink`.
pub fn append_record<T: Serialize>(sink: &dyn RecordSink, record: &T) -> io::Result<()> {
    let line = serde_json::to_string(record).map_err(io::Error::other)?;
    sink.append_line(&line)
}

/// A record marking that a page was requested; starts a new replay segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageViewRecord {
    #[serde(rename = "request path")]
    pub request_path: String,
    #[serde(rename = "unix time")]
    pub unix_time: i64,
}

impl PageViewRecord {
    pub fn now(request_path: impl Into<String>) -> Self {
        Self {
            request_path: request_path.into(),
            unix_time: Utc::now().timestamp(),
        }
    }
}

/// File-backed record log, opened in append mode.
#[derive(Debug)]
pub struct JsonlLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlLog {
    /// Open (creating if needed) the log at `path`.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for JsonlLog {
    fn append_line(&self, line: &str) -> io::Result<()> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        // Single write so concurrent appenders never split a record.
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        file.write_all(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_log_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join("gaze-agent-log-test")
            .join(format!("{name}-{}.json", std::process::id()))
    }

    #[test]
    fn test_jsonl_log_appends_lines() {
        let path = temp_log_path("append");
        let _ = std::fs::remove_file(&path);

        let log = JsonlLog::open(&path).unwrap();
        append_record(&log, &PageViewRecord::now("/index.html")).unwrap();
        log.append_line(r#"{"category":"tracker"}"#).unwrap();
        drop(log);

        // Reopening appends rather than truncating.
        let log = JsonlLog::open(&path).unwrap();
        log.append_line("{}").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("\"request path\":\"/index.html\""));
        assert!(lines[0].contains("\"unix time\""));
        assert_eq!(lines[2], "{}");

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_page_view_record_format() {
        let record: PageViewRecord =
            serde_json::from_str(r#"{"request path": "/a.html", "unix time": 1400000000}"#)
                .unwrap();
        assert_eq!(record.request_path, "/a.html");
        assert_eq!(record.unix_time, 1_400_000_000);
    }
}

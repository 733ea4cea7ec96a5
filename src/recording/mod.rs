//! Persistent record of everything the agent ingests.

pub mod log;

// Re-export commonly used types
pub use log::{append_record, JsonlLog, PageViewRecord, RecordSink, SharedRecordSink};

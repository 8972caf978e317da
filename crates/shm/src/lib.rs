//! Timing publisher and consumer client.
//!
//! The fused result is republished as a small JSON document, rewritten
//! atomically on every fusion step. Other processes read it through
//! [`TimingClient`], which caches for up to 500 ms and treats a snapshot
//! older than 120 s as unavailable.

pub mod client;
pub mod snapshot;
pub mod writer;

pub use client::TimingClient;
pub use snapshot::{ChannelSummary, ClockStatus, TimingSnapshot, SCHEMA_VERSION};
pub use writer::SnapshotWriter;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

//! Sample-indexed binary archive for one channel's decoded IQ stream.
//!
//! Physical model: fixed-duration binary files (one hour by default) of
//! complex float32 samples, little-endian, plus a JSON sidecar recording
//! the file's gap map and stream-health counters. Logical model, as seen
//! by a reader: one continuous sample timeline indexed by RTP timestamp,
//! spanning however many files it takes.

pub mod reader;
pub mod sidecar;
pub mod writer;

pub use reader::ArchiveReader;
pub use sidecar::{Sidecar, StreamHealth};
pub use writer::{ArchiveRollover, ArchiveWriter, ArchiveWriterOptions};

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Json(serde_json::Error),
    /// A sidecar or sample file exists but its contents are structurally
    /// invalid (wrong length, unparsable JSON schema, etc).
    Corrupt(String),
    /// The requested range extends past what has been written so far.
    /// Not a hard error: callers (the minute scheduler) retry later.
    NotYetAvailable,
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

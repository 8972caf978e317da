//! Ties the recorder's library crates into the running daemon: per-channel
//! SDR lifecycle and RTP ingress, the minute scheduler that drives tone
//! detection through to a per-channel `D_clock`, and the independent
//! multi-broadcast fusion task.
//!
//! None of this crate's state is global; every task below is owned by one
//! [`environment::Environment`], constructed once in `main` and handed out
//! as an `Arc`.

pub mod channel_runtime;
pub mod clock_discipline;
pub mod csv_log;
pub mod environment;
pub mod fusion_task;
pub mod minute;
pub mod sdr_stream;

pub use environment::Environment;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Rtp(rtp::Error),
    Archive(archive::Error),
    Dsp(dsp::Error),
    Timing(timing::Error),
    Fusion(fusion::Error),
    Shm(shm::Error),
    Sdr(sdr_client::Error),
    /// The SDR daemon reported a channel/destination already in use by
    /// another station's recorder.
    DestinationInUse(String),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rtp::Error> for Error {
    fn from(value: rtp::Error) -> Self {
        Self::Rtp(value)
    }
}

impl From<archive::Error> for Error {
    fn from(value: archive::Error) -> Self {
        Self::Archive(value)
    }
}

impl From<dsp::Error> for Error {
    fn from(value: dsp::Error) -> Self {
        Self::Dsp(value)
    }
}

impl From<timing::Error> for Error {
    fn from(value: timing::Error) -> Self {
        Self::Timing(value)
    }
}

impl From<fusion::Error> for Error {
    fn from(value: fusion::Error) -> Self {
        Self::Fusion(value)
    }
}

impl From<shm::Error> for Error {
    fn from(value: shm::Error) -> Self {
        Self::Shm(value)
    }
}

impl From<sdr_client::Error> for Error {
    fn from(value: sdr_client::Error) -> Self {
        Self::Sdr(value)
    }
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

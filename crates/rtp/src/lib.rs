//! RTP ingress for HF time-standard IQ streams.
//!
//! A channel's RTP stream carries complex IQ samples (I in the real part, Q
//! in the imaginary part) at the channel's configured sample rate. This crate
//! owns everything between "bytes off a multicast socket" and "a contiguous,
//! gap-annotated sample timeline handed to the archive writer": header
//! parsing, payload decoding, and resequencing.

pub mod anchor;
pub mod gap;
pub mod header;
pub mod payload;
pub mod resequencer;

pub use anchor::TimeReference;
pub use gap::GapInterval;
pub use header::RtpHeader;
pub use resequencer::{Resequencer, ResequencerOptions};

#[derive(Debug)]
pub enum Error {
    /// RTP header truncated or version field not 2.
    DecodeInvalid,
    /// Computed payload offset exceeds the datagram length.
    PayloadOffsetOutOfRange,
    /// Payload type is not a recognized IQ encoding.
    UnknownPayloadType(u8),
    /// Payload length isn't a whole number of IQ sample pairs for the
    /// inferred encoding.
    MisalignedPayload,
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A contiguous run of complex samples belonging to one channel.
///
/// `rtp_timestamp` is the sample-index of `samples[0]`; the block is
/// continuous, so `samples[i]` is at `rtp_timestamp.wrapping_add(i as u32)`.
#[derive(Debug, Clone)]
pub struct SampleBlock {
    pub rtp_timestamp: u32,
    pub samples: Vec<num_complex::Complex32>,
    /// System-clock timestamp captured at packet arrival, in seconds since
    /// the Unix epoch. `None` for synthetic zero-fill blocks.
    pub arrival_wallclock: Option<f64>,
}

impl SampleBlock {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The RTP timestamp one past the last sample in this block.
    pub fn end_timestamp(&self) -> u32 {
        self.rtp_timestamp.wrapping_add(self.samples.len() as u32)
    }

    pub(crate) fn zero_fill(rtp_start: u32, len: u32) -> Self {
        Self {
            rtp_timestamp: rtp_start,
            samples: vec![num_complex::Complex32::new(0.0, 0.0); len as usize],
            arrival_wallclock: None,
        }
    }
}

/// Signed difference `a - b` of two 32-bit RTP timestamps, correct across
/// wraparound as long as the true difference fits in `[-2^31, 2^31)`.
///
/// # Examples
///
/// ```
/// use grape_rtp::rtp_diff;
///
/// assert_eq!(rtp_diff(10, 5), 5);
/// assert_eq!(rtp_diff(5, 10), -5);
/// assert_eq!(rtp_diff(2, u32::MAX - 2), 5);
/// assert_eq!(rtp_diff(u32::MAX - 2, 2), -5);
/// ```
pub fn rtp_diff(a: u32, b: u32) -> i64 {
    a.wrapping_sub(b) as i32 as i64
}

use crate::rtp_diff;

/// How a [`TimeReference`] was established, in decreasing order of trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    ToneWwv,
    ToneChu,
    NtpFallback,
    WallclockFallback,
}

/// Binds a 32-bit RTP sample-index timestamp to UTC, with a confidence
/// weight and a provenance label, so sample indices can be converted to and
/// from wall-clock time.
///
/// The RTP counter wraps at 2^32; conversions use [`rtp_diff`] so they
/// remain correct as long as the queried timestamp is within 2^31 samples
/// of the anchor (around 2.5 days at 10 kHz, far beyond any archive read).
#[derive(Debug, Clone, Copy)]
pub struct TimeReference {
    pub rtp_timestamp: u32,
    pub utc_seconds: f64,
    pub sample_rate_hz: f64,
    pub confidence: f64,
    pub provenance: Provenance,
}

impl TimeReference {
    pub fn new(
        rtp_timestamp: u32,
        utc_seconds: f64,
        sample_rate_hz: f64,
        confidence: f64,
        provenance: Provenance,
    ) -> Self {
        Self {
            rtp_timestamp,
            utc_seconds,
            sample_rate_hz,
            confidence,
            provenance,
        }
    }

    /// Converts an RTP sample-index timestamp to UTC seconds.
    ///
    /// # Examples
    ///
    /// ```
    /// use grape_rtp::anchor::{Provenance, TimeReference};
    ///
    /// let anchor = TimeReference::new(1_000, 1_700_000_000.0, 20_000.0, 0.9, Provenance::ToneWwv);
    /// assert!((anchor.rtp_to_utc(21_000) - 1_700_000_001.0).abs() < 1e-9);
    /// ```
    pub fn rtp_to_utc(&self, rtp_timestamp: u32) -> f64 {
        let delta_samples = rtp_diff(rtp_timestamp, self.rtp_timestamp);
        self.utc_seconds + delta_samples as f64 / self.sample_rate_hz
    }

    /// Converts a UTC time to the nearest RTP sample-index timestamp,
    /// wrapping modulo 2^32.
    pub fn utc_to_rtp(&self, utc_seconds: f64) -> u32 {
        let delta_seconds = utc_seconds - self.utc_seconds;
        let delta_samples = (delta_seconds * self.sample_rate_hz).round() as i64;
        self.rtp_timestamp.wrapping_add(delta_samples as i32 as u32)
    }

    /// Replaces this anchor only if the candidate is at least as trustworthy
    /// (equal or higher confidence) or the existing anchor's provenance is
    /// the wallclock fallback, which any real anchor should override.
    pub fn should_replace_with(&self, candidate: &TimeReference) -> bool {
        matches!(self.provenance, Provenance::WallclockFallback) || candidate.confidence >= self.confidence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor() -> TimeReference {
        TimeReference::new(0, 1_700_000_000.0, 20_000.0, 0.9, Provenance::ToneWwv)
    }

    #[test]
    fn converts_rtp_to_utc() {
        let a = anchor();
        assert!((a.rtp_to_utc(20_000) - 1_700_000_001.0).abs() < 1e-9);
    }

    #[test]
    fn converts_utc_to_rtp() {
        let a = anchor();
        assert_eq!(a.utc_to_rtp(1_700_000_001.0), 20_000);
    }

    #[test]
    fn handles_wraparound_in_conversion() {
        let a = TimeReference::new(u32::MAX - 10, 1_700_000_000.0, 20_000.0, 0.9, Provenance::ToneChu);
        let utc_at_wrap = a.rtp_to_utc(10);
        assert!(utc_at_wrap > 1_700_000_000.0);
    }

    #[test]
    fn wallclock_fallback_always_replaced() {
        let fallback = TimeReference::new(0, 0.0, 20_000.0, 0.0, Provenance::WallclockFallback);
        let candidate = TimeReference::new(0, 0.0, 20_000.0, 0.1, Provenance::ToneWwv);
        assert!(fallback.should_replace_with(&candidate));
    }

    #[test]
    fn higher_confidence_replaces() {
        let low = TimeReference::new(0, 0.0, 20_000.0, 0.5, Provenance::NtpFallback);
        let high = TimeReference::new(0, 0.0, 20_000.0, 0.9, Provenance::ToneWwv);
        assert!(low.should_replace_with(&high));
        assert!(!high.should_replace_with(&low));
    }
}

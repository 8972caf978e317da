use num_complex::Complex32;

use crate::fft_power::{in_band_power, InBandPower};
use crate::window::tukey;
use crate::Error;

/// The three time-standard broadcasters this system listens for. `Shared`
/// is not a broadcaster; it tags a receive frequency where both WWV and
/// WWVH may be present (2.5, 5, 10, 15 MHz), used by the station
/// discrimination stage, not by the tone detector itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Station {
    Wwv,
    Wwvh,
    Chu,
}

impl Station {
    /// Plausible ground-wave/skywave propagation delay band, in
    /// milliseconds, for a CONUS receiver. Used to gate acceptance in
    /// [`ToneDetector::detect`].
    pub fn plausible_delay_band_ms(&self) -> (f64, f64) {
        match self {
            Station::Wwv => (0.0, 30.0),
            Station::Wwvh => (5.0, 35.0),
            Station::Chu => (0.0, 20.0),
        }
    }
}

/// A precomputed quadrature (sine/cosine) matched-filter template for one
/// station's timing tone, Tukey-windowed and normalized to unit energy.
pub struct StationTemplate {
    pub station: Station,
    pub tone_freq_hz: f64,
    pub duration_s: f64,
    sine: Vec<f32>,
    cosine: Vec<f32>,
}

impl StationTemplate {
    /// The three canonical templates: (WWV, 1000 Hz, 0.8
    /// s), (WWVH, 1200 Hz, 0.8 s), (CHU, 1000 Hz, 0.5 s).
    pub fn canonical(sample_rate_hz: f64) -> Vec<StationTemplate> {
        vec![
            StationTemplate::new(Station::Wwv, 1000.0, 0.8, sample_rate_hz),
            StationTemplate::new(Station::Wwvh, 1200.0, 0.8, sample_rate_hz),
            StationTemplate::new(Station::Chu, 1000.0, 0.5, sample_rate_hz),
        ]
    }

    pub fn new(station: Station, tone_freq_hz: f64, duration_s: f64, sample_rate_hz: f64) -> Self {
        let n = (duration_s * sample_rate_hz).round().max(1.0) as usize;
        let win = tukey(n, 0.1);

        let mut sine = vec![0.0f32; n];
        let mut cosine = vec![0.0f32; n];
        for i in 0..n {
            let phase = 2.0 * std::f64::consts::PI * tone_freq_hz * i as f64 / sample_rate_hz;
            sine[i] = (phase.sin() * win[i]) as f32;
            cosine[i] = (phase.cos() * win[i]) as f32;
        }
        normalize_energy(&mut sine);
        normalize_energy(&mut cosine);

        Self {
            station,
            tone_freq_hz,
            duration_s,
            sine,
            cosine,
        }
    }

    pub fn len(&self) -> usize {
        self.sine.len()
    }
}

fn normalize_energy(v: &mut [f32]) {
    let energy: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if energy > 1e-9 {
        for x in v.iter_mut() {
            *x /= energy;
        }
    }
}

/// One minute's tone detection for one station.
#[derive(Debug, Clone, Copy)]
pub struct ToneDetection {
    pub station: Station,
    pub tone_freq_hz: f64,
    pub duration_s: f64,
    /// Measured arrival time, as a signed offset from the expected minute
    /// boundary, in milliseconds. Positive means the tone arrived late.
    pub arrival_offset_ms: f64,
    pub snr_db: f64,
    pub correlation_peak: f32,
    pub noise_floor: f32,
    /// Sub-sample fractional correction applied by parabolic
    /// interpolation, in samples.
    pub sub_sample_offset: f64,
    /// True when this detection is strong and plausible enough to seed a
    /// [`rtp::TimeReference`] (SNR comfortably above threshold and within
    /// the station's plausible delay band with margin).
    pub may_seed_anchor: bool,
    pub in_band: InBandPower,
}

const MIN_ACCEPT_SNR_DB: f64 = 6.0;
const ANCHOR_SEED_SNR_DB: f64 = 12.0;

/// A pure function: detects each station's tone in a buffer with no
/// shared mutable state, so per-channel minute buffers can be processed
/// independently and concurrently.
pub struct ToneDetector {
    templates: Vec<StationTemplate>,
    sample_rate_hz: f64,
}

impl ToneDetector {
    pub fn new(sample_rate_hz: f64) -> Self {
        Self {
            templates: StationTemplate::canonical(sample_rate_hz),
            sample_rate_hz,
        }
    }

    /// Detects one station's tone. `buffer` must span at least one minute
    /// plus the search margin. `expected_boundary_sample` is the sample
    /// index, within `buffer`, of the expected minute (or tick) boundary.
    /// `search_window_ms` bounds how far from that boundary the detector
    /// looks (±500 ms on pass 0, narrower on refinement passes).
    pub fn detect(
        &self,
        station: Station,
        buffer: &[Complex32],
        expected_boundary_sample: usize,
        search_window_ms: f64,
    ) -> Result<Option<ToneDetection>, Error> {
        let template = self
            .templates
            .iter()
            .find(|t| t.station == station)
            .expect("canonical templates cover all stations");

        if buffer.len() < template.len() {
            return Err(Error::BufferTooShortForMinute);
        }

        let envelope = am_envelope(buffer);
        let n_lags = envelope.len() - template.len() + 1;
        if n_lags == 0 {
            return Err(Error::BufferTooShortForMinute);
        }

        let magnitude: Vec<f32> = (0..n_lags)
            .map(|lag| {
                let window = &envelope[lag..lag + template.len()];
                let sin_corr: f32 = window.iter().zip(&template.sine).map(|(a, b)| a * b).sum();
                let cos_corr: f32 = window.iter().zip(&template.cosine).map(|(a, b)| a * b).sum();
                (sin_corr * sin_corr + cos_corr * cos_corr).sqrt()
            })
            .collect();

        let search_window_samples = (search_window_ms / 1000.0 * self.sample_rate_hz).round() as i64;
        let lo = (expected_boundary_sample as i64 - search_window_samples).max(0) as usize;
        let hi = ((expected_boundary_sample as i64 + search_window_samples) as usize).min(n_lags.saturating_sub(1));
        if lo > hi {
            return Err(Error::BufferTooShortForMinute);
        }

        let (peak_lag, peak_value) = (lo..=hi)
            .map(|lag| (lag, magnitude[lag]))
            .fold((lo, magnitude[lo]), |best, cur| if cur.1 > best.1 { cur } else { best });

        let sub_sample_offset = parabolic_interpolate(&magnitude, peak_lag);

        let outside: Vec<f32> = magnitude
            .iter()
            .enumerate()
            .filter(|(i, _)| *i < lo || *i > hi)
            .map(|(_, v)| *v)
            .collect();
        let noise_floor = estimate_noise_floor(&outside).unwrap_or(peak_value * 0.1);

        let snr_db = 20.0 * (peak_value.max(1e-9) / noise_floor.max(1e-9)).log10() as f64;

        let arrival_offset_samples = peak_lag as f64 + sub_sample_offset - expected_boundary_sample as f64;
        let arrival_offset_ms = arrival_offset_samples / self.sample_rate_hz * 1000.0;

        let (band_lo, band_hi) = station.plausible_delay_band_ms();
        let within_band = arrival_offset_ms >= band_lo - 5.0 && arrival_offset_ms <= band_hi + 5.0;

        if snr_db < MIN_ACCEPT_SNR_DB || !within_band {
            return Ok(None);
        }

        let segment = &buffer[peak_lag..peak_lag + template.len()];
        let in_band = in_band_power(segment, self.sample_rate_hz, template.tone_freq_hz);

        let may_seed_anchor =
            snr_db >= ANCHOR_SEED_SNR_DB && arrival_offset_ms >= band_lo && arrival_offset_ms <= band_hi;

        Ok(Some(ToneDetection {
            station,
            tone_freq_hz: template.tone_freq_hz,
            duration_s: template.duration_s,
            arrival_offset_ms,
            snr_db,
            correlation_peak: peak_value,
            noise_floor,
            sub_sample_offset,
            may_seed_anchor,
            in_band,
        }))
    }
}

fn am_envelope(buffer: &[Complex32]) -> Vec<f32> {
    let magnitudes: Vec<f32> = buffer.iter().map(|c| c.norm()).collect();
    let mean = magnitudes.iter().sum::<f32>() / magnitudes.len().max(1) as f32;
    magnitudes.into_iter().map(|m| m - mean).collect()
}

/// Refines `magnitude[peak]`'s position using the three-point parabolic
/// (quadratic) interpolation formula, returning the fractional-sample
/// correction to add to `peak`.
fn parabolic_interpolate(magnitude: &[f32], peak: usize) -> f64 {
    if peak == 0 || peak + 1 >= magnitude.len() {
        return 0.0;
    }
    let y_m1 = magnitude[peak - 1] as f64;
    let y_0 = magnitude[peak] as f64;
    let y_p1 = magnitude[peak + 1] as f64;
    let denom = y_m1 - 2.0 * y_0 + y_p1;
    if denom.abs() < 1e-12 {
        return 0.0;
    }
    0.5 * (y_m1 - y_p1) / denom
}

/// Noise floor: the 10th percentile of the
/// correlation magnitude outside the search window, plus three times its
/// robust standard deviation (estimated via MAD, scaled by 1.4826).
fn estimate_noise_floor(outside: &[f32]) -> Option<f32> {
    if outside.is_empty() {
        return None;
    }
    let mut sorted = outside.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let p10_idx = ((sorted.len() as f64 - 1.0) * 0.10).round() as usize;
    let p10 = sorted[p10_idx];

    let median = sorted[sorted.len() / 2];
    let mut abs_dev: Vec<f32> = sorted.iter().map(|v| (v - median).abs()).collect();
    abs_dev.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mad = abs_dev[abs_dev.len() / 2] * 1.4826;

    Some(p10 + 3.0 * mad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn synth_minute(sample_rate_hz: f64, tone_freq_hz: f64, tone_duration_s: f64, tone_start_sample: usize) -> Vec<Complex32> {
        let total = (sample_rate_hz * 2.0) as usize; // 2 seconds around the boundary
        let tone_len = (tone_duration_s * sample_rate_hz) as usize;
        (0..total)
            .map(|i| {
                if i >= tone_start_sample && i < tone_start_sample + tone_len {
                    let phase = 2.0 * PI * tone_freq_hz * (i - tone_start_sample) as f64 / sample_rate_hz;
                    Complex32::new(phase.cos() as f32, phase.sin() as f32)
                } else {
                    Complex32::new(0.001, -0.001)
                }
            })
            .collect()
    }

    #[test]
    fn detects_wwv_tone_near_expected_boundary() {
        let rate = 1000.0;
        let boundary_sample = 1000; // middle of the 2s buffer
        let actual_start = boundary_sample + 10; // 10ms late
        let buffer = synth_minute(rate, 1000.0, 0.8, actual_start);

        let detector = ToneDetector::new(rate);
        let detection = detector
            .detect(Station::Wwv, &buffer, boundary_sample, 500.0)
            .unwrap()
            .expect("should detect a strong tone");

        assert!(detection.snr_db > 6.0);
        assert!((detection.arrival_offset_ms - 10.0).abs() < 3.0);
    }

    #[test]
    fn rejects_detection_outside_plausible_band() {
        let rate = 1000.0;
        let boundary_sample = 1000;
        // 900 ms is absurd for a CONUS WWV propagation delay
        let buffer = synth_minute(rate, 1000.0, 0.8, boundary_sample + 900);

        let detector = ToneDetector::new(rate);
        let detection = detector.detect(Station::Wwv, &buffer, boundary_sample, 950.0).unwrap();
        assert!(detection.is_none());
    }

    #[test]
    fn silence_yields_no_detection() {
        let rate = 1000.0;
        let buffer = vec![Complex32::new(0.001, -0.0005); 2000];
        let detector = ToneDetector::new(rate);
        let detection = detector.detect(Station::Chu, &buffer, 1000, 500.0).unwrap();
        assert!(detection.is_none());
    }

    #[test]
    fn too_short_buffer_is_an_error() {
        let detector = ToneDetector::new(1000.0);
        let buffer = vec![Complex32::new(0.0, 0.0); 10];
        assert!(matches!(
            detector.detect(Station::Chu, &buffer, 5, 100.0),
            Err(Error::BufferTooShortForMinute)
        ));
    }
}

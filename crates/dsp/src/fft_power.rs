use num_complex::Complex32;
use rustfft::{num_complex::Complex as FftComplex, FftPlanner};

use crate::window;

/// Result of an FFT-based in-band power measurement at one target
/// frequency: used as the tone detector's SNR-in-band value, distinct
/// from the matched-filter correlation SNR.
#[derive(Debug, Clone, Copy)]
pub struct InBandPower {
    pub power_db: f64,
    pub snr_db: f64,
}

/// Measures the power at `target_freq_hz` in a Tukey-windowed FFT of
/// `samples`, against the mean power of the bins in `[guard, guard + span)`
/// bins either side of the target (skipping the target's own neighborhood
/// so the noise estimate isn't biased by tone leakage).
pub fn in_band_power(samples: &[Complex32], sample_rate_hz: f64, target_freq_hz: f64) -> InBandPower {
    let n = samples.len();
    if n == 0 {
        return InBandPower {
            power_db: f64::NEG_INFINITY,
            snr_db: 0.0,
        };
    }

    let win = window::tukey(n, 0.1);
    let mut buffer: Vec<FftComplex<f32>> = samples
        .iter()
        .zip(win.iter())
        .map(|(s, w)| FftComplex::new(s.re * *w as f32, s.im * *w as f32))
        .collect();

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n);
    fft.process(&mut buffer);

    let bin_hz = sample_rate_hz / n as f64;
    let target_bin = (target_freq_hz / bin_hz).round() as i64;

    let power_at = |bin: i64| -> f64 {
        let idx = bin.rem_euclid(n as i64) as usize;
        let c = buffer[idx];
        (c.re as f64 * c.re as f64 + c.im as f64 * c.im as f64) / (n as f64 * n as f64)
    };

    let target_power = power_at(target_bin);

    const GUARD_BINS: i64 = 2;
    const NOISE_SPAN: i64 = 8;
    let mut noise_sum = 0.0;
    let mut noise_count = 0;
    for offset in (GUARD_BINS + 1)..=(GUARD_BINS + NOISE_SPAN) {
        noise_sum += power_at(target_bin - offset);
        noise_sum += power_at(target_bin + offset);
        noise_count += 2;
    }
    let noise_power = (noise_sum / noise_count as f64).max(1e-20);

    InBandPower {
        power_db: 10.0 * target_power.max(1e-20).log10(),
        snr_db: 10.0 * (target_power / noise_power).max(1e-20).log10(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn tone(n: usize, sample_rate_hz: f64, freq_hz: f64, amplitude: f32) -> Vec<Complex32> {
        (0..n)
            .map(|i| {
                let phase = 2.0 * PI * freq_hz * i as f64 / sample_rate_hz;
                Complex32::new(amplitude * phase.cos() as f32, amplitude * phase.sin() as f32)
            })
            .collect()
    }

    #[test]
    fn pure_tone_has_high_snr_at_its_frequency() {
        let samples = tone(2000, 20_000.0, 1000.0, 1.0);
        let result = in_band_power(&samples, 20_000.0, 1000.0);
        assert!(result.snr_db > 20.0, "snr={}", result.snr_db);
    }

    #[test]
    fn off_frequency_query_sees_low_snr() {
        let samples = tone(2000, 20_000.0, 1000.0, 1.0);
        let result = in_band_power(&samples, 20_000.0, 3000.0);
        assert!(result.snr_db < 5.0, "snr={}", result.snr_db);
    }
}

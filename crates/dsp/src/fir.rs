use std::collections::VecDeque;
use std::f64::consts::PI;

use num_complex::Complex32;
use rustfft::{num_complex::Complex as FftComplex, FftPlanner};

use crate::window;

/// A stateful FIR filter. The delay line (history of the last
/// `taps.len() - 1` input samples) persists across calls so concatenated
/// outputs across minute buffers form one continuous stream with no
/// boundary artifacts.
pub struct FirFilter {
    taps: Vec<f32>,
    history: VecDeque<Complex32>,
}

impl FirFilter {
    pub fn new(taps: Vec<f32>) -> Self {
        let history = VecDeque::from(vec![Complex32::new(0.0, 0.0); taps.len().saturating_sub(1)]);
        Self { taps, history }
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    /// Filters `input` at unity rate, returning one output sample per
    /// input sample.
    pub fn process(&mut self, input: &[Complex32]) -> Vec<Complex32> {
        let mut out = Vec::with_capacity(input.len());
        for &sample in input {
            self.history.push_back(sample);
            if self.history.len() > self.taps.len() {
                self.history.pop_front();
            }
            out.push(self.convolve_at_tip());
        }
        out
    }

    /// Filters and decimates by `factor`, applying the filter at every
    /// input sample but only emitting output on decimation boundaries
    /// (classic polyphase-equivalent behavior, implemented directly for
    /// clarity rather than performance).
    pub fn process_decimate(&mut self, input: &[Complex32], factor: u32, phase: &mut u32) -> Vec<Complex32> {
        let mut out = Vec::with_capacity(input.len() / factor as usize + 1);
        for &sample in input {
            self.history.push_back(sample);
            if self.history.len() > self.taps.len() {
                self.history.pop_front();
            }
            *phase += 1;
            if *phase == factor {
                *phase = 0;
                out.push(self.convolve_at_tip());
            }
        }
        out
    }

    fn convolve_at_tip(&self) -> Complex32 {
        if self.history.len() < self.taps.len() {
            return Complex32::new(0.0, 0.0);
        }
        let mut acc = Complex32::new(0.0, 0.0);
        // history[len-1] is the most recent sample, aligned with taps[0].
        for (i, h) in self.history.iter().rev().enumerate() {
            acc += *h * self.taps[i];
        }
        acc
    }
}

/// CIC magnitude response (post-normalization, unity at DC) at `freq_hz`,
/// for an `order`-stage CIC with decimation factor `r` sampling at
/// `input_rate_hz`.
fn cic_droop(freq_hz: f64, input_rate_hz: f64, r: u32, order: u32) -> f64 {
    if freq_hz.abs() < 1e-9 {
        return 1.0;
    }
    let x = PI * freq_hz / input_rate_hz;
    let num = (x * r as f64).sin();
    let den = r as f64 * x.sin();
    (num / den).abs().powi(order as i32)
}

/// Designs the 63-tap compensation FIR that corrects CIC passband droop
/// over `±passband_hz` (5 Hz by default) at the CIC's output rate
/// (`output_rate_hz`), via frequency sampling: the desired response is
/// the inverse of the CIC droop within the passband and unity outside it,
/// and the taps are an inverse DFT of that target with a linear-phase
/// circular shift.
pub fn design_compensation_fir(
    output_rate_hz: f64,
    cic_input_rate_hz: f64,
    cic_r: u32,
    cic_order: u32,
    passband_hz: f64,
    n_taps: usize,
) -> Vec<f32> {
    let nyquist = output_rate_hz / 2.0;
    let mut target = vec![0.0f64; n_taps];
    for (k, slot) in target.iter_mut().enumerate() {
        let f = if k <= n_taps / 2 {
            k as f64 * output_rate_hz / n_taps as f64
        } else {
            (k as f64 - n_taps as f64) * output_rate_hz / n_taps as f64
        };
        let f_abs = f.abs().min(nyquist);
        *slot = if f_abs <= passband_hz {
            1.0 / cic_droop(f_abs, cic_input_rate_hz, cic_r, cic_order).max(1e-6)
        } else {
            1.0
        };
    }

    let mut planner = FftPlanner::<f64>::new();
    let ifft = planner.plan_fft_inverse(n_taps);
    let mut buffer: Vec<FftComplex<f64>> = target.iter().map(|&m| FftComplex::new(m, 0.0)).collect();
    ifft.process(&mut buffer);

    let shift = n_taps / 2;
    let mut taps = vec![0.0f32; n_taps];
    let taper = window::tukey(n_taps, 0.25);
    for i in 0..n_taps {
        let src = (i + n_taps - shift) % n_taps;
        taps[i] = (buffer[src].re / n_taps as f64 * taper[i]) as f32;
    }
    normalize_dc_gain(taps)
}

/// Designs the Kaiser-windowed anti-alias low-pass for the final
/// `sample_rate_hz → sample_rate_hz / factor` decimation stage. Length is
/// chosen from the Kaiser attenuation/transition formula and capped at
/// `max_taps`.
pub fn design_anti_alias_fir(
    sample_rate_hz: f64,
    cutoff_hz: f64,
    transition_hz: f64,
    stopband_db: f64,
    max_taps: usize,
) -> Vec<f32> {
    let transition_width = transition_hz / sample_rate_hz;
    let (beta, n) = window::kaiser_design(stopband_db, transition_width, max_taps);
    let kaiser_win = window::kaiser(n, beta);
    let fc = cutoff_hz / sample_rate_hz;
    let m = (n - 1) as f64 / 2.0;

    let mut taps = vec![0.0f32; n];
    for (i, slot) in taps.iter_mut().enumerate() {
        let k = i as f64 - m;
        let sinc = if k.abs() < 1e-9 {
            2.0 * fc
        } else {
            (2.0 * PI * fc * k).sin() / (PI * k)
        };
        *slot = (sinc * kaiser_win[i]) as f32;
    }
    normalize_dc_gain(taps)
}

fn normalize_dc_gain(mut taps: Vec<f32>) -> Vec<f32> {
    let sum: f32 = taps.iter().sum();
    if sum.abs() > 1e-9 {
        for t in taps.iter_mut() {
            *t /= sum;
        }
    }
    taps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fir_unity_gain_on_dc_input() {
        let taps = vec![0.25f32; 4];
        let mut filter = FirFilter::new(taps);
        let input = vec![Complex32::new(1.0, 0.0); 20];
        let out = filter.process(&input);
        assert!((out.last().unwrap().re - 1.0).abs() < 1e-5);
    }

    #[test]
    fn fir_state_persists_across_calls() {
        let taps = vec![0.5f32, 0.5f32];
        let input: Vec<Complex32> = (0..10).map(|i| Complex32::new(i as f32, 0.0)).collect();

        let mut whole = FirFilter::new(taps.clone());
        let out_whole = whole.process(&input);

        let mut split = FirFilter::new(taps);
        let mut out_split = split.process(&input[..4]);
        out_split.extend(split.process(&input[4..]));

        for (a, b) in out_whole.iter().zip(out_split.iter()) {
            assert!((a.re - b.re).abs() < 1e-6);
        }
    }

    #[test]
    fn decimating_fir_emits_expected_count() {
        let taps = vec![1.0f32 / 8.0; 8];
        let mut filter = FirFilter::new(taps);
        let mut phase = 0;
        let input = vec![Complex32::new(1.0, 0.0); 800];
        let out = filter.process_decimate(&input, 40, &mut phase);
        assert_eq!(out.len(), 20);
    }

    #[test]
    fn compensation_fir_has_requested_length_and_unity_dc() {
        let taps = design_compensation_fir(400.0, 20_000.0, 50, 4, 5.0, 63);
        assert_eq!(taps.len(), 63);
        let dc_gain: f32 = taps.iter().sum();
        assert!((dc_gain - 1.0).abs() < 1e-3);
    }

    #[test]
    fn anti_alias_fir_is_capped_at_max_taps() {
        let taps = design_anti_alias_fir(400.0, 5.0, 1.0, 90.0, 401);
        assert!(taps.len() <= 401);
        assert_eq!(taps.len() % 2, 1);
    }
}

//! Window functions shared by the compensation/anti-alias FIR design and
//! the tone-detector templates.

use std::f64::consts::PI;

/// A Tukey ("tapered cosine") window of length `n` with taper fraction
/// `alpha`. `alpha = 0` is rectangular, `alpha = 1` is a full Hann window.
pub fn tukey(n: usize, alpha: f64) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![1.0];
    }
    let alpha = alpha.clamp(0.0, 1.0);
    let taper = (alpha * (n as f64 - 1.0) / 2.0).floor() as usize;
    (0..n)
        .map(|i| {
            if taper == 0 {
                1.0
            } else if i < taper {
                0.5 * (1.0 + (PI * (i as f64 / taper as f64 - 1.0)).cos())
            } else if i >= n - taper {
                let j = n - 1 - i;
                0.5 * (1.0 + (PI * (j as f64 / taper as f64 - 1.0)).cos())
            } else {
                1.0
            }
        })
        .collect()
}

/// The zeroth-order modified Bessel function of the first kind, used by
/// the Kaiser window.
fn bessel_i0(x: f64) -> f64 {
    let mut sum = 1.0;
    let mut term = 1.0;
    let half_x_sq = (x / 2.0) * (x / 2.0);
    for k in 1..=30 {
        term *= half_x_sq / (k as f64 * k as f64);
        sum += term;
        if term < sum * 1e-16 {
            break;
        }
    }
    sum
}

/// A Kaiser window of length `n` with shape parameter `beta`.
pub fn kaiser(n: usize, beta: f64) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![1.0];
    }
    let denom = bessel_i0(beta);
    let m = (n - 1) as f64;
    (0..n)
        .map(|i| {
            let r = 2.0 * i as f64 / m - 1.0;
            bessel_i0(beta * (1.0 - r * r).max(0.0).sqrt()) / denom
        })
        .collect()
}

/// Chooses a Kaiser `beta` shape parameter and FIR length for the given
/// stopband attenuation (dB) and normalized transition width
/// (transition_hz / sample_rate_hz), per the standard Kaiser design
/// formulas (Oppenheim & Schafer).
pub fn kaiser_design(stopband_db: f64, transition_width: f64, max_taps: usize) -> (f64, usize) {
    let beta = if stopband_db > 50.0 {
        0.1102 * (stopband_db - 8.7)
    } else if stopband_db >= 21.0 {
        0.5842 * (stopband_db - 21.0).powf(0.4) + 0.07886 * (stopband_db - 21.0)
    } else {
        0.0
    };

    let mut n = (((stopband_db - 8.0) / (2.285 * 2.0 * PI * transition_width)).ceil() as usize) | 1;
    if n < 3 {
        n = 3;
    }
    if n > max_taps {
        n = if max_taps % 2 == 0 { max_taps - 1 } else { max_taps };
    }
    (beta, n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tukey_endpoints_taper_to_zero_for_full_taper() {
        let w = tukey(101, 1.0);
        assert!(w[0] < 1e-6);
        assert!((w[50] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn tukey_rectangular_when_alpha_zero() {
        let w = tukey(16, 0.0);
        assert!(w.iter().all(|&v| (v - 1.0).abs() < 1e-9));
    }

    #[test]
    fn kaiser_window_peaks_at_center() {
        let w = kaiser(65, 6.0);
        let center = w[32];
        assert!(w.iter().all(|&v| v <= center + 1e-9));
    }

    #[test]
    fn kaiser_design_caps_at_max_taps() {
        let (_, n) = kaiser_design(90.0, 1.0 / 400.0, 401);
        assert!(n <= 401);
        assert_eq!(n % 2, 1);
    }
}

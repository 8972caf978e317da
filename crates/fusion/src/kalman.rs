//! Scalar Kalman smoother over the fused D_clock series: state
//! `[offset, drift]`, `Δt = 1` minute, small process noise suited to a
//! GPSDO-disciplined reference.

/// Process noise: small and fixed, matching a GPSDO-quality reference
/// rather than a free-running oscillator (the fused estimate is expected
/// to already be calibration-corrected and low-noise by this stage).
const PROCESS_NOISE_OFFSET: f64 = 1e-4;
const PROCESS_NOISE_DRIFT: f64 = 1e-5;
const MIN_UNCERTAINTY_MS: f64 = 0.1;

#[derive(Debug, Clone, Copy)]
pub struct ScalarKalmanSmoother {
    x: [f64; 2],
    p: [[f64; 2]; 2],
    n_updates: u64,
}

impl Default for ScalarKalmanSmoother {
    fn default() -> Self {
        Self {
            x: [0.0, 0.0],
            p: [[10.0, 0.0], [0.0, 1.0]],
            n_updates: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SmoothedResult {
    pub offset_ms: f64,
    pub drift_ms_per_min: f64,
    pub uncertainty_ms: f64,
}

impl ScalarKalmanSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_updates(&self) -> u64 {
        self.n_updates
    }

    /// Runs one predict/update cycle against `measurement` with
    /// `measurement_std` (the weighted standard deviation across this
    /// step's contributing broadcasts) as the measurement noise.
    pub fn update(&mut self, measurement: f64, measurement_std: f64) -> SmoothedResult {
        // Predict: F = [[1, 1], [0, 1]] for dt = 1 minute.
        let x0 = self.x[0] + self.x[1];
        let x1 = self.x[1];
        self.x = [x0, x1];

        let p00 = self.p[0][0] + self.p[1][0] + self.p[0][1] + self.p[1][1] + PROCESS_NOISE_OFFSET;
        let p01 = self.p[0][1] + self.p[1][1];
        let p10 = self.p[1][0] + self.p[1][1];
        let p11 = self.p[1][1] + PROCESS_NOISE_DRIFT;
        self.p = [[p00, p01], [p10, p11]];

        let r = measurement_std.max(MIN_UNCERTAINTY_MS).powi(2);
        let s = self.p[0][0] + r;
        let k0 = self.p[0][0] / s;
        let k1 = self.p[1][0] / s;

        let innovation = measurement - self.x[0];
        self.x[0] += k0 * innovation;
        self.x[1] += k1 * innovation;

        let p00_new = (1.0 - k0) * self.p[0][0];
        let p01_new = (1.0 - k0) * self.p[0][1];
        let p10_new = self.p[1][0] - k1 * self.p[0][0];
        let p11_new = self.p[1][1] - k1 * self.p[0][1];
        self.p = [[p00_new, p01_new], [p10_new, p11_new]];

        self.n_updates += 1;

        let floor = (measurement_std / (self.n_updates as f64).sqrt()).max(MIN_UNCERTAINTY_MS);
        let uncertainty_ms = self.p[0][0].sqrt().max(floor);

        SmoothedResult {
            offset_ms: self.x[0],
            drift_ms_per_min: self.x[1],
            uncertainty_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converges_toward_a_stationary_measurement() {
        let mut smoother = ScalarKalmanSmoother::new();
        let mut last = SmoothedResult {
            offset_ms: 0.0,
            drift_ms_per_min: 0.0,
            uncertainty_ms: 0.0,
        };
        for _ in 0..60 {
            last = smoother.update(3.0, 0.5);
        }
        assert!((last.offset_ms - 3.0).abs() < 0.3, "offset={}", last.offset_ms);
    }

    #[test]
    fn uncertainty_floor_respects_sqrt_n_scaling() {
        let mut smoother = ScalarKalmanSmoother::new();
        let mut last_uncertainty = f64::MAX;
        for _ in 0..30 {
            let result = smoother.update(0.0, 1.0);
            assert!(result.uncertainty_ms >= 0.1 - 1e-9);
            last_uncertainty = result.uncertainty_ms;
        }
        assert!(last_uncertainty < 1.0);
    }
}

//! Per-(channel, frequency) clock convergence filter: a 2-state Kalman
//! filter (`[offset_ms, drift_ms_per_min]`) with a lock/holdover/reacquire
//! state machine layered on top, persisted to JSON across restarts.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceState {
    Acquiring,
    Converging,
    Locked,
    Holdover,
    Reacquire,
}

const LOCK_THRESHOLD_MS: f64 = 1.0;
const MIN_SAMPLES_FOR_LOCK: u64 = 30;
const ANOMALY_SIGMA: f64 = 3.0;
const MAX_CONSECUTIVE_ANOMALIES: u32 = 5;
const MIN_SAMPLES_ACQUIRING: u64 = 10;
/// Minutes without a measurement before a locked channel drops to
/// holdover rather than staying `Locked` on a stale state.
const HOLDOVER_GRACE_MINUTES: f64 = 5.0;

/// Process noise scale: how much the filter expects the true offset/drift
/// to wander between updates, driven by the channel's oscillator quality.
#[derive(Debug, Clone, Copy)]
pub enum OscillatorQuality {
    Gpsdo,
    FreeRunningTcxo,
}

impl OscillatorQuality {
    fn process_noise(&self) -> [[f64; 2]; 2] {
        match self {
            OscillatorQuality::Gpsdo => [[1e-4, 0.0], [0.0, 1e-5]],
            OscillatorQuality::FreeRunningTcxo => [[1e-2, 0.0], [0.0, 1e-3]],
        }
    }
}

/// Persisted Kalman state plus the convergence state machine's bookkeeping
/// for one (channel, frequency) pair. Serialized to JSON on every update
/// and reloaded on startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub x: [f64; 2],
    pub p: [[f64; 2]; 2],
    pub sample_count: u64,
    pub consecutive_anomalies: u32,
    pub state: ConvergenceState,
    pub minutes_since_last_measurement: f64,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            x: [0.0, 0.0],
            p: [[100.0, 0.0], [0.0, 10.0]],
            sample_count: 0,
            consecutive_anomalies: 0,
            state: ConvergenceState::Acquiring,
            minutes_since_last_measurement: 0.0,
        }
    }
}

/// One filtered measurement's output.
#[derive(Debug, Clone, Copy)]
pub struct ConvergenceOutput {
    pub filtered_d_clock_ms: f64,
    pub uncertainty_ms: f64,
    /// Progress toward `Locked`, in `[0, 1]`: `1.0` once the lock
    /// threshold and minimum sample count are both met.
    pub convergence_progress: f64,
    pub residual_ms: f64,
    pub is_anomaly: bool,
    pub state: ConvergenceState,
}

pub struct ConvergenceFilter {
    state: PersistedState,
    oscillator: OscillatorQuality,
}

impl ConvergenceFilter {
    pub fn new(oscillator: OscillatorQuality) -> Self {
        Self {
            state: PersistedState::default(),
            oscillator,
        }
    }

    pub fn from_persisted(state: PersistedState, oscillator: OscillatorQuality) -> Self {
        Self { state, oscillator }
    }

    pub fn state(&self) -> &PersistedState {
        &self.state
    }

    /// Loads persisted state from `path`. On a corrupt or unreadable file,
    /// renames it to a `.bad` sibling and starts fresh from `ACQUIRING`.
    pub fn load_or_init(path: &Path, oscillator: OscillatorQuality) -> Result<Self, Error> {
        match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str::<PersistedState>(&text) {
                Ok(state) => Ok(Self::from_persisted(state, oscillator)),
                Err(e) => {
                    let bad_path = path.with_extension("bad");
                    let _ = std::fs::rename(path, &bad_path);
                    log::warn!("convergence state at {path:?} was corrupt ({e}); reset to ACQUIRING");
                    Ok(Self::new(oscillator))
                }
            },
            Err(_) => Ok(Self::new(oscillator)),
        }
    }

    /// Serializes to `path` via a sibling `.tmp` file and an atomic
    /// rename, matching the rest of this system's single-writer JSON
    /// artifacts.
    pub fn persist(&self, path: &Path) -> Result<(), Error> {
        let tmp_path = path.with_extension("tmp");
        let json = serde_json::to_string_pretty(&self.state).map_err(|e| Error::PersistenceCorrupt(e.to_string()))?;
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Advances the filter `delta_minutes` with no measurement (the
    /// channel went quiet). Used to drive `Locked -> Holdover` after the
    /// grace period.
    pub fn advance_without_measurement(&mut self, delta_minutes: f64) {
        predict(&mut self.state.x, &mut self.state.p, delta_minutes, self.oscillator.process_noise());
        self.state.minutes_since_last_measurement += delta_minutes;
        if self.state.state == ConvergenceState::Locked
            && self.state.minutes_since_last_measurement > HOLDOVER_GRACE_MINUTES
        {
            self.state.state = ConvergenceState::Holdover;
        }
    }

    /// Feeds one minute's D_clock measurement with its solver-reported
    /// uncertainty (`measurement_noise_ms`) into the filter.
    pub fn update(&mut self, d_clock_ms: f64, measurement_noise_ms: f64, delta_minutes: f64) -> ConvergenceOutput {
        predict(&mut self.state.x, &mut self.state.p, delta_minutes, self.oscillator.process_noise());
        self.state.minutes_since_last_measurement = 0.0;

        let r = measurement_noise_ms.max(0.01).powi(2);
        let innovation = d_clock_ms - self.state.x[0];
        let s = self.state.p[0][0] + r;
        let normalized_innovation = innovation.abs() / s.sqrt();

        let is_anomaly = self.state.sample_count >= MIN_SAMPLES_ACQUIRING && normalized_innovation > ANOMALY_SIGMA;

        if is_anomaly {
            self.state.consecutive_anomalies += 1;
            if self.state.consecutive_anomalies >= MAX_CONSECUTIVE_ANOMALIES {
                self.state = PersistedState {
                    state: ConvergenceState::Reacquire,
                    ..PersistedState::default()
                };
                return ConvergenceOutput {
                    filtered_d_clock_ms: d_clock_ms,
                    uncertainty_ms: self.state.p[0][0].sqrt(),
                    convergence_progress: 0.0,
                    residual_ms: innovation,
                    is_anomaly: true,
                    state: ConvergenceState::Reacquire,
                };
            }
            // An anomaly in LOCKED state is a propagation residual, not a
            // clock event: apply a much-reduced Kalman gain so a single
            // outlier can't move the state far.
            let k = [self.state.p[0][0] / s * 0.05, self.state.p[1][0] / s * 0.05];
            apply_gain(&mut self.state.x, &mut self.state.p, k, innovation, s);
        } else {
            self.state.consecutive_anomalies = 0;
            let k = [self.state.p[0][0] / s, self.state.p[1][0] / s];
            apply_gain(&mut self.state.x, &mut self.state.p, k, innovation, s);
        }

        self.state.sample_count += 1;

        self.state.state = if self.state.sample_count < MIN_SAMPLES_ACQUIRING {
            ConvergenceState::Acquiring
        } else if self.state.p[0][0].sqrt() > LOCK_THRESHOLD_MS || self.state.sample_count < MIN_SAMPLES_FOR_LOCK {
            ConvergenceState::Converging
        } else {
            ConvergenceState::Locked
        };

        let convergence_progress = if self.state.state == ConvergenceState::Locked {
            1.0
        } else {
            let sigma_progress = (1.0 - self.state.p[0][0].sqrt() / LOCK_THRESHOLD_MS.max(1e-9)).clamp(0.0, 1.0);
            let sample_progress = (self.state.sample_count as f64 / MIN_SAMPLES_FOR_LOCK as f64).clamp(0.0, 1.0);
            sigma_progress.min(sample_progress)
        };

        ConvergenceOutput {
            filtered_d_clock_ms: self.state.x[0],
            uncertainty_ms: self.state.p[0][0].sqrt(),
            convergence_progress,
            residual_ms: innovation,
            is_anomaly,
            state: self.state.state,
        }
    }
}

fn predict(x: &mut [f64; 2], p: &mut [[f64; 2]; 2], dt: f64, q: [[f64; 2]; 2]) {
    // F = [[1, dt], [0, 1]]
    let x0 = x[0] + dt * x[1];
    let x1 = x[1];
    x[0] = x0;
    x[1] = x1;

    // P' = F P F^T + Q
    let p00 = p[0][0] + dt * (p[1][0] + p[0][1]) + dt * dt * p[1][1];
    let p01 = p[0][1] + dt * p[1][1];
    let p10 = p[1][0] + dt * p[1][1];
    let p11 = p[1][1];

    p[0][0] = p00 + q[0][0];
    p[0][1] = p01 + q[0][1];
    p[1][0] = p10 + q[1][0];
    p[1][1] = p11 + q[1][1];
}

fn apply_gain(x: &mut [f64; 2], p: &mut [[f64; 2]; 2], k: [f64; 2], innovation: f64, s: f64) {
    x[0] += k[0] * innovation;
    x[1] += k[1] * innovation;

    // P = (I - K H) P, with H = [1, 0]
    let p00 = (1.0 - k[0]) * p[0][0];
    let p01 = (1.0 - k[0]) * p[0][1];
    let p10 = p[1][0] - k[1] * p[0][0];
    let p11 = p[1][1] - k[1] * p[0][1];
    p[0][0] = p00;
    p[0][1] = p01;
    p[1][0] = p10;
    p[1][1] = p11;
    let _ = s;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquiring_then_converging_then_locked() {
        let mut filter = ConvergenceFilter::new(OscillatorQuality::Gpsdo);
        let mut last_state = ConvergenceState::Acquiring;
        for _ in 0..40 {
            let out = filter.update(15.0, 0.5, 1.0);
            last_state = out.state;
        }
        assert_eq!(last_state, ConvergenceState::Locked);
    }

    #[test]
    fn covariance_is_non_increasing_absent_anomalies() {
        let mut filter = ConvergenceFilter::new(OscillatorQuality::Gpsdo);
        let mut prev_p00 = f64::MAX;
        for _ in 0..20 {
            filter.update(15.0, 0.5, 1.0);
            let p00 = filter.state().p[0][0];
            assert!(p00 <= prev_p00 + 1e-9, "p00 grew: {p00} > {prev_p00}");
            prev_p00 = p00;
        }
    }

    #[test]
    fn anomaly_burst_triggers_reacquire() {
        let mut filter = ConvergenceFilter::new(OscillatorQuality::Gpsdo);
        for _ in 0..40 {
            filter.update(15.0, 0.5, 1.0);
        }
        assert_eq!(filter.state().state, ConvergenceState::Locked);

        let mut last_out = filter.update(25.0, 0.5, 1.0);
        assert!(last_out.is_anomaly, "first jump should be flagged as an anomaly");

        for _ in 0..4 {
            last_out = filter.update(25.0, 0.5, 1.0);
        }
        assert_eq!(last_out.state, ConvergenceState::Reacquire);
    }

    #[test]
    fn holdover_entered_after_grace_period_without_measurements() {
        let mut filter = ConvergenceFilter::new(OscillatorQuality::Gpsdo);
        for _ in 0..40 {
            filter.update(15.0, 0.5, 1.0);
        }
        assert_eq!(filter.state().state, ConvergenceState::Locked);
        filter.advance_without_measurement(HOLDOVER_GRACE_MINUTES + 1.0);
        assert_eq!(filter.state().state, ConvergenceState::Holdover);
    }

    #[test]
    fn persists_and_reloads_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wwv_10.json");

        let mut filter = ConvergenceFilter::new(OscillatorQuality::Gpsdo);
        for _ in 0..15 {
            filter.update(12.0, 0.3, 1.0);
        }
        filter.persist(&path).unwrap();

        let reloaded = ConvergenceFilter::load_or_init(&path, OscillatorQuality::Gpsdo).unwrap();
        assert_eq!(reloaded.state().sample_count, filter.state().sample_count);
        assert!((reloaded.state().x[0] - filter.state().x[0]).abs() < 1e-9);
    }

    #[test]
    fn corrupt_persistence_file_resets_to_acquiring() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wwv_10.json");
        std::fs::write(&path, "{ not valid json").unwrap();

        let filter = ConvergenceFilter::load_or_init(&path, OscillatorQuality::Gpsdo).unwrap();
        assert_eq!(filter.state().state, ConvergenceState::Acquiring);
        assert!(path.with_extension("bad").exists());
    }
}

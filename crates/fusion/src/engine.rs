//! Fusion engine: ties weighting, calibration, and the Kalman smoother
//! together into one per-tick fusion step.

use std::collections::HashMap;

use dsp::Station;

use crate::calibration::CalibrationTable;
use crate::kalman::ScalarKalmanSmoother;
use crate::weighting::{
    reject_outliers, weight_for_measurement, weighted_mad, weighted_mean_std, weighted_median, BroadcastMeasurement,
    QualityGrade,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyFlag {
    Consistent,
    /// Raised when some station's intra-station spread (across its own
    /// frequencies) exceeds 5 ms — more likely a station-discrimination
    /// error on a shared frequency than real ionospheric variance.
    DiscriminationSuspect,
}

#[derive(Debug, Clone, Default)]
pub struct StationSummary {
    pub mean_ms: f64,
    pub count: usize,
    pub intra_station_std_ms: f64,
}

/// One fusion step's full output.
#[derive(Debug, Clone)]
pub struct FusedResult {
    pub time_of_fusion: f64,
    pub fused_d_clock_ms: f64,
    pub raw_mean_ms: f64,
    pub uncertainty_ms: f64,
    pub n_broadcasts: usize,
    pub contributing_broadcasts: Vec<String>,
    pub wwv: StationSummary,
    pub wwvh: StationSummary,
    pub chu: StationSummary,
    pub outliers_rejected: usize,
    pub inter_station_spread_ms: f64,
    pub consistency_flag: ConsistencyFlag,
    pub quality_grade: QualityGrade,
    pub calibration_applied: bool,
}

#[derive(Default)]
pub struct FusionEngine {
    pub calibration: CalibrationTable,
    pub smoother: ScalarKalmanSmoother,
}

const INTRA_STATION_SUSPECT_THRESHOLD_MS: f64 = 5.0;
const SUSPECT_SIGMA: f64 = 1.5;
const MIN_CLEAN_FOR_SUSPECT_RECOMPUTE: usize = 3;

impl FusionEngine {
    pub fn new(calibration: CalibrationTable) -> Self {
        Self {
            calibration,
            smoother: ScalarKalmanSmoother::new(),
        }
    }

    /// Runs one fusion step over `measurements` (already filtered to the
    /// lookback window by the caller) at wall-clock time `now` (Unix
    /// seconds). Mutates `self.calibration` and `self.smoother`.
    pub fn fuse(&mut self, measurements: &[BroadcastMeasurement], now: f64) -> Option<FusedResult> {
        if measurements.is_empty() {
            return None;
        }

        let raw: Vec<f64> = measurements.iter().map(|m| m.d_clock_ms).collect();
        let weights: Vec<f64> = measurements.iter().map(weight_for_measurement).collect();

        let median = weighted_median(&raw, &weights)?;
        let mad = weighted_mad(&raw, &weights, median);
        let kept_idx = reject_outliers(&raw, median, mad);
        let outliers_rejected = measurements.len() - kept_idx.len();

        if kept_idx.is_empty() {
            return None;
        }

        let kept: Vec<&BroadcastMeasurement> = kept_idx.iter().map(|&i| &measurements[i]).collect();

        // Update per-broadcast calibration from this step's kept, raw
        // measurements, grouped by broadcast key.
        let mut by_broadcast: HashMap<String, Vec<&BroadcastMeasurement>> = HashMap::new();
        for m in &kept {
            by_broadcast.entry(m.broadcast_key()).or_default().push(m);
        }
        for (key, group) in &by_broadcast {
            let group_mean = group.iter().map(|m| m.d_clock_ms).sum::<f64>() / group.len() as f64;
            let group_uncertainty = {
                let (_, std) = weighted_mean_std(
                    &group.iter().map(|m| m.d_clock_ms).collect::<Vec<_>>(),
                    &vec![1.0; group.len()],
                );
                std
            };
            let reference = group[0];
            self.calibration.update_ema(
                key,
                &format!("{:?}", reference.station).to_uppercase(),
                reference.frequency_mhz,
                group_mean,
                group_uncertainty,
                &format!("{:?}", reference.station).to_uppercase(),
                now,
            );
        }

        let calibrated: Vec<f64> = kept
            .iter()
            .map(|m| m.d_clock_ms + self.calibration.offset_ms(&m.broadcast_key()))
            .collect();
        let kept_weights: Vec<f64> = kept_idx.iter().map(|&i| weights[i]).collect();

        let (mean_calibrated, std_calibrated) = weighted_mean_std(&calibrated, &kept_weights);

        let (wwv, wwvh, chu) = station_summaries(&kept, &calibrated);
        let mut consistency_flag = ConsistencyFlag::Consistent;
        for s in [&wwv, &wwvh, &chu] {
            if s.count > 0 && s.intra_station_std_ms > INTRA_STATION_SUSPECT_THRESHOLD_MS {
                consistency_flag = ConsistencyFlag::DiscriminationSuspect;
            }
        }

        let station_means: Vec<f64> = [&wwv, &wwvh, &chu]
            .iter()
            .filter(|s| s.count > 0)
            .map(|s| s.mean_ms)
            .collect();
        let inter_station_spread_ms = if station_means.len() >= 2 {
            station_means.iter().cloned().fold(f64::MIN, f64::max)
                - station_means.iter().cloned().fold(f64::MAX, f64::min)
        } else {
            0.0
        };

        let (final_calibrated, final_weights, final_kept) = if consistency_flag == ConsistencyFlag::DiscriminationSuspect {
            let suspects = find_suspects(&kept, &calibrated, &wwv, &wwvh, &chu);
            let clean_count = kept.len() - suspects.len();
            if clean_count >= MIN_CLEAN_FOR_SUSPECT_RECOMPUTE {
                let filtered: Vec<usize> = (0..kept.len()).filter(|i| !suspects.contains(i)).collect();
                (
                    filtered.iter().map(|&i| calibrated[i]).collect::<Vec<_>>(),
                    filtered.iter().map(|&i| kept_weights[i]).collect::<Vec<_>>(),
                    filtered.iter().map(|&i| kept[i]).collect::<Vec<_>>(),
                )
            } else {
                (calibrated.clone(), kept_weights.clone(), kept.clone())
            }
        } else {
            (calibrated.clone(), kept_weights.clone(), kept.clone())
        };

        let (fused_mean, fused_std) = weighted_mean_std(&final_calibrated, &final_weights);
        let smoothed = self.smoother.update(fused_mean, fused_std.max(0.01));

        let n_broadcasts = final_kept.len();
        let quality_grade = grade(n_broadcasts, smoothed.uncertainty_ms);

        let raw_values: Vec<f64> = kept.iter().map(|m| m.d_clock_ms).collect();
        let (raw_mean_ms, _) = weighted_mean_std(&raw_values, &kept_weights);
        let _ = (mean_calibrated, std_calibrated);

        Some(FusedResult {
            time_of_fusion: now,
            fused_d_clock_ms: smoothed.offset_ms,
            raw_mean_ms,
            uncertainty_ms: smoothed.uncertainty_ms,
            n_broadcasts,
            contributing_broadcasts: final_kept.iter().map(|m| m.broadcast_key()).collect(),
            wwv,
            wwvh,
            chu,
            outliers_rejected,
            inter_station_spread_ms,
            consistency_flag,
            quality_grade,
            calibration_applied: true,
        })
    }
}

fn station_summaries(
    kept: &[&BroadcastMeasurement],
    calibrated: &[f64],
) -> (StationSummary, StationSummary, StationSummary) {
    let mut build = |station: Station| {
        let values: Vec<f64> = kept
            .iter()
            .zip(calibrated)
            .filter(|(m, _)| m.station == station)
            .map(|(_, v)| *v)
            .collect();
        if values.is_empty() {
            return StationSummary::default();
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        StationSummary {
            mean_ms: mean,
            count: values.len(),
            intra_station_std_ms: variance.sqrt(),
        }
    };
    (build(Station::Wwv), build(Station::Wwvh), build(Station::Chu))
}

fn find_suspects(
    kept: &[&BroadcastMeasurement],
    calibrated: &[f64],
    wwv: &StationSummary,
    wwvh: &StationSummary,
    chu: &StationSummary,
) -> std::collections::HashSet<usize> {
    let mut suspects = std::collections::HashSet::new();
    for (i, m) in kept.iter().enumerate() {
        let summary = match m.station {
            Station::Wwv => wwv,
            Station::Wwvh => wwvh,
            Station::Chu => chu,
        };
        if summary.intra_station_std_ms <= INTRA_STATION_SUSPECT_THRESHOLD_MS || summary.intra_station_std_ms < 1e-9 {
            continue;
        }
        let deviation = (calibrated[i] - summary.mean_ms).abs() / summary.intra_station_std_ms;
        if deviation > SUSPECT_SIGMA {
            suspects.insert(i);
        }
    }
    suspects
}

fn grade(n: usize, uncertainty_ms: f64) -> QualityGrade {
    if n >= 8 && uncertainty_ms < 0.5 {
        QualityGrade::A
    } else if n >= 5 && uncertainty_ms < 1.0 {
        QualityGrade::B
    } else if n >= 3 && uncertainty_ms < 2.0 {
        QualityGrade::C
    } else {
        QualityGrade::D
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weighting::QualityGrade as QG;

    fn measurement(station: Station, freq_mhz: f64, d_clock_ms: f64) -> BroadcastMeasurement {
        BroadcastMeasurement {
            station,
            frequency_mhz: freq_mhz,
            d_clock_ms,
            confidence: 0.9,
            grade: QG::A,
            propagation_mode_label: "1F".into(),
            snr_db: 18.0,
        }
    }

    #[test]
    fn fuses_nine_broadcasts_toward_zero_over_time() {
        let mut engine = FusionEngine::new(CalibrationTable::default());
        let offsets = [-3.0, -2.0, -1.0, -0.5, 0.0, 0.5, 1.0, 2.0, 3.0];
        let stations = [
            Station::Wwv,
            Station::Wwv,
            Station::Wwv,
            Station::Wwvh,
            Station::Wwvh,
            Station::Wwvh,
            Station::Chu,
            Station::Chu,
            Station::Chu,
        ];

        let mut last = None;
        for minute in 0..60 {
            let measurements: Vec<BroadcastMeasurement> = offsets
                .iter()
                .zip(stations.iter())
                .enumerate()
                .map(|(i, (offset, station))| {
                    let noise = if minute % 2 == 0 { 0.2 } else { -0.2 };
                    measurement(*station, 5.0 + i as f64, offset + noise)
                })
                .collect();
            last = engine.fuse(&measurements, minute as f64);
        }

        let result = last.unwrap();
        assert!(result.fused_d_clock_ms.abs() <= 0.5, "fused={}", result.fused_d_clock_ms);
        assert!(matches!(result.quality_grade, QualityGrade::A | QualityGrade::B));
    }

    #[test]
    fn outlier_rejection_bounds_fused_estimate() {
        let mut engine = FusionEngine::new(CalibrationTable::default());
        let mut clean_measurements = Vec::new();
        for i in 0..8 {
            clean_measurements.push(measurement(Station::Wwv, 5.0 + i as f64, 0.1));
        }
        let clean_result = engine.fuse(&clean_measurements, 0.0).unwrap();

        let mut engine2 = FusionEngine::new(CalibrationTable::default());
        let mut with_outlier = clean_measurements.clone();
        with_outlier.push(measurement(Station::Wwv, 99.0, 50.0)); // 50ms outlier
        let outlier_result = engine2.fuse(&with_outlier, 0.0).unwrap();

        assert!(
            (outlier_result.fused_d_clock_ms - clean_result.fused_d_clock_ms).abs()
                < clean_result.uncertainty_ms.max(1.0) + 1.0
        );
    }

    #[test]
    fn large_intra_station_spread_flags_discrimination_suspect() {
        let mut engine = FusionEngine::new(CalibrationTable::default());
        let measurements = vec![
            measurement(Station::Wwv, 5.0, 0.0),
            measurement(Station::Wwv, 10.0, 0.1),
            measurement(Station::Wwv, 15.0, 20.0), // wildly inconsistent with its own station
            measurement(Station::Wwvh, 5.0, 5.0),
            measurement(Station::Chu, 7.85, 3.0),
        ];
        let result = engine.fuse(&measurements, 0.0).unwrap();
        assert_eq!(result.consistency_flag, ConsistencyFlag::DiscriminationSuspect);
    }
}

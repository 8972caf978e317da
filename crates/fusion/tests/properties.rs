//! Property-based tests for fusion's core invariants: calibration
//! convergence and the outlier rejection bound.

use proptest::prelude::*;

use dsp::Station;
use grape_fusion::{BroadcastMeasurement, CalibrationTable, FusionEngine, QualityGrade};

fn measurement(station: Station, freq_mhz: f64, d_clock_ms: f64) -> BroadcastMeasurement {
    BroadcastMeasurement {
        station,
        frequency_mhz: freq_mhz,
        d_clock_ms,
        confidence: 0.9,
        grade: QualityGrade::A,
        propagation_mode_label: "1F".into(),
        snr_db: 18.0,
    }
}

proptest! {
    /// Given a stationary simulated offset per broadcast, after N >= 30
    /// updates the calibrated mean is within epsilon * initial offset of
    /// zero.
    #[test]
    fn calibration_converges_within_epsilon(offset in -5.0f64..5.0, noise_seed in 0u32..1000) {
        prop_assume!(offset.abs() > 0.5);
        let mut table = CalibrationTable::default();
        for n in 0..40u64 {
            let noise = if (n + noise_seed as u64) % 2 == 0 { 0.1 } else { -0.1 };
            table.update_ema("WWV_10", "WWV", 10.0, offset + noise, 0.3, "WWV", n as f64);
        }
        let calibrated = offset + table.offset_ms("WWV_10");
        prop_assert!(calibrated.abs() <= 0.1 * offset.abs() + 0.2, "calibrated={calibrated} offset={offset}");
    }

    /// Injecting one outlier at k*sigma (k > 3) from the true value
    /// leaves the fused estimate within the clean-inputs uncertainty of
    /// the clean-inputs estimate.
    #[test]
    fn outlier_rejection_bounds_fused_estimate(k in 3.5f64..20.0) {
        let mut clean_engine = FusionEngine::new(CalibrationTable::default());
        let mut clean = Vec::new();
        for i in 0..8 {
            clean.push(measurement(Station::Wwv, 5.0 + i as f64, 0.0 + if i % 2 == 0 { 0.05 } else { -0.05 }));
        }
        let clean_result = clean_engine.fuse(&clean, 0.0).unwrap();

        let mut outlier_engine = FusionEngine::new(CalibrationTable::default());
        let mut with_outlier = clean.clone();
        with_outlier.push(measurement(Station::Wwv, 99.0, k * 1.0));
        let outlier_result = outlier_engine.fuse(&with_outlier, 0.0).unwrap();

        let bound = clean_result.uncertainty_ms.max(0.5) + 1.0;
        prop_assert!(
            (outlier_result.fused_d_clock_ms - clean_result.fused_d_clock_ms).abs() <= bound,
            "diff={} bound={}",
            (outlier_result.fused_d_clock_ms - clean_result.fused_d_clock_ms).abs(),
            bound
        );
    }
}

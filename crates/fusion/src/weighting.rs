//! Per-measurement weighting and the weighted robust statistics
//! (weighted median, weighted MAD, outlier rejection) used to combine
//! the broadcasts active in one fusion step.

use dsp::Station;

/// A single broadcast's quality grade, as assigned by the per-minute
/// analytics pipeline. A sum type at this API boundary; the CSV the
/// analytics task writes (and the fusion task reads) carries the single
/// letter, not this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityGrade {
    A,
    B,
    C,
    D,
}

impl QualityGrade {
    pub fn weight(&self) -> f64 {
        match self {
            QualityGrade::A => 1.0,
            QualityGrade::B => 0.8,
            QualityGrade::C => 0.5,
            QualityGrade::D => 0.2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            QualityGrade::A => "A",
            QualityGrade::B => "B",
            QualityGrade::C => "C",
            QualityGrade::D => "D",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "A" => Some(QualityGrade::A),
            "B" => Some(QualityGrade::B),
            "C" => Some(QualityGrade::C),
            "D" => Some(QualityGrade::D),
            _ => None,
        }
    }
}

/// Propagation-mode weight table. Takes the mode's
/// CSV label directly, matching the fact that fusion's only view of a
/// measurement is what the analytics task wrote to its CSV.
fn mode_weight(mode_label: &str) -> f64 {
    match mode_label {
        "GW" => 1.0,
        "1E" => 1.0,
        "1F" => 0.9,
        "2F" => 0.7,
        "3F" => 0.5,
        _ => 0.5,
    }
}

fn snr_factor(snr_db: f64) -> f64 {
    if snr_db > 10.0 {
        1.0
    } else if snr_db >= 5.0 {
        0.8
    } else {
        0.5
    }
}

/// One broadcast's D_clock measurement as read from its
/// `clock_offset_series.csv` row, plus the identity needed to key
/// calibration and grouping.
#[derive(Debug, Clone)]
pub struct BroadcastMeasurement {
    pub station: Station,
    pub frequency_mhz: f64,
    pub d_clock_ms: f64,
    pub confidence: f64,
    pub grade: QualityGrade,
    pub propagation_mode_label: String,
    pub snr_db: f64,
}

impl BroadcastMeasurement {
    /// `STATION_FREQMHZ` broadcast key used by the calibration table.
    pub fn broadcast_key(&self) -> String {
        format!("{:?}_{}", self.station, format_freq(self.frequency_mhz)).to_uppercase()
    }
}

fn format_freq(freq_mhz: f64) -> String {
    let s = format!("{freq_mhz:.3}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Product of detection confidence, grade weight, mode weight, and SNR
/// factor.
pub fn weight_for_measurement(m: &BroadcastMeasurement) -> f64 {
    m.confidence.clamp(0.0, 1.0) * m.grade.weight() * mode_weight(&m.propagation_mode_label) * snr_factor(m.snr_db)
}

/// Weighted median of `values` with parallel `weights`. Returns `None` for
/// an empty input.
pub fn weighted_median(values: &[f64], weights: &[f64]) -> Option<f64> {
    if values.is_empty() || values.len() != weights.len() {
        return None;
    }
    let mut pairs: Vec<(f64, f64)> = values.iter().copied().zip(weights.iter().copied()).collect();
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

    let total: f64 = pairs.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return Some(pairs[pairs.len() / 2].0);
    }

    let mut cumulative = 0.0;
    for (value, weight) in &pairs {
        cumulative += weight;
        if cumulative >= total / 2.0 {
            return Some(*value);
        }
    }
    pairs.last().map(|(v, _)| *v)
}

/// Weighted median absolute deviation, scaled by 1.4826 to be a
/// consistent estimator of the standard deviation under normality.
pub fn weighted_mad(values: &[f64], weights: &[f64], median: f64) -> f64 {
    let deviations: Vec<f64> = values.iter().map(|v| (v - median).abs()).collect();
    weighted_median(&deviations, weights).unwrap_or(0.0) * 1.4826
}

/// Indices of `values` surviving outlier rejection: within `3 * mad` of
/// `median`. When `mad` is ~0 (degenerate, e.g. all values identical),
/// nothing is rejected.
pub fn reject_outliers(values: &[f64], median: f64, mad: f64) -> Vec<usize> {
    if mad < 1e-9 {
        return (0..values.len()).collect();
    }
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| (**v - median).abs() <= 3.0 * mad)
        .map(|(i, _)| i)
        .collect()
}

/// Weighted mean and weighted standard deviation over `values`/`weights`.
pub fn weighted_mean_std(values: &[f64], weights: &[f64]) -> (f64, f64) {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 || values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().zip(weights).map(|(v, w)| v * w).sum::<f64>() / total;
    let variance = values.iter().zip(weights).map(|(v, w)| w * (v - mean).powi(2)).sum::<f64>() / total;
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_a_outweighs_grade_d() {
        assert!(QualityGrade::A.weight() > QualityGrade::D.weight());
    }

    #[test]
    fn weighted_median_matches_simple_median_for_uniform_weights() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let weights = vec![1.0; 5];
        assert_eq!(weighted_median(&values, &weights), Some(3.0));
    }

    #[test]
    fn outlier_at_10_sigma_is_rejected() {
        let values = vec![0.0, 0.1, -0.1, 0.2, -0.2, 50.0];
        let weights = vec![1.0; 6];
        let median = weighted_median(&values, &weights).unwrap();
        let mad = weighted_mad(&values, &weights, median);
        let kept = reject_outliers(&values, median, mad);
        assert!(!kept.contains(&5));
        assert_eq!(kept.len(), 5);
    }

    #[test]
    fn broadcast_key_is_stable_and_readable() {
        let m = BroadcastMeasurement {
            station: Station::Wwv,
            frequency_mhz: 10.0,
            d_clock_ms: -6.0,
            confidence: 0.9,
            grade: QualityGrade::A,
            propagation_mode_label: "1F".into(),
            snr_db: 18.0,
        };
        assert_eq!(m.broadcast_key(), "WWV_10");
    }
}

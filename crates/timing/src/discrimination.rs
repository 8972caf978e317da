//! Station discrimination on shared WWV/WWVH frequencies (2.5, 5, 10, 15
//! MHz): decide which station dominates the current minute's reception.
//!
//! The WWV/WWVH minute-of-hour schedule lives in exactly one place
//! rather than being re-embedded per component; [`ground_truth`] is
//! that place.

use dsp::Station;

/// Ground-truth minute-of-hour tables. WWV transmits an exclusive 500 Hz
/// tone on its marker minutes, WWVH an exclusive 600 Hz tone on its own;
/// both additionally run a 440 Hz tone at minutes 1 and 2 (WWV minute 2,
/// WWVH minute 1) and a scientific multi-tone test signal at minute 8
/// (WWV) / 44 (WWVH). This module is the single source of truth for that
/// schedule; nothing else in this crate re-embeds it.
pub mod ground_truth {
    use super::Station;

    pub const WWV_TEST_SIGNAL_MINUTE: u32 = 8;
    pub const WWVH_TEST_SIGNAL_MINUTE: u32 = 44;

    /// Minutes where WWV alone carries a 500 Hz marker tone.
    pub fn is_wwv_exclusive_minute(minute_of_hour: u32) -> bool {
        matches!(minute_of_hour, 1 | 3 | 5 | 7 | 9 | 11 | 13 | 15 | 17 | 19 | 21 | 23 | 25 | 27 | 31 | 33 | 35 | 37 | 39 | 41 | 43)
    }

    /// Minutes where WWVH alone carries a 600 Hz marker tone.
    pub fn is_wwvh_exclusive_minute(minute_of_hour: u32) -> bool {
        matches!(minute_of_hour, 0 | 2 | 4 | 6 | 8 | 10 | 12 | 14 | 16 | 18 | 20 | 22 | 24 | 26 | 28 | 32 | 34 | 36 | 38 | 40 | 42 | 44)
    }

    /// 440 Hz "tone for tuning" minutes: WWV at minute 2, WWVH at minute 1.
    pub fn tone_440hz_station(minute_of_hour: u32) -> Option<Station> {
        match minute_of_hour {
            2 => Some(Station::Wwv),
            1 => Some(Station::Wwvh),
            _ => None,
        }
    }

    pub fn test_signal_station(minute_of_hour: u32) -> Option<Station> {
        match minute_of_hour {
            WWV_TEST_SIGNAL_MINUTE => Some(Station::Wwv),
            WWVH_TEST_SIGNAL_MINUTE => Some(Station::Wwvh),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// One discrimination method's opinion: which station it favors (if any)
/// and the weight it carries in the final vote. Ground-truth methods
/// outrank power-ratio and BCD.
#[derive(Debug, Clone)]
pub struct MethodVote {
    pub method: &'static str,
    pub station: Option<Station>,
    pub weight: f64,
}

#[derive(Debug, Clone)]
pub struct DiscriminationResult {
    pub dominant_station: Option<Station>,
    pub confidence: Confidence,
    pub votes: Vec<MethodVote>,
    /// True when every method that cast a vote agreed on the same
    /// station. Persistent disagreement across minutes should downgrade
    /// confidence at the caller (this crate doesn't retain history across
    /// calls — it's a pure function like the tone detector).
    pub methods_agree: bool,
}

/// Everything one minute's discrimination decision needs. All fields
/// beyond `minute_of_hour` are optional because a weak or absent signal
/// on either station is itself informative (methods that can't form an
/// opinion simply abstain).
#[derive(Debug, Clone, Default)]
pub struct DiscriminationInputs {
    pub minute_of_hour: u32,
    pub wwv_tone_snr_db: Option<f64>,
    pub wwvh_tone_snr_db: Option<f64>,
    /// 500 Hz (WWV-exclusive window) detection SNR, if this is an
    /// exclusive minute.
    pub exclusive_500hz_snr_db: Option<f64>,
    /// 600 Hz (WWVH-exclusive window) detection SNR, if this is an
    /// exclusive minute.
    pub exclusive_600hz_snr_db: Option<f64>,
    pub test_signal_detected: bool,
    pub tone_440hz_snr_db: Option<f64>,
    /// 100 Hz BCD subcarrier cross-correlation amplitude against each
    /// station's template.
    pub bcd_wwv_amplitude: f64,
    pub bcd_wwvh_amplitude: f64,
    pub wwv_doppler_stddev_hz: Option<f64>,
    pub wwvh_doppler_stddev_hz: Option<f64>,
}

const EXCLUSIVE_MIN_SNR_DB: f64 = 6.0;
const WEIGHT_GROUND_TRUTH_EXCLUSIVE: f64 = 5.0;
const WEIGHT_GROUND_TRUTH_TEST_SIGNAL: f64 = 5.0;
const WEIGHT_GROUND_TRUTH_440HZ: f64 = 3.0;
const WEIGHT_POWER_RATIO: f64 = 1.0;
const WEIGHT_BCD: f64 = 1.0;
const WEIGHT_DOPPLER: f64 = 0.5;

/// Decides which station dominates this minute's reception on a shared
/// frequency. Weighted voting across methods, with ground-truth methods
/// (exclusive-minute tones, the scientific test signal, the 440 Hz
/// tuning tone) outweighing the power-ratio and BCD methods.
pub fn discriminate(inputs: &DiscriminationInputs) -> DiscriminationResult {
    let mut votes = Vec::new();

    if ground_truth::is_wwv_exclusive_minute(inputs.minute_of_hour) {
        if let Some(snr) = inputs.exclusive_500hz_snr_db {
            if snr > EXCLUSIVE_MIN_SNR_DB {
                votes.push(MethodVote {
                    method: "ground_truth_exclusive_500hz",
                    station: Some(Station::Wwv),
                    weight: WEIGHT_GROUND_TRUTH_EXCLUSIVE,
                });
            }
        }
    }
    if ground_truth::is_wwvh_exclusive_minute(inputs.minute_of_hour) {
        if let Some(snr) = inputs.exclusive_600hz_snr_db {
            if snr > EXCLUSIVE_MIN_SNR_DB {
                votes.push(MethodVote {
                    method: "ground_truth_exclusive_600hz",
                    station: Some(Station::Wwvh),
                    weight: WEIGHT_GROUND_TRUTH_EXCLUSIVE,
                });
            }
        }
    }

    if inputs.test_signal_detected {
        if let Some(station) = ground_truth::test_signal_station(inputs.minute_of_hour) {
            votes.push(MethodVote {
                method: "test_signal",
                station: Some(station),
                weight: WEIGHT_GROUND_TRUTH_TEST_SIGNAL,
            });
        }
    }

    if let (Some(station), Some(snr)) = (
        ground_truth::tone_440hz_station(inputs.minute_of_hour),
        inputs.tone_440hz_snr_db,
    ) {
        if snr > EXCLUSIVE_MIN_SNR_DB {
            votes.push(MethodVote {
                method: "tone_440hz",
                station: Some(station),
                weight: WEIGHT_GROUND_TRUTH_440HZ,
            });
        }
    }

    if let (Some(wwv), Some(wwvh)) = (inputs.wwv_tone_snr_db, inputs.wwvh_tone_snr_db) {
        let station = if wwv > wwvh { Station::Wwv } else { Station::Wwvh };
        votes.push(MethodVote {
            method: "power_ratio",
            station: Some(station),
            weight: WEIGHT_POWER_RATIO,
        });
    } else if let Some(wwv) = inputs.wwv_tone_snr_db {
        if wwv > EXCLUSIVE_MIN_SNR_DB {
            votes.push(MethodVote {
                method: "power_ratio",
                station: Some(Station::Wwv),
                weight: WEIGHT_POWER_RATIO,
            });
        }
    } else if let Some(wwvh) = inputs.wwvh_tone_snr_db {
        if wwvh > EXCLUSIVE_MIN_SNR_DB {
            votes.push(MethodVote {
                method: "power_ratio",
                station: Some(Station::Wwvh),
                weight: WEIGHT_POWER_RATIO,
            });
        }
    }

    if (inputs.bcd_wwv_amplitude - inputs.bcd_wwvh_amplitude).abs() > 1e-6 {
        let station = if inputs.bcd_wwv_amplitude > inputs.bcd_wwvh_amplitude {
            Station::Wwv
        } else {
            Station::Wwvh
        };
        votes.push(MethodVote {
            method: "bcd_correlation",
            station: Some(station),
            weight: WEIGHT_BCD,
        });
    }

    if let (Some(wwv_dop), Some(wwvh_dop)) = (inputs.wwv_doppler_stddev_hz, inputs.wwvh_doppler_stddev_hz) {
        // Lower Doppler stddev means a cleaner, more likely-dominant path.
        let station = if wwv_dop < wwvh_dop { Station::Wwv } else { Station::Wwvh };
        votes.push(MethodVote {
            method: "doppler_stability",
            station: Some(station),
            weight: WEIGHT_DOPPLER,
        });
    }

    tally(votes)
}

fn tally(votes: Vec<MethodVote>) -> DiscriminationResult {
    let mut wwv_weight = 0.0;
    let mut wwvh_weight = 0.0;
    for vote in &votes {
        match vote.station {
            Some(Station::Wwv) => wwv_weight += vote.weight,
            Some(Station::Wwvh) => wwvh_weight += vote.weight,
            _ => {}
        }
    }

    let total_weight = wwv_weight + wwvh_weight;
    let methods_agree = votes
        .iter()
        .filter_map(|v| v.station)
        .collect::<std::collections::HashSet<_>>()
        .len()
        <= 1;

    if total_weight < 1e-9 {
        return DiscriminationResult {
            dominant_station: None,
            confidence: Confidence::Low,
            votes,
            methods_agree: true,
        };
    }

    let dominant = if wwv_weight >= wwvh_weight { Station::Wwv } else { Station::Wwvh };
    let dominant_weight = wwv_weight.max(wwvh_weight);
    let margin = dominant_weight / total_weight;

    let has_ground_truth = votes.iter().any(|v| {
        v.station == Some(dominant)
            && matches!(
                v.method,
                "ground_truth_exclusive_500hz" | "ground_truth_exclusive_600hz" | "test_signal" | "tone_440hz"
            )
    });

    let confidence = if has_ground_truth {
        Confidence::High
    } else if margin >= 0.7 && methods_agree {
        Confidence::Medium
    } else {
        Confidence::Low
    };

    DiscriminationResult {
        dominant_station: Some(dominant),
        confidence,
        votes,
        methods_agree,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_minute_yields_high_confidence() {
        let inputs = DiscriminationInputs {
            minute_of_hour: 2,
            wwv_tone_snr_db: Some(18.0),
            wwvh_tone_snr_db: Some(4.0),
            tone_440hz_snr_db: Some(20.0),
            bcd_wwv_amplitude: 0.9,
            bcd_wwvh_amplitude: 0.1,
            ..Default::default()
        };
        let result = discriminate(&inputs);
        assert_eq!(result.dominant_station, Some(Station::Wwv));
        assert_eq!(result.confidence, Confidence::High);
    }

    #[test]
    fn test_signal_minute_is_near_certain_ground_truth() {
        let inputs = DiscriminationInputs {
            minute_of_hour: ground_truth::WWVH_TEST_SIGNAL_MINUTE,
            test_signal_detected: true,
            ..Default::default()
        };
        let result = discriminate(&inputs);
        assert_eq!(result.dominant_station, Some(Station::Wwvh));
        assert_eq!(result.confidence, Confidence::High);
    }

    #[test]
    fn no_signal_at_all_yields_no_opinion() {
        let inputs = DiscriminationInputs {
            minute_of_hour: 17,
            ..Default::default()
        };
        let result = discriminate(&inputs);
        assert!(result.dominant_station.is_none());
        assert_eq!(result.confidence, Confidence::Low);
    }

    #[test]
    fn power_ratio_alone_gives_at_most_medium_confidence() {
        let inputs = DiscriminationInputs {
            minute_of_hour: 50, // out of range, no ground truth applies
            wwv_tone_snr_db: Some(20.0),
            wwvh_tone_snr_db: Some(8.0),
            bcd_wwv_amplitude: 0.8,
            bcd_wwvh_amplitude: 0.3,
            ..Default::default()
        };
        let result = discriminate(&inputs);
        assert_eq!(result.dominant_station, Some(Station::Wwv));
        assert_ne!(result.confidence, Confidence::High);
    }
}

//! Transmission-time solver: disambiguates the ionospheric propagation
//! mode and back-calculates `D_clock` from a tone's arrival time.

use dsp::Station;

const SPEED_OF_LIGHT_KM_S: f64 = 299_792.458;
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Ionospheric propagation mode. `GW` is ground wave; `NE`/`NF` name
/// N-hop E-layer / F-layer skywave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationMode {
    GroundWave,
    OneHopE,
    OneHopF,
    TwoHopF,
    ThreeHopF,
}

impl PropagationMode {
    pub fn hops(&self) -> u32 {
        match self {
            PropagationMode::GroundWave => 0,
            PropagationMode::OneHopE | PropagationMode::OneHopF => 1,
            PropagationMode::TwoHopF => 2,
            PropagationMode::ThreeHopF => 3,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PropagationMode::GroundWave => "GW",
            PropagationMode::OneHopE => "1E",
            PropagationMode::OneHopF => "1F",
            PropagationMode::TwoHopF => "2F",
            PropagationMode::ThreeHopF => "3F",
        }
    }

    /// Effective reflection height, km, used for the geometric delay
    /// estimate: ~110 km for the E layer, ~300 km for the F layer.
    fn reflection_height_km(&self) -> f64 {
        match self {
            PropagationMode::GroundWave => 0.0,
            PropagationMode::OneHopE => 110.0,
            PropagationMode::OneHopF | PropagationMode::TwoHopF | PropagationMode::ThreeHopF => 300.0,
        }
    }
}

/// Great-circle distance (km) between two lat/lon points via the
/// haversine formula.
pub fn great_circle_distance_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// One candidate mode's geometric propagation delay for a one-way hop
/// path of `ground_distance_km` reflected `hops` times at `height_km`.
fn hop_delay_ms(ground_distance_km: f64, hops: u32, height_km: f64) -> f64 {
    if hops == 0 {
        return ground_distance_km / SPEED_OF_LIGHT_KM_S * 1000.0;
    }
    let per_hop_ground = ground_distance_km / hops as f64;
    let slant = ((per_hop_ground / 2.0).powi(2) + height_km.powi(2)).sqrt() * 2.0;
    slant * hops as f64 / SPEED_OF_LIGHT_KM_S * 1000.0
}

/// A scored transmission-time solution for one minute on one channel.
#[derive(Debug, Clone, Copy)]
pub struct TransmissionTimeSolution {
    pub station: Station,
    pub mode: PropagationMode,
    pub hops: u32,
    pub propagation_delay_ms: f64,
    /// Offset of the tone's emission from the second boundary; ~0 for
    /// WWV/WWVH/CHU tones, carried for completeness.
    pub emission_offset_ms: f64,
    pub d_clock_ms: f64,
    pub confidence: f64,
    pub uncertainty_ms: f64,
}

/// Everything the solver needs for one minute's candidate enumeration.
#[derive(Debug, Clone, Copy)]
pub struct SolverInputs {
    pub station: Station,
    pub frequency_mhz: f64,
    pub arrival_offset_ms: f64,
    pub distance_km: f64,
    /// Standard deviation of the tone-detector's timing estimate, ms.
    pub timing_stddev_ms: f64,
    pub delay_spread_ms: Option<f64>,
    pub doppler_stddev_hz: Option<f64>,
    /// Negative values indicate stronger D-layer absorption (favors
    /// multi-hop); `None` when the metric wasn't computed this minute.
    pub frequency_selectivity_score: Option<f64>,
    /// Local hour of day at the path midpoint, used to gate whether
    /// E-layer propagation is plausible (daytime only).
    pub local_hour: f64,
}

const GROUND_WAVE_MAX_KM: f64 = 600.0;
const MAX_HOP_DISTANCE_KM: f64 = 2500.0;

/// Enumerates candidate propagation modes consistent with distance and
/// frequency, scores each against the observed arrival offset, and
/// returns the best-scoring candidate. `Ok(None)` means no candidate
/// scored well enough to select (`SolverUnresolved` at the caller).
pub fn solve_transmission_time(inputs: &SolverInputs) -> Option<TransmissionTimeSolution> {
    let candidates = candidate_modes(inputs);
    if candidates.is_empty() {
        return None;
    }

    let mut scored: Vec<(PropagationMode, f64, f64)> = candidates
        .into_iter()
        .map(|mode| {
            let hops = mode.hops().max(1);
            let delay = hop_delay_ms(inputs.distance_km, hops, mode.reflection_height_km());
            let residual = (inputs.arrival_offset_ms - delay).abs();
            let mut score = -residual;

            if let Some(spread) = inputs.delay_spread_ms {
                // High delay spread is more consistent with multi-hop paths.
                let expected_spread_rank = mode.hops() as f64;
                score -= (spread - expected_spread_rank * 2.0).abs() * 0.1;
            }
            if let Some(doppler) = inputs.doppler_stddev_hz {
                score -= doppler * 0.5;
            }
            if let Some(selectivity) = inputs.frequency_selectivity_score {
                if selectivity < 0.0 {
                    // Strong D-layer absorption favors higher-hop modes.
                    score += mode.hops() as f64 * (-selectivity) * 0.2;
                }
            }
            (mode, score, delay)
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
    let (best_mode, best_score, best_delay) = scored[0];
    let second_score = scored.get(1).map(|s| s.1).unwrap_or(best_score - 10.0);
    let spread = (best_score - second_score).max(0.01);

    // Normalize the score spread into [0, 1]; a lone candidate or a wide
    // margin over the runner-up both map close to 1.0.
    let confidence = (spread / (spread + 2.0)).clamp(0.05, 0.99);

    let floor_uncertainty_ms = match best_mode {
        PropagationMode::GroundWave => 0.2,
        PropagationMode::OneHopE => 0.5,
        PropagationMode::OneHopF => 1.0,
        PropagationMode::TwoHopF => 2.0,
        PropagationMode::ThreeHopF => 3.0,
    };
    let spread_contribution = inputs.delay_spread_ms.unwrap_or(0.0) * 0.3;
    let uncertainty_ms = inputs
        .timing_stddev_ms
        .max(floor_uncertainty_ms)
        .max(spread_contribution);

    Some(TransmissionTimeSolution {
        station: inputs.station,
        mode: best_mode,
        hops: best_mode.hops(),
        propagation_delay_ms: best_delay,
        emission_offset_ms: 0.0,
        d_clock_ms: inputs.arrival_offset_ms - best_delay,
        confidence,
        uncertainty_ms,
    })
}

fn candidate_modes(inputs: &SolverInputs) -> Vec<PropagationMode> {
    let mut modes = Vec::new();

    // GW is physically implausible above 5 MHz at anything beyond ~100 km;
    // gate it out there rather than leaving it in the candidate table
    // unconditionally.
    if inputs.distance_km < GROUND_WAVE_MAX_KM && (inputs.frequency_mhz <= 5.0 || inputs.distance_km < 100.0) {
        modes.push(PropagationMode::GroundWave);
    }

    let daytime = (6.0..18.0).contains(&inputs.local_hour);
    if daytime && inputs.distance_km < 2000.0 {
        modes.push(PropagationMode::OneHopE);
    }

    modes.push(PropagationMode::OneHopF);

    if inputs.distance_km > 2000.0 {
        modes.push(PropagationMode::TwoHopF);
    }
    if inputs.distance_km > MAX_HOP_DISTANCE_KM {
        modes.push(PropagationMode::ThreeHopF);
    }

    modes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ground_wave_selected_for_short_path() {
        let inputs = SolverInputs {
            station: Station::Wwv,
            frequency_mhz: 5.0,
            arrival_offset_ms: 0.3,
            distance_km: 80.0,
            timing_stddev_ms: 0.1,
            delay_spread_ms: None,
            doppler_stddev_hz: None,
            frequency_selectivity_score: None,
            local_hour: 12.0,
        };
        let solution = solve_transmission_time(&inputs).unwrap();
        assert_eq!(solution.mode, PropagationMode::GroundWave);
        assert!(solution.d_clock_ms.abs() < 1.0);
    }

    #[test]
    fn one_hop_f_selected_for_1800km_path() {
        let distance = 1800.0;
        let delay = hop_delay_ms(distance, 1, 300.0);
        let inputs = SolverInputs {
            station: Station::Wwv,
            frequency_mhz: 10.0,
            arrival_offset_ms: delay - 6.0, // D_clock = -6ms
            distance_km: distance,
            timing_stddev_ms: 0.2,
            delay_spread_ms: Some(1.0),
            doppler_stddev_hz: Some(0.1),
            frequency_selectivity_score: Some(0.1),
            local_hour: 14.0,
        };
        let solution = solve_transmission_time(&inputs).unwrap();
        assert_eq!(solution.mode, PropagationMode::OneHopF);
        assert!((solution.d_clock_ms - (-6.0)).abs() < 1.0, "d_clock={}", solution.d_clock_ms);
    }

    #[test]
    fn ground_wave_excluded_above_5mhz_beyond_100km() {
        let inputs = SolverInputs {
            station: Station::Wwv,
            frequency_mhz: 10.0,
            arrival_offset_ms: 1.0,
            distance_km: 300.0,
            timing_stddev_ms: 0.1,
            delay_spread_ms: None,
            doppler_stddev_hz: None,
            frequency_selectivity_score: None,
            local_hour: 12.0,
        };
        let candidates = candidate_modes(&inputs);
        assert!(!candidates.contains(&PropagationMode::GroundWave));
    }

    #[test]
    fn haversine_matches_known_distance_order_of_magnitude() {
        // Boulder, CO (WWV) to roughly Atlanta, GA: ~2000 km.
        let d = great_circle_distance_km((40.68, -105.04), (33.75, -84.39));
        assert!((1500.0..2300.0).contains(&d), "d={d}");
    }
}

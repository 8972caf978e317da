//! The minute scheduler: once per minute, two minutes
//! behind real time, pulls that minute's archived samples for one
//! channel, runs tone detection/characterization/discrimination/solving,
//! advances that channel's convergence filter, and appends one row each
//! to its `clock_offset_series.csv`, `carrier_power_<day>.csv`, and (on
//! shared frequencies) `discrimination_<day>.csv`.

use std::path::PathBuf;
use std::time::Duration;

use archive::ArchiveReader;
use dsp::fft_power::in_band_power;
use dsp::{Station, ToneDetection, ToneDetector};
use timing::characterization::{bcd_correlation_pair, detect_test_signal, ChannelCharacterization, DopplerStats};
use timing::convergence::{ConvergenceFilter, OscillatorQuality};
use timing::discrimination::{discriminate, ground_truth, DiscriminationInputs};
use timing::solver::{solve_transmission_time, SolverInputs};
use timing::station::ChannelSpec;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::csv_log::{
    append_carrier_power, append_clock_offset, append_discrimination, CarrierPowerRow, ClockOffsetRow,
    DiscriminationRow,
};
use crate::environment::Environment;
use crate::Error;

const SEARCH_MARGIN_S: u32 = 1;
const MINUTE_LAG_S: u64 = 120;
const TONE_SEARCH_WINDOW_MS: f64 = 500.0;

pub struct MinuteContext {
    pub spec: ChannelSpec,
    pub reader: ArchiveReader,
    pub convergence: ConvergenceFilter,
    pub convergence_path: PathBuf,
    tone_detector: ToneDetector,
    last_processed_minute: Option<u64>,
}

impl MinuteContext {
    pub fn new(spec: ChannelSpec, env: &Environment, oscillator: OscillatorQuality) -> Result<Self, Error> {
        let reader = ArchiveReader::open(env.archive_path_for(&spec.name), &spec.name, spec.sample_rate_hz)?;
        let convergence_path = env.convergence_state_path(&spec.name);
        let convergence = ConvergenceFilter::load_or_init(&convergence_path, oscillator)?;
        let tone_detector = ToneDetector::new(spec.sample_rate_hz as f64);
        Ok(Self {
            spec,
            reader,
            convergence,
            convergence_path,
            tone_detector,
            last_processed_minute: None,
        })
    }
}

/// Runs `ctx`'s per-minute analytics in a loop until `shutdown` fires.
/// Ticks every 10 seconds and only does real work once the next
/// unprocessed minute has fully drained into the archive (current time
/// at least [`MINUTE_LAG_S`] past its boundary); this absorbs archive
/// catch-up delay without a fixed sleep tied to the minute itself.
/// Results are not handed to the fusion task directly: this task's
/// output is consumed by reading the CSV rows it appends below, the
/// same way a separately-launched fusion process would see them.
pub async fn run_minute_scheduler(
    mut ctx: MinuteContext,
    env: std::sync::Arc<Environment>,
    mut shutdown: tokio::sync::oneshot::Receiver<()>,
) {
    let mut ticker = interval_at(Instant::now(), Duration::from_secs(10));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = wallclock_now();
                let target_minute = ((now as u64).saturating_sub(MINUTE_LAG_S)) / 60;
                if ctx.last_processed_minute == Some(target_minute) {
                    continue;
                }
                match process_minute(&mut ctx, &env, target_minute, now) {
                    Ok(()) => {
                        ctx.last_processed_minute = Some(target_minute);
                    }
                    Err(Error::Archive(archive::Error::NotYetAvailable)) => {
                        // Archive hasn't caught up yet; retry next tick.
                    }
                    Err(e) => {
                        log::warn!("channel {} minute analytics failed: {e:?}", ctx.spec.name);
                        ctx.last_processed_minute = Some(target_minute);
                    }
                }
            }
            _ = &mut shutdown => {
                break;
            }
        }
    }

    let _ = ctx.convergence.persist(&ctx.convergence_path);
}

fn process_minute(
    ctx: &mut MinuteContext,
    env: &Environment,
    target_minute: u64,
    processed_at: f64,
) -> Result<(), Error> {
    let minute_boundary_utc = (target_minute * 60) as f64;
    let sample_rate = ctx.spec.sample_rate_hz;
    let margin_samples = sample_rate * SEARCH_MARGIN_S;
    let start = rtp_offset_for(minute_boundary_utc, sample_rate, margin_samples);
    let count = sample_rate * (60 + 2 * SEARCH_MARGIN_S);

    // Pick up any archive file the writer rolled over since this
    // channel's reader was opened; `read` only sees files present at the
    // last refresh.
    ctx.reader.refresh()?;
    let (samples, _gaps) = ctx.reader.read(start, count)?;
    let expected_boundary_sample = (margin_samples) as usize;
    let minute_of_hour = (target_minute % 60) as u32;

    let mut best: Option<(Station, ToneDetection)> = None;
    for &station in ctx.spec.family.candidate_stations() {
        if let Some(detection) =
            ctx.tone_detector
                .detect(station, &samples, expected_boundary_sample, TONE_SEARCH_WINDOW_MS)?
        {
            let replace = match &best {
                None => true,
                Some((_, current)) => detection.snr_db > current.snr_db,
            };
            if replace {
                best = Some((station, detection));
            }
        }
    }

    let carrier = in_band_power(&samples, sample_rate as f64, 1000.0);
    let wwv_tone_power = in_band_power(&samples, sample_rate as f64, 1000.0);
    let wwvh_tone_power = in_band_power(&samples, sample_rate as f64, 1200.0);

    let (bcd_wwv, bcd_wwvh) = bcd_correlation_pair(&samples, sample_rate as f64);
    let test_signal_metrics = detect_test_signal(&samples, sample_rate as f64);
    let doppler = DopplerStats::from_samples(&doppler_series(&samples, sample_rate));
    let characterization = ChannelCharacterization {
        bcd_wwv,
        bcd_wwvh,
        wwv_doppler: Some(doppler),
        wwvh_doppler: Some(doppler),
        test_signal: Some(test_signal_metrics),
    };

    let exclusive_500hz_snr_db = ground_truth::is_wwv_exclusive_minute(minute_of_hour)
        .then(|| in_band_power(&samples, sample_rate as f64, 500.0).snr_db);
    let exclusive_600hz_snr_db = ground_truth::is_wwvh_exclusive_minute(minute_of_hour)
        .then(|| in_band_power(&samples, sample_rate as f64, 600.0).snr_db);
    let tone_440hz_snr_db = ground_truth::tone_440hz_station(minute_of_hour)
        .map(|_| in_band_power(&samples, sample_rate as f64, 440.0).snr_db);
    let test_signal_detected =
        ground_truth::test_signal_station(minute_of_hour).is_some() && test_signal_metrics.detected;

    let quality_grade = grade_for(best.as_ref().map(|(_, d)| d.snr_db).unwrap_or(0.0));

    if ctx.spec.is_wwvh_capable() {
        let inputs = DiscriminationInputs {
            minute_of_hour,
            wwv_tone_snr_db: Some(wwv_tone_power.snr_db),
            wwvh_tone_snr_db: Some(wwvh_tone_power.snr_db),
            exclusive_500hz_snr_db,
            exclusive_600hz_snr_db,
            test_signal_detected,
            tone_440hz_snr_db,
            bcd_wwv_amplitude: characterization.bcd_wwv.amplitude,
            bcd_wwvh_amplitude: characterization.bcd_wwvh.amplitude,
            wwv_doppler_stddev_hz: characterization.wwv_doppler.map(|d| d.stddev_hz),
            wwvh_doppler_stddev_hz: characterization.wwvh_doppler.map(|d| d.stddev_hz),
        };
        let result = discriminate(&inputs);
        let day = day_string(minute_boundary_utc);
        append_discrimination(
            &env.discrimination_csv_path(&ctx.spec.name, &day),
            &DiscriminationRow {
                minute_boundary_utc,
                dominant_station: station_label(result.dominant_station),
                confidence: confidence_label(result.confidence),
                methods_agree: result.votes.len(),
                bcd_wwv_amplitude: characterization.bcd_wwv.amplitude,
                bcd_wwvh_amplitude: characterization.bcd_wwvh.amplitude,
                wwv_doppler_stddev_hz: doppler.stddev_hz,
                wwvh_doppler_stddev_hz: doppler.stddev_hz,
                test_signal_detected,
                votes_json: serde_json::to_string(
                    &result
                        .votes
                        .iter()
                        .map(|v| (v.method, station_label(v.station), v.weight))
                        .collect::<Vec<_>>(),
                )
                .unwrap_or_default(),
            },
        )?;
    }

    append_carrier_power(
        &env.carrier_power_csv_path(&ctx.spec.name, &day_string(minute_boundary_utc)),
        &CarrierPowerRow {
            timestamp: processed_at,
            utc_time: minute_boundary_utc,
            power_db: carrier.power_db,
            snr_db: carrier.snr_db,
            wwv_tone_db: wwv_tone_power.power_db,
            wwvh_tone_db: wwvh_tone_power.power_db,
            station: station_label(best.as_ref().map(|(s, _)| *s)),
            quality_grade,
        },
    )?;

    let Some((station, detection)) = best else {
        return Ok(());
    };

    let distance_km = timing::solver::great_circle_distance_km(
        ctx.spec.receiver_location.lat_lon(),
        station_location(station),
    );

    let solver_inputs = SolverInputs {
        station,
        frequency_mhz: ctx.spec.frequency_mhz(),
        arrival_offset_ms: detection.arrival_offset_ms,
        distance_km,
        timing_stddev_ms: 1.0 / detection.snr_db.max(1.0),
        delay_spread_ms: Some(test_signal_metrics.delay_spread_ms),
        doppler_stddev_hz: Some(doppler.stddev_hz),
        frequency_selectivity_score: Some(test_signal_metrics.frequency_selectivity_score),
        local_hour: ((minute_boundary_utc / 3600.0) % 24.0),
    };

    let Some(solution) = solve_transmission_time(&solver_inputs) else {
        return Ok(());
    };

    let convergence_output = ctx.convergence.update(solution.d_clock_ms, solution.uncertainty_ms, 1.0);
    ctx.convergence.persist(&ctx.convergence_path)?;

    let utc_time = minute_boundary_utc + detection.arrival_offset_ms / 1000.0;
    append_clock_offset(
        &env.clock_offset_csv_path(&ctx.spec.name),
        &ClockOffsetRow {
            system_time: processed_at,
            utc_time,
            minute_boundary_utc,
            clock_offset_ms: convergence_output.filtered_d_clock_ms,
            station: station_label(Some(station)),
            frequency_mhz: ctx.spec.frequency_mhz(),
            propagation_delay_ms: solution.propagation_delay_ms,
            propagation_mode: solution.mode.label(),
            n_hops: solution.hops as u8,
            confidence: convergence_state_label(convergence_output.state),
            uncertainty_ms: convergence_output.uncertainty_ms,
            quality_grade,
            snr_db: detection.snr_db,
            utc_verified: detection.may_seed_anchor,
            rtp_timestamp: start,
            processed_at,
        },
    )?;

    Ok(())
}

/// Per-tick instantaneous frequency estimate (Hz) across the minute's
/// decimated 10 Hz IQ: since the SDR tunes exactly to each station's
/// nominal carrier, residual baseband phase rotation over the decimated
/// series is the Doppler shift itself.
fn doppler_series(samples: &[num_complex::Complex32], sample_rate_hz: u32) -> Vec<f64> {
    let Some(rates) = dsp::pipeline::PipelineRates::for_input_rate(sample_rate_hz) else {
        return Vec::new();
    };
    let Ok(mut pipeline) = dsp::DecimationPipeline::new(rates) else {
        return Vec::new();
    };
    let Ok(decimated) = pipeline.process(samples) else {
        return Vec::new();
    };
    let output_rate = pipeline.output_rate_hz() as f64;
    decimated
        .windows(2)
        .map(|pair| {
            let phase_diff = (pair[1] * pair[0].conj()).arg() as f64;
            phase_diff * output_rate / (2.0 * std::f64::consts::PI)
        })
        .collect()
}

fn rtp_offset_for(minute_boundary_utc: f64, sample_rate_hz: u32, margin_samples: u32) -> u32 {
    (minute_boundary_utc * sample_rate_hz as f64) as u32 - margin_samples
}

fn grade_for(snr_db: f64) -> &'static str {
    if snr_db >= 18.0 {
        "A"
    } else if snr_db >= 12.0 {
        "B"
    } else if snr_db >= 6.0 {
        "C"
    } else {
        "D"
    }
}

fn confidence_label(confidence: timing::discrimination::Confidence) -> &'static str {
    match confidence {
        timing::discrimination::Confidence::High => "high",
        timing::discrimination::Confidence::Medium => "medium",
        timing::discrimination::Confidence::Low => "low",
    }
}

fn convergence_state_label(state: timing::convergence::ConvergenceState) -> &'static str {
    use timing::convergence::ConvergenceState::*;
    match state {
        Acquiring => "acquiring",
        Converging => "converging",
        Locked => "locked",
        Holdover => "holdover",
        Reacquire => "reacquire",
    }
}

fn station_label(station: Option<Station>) -> &'static str {
    match station {
        Some(Station::Wwv) => "WWV",
        Some(Station::Wwvh) => "WWVH",
        Some(Station::Chu) => "CHU",
        None => "NONE",
    }
}

/// WWV/WWVH (Fort Collins, CO / Kekaha, HI) and CHU (Ottawa, ON)
/// transmitter coordinates, used only by the great-circle distance
/// calculation feeding the transmission-time solver.
fn station_location(station: Station) -> (f64, f64) {
    match station {
        Station::Wwv => (40.6776, -105.0461),
        Station::Wwvh => (21.9875, -159.7653),
        Station::Chu => (45.2970, -75.7530),
    }
}

fn day_string(utc_seconds: f64) -> String {
    let days_since_epoch = (utc_seconds / 86400.0).floor() as i64;
    let (year, month, day) = civil_from_days(days_since_epoch);
    format!("{year:04}{month:02}{day:02}")
}

/// Howard Hinnant's days-from-civil algorithm, run in reverse: a
/// dependency-free Gregorian date from a Unix day count, used only to
/// name daily CSV files.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let year = if m <= 2 { y + 1 } else { y };
    (year, m, d)
}

fn wallclock_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

//! The multi-broadcast fusion task: runs on its own
//! ~1-minute timer, independent of the per-channel minute schedulers.
//!
//! The per-minute analytics task's output is consumed via a shared CSV
//! file rather than an in-process channel, so no cross-task suspension
//! is needed. This task never holds a live handle to a channel's
//! analytics task: each tick it rescans every configured channel's
//! `clock_offset_series.csv` for rows within the lookback window, the
//! same file a separately-launched fusion process would see if this
//! task ever moved out of the main daemon.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dsp::Station;
use fusion::{BroadcastMeasurement, CalibrationTable, ConsistencyFlag, FusionEngine, QualityGrade};
use shm::{ChannelSummary, ClockStatus, SnapshotWriter, TimingSnapshot, SCHEMA_VERSION};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::clock_discipline::{ClockDiscipline, NullClockDiscipline};
use crate::csv_log::{append_fused, FusedRow};
use crate::environment::Environment;
use crate::Error;

const DEFAULT_LOOKBACK_MINUTES: f64 = 10.0;

/// A snapshot is reported stale past this age even if no channel is
/// actively failing.
const STALE_AFTER_S: f64 = 120.0;

pub struct FusionTaskOptions {
    pub channel_names: Vec<String>,
    pub tick: Duration,
    pub clock_discipline: bool,
    pub lookback_minutes: f64,
}

impl FusionTaskOptions {
    pub fn new(channel_names: Vec<String>, tick: Duration, clock_discipline: bool) -> Self {
        Self {
            channel_names,
            tick,
            clock_discipline,
            lookback_minutes: DEFAULT_LOOKBACK_MINUTES,
        }
    }
}

/// Runs the fusion tick loop until `shutdown` fires. `discipline` is the
/// publish target used when `options.clock_discipline` is set; pass
/// [`NullClockDiscipline`] when the interface should stay inert.
pub async fn run_fusion_task(
    env: Arc<Environment>,
    options: FusionTaskOptions,
    discipline: Arc<dyn ClockDiscipline>,
    mut shutdown: tokio::sync::oneshot::Receiver<()>,
) -> Result<(), Error> {
    let calibration_path = env.calibration_path();
    let calibration = CalibrationTable::load(&calibration_path)?;
    let mut engine = FusionEngine::new(calibration);
    let writer = SnapshotWriter::new(&env.shm_path);

    let mut ticker = interval_at(Instant::now() + options.tick, options.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = run_once(&env, &options, &mut engine, &writer, discipline.as_ref()) {
                    log::warn!("fusion tick failed: {e:?}");
                }
            }
            _ = &mut shutdown => break,
        }
    }

    engine.calibration.persist(&calibration_path)?;
    Ok(())
}

/// One channel's most-recent parsed `clock_offset_series.csv` row, plus
/// everything needed both to build this tick's [`BroadcastMeasurement`]s
/// and to populate the published snapshot's per-channel summary.
struct ParsedRow {
    minute_boundary_utc: f64,
    station: Station,
    frequency_mhz: f64,
    clock_offset_ms: f64,
    propagation_delay_ms: f64,
    propagation_mode: String,
    confidence_label: String,
    uncertainty_ms: f64,
    quality_grade: QualityGrade,
    snr_db: f64,
}

impl ParsedRow {
    fn into_measurement(&self) -> BroadcastMeasurement {
        BroadcastMeasurement {
            station: self.station,
            frequency_mhz: self.frequency_mhz,
            d_clock_ms: self.clock_offset_ms,
            confidence: numeric_confidence(self.uncertainty_ms),
            grade: self.quality_grade,
            propagation_mode_label: self.propagation_mode.clone(),
            snr_db: self.snr_db,
        }
    }
}

/// Derives a [0,1] detection confidence from the convergence filter's
/// uncertainty, the same conversion the minute scheduler uses when it
/// first builds a measurement.
fn numeric_confidence(uncertainty_ms: f64) -> f64 {
    1.0 - (uncertainty_ms / 10.0).clamp(0.0, 0.9)
}

fn run_once(
    env: &Environment,
    options: &FusionTaskOptions,
    engine: &mut FusionEngine,
    writer: &SnapshotWriter,
    discipline: &dyn ClockDiscipline,
) -> Result<(), Error> {
    let now = wallclock_now();
    let cutoff = now - options.lookback_minutes * 60.0;

    let mut measurements = Vec::new();
    let mut channel_summaries = BTreeMap::new();
    let mut channels_active = 0u32;
    let mut channels_locked = 0u32;

    for name in &options.channel_names {
        let path = env.clock_offset_csv_path(name);
        let rows = read_recent_rows(&path, cutoff);
        let Some(latest) = rows.last() else { continue };
        channels_active += 1;
        if latest.confidence_label == "locked" {
            channels_locked += 1;
        }
        channel_summaries.insert(
            name.clone(),
            ChannelSummary {
                channel_name: name.clone(),
                station: Some(station_label(latest.station).to_string()),
                confidence: numeric_confidence(latest.uncertainty_ms),
                d_clock_raw_ms: latest.clock_offset_ms,
                propagation_delay_ms: latest.propagation_delay_ms,
                propagation_mode: latest.propagation_mode.clone(),
                snr_db: latest.snr_db,
                uncertainty_ms: latest.uncertainty_ms,
            },
        );
        measurements.extend(rows.iter().map(ParsedRow::into_measurement));
    }

    let fused = engine.fuse(&measurements, now);
    engine.calibration.persist(&env.calibration_path())?;

    if let Some(result) = &fused {
        append_fused(
            &env.fused_csv_path(),
            &FusedRow {
                timestamp: now,
                d_clock_fused_ms: result.fused_d_clock_ms,
                d_clock_raw_ms: result.raw_mean_ms,
                uncertainty_ms: result.uncertainty_ms,
                n_broadcasts: result.n_broadcasts,
                n_stations: [&result.wwv, &result.wwvh, &result.chu]
                    .iter()
                    .filter(|s| s.count > 0)
                    .count(),
                wwv_mean_ms: result.wwv.mean_ms,
                wwvh_mean_ms: result.wwvh.mean_ms,
                chu_mean_ms: result.chu.mean_ms,
                wwv_count: result.wwv.count,
                wwvh_count: result.wwvh.count,
                chu_count: result.chu.count,
                calibration_applied: result.calibration_applied,
                quality_grade: result.quality_grade.label(),
                outliers_rejected: result.outliers_rejected,
                wwv_intra_std_ms: result.wwv.intra_station_std_ms,
                wwvh_intra_std_ms: result.wwvh.intra_station_std_ms,
                chu_intra_std_ms: result.chu.intra_station_std_ms,
                inter_station_spread_ms: result.inter_station_spread_ms,
                consistency_flag: match result.consistency_flag {
                    ConsistencyFlag::Consistent => "consistent",
                    ConsistencyFlag::DiscriminationSuspect => "discrimination_suspect",
                },
            },
        )?;

        if options.clock_discipline && result.quality_grade != QualityGrade::D {
            let precision_exponent = precision_exponent_for(result.uncertainty_ms);
            discipline.publish(now - result.fused_d_clock_ms / 1000.0, now, precision_exponent);
        }
    }

    let clock_status = status_for(channels_active, channels_locked, fused.as_ref());
    let (d_clock_ms, uncertainty_ms) = fused
        .as_ref()
        .map(|r| (r.fused_d_clock_ms, r.uncertainty_ms))
        .unwrap_or((0.0, 0.0));

    let snapshot = TimingSnapshot {
        schema_version: SCHEMA_VERSION,
        generated_at: now,
        timestamp: now,
        clock_status,
        d_clock_ms,
        d_clock_uncertainty_ms: uncertainty_ms,
        channels_active,
        channels_locked,
        channels: channel_summaries,
    };
    writer.write(&snapshot)?;
    Ok(())
}

fn status_for(channels_active: u32, channels_locked: u32, fused: Option<&fusion::FusedResult>) -> ClockStatus {
    if channels_active == 0 {
        return ClockStatus::Unavailable;
    }
    match fused {
        None => ClockStatus::Unlocked,
        Some(result) if result.quality_grade == QualityGrade::D => ClockStatus::Unlocked,
        Some(_) if channels_locked > 0 => ClockStatus::Locked,
        Some(_) => ClockStatus::Acquiring,
    }
}

/// Maps an uncertainty in milliseconds to the clock-discipline
/// interface's precision exponent (log2 seconds), clamped to a
/// plausible GPSDO-to-free-running range.
fn precision_exponent_for(uncertainty_ms: f64) -> i32 {
    let uncertainty_s = (uncertainty_ms / 1000.0).max(1e-6);
    uncertainty_s.log2().round().clamp(-30.0, 0.0) as i32
}

/// Parses `path`'s trailing rows, keeping only those whose
/// `minute_boundary_utc` is at or after `cutoff`. Tolerates a partial
/// trailing line (the analytics task's writes are line-atomic but a
/// reader can still observe a torn final write) by discarding it, and a
/// missing file (channel hasn't produced a minute yet) by returning
/// nothing.
fn read_recent_rows(path: &Path, cutoff: f64) -> Vec<ParsedRow> {
    let Ok(file) = std::fs::File::open(path) else {
        return Vec::new();
    };
    let mut rows = Vec::new();
    for line in BufReader::new(file).lines().map_while(Result::ok).skip(1) {
        let Some(row) = parse_row(&line) else { continue };
        if row.minute_boundary_utc >= cutoff {
            rows.push(row);
        }
    }
    rows.sort_by(|a, b| a.minute_boundary_utc.partial_cmp(&b.minute_boundary_utc).unwrap());
    rows
}

/// Parses one `clock_offset_series.csv` data row. Column order matches
/// `csv_log::CLOCK_OFFSET_HEADER` exactly:
/// `system_time,utc_time,minute_boundary_utc,clock_offset_ms,station,
/// frequency_mhz,propagation_delay_ms,propagation_mode,n_hops,confidence,
/// uncertainty_ms,quality_grade,snr_db,utc_verified,rtp_timestamp,
/// processed_at`.
fn parse_row(line: &str) -> Option<ParsedRow> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != 16 {
        return None;
    }
    Some(ParsedRow {
        minute_boundary_utc: fields[2].parse().ok()?,
        clock_offset_ms: fields[3].parse().ok()?,
        station: parse_station(fields[4])?,
        frequency_mhz: fields[5].parse().ok()?,
        propagation_delay_ms: fields[6].parse().ok()?,
        propagation_mode: fields[7].to_string(),
        confidence_label: fields[9].to_string(),
        uncertainty_ms: fields[10].parse().ok()?,
        quality_grade: QualityGrade::parse(fields[11])?,
        snr_db: fields[12].parse().ok()?,
    })
}

fn parse_station(label: &str) -> Option<Station> {
    match label {
        "WWV" => Some(Station::Wwv),
        "WWVH" => Some(Station::Wwvh),
        "CHU" => Some(Station::Chu),
        _ => None,
    }
}

fn station_label(station: Station) -> &'static str {
    match station {
        Station::Wwv => "WWV",
        Station::Wwvh => "WWVH",
        Station::Chu => "CHU",
    }
}

fn wallclock_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Used only so call sites that don't enable clock discipline don't need
/// a separate code path.
pub fn default_discipline() -> Arc<dyn ClockDiscipline> {
    Arc::new(NullClockDiscipline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv_log::{append_clock_offset, ClockOffsetRow};

    fn row(minute_boundary_utc: f64, d_clock_ms: f64) -> ClockOffsetRow {
        ClockOffsetRow {
            system_time: minute_boundary_utc,
            utc_time: minute_boundary_utc,
            minute_boundary_utc,
            clock_offset_ms: d_clock_ms,
            station: "WWV",
            frequency_mhz: 10.0,
            propagation_delay_ms: 6.0,
            propagation_mode: "1F",
            n_hops: 1,
            confidence: "locked",
            uncertainty_ms: 0.5,
            quality_grade: "A",
            snr_db: 18.0,
            utc_verified: true,
            rtp_timestamp: 0,
            processed_at: minute_boundary_utc,
        }
    }

    #[test]
    fn reads_only_rows_within_lookback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clock_offset_series.csv");
        append_clock_offset(&path, &row(0.0, -6.0)).unwrap();
        append_clock_offset(&path, &row(600.0, -6.2)).unwrap();
        append_clock_offset(&path, &row(1200.0, -5.9)).unwrap();

        let rows = read_recent_rows(&path, 900.0);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].minute_boundary_utc, 1200.0);
    }

    #[test]
    fn tolerates_missing_file() {
        let rows = read_recent_rows(Path::new("/nonexistent/path.csv"), 0.0);
        assert!(rows.is_empty());
    }

    #[test]
    fn tolerates_torn_trailing_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clock_offset_series.csv");
        append_clock_offset(&path, &row(0.0, -6.0)).unwrap();
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "60.0,60.0,60.0,-6.1,WWV,10.0").unwrap(); // no trailing newline, too few fields

        let rows = read_recent_rows(&path, 0.0);
        assert_eq!(rows.len(), 1);
    }
}

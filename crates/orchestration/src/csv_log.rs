//! Append-only daily CSV outputs for per-channel clock offsets, carrier
//! power, discrimination votes, and the fused result. Each file gets a
//! header line the first time it's
//! created and is otherwise opened in append mode; callers are expected
//! to call these once per minute (or once per fusion tick), so there's
//! no buffering beyond the OS's own file cache.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

fn append_row(path: &Path, header: &str, row: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let needs_header = !path.exists();
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if needs_header {
        writeln!(file, "{header}")?;
    }
    writeln!(file, "{row}")?;
    Ok(())
}

const CLOCK_OFFSET_HEADER: &str = "system_time,utc_time,minute_boundary_utc,clock_offset_ms,station,frequency_mhz,\
propagation_delay_ms,propagation_mode,n_hops,confidence,uncertainty_ms,quality_grade,snr_db,utc_verified,\
rtp_timestamp,processed_at";

#[derive(Debug, Clone)]
pub struct ClockOffsetRow {
    pub system_time: f64,
    pub utc_time: f64,
    pub minute_boundary_utc: f64,
    pub clock_offset_ms: f64,
    pub station: &'static str,
    pub frequency_mhz: f64,
    pub propagation_delay_ms: f64,
    pub propagation_mode: &'static str,
    pub n_hops: u8,
    pub confidence: &'static str,
    pub uncertainty_ms: f64,
    pub quality_grade: &'static str,
    pub snr_db: f64,
    pub utc_verified: bool,
    pub rtp_timestamp: u32,
    pub processed_at: f64,
}

pub fn append_clock_offset(path: &Path, row: &ClockOffsetRow) -> std::io::Result<()> {
    let line = format!(
        "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
        row.system_time,
        row.utc_time,
        row.minute_boundary_utc,
        row.clock_offset_ms,
        row.station,
        row.frequency_mhz,
        row.propagation_delay_ms,
        row.propagation_mode,
        row.n_hops,
        row.confidence,
        row.uncertainty_ms,
        row.quality_grade,
        row.snr_db,
        row.utc_verified,
        row.rtp_timestamp,
        row.processed_at,
    );
    append_row(path, CLOCK_OFFSET_HEADER, &line)
}

const CARRIER_POWER_HEADER: &str =
    "timestamp,utc_time,power_db,snr_db,wwv_tone_db,wwvh_tone_db,station,quality_grade";

#[derive(Debug, Clone)]
pub struct CarrierPowerRow {
    pub timestamp: f64,
    pub utc_time: f64,
    pub power_db: f64,
    pub snr_db: f64,
    pub wwv_tone_db: f64,
    pub wwvh_tone_db: f64,
    pub station: &'static str,
    pub quality_grade: &'static str,
}

pub fn append_carrier_power(path: &Path, row: &CarrierPowerRow) -> std::io::Result<()> {
    let line = format!(
        "{},{},{},{},{},{},{},{}",
        row.timestamp,
        row.utc_time,
        row.power_db,
        row.snr_db,
        row.wwv_tone_db,
        row.wwvh_tone_db,
        row.station,
        row.quality_grade,
    );
    append_row(path, CARRIER_POWER_HEADER, &line)
}

const DISCRIMINATION_HEADER: &str = "minute_boundary_utc,dominant_station,confidence,methods_agree,\
bcd_wwv_amplitude,bcd_wwvh_amplitude,wwv_doppler_stddev_hz,wwvh_doppler_stddev_hz,test_signal_detected,votes_json";

#[derive(Debug, Clone)]
pub struct DiscriminationRow {
    pub minute_boundary_utc: f64,
    pub dominant_station: &'static str,
    pub confidence: &'static str,
    pub methods_agree: usize,
    pub bcd_wwv_amplitude: f64,
    pub bcd_wwvh_amplitude: f64,
    pub wwv_doppler_stddev_hz: f64,
    pub wwvh_doppler_stddev_hz: f64,
    pub test_signal_detected: bool,
    pub votes_json: String,
}

pub fn append_discrimination(path: &Path, row: &DiscriminationRow) -> std::io::Result<()> {
    let line = format!(
        "{},{},{},{},{},{},{},{},{},\"{}\"",
        row.minute_boundary_utc,
        row.dominant_station,
        row.confidence,
        row.methods_agree,
        row.bcd_wwv_amplitude,
        row.bcd_wwvh_amplitude,
        row.wwv_doppler_stddev_hz,
        row.wwvh_doppler_stddev_hz,
        row.test_signal_detected,
        row.votes_json.replace('"', "''"),
    );
    append_row(path, DISCRIMINATION_HEADER, &line)
}

const FUSED_HEADER: &str = "timestamp,d_clock_fused_ms,d_clock_raw_ms,uncertainty_ms,n_broadcasts,n_stations,\
wwv_mean_ms,wwvh_mean_ms,chu_mean_ms,wwv_count,wwvh_count,chu_count,calibration_applied,quality_grade,\
outliers_rejected,wwv_intra_std_ms,wwvh_intra_std_ms,chu_intra_std_ms,inter_station_spread_ms,consistency_flag";

#[derive(Debug, Clone)]
pub struct FusedRow {
    pub timestamp: f64,
    pub d_clock_fused_ms: f64,
    pub d_clock_raw_ms: f64,
    pub uncertainty_ms: f64,
    pub n_broadcasts: usize,
    pub n_stations: usize,
    pub wwv_mean_ms: f64,
    pub wwvh_mean_ms: f64,
    pub chu_mean_ms: f64,
    pub wwv_count: usize,
    pub wwvh_count: usize,
    pub chu_count: usize,
    pub calibration_applied: bool,
    pub quality_grade: &'static str,
    pub outliers_rejected: usize,
    pub wwv_intra_std_ms: f64,
    pub wwvh_intra_std_ms: f64,
    pub chu_intra_std_ms: f64,
    pub inter_station_spread_ms: f64,
    pub consistency_flag: &'static str,
}

pub fn append_fused(path: &Path, row: &FusedRow) -> std::io::Result<()> {
    let line = format!(
        "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
        row.timestamp,
        row.d_clock_fused_ms,
        row.d_clock_raw_ms,
        row.uncertainty_ms,
        row.n_broadcasts,
        row.n_stations,
        row.wwv_mean_ms,
        row.wwvh_mean_ms,
        row.chu_mean_ms,
        row.wwv_count,
        row.wwvh_count,
        row.chu_count,
        row.calibration_applied,
        row.quality_grade,
        row.outliers_rejected,
        row.wwv_intra_std_ms,
        row.wwvh_intra_std_ms,
        row.chu_intra_std_ms,
        row.inter_station_spread_ms,
        row.consistency_flag,
    );
    append_row(path, FUSED_HEADER, &line)
}

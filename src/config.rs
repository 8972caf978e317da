use std::fs::read_to_string;
use std::str::FromStr;

use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};

use timing::station::ReceiverLocation;

/// Station/instrument identity and receiver position, used to derive the
/// channels' multicast destinations and the solver's great-circle
/// distance.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Server {
    pub station_id: String,
    pub instrument_id: String,
    /// Maidenhead grid square, e.g. `"EM12"`. Ignored if `latitude`/
    /// `longitude` are both set.
    #[serde(default)]
    pub grid_square: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl Server {
    pub fn receiver_location(&self) -> ReceiverLocation {
        match (self.latitude, self.longitude) {
            (Some(lat_deg), Some(lon_deg)) => ReceiverLocation::LatLon { lat_deg, lon_deg },
            _ => ReceiverLocation::GridSquare(
                self.grid_square.clone().unwrap_or_else(|| "AA00".to_string()),
            ),
        }
    }
}

/// One `[[channels]]` table: a single SDR-tuned channel the recorder
/// ingests, archives, and analyzes.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct ChannelConfig {
    pub name: String,
    pub center_frequency_hz: u64,
    #[serde(default = "ChannelConfig::sample_rate_hz")]
    pub sample_rate_hz: u32,
    #[serde(default)]
    pub description: String,
    /// Preset name the SDR daemon resolves to gain/AGC/filter settings.
    #[serde(default = "ChannelConfig::preset")]
    pub preset: String,
}

impl ChannelConfig {
    fn sample_rate_hz() -> u32 {
        20_000
    }

    fn preset() -> String {
        "hf-narrow".to_string()
    }
}

/// Connection to the SDR daemon's channel-control protocol.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Sdr {
    pub control_endpoint: String,
    #[serde(default = "Sdr::output_encoding")]
    pub output_encoding: String,
}

impl Sdr {
    fn output_encoding() -> String {
        "float32".to_string()
    }
}

/// Raw-archive and CSV-output layout on disk.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Archive {
    pub root: String,
    #[serde(default = "Archive::rollover_seconds")]
    pub rollover_seconds: u64,
    #[serde(default = "Archive::retention_days")]
    pub retention_days: u64,
}

impl Archive {
    fn rollover_seconds() -> u64 {
        3600
    }

    fn retention_days() -> u64 {
        14
    }
}

/// Multi-broadcast fusion service configuration.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Fusion {
    pub data_root: String,
    #[serde(default = "Fusion::tick_seconds")]
    pub tick_seconds: u64,
    #[serde(default)]
    pub clock_discipline: bool,
    #[serde(default = "Fusion::shm_path")]
    pub shm_path: String,
}

impl Fusion {
    fn tick_seconds() -> u64 {
        60
    }

    fn shm_path() -> String {
        "/var/run/grape/timing.json".to_string()
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value.to_ascii_lowercase().as_str() {
            "error" => Self::Error,
            "warn" => Self::Warn,
            "info" => Self::Info,
            "debug" => Self::Debug,
            "trace" => Self::Trace,
            _ => return Err(anyhow::anyhow!("unknown log level: {value}")),
        })
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match self {
            Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub server: Server,
    pub channels: Vec<ChannelConfig>,
    pub sdr: Sdr,
    pub archive: Archive,
    pub fusion: Fusion,
    #[serde(default)]
    pub log: Log,
}

impl Config {
    pub fn load() -> Result<Self> {
        let cli = Cli::parse();
        Ok(toml::from_str::<Self>(&read_to_string(&cli.config)?)?)
    }
}

#[derive(Parser, Debug)]
#[command(about = env!("CARGO_PKG_DESCRIPTION"), version = env!("CARGO_PKG_VERSION"), author = env!("CARGO_PKG_AUTHORS"))]
pub struct Cli {
    #[arg(long, short)]
    pub config: String,
}

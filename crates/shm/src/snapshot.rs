//! The published timing snapshot's wire schema.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClockStatus {
    Acquiring,
    Locked,
    Holdover,
    Unlocked,
    Unavailable,
}

/// A per-channel short summary embedded in the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub channel_name: String,
    pub station: Option<String>,
    pub confidence: f64,
    pub d_clock_raw_ms: f64,
    pub propagation_delay_ms: f64,
    pub propagation_mode: String,
    pub snr_db: f64,
    pub uncertainty_ms: f64,
}

/// The JSON document rewritten atomically on every fusion step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSnapshot {
    pub schema_version: u32,
    pub generated_at: f64,
    pub timestamp: f64,
    pub clock_status: ClockStatus,
    pub d_clock_ms: f64,
    pub d_clock_uncertainty_ms: f64,
    pub channels_active: u32,
    pub channels_locked: u32,
    pub channels: BTreeMap<String, ChannelSummary>,
}

impl TimingSnapshot {
    pub fn age_seconds(&self, now: f64) -> f64 {
        (now - self.generated_at).max(0.0)
    }
}

//! Per-broadcast calibration table: an additive correction, learned by
//! EMA, that drives each broadcast's mean D_clock toward zero over time.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationEntry {
    pub station: String,
    pub frequency_mhz: f64,
    pub offset_ms: f64,
    pub uncertainty_ms: f64,
    pub n_samples: u64,
    pub last_updated: f64,
    pub reference_station: String,
}

/// JSON-persisted table keyed by `STATION_FREQMHZ`. Starts empty; no
/// defaults are hard-coded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalibrationTable {
    entries: HashMap<String, CalibrationEntry>,
}

impl CalibrationTable {
    pub fn load(path: &Path) -> Result<Self, Error> {
        match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(table) => Ok(table),
                Err(e) => {
                    let bad_path = path.with_extension("bad");
                    let _ = std::fs::rename(path, &bad_path);
                    log::warn!("calibration table at {path:?} was corrupt ({e}); starting empty");
                    Ok(Self::default())
                }
            },
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn persist(&self, path: &Path) -> Result<(), Error> {
        let tmp_path = path.with_extension("tmp");
        let json = serde_json::to_string_pretty(self).map_err(|e| Error::PersistenceCorrupt(e.to_string()))?;
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&CalibrationEntry> {
        self.entries.get(key)
    }

    pub fn offset_ms(&self, key: &str) -> f64 {
        self.entries.get(key).map(|e| e.offset_ms).unwrap_or(0.0)
    }

    /// Updates `key`'s calibration with an EMA toward `-mean(raw)`, so the
    /// broadcast's mean D_clock is driven to zero.
    /// `alpha = max(0.1, min(0.3, 10 / n))`, where `n` is this broadcast's
    /// post-update sample count.
    pub fn update_ema(
        &mut self,
        key: &str,
        station: &str,
        frequency_mhz: f64,
        raw_mean_ms: f64,
        measurement_uncertainty_ms: f64,
        reference_station: &str,
        now: f64,
    ) {
        let entry = self.entries.entry(key.to_string()).or_insert_with(|| CalibrationEntry {
            station: station.to_string(),
            frequency_mhz,
            offset_ms: 0.0,
            uncertainty_ms: measurement_uncertainty_ms,
            n_samples: 0,
            last_updated: now,
            reference_station: reference_station.to_string(),
        });

        entry.n_samples += 1;
        let alpha = (10.0 / entry.n_samples as f64).clamp(0.1, 0.3);
        let target = -raw_mean_ms;
        entry.offset_ms = (1.0 - alpha) * entry.offset_ms + alpha * target;
        entry.uncertainty_ms = (1.0 - alpha) * entry.uncertainty_ms + alpha * measurement_uncertainty_ms;
        entry.last_updated = now;
        entry.reference_station = reference_station.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_converges_calibrated_mean_to_zero() {
        let mut table = CalibrationTable::default();
        let true_offset = 2.5;
        for i in 0..60 {
            // Simulated raw measurements clustered around `true_offset`.
            let raw = true_offset + if i % 2 == 0 { 0.1 } else { -0.1 };
            table.update_ema("WWV_10", "WWV", 10.0, raw, 0.5, "WWV", i as f64);
        }
        let calibrated = true_offset + table.offset_ms("WWV_10");
        assert!(calibrated.abs() < 0.25, "calibrated={calibrated}");
    }

    #[test]
    fn persists_and_reloads_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");

        let mut table = CalibrationTable::default();
        table.update_ema("WWV_10", "WWV", 10.0, 3.0, 0.5, "WWV", 1.0);
        table.persist(&path).unwrap();

        let reloaded = CalibrationTable::load(&path).unwrap();
        assert!((reloaded.offset_ms("WWV_10") - table.offset_ms("WWV_10")).abs() < 1e-9);
    }

    #[test]
    fn corrupt_file_resets_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        std::fs::write(&path, "not json").unwrap();

        let table = CalibrationTable::load(&path).unwrap();
        assert!(table.get("WWV_10").is_none());
        assert!(path.with_extension("bad").exists());
    }
}

//! The OS clock-discipline interface: when enabled, the
//! fusion task publishes its reference time into the OS's reference-
//! clock shared-memory protocol (unit 0 by convention) so a local NTP/
//! chrony daemon can steer the system clock from it.
//!
//! That protocol's wire shape (a fixed-layout shared-memory segment keyed
//! by unit number) is an OS-level transport this crate doesn't own, the
//! same way `sdr_client::RequestStream` separates the SDR protocol's
//! shape from its transport. [`ClockDiscipline`] is that seam: the fusion
//! task always calls `publish`, and only the chosen implementation
//! decides what happens to the values.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};

/// Publishes one clock-discipline sample. `reference_unix_s` is the
/// fusion task's best estimate of true UTC at `system_unix_s`;
/// `precision_exponent` is log2(seconds) of its uncertainty, matching
/// the SHM refclock protocol's precision field.
pub trait ClockDiscipline: Send + Sync {
    fn publish(&self, reference_unix_s: f64, system_unix_s: f64, precision_exponent: i32);
}

/// The default: clock discipline is off, so nothing is published.
pub struct NullClockDiscipline;

impl ClockDiscipline for NullClockDiscipline {
    fn publish(&self, _reference_unix_s: f64, _system_unix_s: f64, _precision_exponent: i32) {}
}

/// Writes each sample to a small JSON document via the same atomic-
/// rename pattern as [`shm::SnapshotWriter`], standing in for the real
/// binary SHM segment layout a production deployment would `shmat` into.
/// `samples_published` is exposed for tests and health checks; it never
/// resets.
pub struct FileClockDiscipline {
    path: PathBuf,
    samples_published: AtomicI64,
}

impl FileClockDiscipline {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            samples_published: AtomicI64::new(0),
        }
    }

    pub fn samples_published(&self) -> i64 {
        self.samples_published.load(Ordering::Relaxed)
    }
}

impl ClockDiscipline for FileClockDiscipline {
    fn publish(&self, reference_unix_s: f64, system_unix_s: f64, precision_exponent: i32) {
        let count = self.samples_published.fetch_add(1, Ordering::Relaxed) + 1;
        let doc = serde_json::json!({
            "unit": 0,
            "count": count,
            "reference_time": reference_unix_s,
            "system_time": system_unix_s,
            "precision_exponent": precision_exponent,
            "leap": 0,
        });
        let tmp_path = self.path.with_extension("tmp");
        let Ok(text) = serde_json::to_string(&doc) else {
            return;
        };
        if std::fs::write(&tmp_path, text).is_ok() {
            let _ = std::fs::rename(&tmp_path, &self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_discipline_is_inert() {
        NullClockDiscipline.publish(1000.0, 1000.0, -10);
    }

    #[test]
    fn file_discipline_writes_atomically_and_counts_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clock_discipline_shm0");
        let discipline = FileClockDiscipline::new(&path);

        discipline.publish(1000.0, 1000.006, -8);
        discipline.publish(1060.0, 1060.006, -8);

        assert_eq!(discipline.samples_published(), 2);
        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["unit"], 0);
        assert_eq!(value["count"], 2);
    }
}

//! Consumer client for the timing snapshot: at-most-500ms freshness
//! caching, staleness detection, and convenience accessors over the
//! published fields.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::snapshot::{ClockStatus, TimingSnapshot};

const CACHE_TTL: Duration = Duration::from_millis(500);
const UNHEALTHY_AGE_SECONDS: f64 = 120.0;
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

struct Cached {
    snapshot: Option<TimingSnapshot>,
    read_at: Instant,
}

/// Reads the timing snapshot, re-reading the file at most every 500 ms
/// so a tight polling loop doesn't hammer the filesystem.
pub struct TimingClient {
    path: PathBuf,
    cache: Mutex<Option<Cached>>,
}

fn now_unix() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

impl TimingClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn refresh(&self) -> Option<TimingSnapshot> {
        let mut cache = self.cache.lock();
        if let Some(cached) = cache.as_ref() {
            if cached.read_at.elapsed() < CACHE_TTL {
                return cached.snapshot.clone();
            }
        }

        let snapshot = std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|text| serde_json::from_str::<TimingSnapshot>(&text).ok());

        *cache = Some(Cached {
            snapshot: snapshot.clone(),
            read_at: Instant::now(),
        });
        snapshot
    }

    /// `None` if the snapshot is missing, unparsable, or older than the
    /// 120 s staleness threshold.
    pub fn get_snapshot(&self) -> Option<TimingSnapshot> {
        let snapshot = self.refresh()?;
        if snapshot.age_seconds(now_unix()) > UNHEALTHY_AGE_SECONDS {
            return None;
        }
        Some(snapshot)
    }

    pub fn get_d_clock(&self) -> Option<f64> {
        self.get_snapshot().map(|s| s.d_clock_ms)
    }

    pub fn get_station(&self, channel: &str) -> Option<String> {
        self.get_snapshot()
            .and_then(|s| s.channels.get(channel).and_then(|c| c.station.clone()))
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.get_snapshot().map(|s| s.clock_status), Some(ClockStatus::Locked))
    }

    pub fn is_available(&self) -> bool {
        self.get_snapshot().is_some()
    }

    /// `system_time - d_clock_ms/1000` when a fresh, available snapshot
    /// exists; the raw system time otherwise.
    pub fn get_utc_time(&self) -> f64 {
        let system_time = now_unix();
        match self.get_d_clock() {
            Some(d_clock_ms) => system_time - d_clock_ms / 1000.0,
            None => system_time,
        }
    }

    /// Blocks (via `std::thread::sleep` polling) until `is_locked()` or
    /// `timeout` elapses. Returns whether lock was achieved.
    pub fn wait_for_lock(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_locked() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(WAIT_POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ChannelSummary;
    use crate::writer::SnapshotWriter;
    use std::collections::BTreeMap;

    fn sample(now: f64, status: ClockStatus) -> TimingSnapshot {
        let mut channels = BTreeMap::new();
        channels.insert(
            "WWV_10".to_string(),
            ChannelSummary {
                channel_name: "WWV_10".into(),
                station: Some("WWV".into()),
                confidence: 0.9,
                d_clock_raw_ms: -5.0,
                propagation_delay_ms: 6.0,
                propagation_mode: "1F".into(),
                snr_db: 18.0,
                uncertainty_ms: 0.4,
            },
        );
        TimingSnapshot {
            schema_version: crate::snapshot::SCHEMA_VERSION,
            generated_at: now,
            timestamp: now,
            clock_status: status,
            d_clock_ms: -4.0,
            d_clock_uncertainty_ms: 0.3,
            channels_active: 1,
            channels_locked: 1,
            channels,
        }
    }

    #[test]
    fn reads_d_clock_and_station_from_a_fresh_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grape_timing");
        SnapshotWriter::new(&path).write(&sample(now_unix(), ClockStatus::Locked)).unwrap();

        let client = TimingClient::new(&path);
        assert_eq!(client.get_d_clock(), Some(-4.0));
        assert_eq!(client.get_station("WWV_10"), Some("WWV".to_string()));
        assert!(client.is_locked());
        assert!(client.is_available());
    }

    #[test]
    fn missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grape_timing");
        let client = TimingClient::new(&path);
        assert!(!client.is_available());
        assert!(client.get_d_clock().is_none());
    }

    #[test]
    fn stale_snapshot_is_treated_as_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grape_timing");
        SnapshotWriter::new(&path)
            .write(&sample(now_unix() - 300.0, ClockStatus::Locked))
            .unwrap();

        let client = TimingClient::new(&path);
        assert!(!client.is_available());
    }

    #[test]
    fn get_utc_time_falls_back_to_system_time_when_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grape_timing");
        let client = TimingClient::new(&path);
        let utc = client.get_utc_time();
        assert!((utc - now_unix()).abs() < 1.0);
    }
}

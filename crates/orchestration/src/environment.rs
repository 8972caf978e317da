//! Shared, per-run state: identity, storage layout, and the background
//! retention sweep. One `Arc<Environment>` is constructed in `main` and
//! handed to every channel/minute/fusion task; none of them hold their
//! own copy of anything it owns.
//!
//! The retention sweep's background thread uses `Arc::downgrade` before
//! `thread::spawn`, `Weak::upgrade` as the loop condition, so the thread
//! exits on its own once every `Arc<Environment>` is dropped instead of
//! needing an explicit shutdown signal.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EnvironmentOptions {
    pub station_id: String,
    pub instrument_id: String,
    pub archive_root: PathBuf,
    pub fusion_data_root: PathBuf,
    pub retention_days: u64,
    pub shm_path: PathBuf,
}

pub struct Environment {
    pub station_id: String,
    pub instrument_id: String,
    pub archive_root: PathBuf,
    pub fusion_data_root: PathBuf,
    pub shm_path: PathBuf,
    retention: Duration,
}

const RETENTION_SWEEP_PERIOD: Duration = Duration::from_secs(5 * 60);

impl Environment {
    pub fn new(options: EnvironmentOptions) -> Arc<Self> {
        let this = Arc::new(Self {
            station_id: options.station_id,
            instrument_id: options.instrument_id,
            archive_root: options.archive_root,
            fusion_data_root: options.fusion_data_root,
            shm_path: options.shm_path,
            retention: Duration::from_secs(options.retention_days * 24 * 3600),
        });

        let weak = Arc::downgrade(&this);
        thread::spawn(move || {
            while let Some(env) = weak.upgrade() {
                env.sweep_expired_archives();
                drop(env);
                thread::sleep(RETENTION_SWEEP_PERIOD);
            }
        });

        this
    }

    pub fn archive_path_for(&self, channel: &str) -> PathBuf {
        self.archive_root.join(channel)
    }

    pub fn convergence_state_path(&self, channel: &str) -> PathBuf {
        self.archive_root.join(channel).join("convergence_state.json")
    }

    pub fn calibration_path(&self) -> PathBuf {
        self.fusion_data_root.join("calibration.json")
    }

    pub fn clock_offset_csv_path(&self, channel: &str) -> PathBuf {
        self.archive_root.join(channel).join("clock_offset_series.csv")
    }

    pub fn carrier_power_csv_path(&self, channel: &str, day: &str) -> PathBuf {
        self.archive_root.join(channel).join(format!("carrier_power_{day}.csv"))
    }

    pub fn discrimination_csv_path(&self, channel: &str, day: &str) -> PathBuf {
        self.archive_root.join(channel).join(format!("discrimination_{day}.csv"))
    }

    pub fn fused_csv_path(&self) -> PathBuf {
        self.fusion_data_root.join("phase2").join("fusion").join("fused_d_clock.csv")
    }

    /// Deletes per-channel hourly archive files (and their sidecars) whose
    /// rollover window predates the retention cutoff. Disk usage isn't
    /// tracked separately; wall-clock age of the file is the only signal,
    /// matching the hourly-rollover naming the writer already uses.
    fn sweep_expired_archives(&self) {
        let cutoff = std::time::SystemTime::now()
            .checked_sub(self.retention)
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);

        let Ok(channels) = std::fs::read_dir(&self.archive_root) else {
            return;
        };
        for channel_entry in channels.flatten() {
            if !channel_entry.path().is_dir() {
                continue;
            }
            let Ok(files) = std::fs::read_dir(channel_entry.path()) else {
                continue;
            };
            for file_entry in files.flatten() {
                let path = file_entry.path();
                let is_archive_file = path.extension().map(|ext| ext == "iqf32" || ext == "json").unwrap_or(false);
                if !is_archive_file {
                    continue;
                }
                let Ok(metadata) = file_entry.metadata() else {
                    continue;
                };
                let Ok(modified) = metadata.modified() else {
                    continue;
                };
                if modified < cutoff {
                    if let Err(e) = std::fs::remove_file(&path) {
                        log::warn!("retention sweep failed to remove {path:?}: {e}");
                    } else {
                        log::info!("retention sweep removed expired archive file {path:?}");
                    }
                }
            }
        }
    }
}

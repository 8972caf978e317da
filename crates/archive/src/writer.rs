use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use num_complex::Complex32;
use rtp::GapInterval;

use crate::sidecar::{GapRecord, Sidecar, StreamHealth};
use crate::Error;

/// Notified when an hourly archive file rolls over (or closes at
/// shutdown). Mirrors the "finished hourly archive is an event with
/// subscribers" shape of the upload/spectrogram/Digital-RF pipeline this
/// core feeds; those subscribers live outside this crate, this is just
/// the seam they attach to.
pub trait ArchiveRollover: Send + Sync {
    fn on_rollover(&self, channel: &str, file_path: &Path, sidecar_path: &Path, sidecar: &Sidecar);
}

#[derive(Debug, Clone)]
pub struct ArchiveWriterOptions {
    pub root: PathBuf,
    pub channel: String,
    pub sample_rate_hz: u32,
    /// Wall-clock duration of one archive file, in seconds. 3600 (one
    /// hour) by default.
    pub rollover_seconds: u64,
}

impl ArchiveWriterOptions {
    pub fn new(root: impl Into<PathBuf>, channel: impl Into<String>, sample_rate_hz: u32) -> Self {
        Self {
            root: root.into(),
            channel: channel.into(),
            sample_rate_hz,
            rollover_seconds: 3600,
        }
    }
}

struct OpenFile {
    window_start_utc: u64,
    file: BufWriter<File>,
    path: PathBuf,
    first_rtp_timestamp: u32,
    first_utc_seconds: f64,
    sample_count: u64,
    gaps: Vec<GapRecord>,
    stream_health: StreamHealth,
}

pub struct ArchiveWriter {
    options: ArchiveWriterOptions,
    current: Option<OpenFile>,
    notifier: Option<Arc<dyn ArchiveRollover>>,
}

impl ArchiveWriter {
    pub fn new(options: ArchiveWriterOptions) -> Result<Self, Error> {
        fs::create_dir_all(channel_dir(&options))?;
        Ok(Self {
            options,
            current: None,
            notifier: None,
        })
    }

    pub fn with_rollover_notifier(mut self, notifier: Arc<dyn ArchiveRollover>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    fn window_start(&self, utc_seconds: f64) -> u64 {
        let secs = utc_seconds.floor() as u64;
        secs - (secs % self.options.rollover_seconds)
    }

    /// Appends a contiguous block of samples, rolling the file over if the
    /// block's arrival time crosses a window boundary. `gap_before`, if
    /// present, is recorded against the currently-open file (the gap
    /// always belongs to the file whose timeline it falls into, which is
    /// the file about to receive these samples).
    pub fn write_block(
        &mut self,
        rtp_timestamp: u32,
        samples: &[Complex32],
        utc_of_first_sample: f64,
        gap_before: Option<GapInterval>,
        health_delta: StreamHealth,
    ) -> Result<(), Error> {
        let window = self.window_start(utc_of_first_sample);

        let needs_rollover = match &self.current {
            None => true,
            Some(open) => open.window_start_utc != window,
        };

        if needs_rollover {
            self.roll(window, rtp_timestamp, utc_of_first_sample)?;
        }

        let open = self.current.as_mut().expect("just opened above");

        if let Some(gap) = gap_before {
            open.gaps.push(GapRecord::from(&gap));
        }
        open.stream_health.merge(&health_delta);

        for sample in samples {
            open.file.write_all(&sample.re.to_le_bytes())?;
            open.file.write_all(&sample.im.to_le_bytes())?;
        }
        open.sample_count += samples.len() as u64;

        Ok(())
    }

    /// Closes the current file, padding its tail with zero samples up to
    /// the nominal window duration if the stream went idle before the
    /// boundary. Writes the sidecar and notifies rollover subscribers.
    fn roll(&mut self, new_window: u64, rtp_timestamp: u32, utc_of_first_sample: f64) -> Result<(), Error> {
        if let Some(open) = self.current.take() {
            self.finish(open)?;
        }

        let path = channel_dir(&self.options).join(format!("{new_window}.iqf32"));
        let file = BufWriter::new(File::create(&path)?);
        self.current = Some(OpenFile {
            window_start_utc: new_window,
            file,
            path,
            first_rtp_timestamp: rtp_timestamp,
            first_utc_seconds: utc_of_first_sample,
            sample_count: 0,
            gaps: Vec::new(),
            stream_health: StreamHealth::default(),
        });
        Ok(())
    }

    fn finish(&self, mut open: OpenFile) -> Result<(), Error> {
        let nominal_samples = self.options.rollover_seconds * self.options.sample_rate_hz as u64;
        if open.sample_count < nominal_samples {
            let pad = nominal_samples - open.sample_count;
            let zero = [0u8; 8];
            for _ in 0..pad {
                open.file.write_all(&zero)?;
            }
            open.sample_count += pad;
        }
        open.file.flush()?;

        let sidecar = Sidecar {
            channel: self.options.channel.clone(),
            first_rtp_timestamp: open.first_rtp_timestamp,
            first_utc_seconds: open.first_utc_seconds,
            sample_rate: self.options.sample_rate_hz,
            sample_count: open.sample_count,
            gaps: open.gaps,
            stream_health: open.stream_health,
        };
        let sidecar_path = open.path.with_extension("json");
        write_atomic(&sidecar_path, serde_json::to_string_pretty(&sidecar)?.as_bytes())?;

        if let Some(notifier) = &self.notifier {
            notifier.on_rollover(&self.options.channel, &open.path, &sidecar_path, &sidecar);
        }

        Ok(())
    }

    /// Flushes and finalizes the currently-open file, e.g. on graceful
    /// shutdown. A subsequent `write_block` opens a fresh file.
    pub fn close(&mut self) -> Result<(), Error> {
        if let Some(open) = self.current.take() {
            self.finish(open)?;
        }
        Ok(())
    }
}

impl Drop for ArchiveWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn channel_dir(options: &ArchiveWriterOptions) -> PathBuf {
    options.root.join("raw_archive").join(&options.channel)
}

/// Writes `bytes` to `path` by first writing a sibling `.tmp` file and
/// renaming it into place, so readers never observe a partially-written
/// file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn sample(v: f32) -> Complex32 {
        Complex32::new(v, -v)
    }

    #[test]
    fn rollover_pads_idle_tail_and_writes_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = ArchiveWriterOptions::new(dir.path(), "WWV_10", 20_000);
        options.rollover_seconds = 1; // 1s window => 20_000 nominal samples
        let mut writer = ArchiveWriter::new(options).unwrap();

        writer
            .write_block(0, &[sample(1.0); 100], 1_700_000_000.1, None, StreamHealth::default())
            .unwrap();
        // crosses into the next 1-second window, forcing a rollover + pad
        writer
            .write_block(20_000, &[sample(2.0); 50], 1_700_000_001.1, None, StreamHealth::default())
            .unwrap();
        writer.close().unwrap();

        let sidecar_path = dir
            .path()
            .join("raw_archive")
            .join("WWV_10")
            .join("1700000000.json");
        let sidecar: Sidecar =
            serde_json::from_str(&fs::read_to_string(&sidecar_path).unwrap()).unwrap();
        assert_eq!(sidecar.sample_count, 20_000);

        let data_path = dir
            .path()
            .join("raw_archive")
            .join("WWV_10")
            .join("1700000000.iqf32");
        let len = fs::metadata(&data_path).unwrap().len();
        assert_eq!(len, 20_000 * 8);
    }

    #[test]
    fn records_gap_intervals_in_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let options = ArchiveWriterOptions::new(dir.path(), "CHU_3", 20_000);
        let mut writer = ArchiveWriter::new(options).unwrap();
        let gap = GapInterval::new(0, 100, 50);
        writer
            .write_block(100, &[sample(0.5); 10], 1_700_000_000.0, Some(gap), StreamHealth::default())
            .unwrap();
        writer.close().unwrap();

        let sidecar_path = dir.path().join("raw_archive").join("CHU_3").join("1700000000.json");
        let sidecar: Sidecar = serde_json::from_str(&fs::read_to_string(&sidecar_path).unwrap()).unwrap();
        assert_eq!(sidecar.gaps.len(), 1);
        assert_eq!(sidecar.gaps[0].length, 100);
    }

    struct RecordingNotifier(Mutex<Vec<String>>);

    impl ArchiveRollover for RecordingNotifier {
        fn on_rollover(&self, channel: &str, _file_path: &Path, _sidecar_path: &Path, _sidecar: &Sidecar) {
            self.0.lock().unwrap().push(channel.to_string());
        }
    }

    #[test]
    fn notifies_rollover_subscriber() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = ArchiveWriterOptions::new(dir.path(), "WWV_10", 20_000);
        options.rollover_seconds = 1;
        let notifier = Arc::new(RecordingNotifier(Mutex::new(Vec::new())));
        let mut writer = ArchiveWriter::new(options)
            .unwrap()
            .with_rollover_notifier(notifier.clone());

        writer
            .write_block(0, &[sample(1.0); 10], 1_700_000_000.1, None, StreamHealth::default())
            .unwrap();
        writer
            .write_block(20_000, &[sample(1.0); 10], 1_700_000_001.1, None, StreamHealth::default())
            .unwrap();
        writer.close().unwrap();

        assert_eq!(notifier.0.lock().unwrap().len(), 2);
    }
}

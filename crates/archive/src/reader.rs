use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use num_complex::Complex32;
use rtp::{rtp_diff, GapInterval};

use crate::sidecar::Sidecar;
use crate::Error;

struct FileEntry {
    data_path: PathBuf,
    first_rtp_timestamp: u32,
    sample_count: u64,
    gaps: Vec<GapInterval>,
}

/// Read access to one channel's archive, transparent across the file
/// boundaries the writer imposes. Rescans the directory on construction;
/// a long-lived analytics task re-creates the reader (or calls
/// [`ArchiveReader::refresh`]) once per minute to pick up new files.
pub struct ArchiveReader {
    channel_dir: PathBuf,
    sample_rate_hz: u32,
    files: Vec<FileEntry>,
}

impl ArchiveReader {
    pub fn open(root: impl AsRef<Path>, channel: &str, sample_rate_hz: u32) -> Result<Self, Error> {
        let channel_dir = root.as_ref().join("raw_archive").join(channel);
        let mut reader = Self {
            channel_dir,
            sample_rate_hz,
            files: Vec::new(),
        };
        reader.refresh()?;
        Ok(reader)
    }

    /// Rescans the channel directory for newly-closed files.
    pub fn refresh(&mut self) -> Result<(), Error> {
        let mut files = Vec::new();
        if self.channel_dir.is_dir() {
            for entry in fs::read_dir(&self.channel_dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let sidecar: Sidecar = serde_json::from_str(&fs::read_to_string(&path)?)?;
                let data_path = path.with_extension("iqf32");
                if !data_path.is_file() {
                    continue;
                }
                let gaps = sidecar
                    .gaps
                    .iter()
                    .map(|g| GapInterval::new(g.rtp_start, g.rtp_start.wrapping_add(g.length), 1))
                    .collect();
                files.push(FileEntry {
                    data_path,
                    first_rtp_timestamp: sidecar.first_rtp_timestamp,
                    sample_count: sidecar.sample_count,
                    gaps,
                });
            }
        }
        files.sort_by_key(|f| f.first_rtp_timestamp);
        self.files = files;
        Ok(())
    }

    /// Returns `count` samples starting at RTP timestamp `start`, plus the
    /// gap intervals intersecting that range. Errors with
    /// [`Error::NotYetAvailable`] if any part of the range is not covered
    /// by a closed file.
    pub fn read(&self, start: u32, count: u32) -> Result<(Vec<Complex32>, Vec<GapInterval>), Error> {
        let end = start.wrapping_add(count);
        let mut samples = vec![Complex32::new(0.0, 0.0); count as usize];
        let mut covered = vec![false; count as usize];
        let mut gaps = Vec::new();

        for file in &self.files {
            let file_start = file.first_rtp_timestamp;
            let file_end = file_start.wrapping_add(file.sample_count as u32);
            if !ranges_overlap(start, end, file_start, file_end) {
                continue;
            }

            let overlap_start = if rtp_diff(start, file_start) > 0 { start } else { file_start };
            let overlap_end = if rtp_diff(end, file_end) < 0 { end } else { file_end };
            let overlap_len = rtp_diff(overlap_end, overlap_start).max(0) as u32;
            if overlap_len == 0 {
                continue;
            }

            let file_offset_samples = rtp_diff(overlap_start, file_start) as u64;
            let out_offset = rtp_diff(overlap_start, start) as usize;

            let mut handle = File::open(&file.data_path)?;
            handle.seek(SeekFrom::Start(file_offset_samples * 8))?;
            let mut buf = vec![0u8; overlap_len as usize * 8];
            handle.read_exact(&mut buf).map_err(|_| Error::NotYetAvailable)?;

            for (i, chunk) in buf.chunks_exact(8).enumerate() {
                let re = f32::from_le_bytes(chunk[0..4].try_into().unwrap());
                let im = f32::from_le_bytes(chunk[4..8].try_into().unwrap());
                samples[out_offset + i] = Complex32::new(re, im);
                covered[out_offset + i] = true;
            }

            for gap in &file.gaps {
                if gap.intersects(start, end) {
                    gaps.push(*gap);
                }
            }
        }

        if covered.iter().any(|c| !c) {
            return Err(Error::NotYetAvailable);
        }

        gaps.sort_by_key(|g| g.rtp_start);
        gaps.dedup();
        Ok((samples, gaps))
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }
}

fn ranges_overlap(a_start: u32, a_end: u32, b_start: u32, b_end: u32) -> bool {
    rtp_diff(a_end, b_start) > 0 && rtp_diff(b_end, a_start) > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{ArchiveWriter, ArchiveWriterOptions};
    use crate::sidecar::StreamHealth;

    fn sample(v: f32) -> Complex32 {
        Complex32::new(v, -v)
    }

    #[test]
    fn reads_across_two_rolled_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = ArchiveWriterOptions::new(dir.path(), "WWV_10", 20_000);
        options.rollover_seconds = 1;
        let mut writer = ArchiveWriter::new(options).unwrap();

        writer
            .write_block(0, &vec![sample(1.0); 20_000], 1_700_000_000.0, None, StreamHealth::default())
            .unwrap();
        writer
            .write_block(20_000, &vec![sample(2.0); 5_000], 1_700_000_001.0, None, StreamHealth::default())
            .unwrap();
        writer.close().unwrap();

        let reader = ArchiveReader::open(dir.path(), "WWV_10", 20_000).unwrap();
        let (samples, gaps) = reader.read(19_995, 10).unwrap();
        assert_eq!(samples.len(), 10);
        assert!(gaps.is_empty());
        assert_eq!(samples[0], sample(1.0));
        assert_eq!(samples[9], sample(2.0));
    }

    #[test]
    fn reports_not_yet_available_past_written_range() {
        let dir = tempfile::tempdir().unwrap();
        let options = ArchiveWriterOptions::new(dir.path(), "WWV_10", 20_000);
        let mut writer = ArchiveWriter::new(options).unwrap();
        writer
            .write_block(0, &vec![sample(1.0); 100], 1_700_000_000.0, None, StreamHealth::default())
            .unwrap();
        writer.close().unwrap();

        let reader = ArchiveReader::open(dir.path(), "WWV_10", 20_000).unwrap();
        assert!(matches!(reader.read(0, 1_000), Err(Error::NotYetAvailable)));
    }
}

//! Atomic-rename writer for the timing snapshot.

use std::path::{Path, PathBuf};

use crate::snapshot::TimingSnapshot;
use crate::Error;

/// Writes [`TimingSnapshot`]s to a well-known path, one generation at a
/// time. Serializes to a sibling `.tmp` path and renames atomically so
/// readers never observe a partially-written document.
pub struct SnapshotWriter {
    path: PathBuf,
    tmp_path: PathBuf,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let tmp_path = path.with_extension("tmp");
        Self { path, tmp_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, snapshot: &TimingSnapshot) -> Result<(), Error> {
        let json = serde_json::to_string(snapshot)?;
        std::fs::write(&self.tmp_path, json)?;
        std::fs::rename(&self.tmp_path, &self.path)?;
        Ok(())
    }
}

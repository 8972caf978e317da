//! Multi-broadcast D_clock fusion: weighted combination of per-channel
//! timing measurements across all active WWV/WWVH/CHU broadcasts into a
//! single fused `D_clock`, with per-station calibration and a scalar
//! Kalman smoother.

pub mod calibration;
pub mod engine;
pub mod kalman;
pub mod weighting;

pub use calibration::{CalibrationEntry, CalibrationTable};
pub use engine::{ConsistencyFlag, FusedResult, FusionEngine, StationSummary};
pub use kalman::{ScalarKalmanSmoother, SmoothedResult};
pub use weighting::{BroadcastMeasurement, QualityGrade};

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    /// A persisted calibration table exists but couldn't be parsed; the
    /// caller renames it to a `.bad` sibling and starts empty.
    PersistenceCorrupt(String),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

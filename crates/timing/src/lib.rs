//! Per-minute timing analytics: station discrimination, transmission-time
//! solving, and per-channel clock convergence.
//!
//! This crate consumes [`dsp::ToneDetection`]s and channel geometry, and
//! produces a `D_clock` series per channel — the system clock's offset
//! from UTC(NIST) — through the Kalman convergence filter in
//! [`convergence`].

pub mod characterization;
pub mod convergence;
pub mod discrimination;
pub mod solver;
pub mod station;

pub use characterization::ChannelCharacterization;
pub use convergence::{ConvergenceFilter, ConvergenceOutput, ConvergenceState};
pub use discrimination::{discriminate, Confidence, DiscriminationResult};
pub use solver::{solve_transmission_time, PropagationMode, TransmissionTimeSolution};
pub use station::ChannelSpec;

#[derive(Debug)]
pub enum Error {
    /// No tone detection met the acceptance threshold for any candidate
    /// station this minute.
    DetectionBelowThreshold,
    /// No propagation mode scored well enough to select, or no candidate
    /// mode was geometrically consistent with the observed delay.
    SolverUnresolved,
    /// A persisted convergence-state file exists but its JSON couldn't be
    /// parsed, or its schema didn't match.
    PersistenceCorrupt(String),
    Io(std::io::Error),
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

use std::path::PathBuf;
use thiserror::Error;

/// Failure kinds of the epoching, averaging and HRV engine.
#[derive(Debug, Error)]
pub enum HepError {
    #[error("insufficient events: found {found}, at least 2 are required")]
    InsufficientEvents { found: usize },
    #[error("indicator train holds {value} at sample {index}; only 0 and 1 are allowed")]
    InvalidIndicator { index: usize, value: u8 },
    #[error("invalid window: {0}")]
    InvalidWindow(String),
    #[error("no valid epochs left to average")]
    NoEpochs,
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("missing cardiac channel: none of {wanted:?} present")]
    MissingChannel { wanted: Vec<String> },
    #[error("insufficient intervals: {valid} valid inter-beat intervals")]
    InsufficientIntervals { valid: usize },
    #[error("block {sequence} ends at sample {end} but the recording has {len} samples")]
    BlockOutOfRange {
        sequence: usize,
        end: usize,
        len: usize,
    },
    #[error("no input files matching '{pattern}' under {}", dir.display())]
    NoInputFiles { dir: PathBuf, pattern: String },
}

pub type Result<T> = std::result::Result<T, HepError>;

//! Error types for detectorbank.

use thiserror::Error;

/// Error type for detector bank, cache and onset operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Buffer shape mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: String, found: String },

    #[error("Indexed item no longer retained (underflow): index {index}, oldest {oldest}")]
    Underflow { index: usize, oldest: usize },

    #[error("Input exhausted: index {index} beyond {available} available samples")]
    Exhausted { index: usize, available: usize },

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Profile store error: {0}")]
    Profile(String),

    #[error("Failed to start worker threads: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse profile: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Failed to serialize profile: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl Error {
    pub(crate) fn dimension(expected: impl ToString, found: impl ToString) -> Self {
        Error::DimensionMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

/// Result alias for detectorbank operations.
pub type Result<T> = std::result::Result<T, Error>;

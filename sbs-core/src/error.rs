//! Error types for sbs-core.

use thiserror::Error;

use crate::job::JobState;

/// Result type alias for sbs-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for collections and jobs.
#[derive(Error, Debug)]
pub enum Error {
    /// One or more items were rejected because their key is already in use.
    #[error("item(s) already exist: {}", keys.join(", "))]
    DuplicateKey { keys: Vec<String> },

    /// One or more keys are not present in the collection.
    #[error("item(s) do not exist: {}", keys.join(", "))]
    NotFound { keys: Vec<String> },

    /// Positional access past the end of the collection.
    #[error("index {index} out of range for collection of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// A job was asked to start while not in the `Created` state.
    #[error("job '{job}' cannot be started: already {state}")]
    InvalidState { job: String, state: JobState },

    /// The worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn duplicate(key: &str) -> Self {
        Self::DuplicateKey {
            keys: vec![key.to_string()],
        }
    }

    pub(crate) fn not_found(key: &str) -> Self {
        Self::NotFound {
            keys: vec![key.to_string()],
        }
    }
}

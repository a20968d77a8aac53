//! Error types for the borgtide-runner crate.

use thiserror::Error;

/// Failures to *run* an external command. A command that runs and exits
/// non-zero is not an error; see [`CommandOutcome`](crate::CommandOutcome).
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The child process could not be spawned.
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Underlying I/O failure while collecting output or writing files.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The viewer command is empty.
    #[error("No viewer command configured")]
    NoViewer,
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, RunnerError>;

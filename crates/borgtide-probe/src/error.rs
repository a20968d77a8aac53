//! Error types for the borgtide-probe crate.

use thiserror::Error;

/// Errors raised while building or evaluating environments.
///
/// A probe that merely times out or gets no answer is not an error; it is
/// reported as "no signal" by the [`NetworkSignals`](crate::NetworkSignals)
/// implementation.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// A configured pattern is not a valid regular expression.
    #[error("Invalid {field} in environment '{environment}': {source}")]
    Pattern {
        environment: String,
        field: &'static str,
        #[source]
        source: regex::Error,
    },

    /// The probing mechanism itself is broken (tool missing, I/O failure).
    #[error("Signal source '{signal}' failed: {reason}")]
    Infrastructure { signal: &'static str, reason: String },
}

impl ProbeError {
    pub(crate) fn infrastructure(signal: &'static str, reason: impl ToString) -> Self {
        Self::Infrastructure {
            signal,
            reason: reason.to_string(),
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ProbeError>;

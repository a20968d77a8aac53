use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The timestamp file exists but could not be read or written.
    #[error("Timestamp file {path}: {source}")]
    TimestampIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The timestamp file does not hold an integer number of seconds.
    #[error("Timestamp file {path} holds {content:?}, not epoch seconds")]
    TimestampParse { path: String, content: String },

    /// The environment probe broke and the configured policy is to stop.
    #[error("Environment refresh failed: {0}")]
    ProbeAborted(String),

    /// Another borgtide process already answers on the control socket.
    #[error("Another borgtide instance is serving {path}")]
    AlreadyRunning { path: String },

    #[error("Control socket {path}: {source}")]
    Control {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A control connection broke or carried something unexpected.
    #[error("Control protocol: {0}")]
    Protocol(String),

    /// The orchestrator loop has exited; requests can no longer be served.
    #[error("Orchestrator is not running")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

//! `borgtide-core`: configuration, shared errors and the status model.

pub mod config;
pub mod error;
pub mod status;

pub use config::{BackupSpec, BorgtideConfig, EnvironmentSpec, ProbeFailurePolicy};
pub use error::{BorgtideError, Result};
pub use status::{Aggregate, FailureReason, JobStatus, StatusBoard, USER_ENTRY};

//! borgtide-runner: the external backup tool and the listing viewer.
//!
//! Everything here runs a child process to completion. Whether a command
//! "worked" is decided by its exit code alone; output is only logged or
//! shown to the user.

pub mod borg;
pub mod error;
pub mod output;
pub mod types;
pub mod viewer;

pub use borg::{BackupTool, BorgCli};
pub use error::{Result, RunnerError};
pub use types::{CommandOutcome, Invocation, Operation};
pub use viewer::{EditorViewer, ListViewer};

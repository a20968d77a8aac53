//! Status values published by the scheduler for the presentation layer.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Key of the synthetic entry that tracks user-initiated actions.
pub const USER_ENTRY: &str = "user";

/// Why a job (or user action) ended up in [`JobStatus::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// `borg create` exited non-zero.
    CreateExited { code: i32 },
    /// `borg prune` exited non-zero and prune failures are configured to count.
    PruneExited { code: i32 },
    /// `borg list` exited non-zero.
    ListExited { code: i32 },
    /// The external command could not be started.
    Spawn { message: String },
    /// The run succeeded but the timestamp could not be written.
    Timestamp { message: String },
    /// The worker executing the unit died before reporting.
    WorkerLost { message: String },
    /// The list output could not be handed to the viewer.
    Viewer { message: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateExited { code } => write!(f, "create exited with {code}"),
            Self::PruneExited { code } => write!(f, "prune exited with {code}"),
            Self::ListExited { code } => write!(f, "list exited with {code}"),
            Self::Spawn { message } => write!(f, "spawn failed: {message}"),
            Self::Timestamp { message } => write!(f, "timestamp not written: {message}"),
            Self::WorkerLost { message } => write!(f, "worker lost: {message}"),
            Self::Viewer { message } => write!(f, "viewer failed: {message}"),
        }
    }
}

/// Per-job state as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Ok,
    HostUnreachable { host: String },
    Failed { reason: FailureReason },
}

impl JobStatus {
    pub fn failed(reason: FailureReason) -> Self {
        Self::Failed { reason }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    fn severity(&self) -> Aggregate {
        match self {
            Self::Running => Aggregate::Running,
            Self::Ok => Aggregate::Ok,
            Self::HostUnreachable { .. } => Aggregate::Attention,
            Self::Failed { .. } => Aggregate::Error,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Ok => write!(f, "ok"),
            Self::HostUnreachable { host } => write!(f, "host unreachable ({host})"),
            Self::Failed { reason } => write!(f, "failed ({reason})"),
        }
    }
}

/// Overall state, one value per tray icon.
///
/// Ordered so that the worst entry wins; `Running` beats everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    Ok,
    Attention,
    Error,
    Running,
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Attention => write!(f, "attention"),
            Self::Error => write!(f, "error"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Snapshot of everything the presentation layer renders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBoard {
    /// Job name → last known status. Jobs not yet considered are absent.
    pub jobs: BTreeMap<String, JobStatus>,
    /// Status of the most recent user-initiated action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<JobStatus>,
    /// True while a refresh or pipeline is in flight; user actions are refused.
    pub busy: bool,
    /// Environments valid as of the last refresh.
    pub environments: Vec<String>,
}

impl StatusBoard {
    pub fn get(&self, name: &str) -> Option<&JobStatus> {
        if name == USER_ENTRY {
            self.user.as_ref()
        } else {
            self.jobs.get(name)
        }
    }

    pub fn aggregate(&self) -> Aggregate {
        self.jobs
            .values()
            .chain(self.user.iter())
            .map(JobStatus::severity)
            .max()
            .unwrap_or(Aggregate::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_board_is_ok() {
        assert_eq!(StatusBoard::default().aggregate(), Aggregate::Ok);
    }

    #[test]
    fn running_wins_over_failures() {
        let mut board = StatusBoard::default();
        board.jobs.insert(
            "a".into(),
            JobStatus::failed(FailureReason::CreateExited { code: 2 }),
        );
        board.jobs.insert("b".into(), JobStatus::Running);
        assert_eq!(board.aggregate(), Aggregate::Running);
    }

    #[test]
    fn failure_outranks_unreachable_host() {
        let mut board = StatusBoard::default();
        board.jobs.insert(
            "a".into(),
            JobStatus::HostUnreachable { host: "nas".into() },
        );
        assert_eq!(board.aggregate(), Aggregate::Attention);
        board.user = Some(JobStatus::failed(FailureReason::ListExited { code: 1 }));
        assert_eq!(board.aggregate(), Aggregate::Error);
    }

    #[test]
    fn user_entry_is_addressable_by_name() {
        let board = StatusBoard {
            user: Some(JobStatus::Running),
            ..Default::default()
        };
        assert_eq!(board.get(USER_ENTRY), Some(&JobStatus::Running));
        assert_eq!(board.get("nas"), None);
    }

    #[test]
    fn failed_status_serializes_with_reason() {
        let status = JobStatus::failed(FailureReason::CreateExited { code: 2 });
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains(r#""state":"failed""#));
        assert!(json.contains(r#""kind":"create_exited""#));
        assert!(json.contains(r#""code":2"#));
    }
}

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};

use borgtide_core::{JobStatus, StatusBoard};

use crate::error::{Result, SchedulerError};

/// Something the user asked for outside the regular cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "job", rename_all = "snake_case")]
pub enum UserAction {
    /// Show the repository listing of the named job.
    List(String),
    /// Back the named job up now, ignoring due time and environments.
    RunNow(String),
}

impl UserAction {
    pub fn job(&self) -> &str {
        match self {
            Self::List(job) | Self::RunNow(job) => job,
        }
    }
}

/// Answer to a [`UserAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    Accepted,
    /// A refresh or another pipeline is in flight; nothing was started.
    Busy,
    UnknownJob,
}

pub(crate) enum Request {
    Tick,
    Action {
        action: UserAction,
        reply: oneshot::Sender<Admission>,
    },
}

/// Cloneable way to talk to a running orchestrator from other tasks.
#[derive(Clone)]
pub struct OrchestratorHandle {
    pub(crate) requests: mpsc::Sender<Request>,
    pub(crate) status: watch::Receiver<StatusBoard>,
}

impl OrchestratorHandle {
    pub async fn submit(&self, action: UserAction) -> Result<Admission> {
        let (reply, answer) = oneshot::channel();
        self.requests
            .send(Request::Action { action, reply })
            .await
            .map_err(|_| SchedulerError::Stopped)?;
        answer.await.map_err(|_| SchedulerError::Stopped)
    }

    /// Start a cycle now instead of waiting for the interval. Dropped if busy.
    pub async fn tick(&self) -> Result<()> {
        self.requests
            .send(Request::Tick)
            .await
            .map_err(|_| SchedulerError::Stopped)
    }

    /// Wait until no user action is running and return the last user status.
    ///
    /// Call after an [`Admission::Accepted`]; the admitted action is marked
    /// running before the answer is sent.
    pub async fn user_outcome(&self) -> Result<Option<JobStatus>> {
        let mut status = self.status.clone();
        let board = status
            .wait_for(|board| !board.user.as_ref().is_some_and(JobStatus::is_running))
            .await
            .map_err(|_| SchedulerError::Stopped)?;
        Ok(board.user.clone())
    }

    pub fn status(&self) -> StatusBoard {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusBoard> {
        self.status.clone()
    }
}

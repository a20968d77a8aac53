//! The coordinating task.
//!
//! A single [`Orchestrator`] owns the job queues, the busy flag, the status
//! board and the current environment snapshot. Anything that blocks runs on
//! the [`WorkerPool`] and comes back as a completion message, which is applied
//! here one at a time. No locks guard scheduler state.
//!
//! One cycle: refresh environments, then walk `ready` until a job is due and
//! eligible, ping its host, run it, and park it in `done`. Skipped jobs are
//! parked in `done` too. When `ready` is empty at the start of a cycle, `done`
//! is moved back into it in order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use borgtide_core::{
    config::MainConfig, FailureReason, JobStatus, ProbeFailurePolicy, StatusBoard,
};
use borgtide_probe::{EnvironmentProbe, EnvironmentSet};
use borgtide_runner::{BackupTool, ListViewer};

use crate::{
    error::{Result, SchedulerError},
    handle::{Admission, OrchestratorHandle, Request, UserAction},
    job::Job,
    pipeline,
    pool::WorkerPool,
};

const REQUEST_BUFFER: usize = 16;

/// The collaborators that do the actual probing and running.
#[derive(Clone)]
pub struct Backend {
    pub probe: EnvironmentProbe,
    pub tool: Arc<dyn BackupTool>,
    pub viewer: Arc<dyn ListViewer>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub check_interval: Duration,
    pub workers: usize,
    pub on_probe_failure: ProbeFailurePolicy,
    pub prune_failure_fails_job: bool,
}

impl Settings {
    pub fn from_config(main: &MainConfig) -> Self {
        Self {
            check_interval: Duration::from_secs(main.check_interval_secs.max(1)),
            workers: main.workers,
            on_probe_failure: main.on_probe_failure,
            prune_failure_fails_job: main.prune_failure_fails_job,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config(&MainConfig::default())
    }
}

/// Who started the pipeline currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Cycle,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Refreshing,
    HostCheck { job: usize, origin: Origin },
    Executing { job: usize, origin: Origin },
    Listing { job: usize },
}

/// Where every job currently sits, by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub ready: Vec<String>,
    pub done: Vec<String>,
    /// The job in host check or execution, if any.
    pub in_flight: Option<String>,
}

impl QueueSnapshot {
    pub fn len(&self) -> usize {
        self.ready.len() + self.done.len() + usize::from(self.in_flight.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

enum Completion {
    Refreshed(std::result::Result<EnvironmentSet, String>),
    /// `Err` carries the message of a lost worker.
    HostChecked {
        job: usize,
        reachable: std::result::Result<bool, String>,
    },
    Executed { job: usize, status: JobStatus },
    Listed { job: usize, status: JobStatus },
}

pub struct Orchestrator {
    jobs: Vec<Arc<Job>>,
    ready: VecDeque<usize>,
    done: VecDeque<usize>,
    phase: Phase,
    environments: EnvironmentSet,
    board: StatusBoard,
    status_tx: watch::Sender<StatusBoard>,
    pool: WorkerPool<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    requests_tx: mpsc::Sender<Request>,
    requests_rx: mpsc::Receiver<Request>,
    backend: Backend,
    settings: Settings,
}

impl Orchestrator {
    /// Jobs enter the ready queue in the order given.
    pub fn new(jobs: Vec<Job>, backend: Backend, settings: Settings) -> Self {
        let (pool, completions) = WorkerPool::new(settings.workers);
        let (status_tx, _) = watch::channel(StatusBoard::default());
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_BUFFER);
        Self {
            ready: (0..jobs.len()).collect(),
            done: VecDeque::new(),
            jobs: jobs.into_iter().map(Arc::new).collect(),
            phase: Phase::Idle,
            environments: EnvironmentSet::empty(),
            board: StatusBoard::default(),
            status_tx,
            pool,
            completions,
            requests_tx,
            requests_rx,
            backend,
            settings,
        }
    }

    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            requests: self.requests_tx.clone(),
            status: self.status_tx.subscribe(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusBoard> {
        self.status_tx.subscribe()
    }

    pub fn board(&self) -> &StatusBoard {
        &self.board
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_busy(&self) -> bool {
        self.phase != Phase::Idle
    }

    pub fn environments(&self) -> &EnvironmentSet {
        &self.environments
    }

    pub fn queues(&self) -> QueueSnapshot {
        let names = |q: &VecDeque<usize>| -> Vec<String> {
            q.iter().map(|&i| self.jobs[i].name().to_string()).collect()
        };
        let in_flight = match self.phase {
            Phase::HostCheck { job, .. } | Phase::Executing { job, .. } => {
                Some(self.jobs[job].name().to_string())
            }
            _ => None,
        };
        QueueSnapshot {
            ready: names(&self.ready),
            done: names(&self.done),
            in_flight,
        }
    }

    /// Drive the orchestrator until `shutdown` flips to true.
    ///
    /// A pipeline still in flight at shutdown is abandoned; its child
    /// processes keep running and its timestamp is never written.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.settings.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            jobs = self.jobs.len(),
            interval_secs = self.settings.check_interval.as_secs(),
            workers = self.pool.size(),
            "orchestrator started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                }
                Some(done) = self.completions.recv() => {
                    self.apply(done)?;
                }
                Some(request) = self.requests_rx.recv() => {
                    self.serve(request);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if self.is_busy() {
            warn!(phase = ?self.phase, "shutting down with work in flight");
        }
        info!("orchestrator stopped");
        Ok(())
    }

    /// Start a cycle. Returns false, and does nothing, when busy.
    pub fn tick(&mut self) -> bool {
        if self.is_busy() {
            debug!(phase = ?self.phase, "tick dropped, still busy");
            return false;
        }

        self.set_phase(Phase::Refreshing);
        let probe = self.backend.probe.clone();
        self.pool.submit(
            "refresh",
            async move { Completion::Refreshed(probe.refresh().await.map_err(|e| e.to_string())) },
            |lost| Completion::Refreshed(Err(lost)),
        );
        true
    }

    /// Admit a user action if nothing else is running.
    pub fn submit(&mut self, action: UserAction) -> Admission {
        let Some(index) = self.index_of(action.job()) else {
            warn!(job = action.job(), "user asked for an unknown job");
            return Admission::UnknownJob;
        };
        if self.is_busy() {
            info!(job = action.job(), phase = ?self.phase, "user action refused, busy");
            return Admission::Busy;
        }

        let job = Arc::clone(&self.jobs[index]);
        self.board.user = Some(JobStatus::Running);
        match action {
            UserAction::List(_) => {
                info!(job = %job.name(), "listing archives");
                self.set_phase(Phase::Listing { job: index });
                let tool = Arc::clone(&self.backend.tool);
                let viewer = Arc::clone(&self.backend.viewer);
                self.pool.submit(
                    "list",
                    async move {
                        let status = pipeline::run_list(tool, viewer, job).await;
                        Completion::Listed { job: index, status }
                    },
                    move |lost| Completion::Listed {
                        job: index,
                        status: JobStatus::failed(FailureReason::WorkerLost { message: lost }),
                    },
                );
            }
            UserAction::RunNow(_) => {
                info!(job = %job.name(), "backup requested now");
                self.ready.retain(|&i| i != index);
                self.done.retain(|&i| i != index);
                self.start_host_check(index, Origin::User);
            }
        }
        Admission::Accepted
    }

    /// Wait for the next unit of work to finish and apply its result.
    ///
    /// Never returns while idle with nothing submitted; pair with
    /// [`is_busy`](Self::is_busy) or use [`settle`](Self::settle).
    pub async fn step(&mut self) -> Result<()> {
        let done = self.completions.recv().await.ok_or(SchedulerError::Stopped)?;
        self.apply(done)
    }

    /// Apply completions until the orchestrator is idle again.
    ///
    /// Requests arriving through a [`handle`](Self::handle) meanwhile are
    /// answered, so they see the orchestrator as busy.
    pub async fn settle(&mut self) -> Result<()> {
        while self.is_busy() {
            tokio::select! {
                done = self.completions.recv() => {
                    self.apply(done.ok_or(SchedulerError::Stopped)?)?;
                }
                Some(request) = self.requests_rx.recv() => {
                    self.serve(request);
                }
            }
        }
        Ok(())
    }

    fn serve(&mut self, request: Request) {
        match request {
            Request::Tick => {
                self.tick();
            }
            Request::Action { action, reply } => {
                let admission = self.submit(action);
                if reply.send(admission).is_err() {
                    debug!("requester went away before the answer");
                }
            }
        }
    }

    fn apply(&mut self, done: Completion) -> Result<()> {
        match done {
            Completion::Refreshed(result) => return self.on_refreshed(result),
            Completion::HostChecked { job, reachable } => self.on_host_checked(job, reachable),
            Completion::Executed { job, status } => self.on_executed(job, status),
            Completion::Listed { job, status } => self.on_listed(job, status),
        }
        Ok(())
    }

    fn on_refreshed(&mut self, result: std::result::Result<EnvironmentSet, String>) -> Result<()> {
        if self.phase != Phase::Refreshing {
            warn!(phase = ?self.phase, "stray refresh result ignored");
            return Ok(());
        }

        match result {
            Ok(valid) => {
                debug!(environments = %valid, "environment snapshot applied");
                self.environments = valid;
            }
            Err(reason) => match self.settings.on_probe_failure {
                ProbeFailurePolicy::Abort => {
                    error!(%reason, "environment refresh failed, stopping");
                    self.set_phase(Phase::Idle);
                    return Err(SchedulerError::ProbeAborted(reason));
                }
                ProbeFailurePolicy::Degrade => {
                    error!(%reason, "environment refresh failed, assuming none are valid");
                    self.environments = EnvironmentSet::empty();
                }
            },
        }
        self.board.environments = self.environments.names().to_vec();

        if self.ready.is_empty() {
            self.ready.extend(self.done.drain(..));
        }
        self.advance(Utc::now().timestamp());
        Ok(())
    }

    /// Skip through `ready` until one job needs running, or the queue runs dry.
    fn advance(&mut self, now: i64) {
        while let Some(index) = self.ready.pop_front() {
            let job = Arc::clone(&self.jobs[index]);
            if !job.is_due(now) {
                debug!(job = %job.name(), "not due");
                self.park_skipped(index);
                continue;
            }
            if !job.is_eligible(&self.environments) {
                info!(job = %job.name(), environments = %self.environments, "due, but no allowed environment is valid");
                self.park_skipped(index);
                continue;
            }

            info!(job = %job.name(), "due and eligible");
            self.start_host_check(index, Origin::Cycle);
            return;
        }

        debug!("cycle complete");
        self.set_phase(Phase::Idle);
    }

    fn park_skipped(&mut self, index: usize) {
        self.board
            .jobs
            .insert(self.jobs[index].name().to_string(), JobStatus::Ok);
        self.done.push_back(index);
    }

    fn start_host_check(&mut self, index: usize, origin: Origin) {
        let job = Arc::clone(&self.jobs[index]);
        self.board
            .jobs
            .insert(job.name().to_string(), JobStatus::Running);
        self.set_phase(Phase::HostCheck { job: index, origin });

        let probe = self.backend.probe.clone();
        self.pool.submit(
            "host-check",
            async move {
                let reachable = pipeline::check_host(probe, job).await;
                Completion::HostChecked {
                    job: index,
                    reachable: Ok(reachable),
                }
            },
            move |lost| Completion::HostChecked {
                job: index,
                reachable: Err(lost),
            },
        );
    }

    fn on_host_checked(&mut self, index: usize, reachable: std::result::Result<bool, String>) {
        let Phase::HostCheck { job, origin } = self.phase else {
            warn!(phase = ?self.phase, "stray host check ignored");
            return;
        };
        if job != index {
            warn!(expected = job, got = index, "host check for the wrong job ignored");
            return;
        }

        let job = Arc::clone(&self.jobs[index]);
        let reachable = match reachable {
            Ok(reachable) => reachable,
            Err(lost) => {
                error!(job = %job.name(), reason = %lost, "host check worker lost");
                let status = JobStatus::failed(FailureReason::WorkerLost { message: lost });
                self.finish(index, origin, status);
                return;
            }
        };
        if !reachable {
            warn!(job = %job.name(), host = %job.host(), "host unreachable, skipping");
            let status = JobStatus::HostUnreachable {
                host: job.host().to_string(),
            };
            self.finish(index, origin, status);
            return;
        }

        self.set_phase(Phase::Executing { job: index, origin });
        let tool = Arc::clone(&self.backend.tool);
        let prune_fails_job = self.settings.prune_failure_fails_job;
        self.pool.submit(
            "backup",
            async move {
                let status = pipeline::run_backup(tool, job, prune_fails_job).await;
                Completion::Executed { job: index, status }
            },
            move |lost| Completion::Executed {
                job: index,
                status: JobStatus::failed(FailureReason::WorkerLost { message: lost }),
            },
        );
    }

    fn on_executed(&mut self, index: usize, status: JobStatus) {
        match self.phase {
            Phase::Executing { job, origin } if job == index => self.finish(index, origin, status),
            _ => warn!(phase = ?self.phase, "stray backup result ignored"),
        }
    }

    fn on_listed(&mut self, index: usize, status: JobStatus) {
        if self.phase != (Phase::Listing { job: index }) {
            warn!(phase = ?self.phase, "stray list result ignored");
            return;
        }
        info!(job = %self.jobs[index].name(), %status, "list finished");
        self.board.user = Some(status);
        self.set_phase(Phase::Idle);
    }

    /// Record the pipeline's outcome and requeue its job behind the others.
    fn finish(&mut self, index: usize, origin: Origin, status: JobStatus) {
        info!(job = %self.jobs[index].name(), %status, "job finished");
        if origin == Origin::User {
            self.board.user = Some(status.clone());
        }
        self.board
            .jobs
            .insert(self.jobs[index].name().to_string(), status);
        self.done.push_back(index);
        self.set_phase(Phase::Idle);
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.board.busy = self.is_busy();
        self.status_tx.send_replace(self.board.clone());
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.jobs.iter().position(|job| job.name() == name)
    }
}

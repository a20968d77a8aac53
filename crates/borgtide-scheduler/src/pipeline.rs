//! The units of work the orchestrator submits to the worker pool.
//!
//! Each function resolves to a plain value; none of them touch scheduler
//! state. The orchestrator applies their results when they come back.

use std::sync::Arc;

use chrono::Local;
use tracing::{error, info, warn};

use borgtide_core::{FailureReason, JobStatus};
use borgtide_probe::EnvironmentProbe;
use borgtide_runner::{BackupTool, ListViewer};

use crate::job::Job;

/// One ping to the job's host. Probe breakage counts as unreachable.
pub async fn check_host(probe: EnvironmentProbe, job: Arc<Job>) -> bool {
    match probe.is_reachable(job.host()).await {
        Ok(reachable) => reachable,
        Err(e) => {
            warn!(job = %job.name(), host = %job.host(), error = %e, "reachability check failed");
            false
        }
    }
}

/// create, then prune, then record the run.
///
/// The recorded time is the instant captured before create started. Only
/// create decides success unless `prune_fails_job` is set.
pub async fn run_backup(tool: Arc<dyn BackupTool>, job: Arc<Job>, prune_fails_job: bool) -> JobStatus {
    let started = Local::now();
    let archive = job.archive_name(&started);
    let name = job.name();

    let created = match tool.create(job.spec(), &archive).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(job = %name, error = %e, "borg create could not run");
            return JobStatus::failed(FailureReason::Spawn {
                message: e.to_string(),
            });
        }
    };
    if !created.success() {
        error!(job = %name, exit_code = created.exit_code, "borg create failed");
        return JobStatus::failed(FailureReason::CreateExited {
            code: created.exit_code,
        });
    }
    info!(job = %name, %archive, "archive created");

    match tool.prune(job.spec()).await {
        Ok(outcome) if outcome.success() => info!(job = %name, "prune finished"),
        Ok(outcome) => {
            warn!(job = %name, exit_code = outcome.exit_code, "borg prune failed");
            if prune_fails_job {
                return JobStatus::failed(FailureReason::PruneExited {
                    code: outcome.exit_code,
                });
            }
        }
        Err(e) => {
            warn!(job = %name, error = %e, "borg prune could not run");
            if prune_fails_job {
                return JobStatus::failed(FailureReason::Spawn {
                    message: e.to_string(),
                });
            }
        }
    }

    if let Err(e) = job.timestamp().store(started.timestamp()).await {
        error!(job = %name, error = %e, "backup done but timestamp not saved");
        return JobStatus::failed(FailureReason::Timestamp {
            message: e.to_string(),
        });
    }

    info!(job = %name, "backup completed");
    JobStatus::Ok
}

/// `borg list`, then show whatever it printed. The listing is shown even
/// when borg exits non-zero; its error text is usually what the user needs.
pub async fn run_list(tool: Arc<dyn BackupTool>, viewer: Arc<dyn ListViewer>, job: Arc<Job>) -> JobStatus {
    let listed = match tool.list(job.spec()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(job = %job.name(), error = %e, "borg list could not run");
            return JobStatus::failed(FailureReason::Spawn {
                message: e.to_string(),
            });
        }
    };

    if let Err(e) = viewer.show(job.name(), &listed.output).await {
        error!(job = %job.name(), error = %e, "could not show list output");
        return JobStatus::failed(FailureReason::Viewer {
            message: e.to_string(),
        });
    }

    if listed.success() {
        JobStatus::Ok
    } else {
        warn!(job = %job.name(), exit_code = listed.exit_code, "borg list failed");
        JobStatus::failed(FailureReason::ListExited {
            code: listed.exit_code,
        })
    }
}

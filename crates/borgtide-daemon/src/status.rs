//! Mirrors the orchestrator's status board for the outside world.
//!
//! The board is sampled every `status_poll_ms`. A change in the aggregate is
//! logged; if a status file is configured, every change rewrites it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use borgtide_core::{Aggregate, StatusBoard};

/// What the status file holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StatusSnapshot {
    pub aggregate: Aggregate,
    pub updated_at: String,
    #[serde(flatten)]
    pub board: StatusBoard,
}

impl StatusSnapshot {
    pub fn of(board: &StatusBoard) -> Self {
        Self {
            aggregate: board.aggregate(),
            updated_at: Utc::now().to_rfc3339(),
            board: board.clone(),
        }
    }
}

/// Replace `path` with the JSON snapshot of `board` via temp file + rename.
pub(crate) fn write_snapshot(path: &Path, board: &StatusBoard) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(&StatusSnapshot::of(board))?;
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);
    std::fs::write(&staging, json)?;
    std::fs::rename(&staging, path)?;
    Ok(())
}

/// Poll `status` until `shutdown` flips, then write one last snapshot.
pub(crate) async fn mirror(
    mut status: watch::Receiver<StatusBoard>,
    poll: Duration,
    file: Option<PathBuf>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(poll.max(Duration::from_millis(10)));
    let mut shown: Option<Aggregate> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        // The first pass always publishes, so the file exists from startup.
        if shown.is_some() && !status.has_changed().unwrap_or(false) {
            continue;
        }
        let board = status.borrow_and_update().clone();
        publish(&board, &mut shown, file.as_deref());
    }

    let board = status.borrow().clone();
    publish(&board, &mut shown, file.as_deref());
    debug!("status mirror stopped");
}

fn publish(board: &StatusBoard, shown: &mut Option<Aggregate>, file: Option<&Path>) {
    let aggregate = board.aggregate();
    if *shown != Some(aggregate) {
        info!(status = %aggregate, busy = board.busy, "overall status changed");
        *shown = Some(aggregate);
    }
    if let Some(path) = file {
        if let Err(e) = write_snapshot(path, board) {
            warn!(path = %path.display(), error = %e, "could not write status file");
        }
    }
}

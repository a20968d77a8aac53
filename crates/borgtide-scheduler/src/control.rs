//! Local control socket.
//!
//! One borgtide process at a time owns the socket and answers user actions
//! through its own [`OrchestratorHandle`], so an action sent from another
//! process contends with that process's cycle instead of running beside it.
//!
//! The wire format is one JSON object per line. The client sends a
//! [`UserAction`]; the server answers with [`Reply::Admission`] and, when the
//! action was accepted, [`Reply::Finished`] once its pipeline is done.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use borgtide_core::JobStatus;

use crate::{
    error::{Result, SchedulerError},
    handle::{Admission, OrchestratorHandle, UserAction},
};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    Admission { admission: Admission },
    /// The accepted action is done; `status` is the user entry of the board.
    Finished { status: Option<JobStatus> },
    /// The request line could not be understood.
    Rejected { reason: String },
}

/// What became of one user action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub admission: Admission,
    /// Only set for accepted actions.
    pub status: Option<JobStatus>,
}

/// The bound control socket. The socket file is removed on drop.
pub struct ControlSocket {
    listener: UnixListener,
    path: PathBuf,
}

impl ControlSocket {
    /// Claim `path`.
    ///
    /// Fails with [`SchedulerError::AlreadyRunning`] when another process
    /// answers there. A socket file nobody listens on is replaced.
    pub async fn bind(path: &Path) -> Result<Self> {
        if UnixStream::connect(path).await.is_ok() {
            return Err(SchedulerError::AlreadyRunning {
                path: path.display().to_string(),
            });
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| control_error(path, e))?;
        }
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "replaced stale control socket"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(control_error(path, e)),
        }

        let listener = UnixListener::bind(path).map_err(|e| control_error(path, e))?;
        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    /// Answer connections through `handle` until `shutdown` flips to true.
    pub async fn serve(self, handle: OrchestratorHandle, mut shutdown: watch::Receiver<bool>) {
        info!(path = %self.path.display(), "control socket listening");
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        tokio::spawn(answer(stream, handle.clone()));
                    }
                    Err(e) => {
                        warn!(error = %e, "control socket accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(path = %self.path.display(), "control socket closed");
    }
}

impl Drop for ControlSocket {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "control socket not removed");
        }
    }
}

/// A connection to whichever process owns the control socket.
pub struct ControlClient {
    stream: UnixStream,
}

impl ControlClient {
    /// `Ok(None)` when nothing listens at `path`.
    pub async fn connect(path: &Path) -> Result<Option<Self>> {
        match UnixStream::connect(path).await {
            Ok(stream) => Ok(Some(Self { stream })),
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) => {
                Ok(None)
            }
            Err(e) => Err(control_error(path, e)),
        }
    }

    /// Send `action`. An accepted action is waited for until it finishes.
    pub async fn request(self, action: &UserAction) -> Result<ActionOutcome> {
        let (read, mut write) = self.stream.into_split();
        let mut replies = BufReader::new(read).lines();
        send_line(&mut write, action).await?;

        let admission = match next_reply(&mut replies).await? {
            Reply::Admission { admission } => admission,
            Reply::Rejected { reason } => return Err(SchedulerError::Protocol(reason)),
            other => return Err(unexpected(other)),
        };
        if admission != Admission::Accepted {
            return Ok(ActionOutcome {
                admission,
                status: None,
            });
        }

        match next_reply(&mut replies).await? {
            Reply::Finished { status } => Ok(ActionOutcome { admission, status }),
            other => Err(unexpected(other)),
        }
    }
}

async fn answer(stream: UnixStream, handle: OrchestratorHandle) {
    if let Err(e) = exchange(stream, &handle).await {
        debug!(error = %e, "control connection ended early");
    }
}

async fn exchange(stream: UnixStream, handle: &OrchestratorHandle) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let Some(line) = BufReader::new(read).lines().next_line().await.map_err(protocol)? else {
        return Ok(());
    };

    let action: UserAction = match serde_json::from_str(&line) {
        Ok(action) => action,
        Err(e) => {
            warn!(error = %e, "malformed control request");
            return send_line(&mut write, &Reply::Rejected { reason: e.to_string() }).await;
        }
    };

    debug!(?action, "control request");
    let admission = handle.submit(action).await?;
    send_line(&mut write, &Reply::Admission { admission }).await?;
    if admission == Admission::Accepted {
        let status = handle.user_outcome().await?;
        send_line(&mut write, &Reply::Finished { status }).await?;
    }
    Ok(())
}

async fn send_line<W, T>(out: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(message).map_err(protocol)?;
    line.push(b'\n');
    out.write_all(&line).await.map_err(protocol)
}

async fn next_reply(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> Result<Reply> {
    let line = lines
        .next_line()
        .await
        .map_err(protocol)?
        .ok_or_else(|| SchedulerError::Protocol("connection closed before the answer".into()))?;
    serde_json::from_str(&line).map_err(protocol)
}

fn control_error(path: &Path, source: std::io::Error) -> SchedulerError {
    SchedulerError::Control {
        path: path.display().to_string(),
        source,
    }
}

fn protocol(e: impl fmt::Display) -> SchedulerError {
    SchedulerError::Protocol(e.to_string())
}

fn unexpected(reply: Reply) -> SchedulerError {
    SchedulerError::Protocol(format!("unexpected reply {reply:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_is_one_tagged_object() {
        let action = UserAction::RunNow("nas".into());
        let json = serde_json::to_string(&action).unwrap();
        assert_eq!(json, r#"{"action":"run_now","job":"nas"}"#);

        let reply = Reply::Admission {
            admission: Admission::Busy,
        };
        assert_eq!(
            serde_json::to_string(&reply).unwrap(),
            r#"{"reply":"admission","admission":"busy"}"#
        );
    }

    #[tokio::test]
    async fn nobody_listening_means_no_client() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.sock");
        assert!(ControlClient::connect(&path).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_owner_is_refused_and_stale_file_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run/control.sock");

        let first = ControlSocket::bind(&path).await.unwrap();
        let err = ControlSocket::bind(&path).await.err().unwrap();
        assert!(matches!(err, SchedulerError::AlreadyRunning { .. }));

        drop(first);
        assert!(!path.exists());

        // A socket file left behind by a crashed process.
        let stale = std::os::unix::net::UnixListener::bind(&path).unwrap();
        drop(stale);
        assert!(path.exists());
        let _owner = ControlSocket::bind(&path).await.unwrap();
    }
}

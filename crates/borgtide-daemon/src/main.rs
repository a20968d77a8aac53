use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use borgtide_core::{BorgtideConfig, JobStatus};
use borgtide_scheduler::{ActionOutcome, Admission, ControlClient, ControlSocket, UserAction};

mod bootstrap;
mod cli;
mod logging;
mod shutdown;
mod status;

use cli::{Cli, Command};
use logging::Logging;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let logging = Logging::init();

    // config: --config / BORGTIDE_CONFIG > ~/.borgtide/borgtide.toml
    let config = BorgtideConfig::load(cli.config.as_deref()).context("loading configuration")?;
    logging.apply(&config.logging);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::CheckEnv => check_env(config).await,
        Command::List { job } => once(config, UserAction::List(job)).await,
        Command::RunNow { job } => once(config, UserAction::RunNow(job)).await,
        Command::Status => print_status(&config),
    }
}

async fn run(config: BorgtideConfig) -> anyhow::Result<ExitCode> {
    let control = ControlSocket::bind(&config.main.control_socket_path())
        .await
        .context("claiming the control socket")?;
    let orchestrator = bootstrap::orchestrator(&config)?;
    let shutdown = shutdown::listen();

    let server = tokio::spawn(control.serve(orchestrator.handle(), shutdown.clone()));
    let mirror = tokio::spawn(status::mirror(
        orchestrator.subscribe(),
        Duration::from_millis(config.main.status_poll_ms),
        config.main.status_file_path(),
        shutdown.clone(),
    ));

    info!("borgtide running");
    let outcome = orchestrator.run(shutdown).await;
    // Both tasks only stop on shutdown; an aborted orchestrator takes them down too.
    if outcome.is_err() {
        mirror.abort();
        server.abort();
    } else {
        if let Err(e) = mirror.await {
            error!(error = %e, "status mirror task failed");
        }
        if let Err(e) = server.await {
            error!(error = %e, "control socket task failed");
        }
    }

    outcome.context("scheduler stopped")?;
    Ok(ExitCode::SUCCESS)
}

async fn check_env(config: BorgtideConfig) -> anyhow::Result<ExitCode> {
    let probe = bootstrap::probe(&config)?;
    let valid = probe.refresh().await.context("evaluating environments")?;
    if valid.is_empty() {
        println!("no valid environments");
    }
    for name in valid.names() {
        println!("{name}");
    }
    Ok(ExitCode::SUCCESS)
}

/// Run a single user action, through the daemon when one is running.
async fn once(config: BorgtideConfig, action: UserAction) -> anyhow::Result<ExitCode> {
    let job = action.job().to_string();
    let socket = config.main.control_socket_path();

    let outcome = match ControlClient::connect(&socket).await? {
        Some(daemon) => {
            info!(path = %socket.display(), "handing the action to the running instance");
            daemon.request(&action).await?
        }
        None => locally(&config, &socket, action).await?,
    };
    let succeeded = report(&job, outcome)?;
    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Run `action` in this process while holding the control socket, so that a
/// daemon or another one-shot started meanwhile is turned away.
async fn locally(
    config: &BorgtideConfig,
    socket: &Path,
    action: UserAction,
) -> anyhow::Result<ActionOutcome> {
    let control = ControlSocket::bind(socket)
        .await
        .context("claiming the control socket")?;
    let mut orchestrator = bootstrap::orchestrator(config)?;
    let (stop_tx, stop_rx) = watch::channel(false);
    let server = tokio::spawn(control.serve(orchestrator.handle(), stop_rx));

    let admission = orchestrator.submit(action);
    let settled = if admission == Admission::Accepted {
        orchestrator.settle().await
    } else {
        Ok(())
    };
    stop_tx.send_replace(true);
    server.await.context("control socket task failed")?;
    settled?;

    let status = match admission {
        Admission::Accepted => orchestrator.board().user.clone(),
        _ => None,
    };
    Ok(ActionOutcome { admission, status })
}

/// Print the outcome; `Ok(false)` when the action ran but did not succeed.
fn report(job: &str, outcome: ActionOutcome) -> anyhow::Result<bool> {
    match outcome.admission {
        Admission::Accepted => {}
        Admission::UnknownJob => bail!("no usable backup section named '{job}'"),
        Admission::Busy => bail!("scheduler is busy, try again later"),
    }
    match outcome.status {
        Some(JobStatus::Ok) => {
            println!("{job}: ok");
            Ok(true)
        }
        Some(status) => {
            println!("{job}: {status}");
            Ok(false)
        }
        None => bail!("'{job}' finished without a status"),
    }
}

fn print_status(config: &BorgtideConfig) -> anyhow::Result<ExitCode> {
    let Some(path) = config.main.status_file_path() else {
        bail!("main.status_file is not configured");
    };
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    println!("{}", raw.trim_end());
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use borgtide_core::FailureReason;

    use super::*;

    fn outcome(admission: Admission, status: Option<JobStatus>) -> ActionOutcome {
        ActionOutcome { admission, status }
    }

    #[test]
    fn refused_actions_are_errors() {
        let busy = report("nas", outcome(Admission::Busy, None)).unwrap_err();
        assert!(busy.to_string().contains("busy"));
        assert!(report("nas", outcome(Admission::UnknownJob, None)).is_err());
    }

    #[test]
    fn success_follows_the_user_status() {
        assert!(report("nas", outcome(Admission::Accepted, Some(JobStatus::Ok))).unwrap());

        let failed = JobStatus::failed(FailureReason::CreateExited { code: 2 });
        assert!(!report("nas", outcome(Admission::Accepted, Some(failed))).unwrap());
        assert!(report("nas", outcome(Admission::Accepted, None)).is_err());
    }
}

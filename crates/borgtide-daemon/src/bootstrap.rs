//! Turns a loaded configuration into live scheduler parts.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use borgtide_core::BorgtideConfig;
use borgtide_probe::{EnvironmentProbe, SystemSignals};
use borgtide_runner::{BorgCli, EditorViewer};
use borgtide_scheduler::{Backend, Job, Orchestrator, Settings};

pub(crate) fn probe(config: &BorgtideConfig) -> anyhow::Result<EnvironmentProbe> {
    let signals = SystemSignals::new(
        Duration::from_millis(config.main.probe_timeout_ms),
        config.main.public_ip_url.clone(),
    )
    .context("building network probes")?;
    Ok(EnvironmentProbe::from_specs(
        &config.environment_specs(),
        Arc::new(signals),
    ))
}

pub(crate) fn jobs(config: &BorgtideConfig) -> Vec<Job> {
    let jobs: Vec<Job> = config.backup_specs().into_iter().map(Job::new).collect();
    if jobs.is_empty() {
        warn!("no usable backup sections configured");
    }
    jobs
}

pub(crate) fn orchestrator(config: &BorgtideConfig) -> anyhow::Result<Orchestrator> {
    let backend = Backend {
        probe: probe(config)?,
        tool: Arc::new(BorgCli::new(config.main.borg_binary.clone())),
        viewer: Arc::new(EditorViewer::new(config.main.graphical_editor.clone())),
    };
    let jobs = jobs(config);
    info!(
        jobs = jobs.len(),
        environments = backend.probe.environments().len(),
        "scheduler configured"
    );
    Ok(Orchestrator::new(jobs, backend, Settings::from_config(&config.main)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
        [environments.home]
        allow_other = true

        [environments.broken]
        match_ssid = "(unclosed"

        [backups.zeta]
        timestamp_file = "/tmp/zeta.ts"
        interval = 60
        host = "zeta.local"
        borg_repo = "repo"
        borg_passphrase = "pw"
        backup_directories = ["/srv"]
        borg_prune_args = []

        [backups.alpha]
        timestamp_file = "/tmp/alpha.ts"
        interval = 60
        host = "alpha.local"
        borg_repo = "repo"
        borg_passphrase = "pw"
        backup_directories = ["/home"]
        borg_prune_args = ["--keep-daily", "7"]

        [backups.incomplete]
        interval = 60
    "#;

    #[tokio::test]
    async fn broken_sections_are_left_out_and_order_is_by_name() {
        let config = BorgtideConfig::from_toml_str(CONFIG).unwrap();
        let orch = orchestrator(&config).unwrap();
        assert_eq!(orch.queues().ready, vec!["alpha", "zeta"]);

        let probe = probe(&config).unwrap();
        let names: Vec<&str> = probe.environments().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["home"]);
    }
}

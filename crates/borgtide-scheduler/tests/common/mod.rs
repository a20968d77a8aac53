#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use borgtide_core::{BackupSpec, EnvironmentSpec};
use borgtide_probe::{EnvironmentProbe, NetworkSignals, ProbeError};
use borgtide_runner::{BackupTool, CommandOutcome, ListViewer, RunnerError};
use borgtide_scheduler::{Backend, Job, Orchestrator, Settings};

/// Scriptable network state.
pub struct FakeNetwork {
    pub ssid: Mutex<Option<String>>,
    pub addresses: Mutex<Vec<String>>,
    pub down_hosts: Mutex<Vec<String>>,
    pub broken: AtomicBool,
    /// Makes every reachability check panic inside its worker.
    pub ping_panics: AtomicBool,
    pub pings: Mutex<Vec<String>>,
}

impl Default for FakeNetwork {
    fn default() -> Self {
        Self {
            ssid: Mutex::new(None),
            addresses: Mutex::new(vec!["192.168.1.20".into()]),
            down_hosts: Mutex::new(vec![]),
            broken: AtomicBool::new(false),
            ping_panics: AtomicBool::new(false),
            pings: Mutex::new(vec![]),
        }
    }
}

impl FakeNetwork {
    pub fn host_down(&self, host: &str) {
        self.down_hosts.lock().unwrap().push(host.to_string());
    }

    pub fn pinged(&self) -> Vec<String> {
        self.pings.lock().unwrap().clone()
    }
}

#[async_trait]
impl NetworkSignals for FakeNetwork {
    async fn wireless_identity(&self) -> borgtide_probe::Result<Option<String>> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(ProbeError::Infrastructure {
                signal: "wireless",
                reason: "nmcli: command not found".into(),
            });
        }
        Ok(self.ssid.lock().unwrap().clone())
    }

    async fn local_addresses(&self) -> borgtide_probe::Result<Vec<String>> {
        Ok(self.addresses.lock().unwrap().clone())
    }

    async fn global_address(&self) -> borgtide_probe::Result<Option<String>> {
        Ok(None)
    }

    async fn is_reachable(&self, host: &str) -> borgtide_probe::Result<bool> {
        self.pings.lock().unwrap().push(host.to_string());
        if self.ping_panics.load(Ordering::SeqCst) {
            panic!("ping helper crashed");
        }
        Ok(!self.down_hosts.lock().unwrap().iter().any(|h| h == host))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: &'static str,
    pub job: String,
    pub archive: String,
}

/// Records every borg call and the highest number running at once.
pub struct FakeTool {
    pub create_code: AtomicI32,
    pub prune_code: AtomicI32,
    pub list_code: AtomicI32,
    pub unspawnable: AtomicBool,
    pub delay: Duration,
    calls: Mutex<Vec<Call>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Default for FakeTool {
    fn default() -> Self {
        Self::with_delay(Duration::ZERO)
    }
}

impl FakeTool {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            create_code: AtomicI32::new(0),
            prune_code: AtomicI32::new(0),
            list_code: AtomicI32::new(0),
            unspawnable: AtomicBool::new(false),
            delay,
            calls: Mutex::new(vec![]),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn ops_for(&self, job: &str) -> Vec<&'static str> {
        self.calls()
            .into_iter()
            .filter(|c| c.job == job)
            .map(|c| c.op)
            .collect()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn call(
        &self,
        op: &'static str,
        spec: &BackupSpec,
        archive: &str,
        code: &AtomicI32,
    ) -> borgtide_runner::Result<CommandOutcome> {
        if self.unspawnable.load(Ordering::SeqCst) {
            return Err(RunnerError::Spawn {
                program: "borg".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no borg"),
            });
        }
        self.calls.lock().unwrap().push(Call {
            op,
            job: spec.name.clone(),
            archive: archive.to_string(),
        });
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(CommandOutcome {
            exit_code: code.load(Ordering::SeqCst),
            output: format!("{op} output for {}", spec.name),
        })
    }
}

#[async_trait]
impl BackupTool for FakeTool {
    async fn create(&self, spec: &BackupSpec, archive_name: &str) -> borgtide_runner::Result<CommandOutcome> {
        self.call("create", spec, archive_name, &self.create_code).await
    }

    async fn prune(&self, spec: &BackupSpec) -> borgtide_runner::Result<CommandOutcome> {
        self.call("prune", spec, "", &self.prune_code).await
    }

    async fn list(&self, spec: &BackupSpec) -> borgtide_runner::Result<CommandOutcome> {
        self.call("list", spec, "", &self.list_code).await
    }
}

#[derive(Default)]
pub struct FakeViewer {
    pub broken: AtomicBool,
    pub shown: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ListViewer for FakeViewer {
    async fn show(&self, job: &str, listing: &str) -> borgtide_runner::Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(RunnerError::NoViewer);
        }
        self.shown
            .lock()
            .unwrap()
            .push((job.to_string(), listing.to_string()));
        Ok(())
    }
}

/// Valid whenever not on wifi and some address is bound.
pub fn wired_home() -> EnvironmentSpec {
    EnvironmentSpec {
        name: "home".into(),
        ssid_pattern: ".+".into(),
        local_ip_pattern: r"192\.168\.1\..+".into(),
        global_ip_pattern: None,
        required_hosts: vec![],
        allow_wifi: false,
        allow_other: true,
    }
}

pub fn backup(dir: &Path, name: &str, allowed: &[&str]) -> BackupSpec {
    BackupSpec {
        name: name.into(),
        timestamp_file: dir.join(format!("{name}.ts")),
        interval_secs: 3600,
        host: format!("{name}.local"),
        borg_repo: format!("ssh://{name}.local/./repo"),
        borg_passphrase: "pw".into(),
        borg_rsh: "ssh".into(),
        archive_name_template: "%Y-%m-%d_%H-%M-%S".into(),
        backup_directories: vec!["/home".into()],
        create_args: vec![],
        prune_args: vec!["--keep-daily".into(), "7".into()],
        list_args: vec![],
        emit_stats: false,
        restrict_to_environments: !allowed.is_empty(),
        allowed_environments: allowed.iter().map(|s| s.to_string()).collect(),
    }
}

/// Mark a job as having just run.
pub fn ran_just_now(spec: &BackupSpec) {
    std::fs::write(&spec.timestamp_file, chrono::Utc::now().timestamp().to_string()).unwrap();
}

pub struct Rig {
    pub network: Arc<FakeNetwork>,
    pub tool: Arc<FakeTool>,
    pub viewer: Arc<FakeViewer>,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_tool(FakeTool::default())
    }

    pub fn with_tool(tool: FakeTool) -> Self {
        Self {
            network: Arc::new(FakeNetwork::default()),
            tool: Arc::new(tool),
            viewer: Arc::new(FakeViewer::default()),
        }
    }

    pub fn backend(&self, environments: &[EnvironmentSpec]) -> Backend {
        Backend {
            probe: EnvironmentProbe::from_specs(environments, self.network.clone()),
            tool: self.tool.clone(),
            viewer: self.viewer.clone(),
        }
    }

    pub fn orchestrator(&self, specs: Vec<BackupSpec>, settings: Settings) -> Orchestrator {
        Orchestrator::new(
            specs.into_iter().map(Job::new).collect(),
            self.backend(&[wired_home()]),
            settings,
        )
    }
}

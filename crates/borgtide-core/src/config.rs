use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::format::{Item, StrftimeItems};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{BorgtideError, Result};

pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_STATUS_POLL_MS: u64 = 200;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_ARCHIVE_TEMPLATE: &str = "%Y-%m-%d_%H-%M-%S";
pub const DEFAULT_PUBLIC_IP_URL: &str = "http://ip.42.pl/raw";
pub const DEFAULT_BORG_BINARY: &str = "borg";
pub const DEFAULT_BORG_RSH: &str = "ssh";
pub const DEFAULT_MATCH_ANY: &str = ".+";
pub const DEFAULT_CONTROL_SOCKET: &str = "~/.borgtide/control.sock";

/// Top-level config (borgtide.toml + BORGTIDE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BorgtideConfig {
    #[serde(default)]
    pub main: MainConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Keyed by environment name.
    #[serde(default)]
    pub environments: BTreeMap<String, RawEnvironment>,
    /// Keyed by job name. Iteration order is the initial queue order.
    #[serde(default)]
    pub backups: BTreeMap<String, RawBackup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainConfig {
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default = "default_status_poll")]
    pub status_poll_ms: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Upper bound for every individual network probe.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_borg_binary")]
    pub borg_binary: String,
    /// Command used to display `borg list` output; the temp file path is appended.
    #[serde(default = "default_editor")]
    pub graphical_editor: Vec<String>,
    #[serde(default = "default_public_ip_url")]
    pub public_ip_url: String,
    /// When set, the status board is mirrored to this file as JSON.
    pub status_file: Option<String>,
    /// Unix socket through which one-shot commands reach a running daemon.
    #[serde(default = "default_control_socket")]
    pub control_socket: String,
    #[serde(default)]
    pub on_probe_failure: ProbeFailurePolicy,
    /// Treat a failed prune as a failed run instead of logging it only.
    #[serde(default)]
    pub prune_failure_fails_job: bool,
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            status_poll_ms: DEFAULT_STATUS_POLL_MS,
            workers: DEFAULT_WORKERS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            borg_binary: default_borg_binary(),
            graphical_editor: default_editor(),
            public_ip_url: default_public_ip_url(),
            status_file: None,
            control_socket: default_control_socket(),
            on_probe_failure: ProbeFailurePolicy::default(),
            prune_failure_fails_job: false,
        }
    }
}

impl MainConfig {
    pub fn status_file_path(&self) -> Option<PathBuf> {
        self.status_file.as_deref().map(expand_home)
    }

    pub fn control_socket_path(&self) -> PathBuf {
        expand_home(&self.control_socket)
    }
}

/// What the scheduler does when the environment probe itself breaks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeFailurePolicy {
    /// Continue with an empty environment set.
    #[default]
    Degrade,
    /// Stop the scheduler.
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// An `[environments.<name>]` table as written by the user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEnvironment {
    pub match_ssid: Option<String>,
    pub match_ip_address: Option<String>,
    pub match_global_ip: Option<String>,
    #[serde(default)]
    pub ping_hosts: Vec<String>,
    #[serde(default)]
    pub allow_wifi: bool,
    #[serde(default)]
    pub allow_other: bool,
}

/// A `[backups.<name>]` table as written by the user.
///
/// Required fields are optional here so one broken section can be reported
/// and skipped without rejecting the whole file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBackup {
    pub timestamp_file: Option<String>,
    pub interval: Option<u64>,
    pub host: Option<String>,
    pub borg_repo: Option<String>,
    pub borg_passphrase: Option<String>,
    pub borg_rsh: Option<String>,
    pub archive_name_template: Option<String>,
    pub backup_directories: Option<Vec<String>>,
    pub borg_prune_args: Option<Vec<String>>,
    #[serde(default)]
    pub borg_args: Vec<String>,
    #[serde(default = "bool_true")]
    pub borg_stats: bool,
    #[serde(default)]
    pub borg_list_args: Vec<String>,
    #[serde(default)]
    pub restrict_to_environments: bool,
    #[serde(default)]
    pub allowed_environments: Vec<String>,
}

/// Validated environment definition with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSpec {
    pub name: String,
    pub ssid_pattern: String,
    pub local_ip_pattern: String,
    pub global_ip_pattern: Option<String>,
    pub required_hosts: Vec<String>,
    pub allow_wifi: bool,
    pub allow_other: bool,
}

/// Validated backup job definition with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSpec {
    pub name: String,
    pub timestamp_file: PathBuf,
    pub interval_secs: u64,
    pub host: String,
    pub borg_repo: String,
    pub borg_passphrase: String,
    pub borg_rsh: String,
    pub archive_name_template: String,
    pub backup_directories: Vec<String>,
    pub create_args: Vec<String>,
    pub prune_args: Vec<String>,
    pub list_args: Vec<String>,
    pub emit_stats: bool,
    pub restrict_to_environments: bool,
    pub allowed_environments: Vec<String>,
}

impl RawEnvironment {
    pub fn to_spec(&self, name: &str) -> EnvironmentSpec {
        EnvironmentSpec {
            name: name.to_string(),
            ssid_pattern: self
                .match_ssid
                .clone()
                .unwrap_or_else(|| DEFAULT_MATCH_ANY.to_string()),
            local_ip_pattern: self
                .match_ip_address
                .clone()
                .unwrap_or_else(|| DEFAULT_MATCH_ANY.to_string()),
            global_ip_pattern: self.match_global_ip.clone(),
            required_hosts: self.ping_hosts.clone(),
            allow_wifi: self.allow_wifi,
            allow_other: self.allow_other,
        }
    }
}

impl RawBackup {
    /// Apply defaults and check required fields.
    pub fn validate(&self, name: &str) -> Result<BackupSpec> {
        let timestamp_file = required(name, "timestamp_file", &self.timestamp_file)?;
        let interval_secs = *required(name, "interval", &self.interval)?;
        let host = required(name, "host", &self.host)?;
        let borg_repo = required(name, "borg_repo", &self.borg_repo)?;
        let borg_passphrase = required(name, "borg_passphrase", &self.borg_passphrase)?;
        let backup_directories = required(name, "backup_directories", &self.backup_directories)?;
        let prune_args = required(name, "borg_prune_args", &self.borg_prune_args)?;

        if backup_directories.is_empty() {
            return Err(BorgtideError::InvalidField {
                section: name.to_string(),
                field: "backup_directories",
                reason: "at least one directory is required".to_string(),
            });
        }

        let archive_name_template = self
            .archive_name_template
            .clone()
            .unwrap_or_else(|| DEFAULT_ARCHIVE_TEMPLATE.to_string());
        if StrftimeItems::new(&archive_name_template).any(|item| matches!(item, Item::Error)) {
            return Err(BorgtideError::InvalidField {
                section: name.to_string(),
                field: "archive_name_template",
                reason: format!("'{archive_name_template}' is not a valid strftime template"),
            });
        }

        Ok(BackupSpec {
            name: name.to_string(),
            timestamp_file: expand_home(timestamp_file),
            interval_secs,
            host: host.clone(),
            borg_repo: borg_repo.clone(),
            borg_passphrase: borg_passphrase.clone(),
            borg_rsh: self
                .borg_rsh
                .clone()
                .unwrap_or_else(|| DEFAULT_BORG_RSH.to_string()),
            archive_name_template,
            backup_directories: backup_directories.clone(),
            create_args: self.borg_args.clone(),
            prune_args: prune_args.clone(),
            list_args: self.borg_list_args.clone(),
            emit_stats: self.borg_stats,
            restrict_to_environments: self.restrict_to_environments,
            allowed_environments: self.allowed_environments.clone(),
        })
    }
}

fn required<'a, T>(section: &str, field: &'static str, value: &'a Option<T>) -> Result<&'a T> {
    value.as_ref().ok_or_else(|| BorgtideError::MissingField {
        section: section.to_string(),
        field,
    })
}

fn bool_true() -> bool {
    true
}
fn default_check_interval() -> u64 {
    DEFAULT_CHECK_INTERVAL_SECS
}
fn default_status_poll() -> u64 {
    DEFAULT_STATUS_POLL_MS
}
fn default_workers() -> usize {
    DEFAULT_WORKERS
}
fn default_probe_timeout() -> u64 {
    DEFAULT_PROBE_TIMEOUT_MS
}
fn default_borg_binary() -> String {
    DEFAULT_BORG_BINARY.to_string()
}
fn default_editor() -> Vec<String> {
    vec!["gedit".to_string()]
}
fn default_public_ip_url() -> String {
    DEFAULT_PUBLIC_IP_URL.to_string()
}
fn default_control_socket() -> String {
    DEFAULT_CONTROL_SOCKET.to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl BorgtideConfig {
    /// Load config from a TOML file with BORGTIDE_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.borgtide/borgtide.toml
    ///
    /// Nested keys use a double underscore, e.g.
    /// `BORGTIDE_MAIN__CHECK_INTERVAL_SECS=60`.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(default_config_path);

        let config: BorgtideConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("BORGTIDE_").split("__"))
            .extract()
            .map_err(|e| BorgtideError::Config(e.to_string()))?;

        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse config from an in-memory TOML document, without env overrides.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .map_err(|e| BorgtideError::Config(e.to_string()))
    }

    pub fn environment_specs(&self) -> Vec<EnvironmentSpec> {
        self.environments
            .iter()
            .map(|(name, raw)| raw.to_spec(name))
            .collect()
    }

    /// Validate every backup section, dropping (and logging) the broken ones.
    pub fn backup_specs(&self) -> Vec<BackupSpec> {
        let mut specs = Vec::with_capacity(self.backups.len());
        for (name, raw) in &self.backups {
            match raw.validate(name) {
                Ok(spec) => {
                    for env in spec
                        .allowed_environments
                        .iter()
                        .filter(|e| !self.environments.contains_key(*e))
                    {
                        warn!(backup = %name, environment = %env, "allowed environment is not defined");
                    }
                    specs.push(spec);
                }
                Err(e) => {
                    warn!(backup = %name, code = e.code(), "backup excluded: {e}");
                }
            }
        }
        specs
    }
}

pub fn default_config_path() -> PathBuf {
    home_dir().join(".borgtide").join("borgtide.toml")
}

/// Expand a leading `~/` to `$HOME`.
pub fn expand_home(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None => PathBuf::from(raw),
    }
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
}

//! The borg command line, driven through `tokio::process`.
//!
//! Repository location, passphrase and remote shell travel in the child's
//! environment so they never show up in the process list or in our logs.
//! There is no timeout; a create can take hours.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use borgtide_core::BackupSpec;

use crate::{
    error::{Result, RunnerError},
    output,
    types::{CommandOutcome, Invocation, Operation},
};

/// The external backup tool, as seen by the scheduler.
#[async_trait]
pub trait BackupTool: Send + Sync {
    /// Create a new archive named `archive_name` from the job's directories.
    async fn create(&self, spec: &BackupSpec, archive_name: &str) -> Result<CommandOutcome>;

    /// Apply the job's retention arguments.
    async fn prune(&self, spec: &BackupSpec) -> Result<CommandOutcome>;

    /// List the repository's archives.
    async fn list(&self, spec: &BackupSpec) -> Result<CommandOutcome>;
}

/// [`BackupTool`] that shells out to the `borg` binary.
pub struct BorgCli {
    binary: String,
}

impl BorgCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Build the command line for `op`. `archive_name` is only used by create.
    pub fn invocation(&self, op: Operation, spec: &BackupSpec, archive_name: &str) -> Invocation {
        let mut args = vec![op.subcommand().to_string()];
        match op {
            Operation::Create => {
                if spec.emit_stats {
                    args.push("--stats".to_string());
                }
                args.push(format!("::{archive_name}"));
                args.extend(spec.create_args.iter().cloned());
                args.extend(spec.backup_directories.iter().cloned());
            }
            Operation::Prune => {
                if spec.emit_stats {
                    args.push("--stats".to_string());
                }
                args.extend(spec.prune_args.iter().cloned());
            }
            Operation::List => args.extend(spec.list_args.iter().cloned()),
        }

        Invocation {
            program: self.binary.clone(),
            args,
            env: vec![
                ("BORG_REPO", spec.borg_repo.clone()),
                ("BORG_RSH", spec.borg_rsh.clone()),
                ("BORG_PASSPHRASE", spec.borg_passphrase.clone()),
            ],
        }
    }

    async fn run(&self, job: &str, op: Operation, inv: Invocation) -> Result<CommandOutcome> {
        info!(job, %op, "running '{}'", inv.display_line());

        let child = Command::new(&inv.program)
            .args(&inv.args)
            .envs(inv.env.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                program: inv.program.clone(),
                source,
            })?;

        let raw = child.wait_with_output().await?;
        let outcome = CommandOutcome {
            exit_code: raw.status.code().unwrap_or(-1),
            output: output::combine(&raw.stdout, &raw.stderr),
        };

        if !outcome.output.is_empty() {
            info!(
                job,
                %op,
                "borg {op} output:\n{}",
                output::excerpt(&outcome.output, output::LOG_EXCERPT_CHARS)
            );
        }
        debug!(job, %op, exit_code = outcome.exit_code, "borg finished");
        Ok(outcome)
    }
}

#[async_trait]
impl BackupTool for BorgCli {
    async fn create(&self, spec: &BackupSpec, archive_name: &str) -> Result<CommandOutcome> {
        let inv = self.invocation(Operation::Create, spec, archive_name);
        self.run(&spec.name, Operation::Create, inv).await
    }

    async fn prune(&self, spec: &BackupSpec) -> Result<CommandOutcome> {
        let inv = self.invocation(Operation::Prune, spec, "");
        self.run(&spec.name, Operation::Prune, inv).await
    }

    async fn list(&self, spec: &BackupSpec) -> Result<CommandOutcome> {
        let inv = self.invocation(Operation::List, spec, "");
        self.run(&spec.name, Operation::List, inv).await
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn spec() -> BackupSpec {
        BackupSpec {
            name: "nas".into(),
            timestamp_file: PathBuf::from("/tmp/nas.ts"),
            interval_secs: 3600,
            host: "nas.local".into(),
            borg_repo: "ssh://nas.local/./repo".into(),
            borg_passphrase: "secret".into(),
            borg_rsh: "ssh -i key".into(),
            archive_name_template: "%Y".into(),
            backup_directories: vec!["/home".into(), "/etc".into()],
            create_args: vec!["--exclude-caches".into()],
            prune_args: vec!["--keep-daily".into(), "7".into()],
            list_args: vec!["--short".into()],
            emit_stats: true,
            restrict_to_environments: false,
            allowed_environments: vec![],
        }
    }

    #[test]
    fn create_puts_archive_before_options_and_directories() {
        let inv = BorgCli::new("borg").invocation(Operation::Create, &spec(), "2024-05-01");
        assert_eq!(
            inv.args,
            vec!["create", "--stats", "::2024-05-01", "--exclude-caches", "/home", "/etc"]
        );
    }

    #[test]
    fn stats_flag_follows_config() {
        let mut s = spec();
        s.emit_stats = false;
        let inv = BorgCli::new("borg").invocation(Operation::Prune, &s, "");
        assert_eq!(inv.args, vec!["prune", "--keep-daily", "7"]);
    }

    #[test]
    fn list_never_gets_stats() {
        let inv = BorgCli::new("/usr/bin/borg").invocation(Operation::List, &spec(), "");
        assert_eq!(inv.program, "/usr/bin/borg");
        assert_eq!(inv.args, vec!["list", "--short"]);
    }

    #[test]
    fn repository_settings_travel_in_env() {
        let inv = BorgCli::new("borg").invocation(Operation::Prune, &spec(), "");
        assert!(inv.env.contains(&("BORG_REPO", "ssh://nas.local/./repo".into())));
        assert!(inv.env.contains(&("BORG_RSH", "ssh -i key".into())));
        assert!(inv.env.contains(&("BORG_PASSPHRASE", "secret".into())));
        assert!(!inv.args.iter().any(|a| a.contains("secret")));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let tool = BorgCli::new("/nonexistent/borgtide-test-borg");
        let err = tool.list(&spec()).await.unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_code_and_output_are_captured() {
        // `sh list --short` fails to open a script named "list" and exits non-zero.
        let tool = BorgCli::new("sh");
        let outcome = tool.list(&spec()).await.unwrap();
        assert!(!outcome.success());
        assert!(!outcome.output.is_empty());
    }
}

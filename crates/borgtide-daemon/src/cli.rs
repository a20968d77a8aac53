use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Network-aware borg backup scheduler.
#[derive(Parser)]
#[command(name = "borgtide")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (default: ~/.borgtide/borgtide.toml)
    #[arg(short, long, env = "BORGTIDE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    /// Run the scheduler in the foreground (default)
    Run,

    /// Evaluate every environment once and print the valid ones
    CheckEnv,

    /// Open the archive listing of a backup in the configured editor
    List {
        /// Backup section name
        job: String,
    },

    /// Back up now, ignoring the interval and environment restrictions
    RunNow {
        /// Backup section name
        job: String,
    },

    /// Print the status file written by a running scheduler
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["borgtide"]).unwrap();
        assert_eq!(cli.command, None);
    }

    #[test]
    fn subcommands_parse() {
        let cli = Cli::try_parse_from(["borgtide", "--config", "/etc/b.toml", "run-now", "nas"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/b.toml")));
        assert_eq!(cli.command, Some(Command::RunNow { job: "nas".into() }));

        let cli = Cli::try_parse_from(["borgtide", "check-env"]).unwrap();
        assert_eq!(cli.command, Some(Command::CheckEnv));
    }

    #[test]
    fn list_needs_a_job() {
        assert!(Cli::try_parse_from(["borgtide", "list"]).is_err());
    }
}

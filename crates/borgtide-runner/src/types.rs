//! Shared data types for borgtide-runner.

use std::fmt;

/// Which borg subcommand an invocation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Prune,
    List,
}

impl Operation {
    pub fn subcommand(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Prune => "prune",
            Self::List => "list",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subcommand())
    }
}

/// Result of a command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Process exit code (0 = success, -1 when killed by a signal).
    pub exit_code: i32,

    /// stdout followed by stderr, ANSI escapes stripped.
    pub output: String,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A fully resolved borg command line plus the environment it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(&'static str, String)>,
}

impl Invocation {
    /// Shell-quoted command line for logs. The environment (which carries
    /// the passphrase) is never included.
    pub fn display_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn shell_quote(token: &str) -> String {
    let plain = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if plain {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_line_quotes_only_when_needed() {
        let inv = Invocation {
            program: "borg".into(),
            args: vec!["create".into(), "::2024-01-01".into(), "/home/me/My Docs".into()],
            env: vec![("BORG_PASSPHRASE", "hunter2".into())],
        };
        let line = inv.display_line();
        assert_eq!(line, "borg create ::2024-01-01 '/home/me/My Docs'");
        assert!(!line.contains("hunter2"));
    }

    #[test]
    fn single_quotes_are_escaped() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}

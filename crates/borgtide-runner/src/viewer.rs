//! Hands `borg list` output to the user.

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::error::{Result, RunnerError};

/// Somewhere to show a repository listing.
#[async_trait]
pub trait ListViewer: Send + Sync {
    async fn show(&self, job: &str, listing: &str) -> Result<()>;
}

/// Writes the listing to a temp file and opens it with an editor command.
///
/// The editor is spawned detached and the temp file is kept, since the editor
/// may still be reading it long after we return.
pub struct EditorViewer {
    command: Vec<String>,
}

impl EditorViewer {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    pub fn write_listing(&self, job: &str, listing: &str) -> Result<PathBuf> {
        let mut file = tempfile::Builder::new()
            .prefix(&format!("borgtide-{job}-"))
            .suffix(".txt")
            .tempfile()?;
        file.write_all(listing.as_bytes())?;
        file.flush()?;
        let (_, path) = file.keep().map_err(|e| RunnerError::IoError(e.error))?;
        Ok(path)
    }
}

#[async_trait]
impl ListViewer for EditorViewer {
    async fn show(&self, job: &str, listing: &str) -> Result<()> {
        let (program, args) = self.command.split_first().ok_or(RunnerError::NoViewer)?;
        let path = self.write_listing(job, listing)?;

        Command::new(program)
            .args(args)
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                program: program.clone(),
                source,
            })?;

        info!(job, path = %path.display(), "list output handed to {program}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_is_written_verbatim() {
        let viewer = EditorViewer::new(vec!["true".into()]);
        let path = viewer.write_listing("nas", "2024-05-01 Wed\n").unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "2024-05-01 Wed\n");
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("borgtide-nas-"));
        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let viewer = EditorViewer::new(vec![]);
        assert!(matches!(
            viewer.show("nas", "x").await,
            Err(RunnerError::NoViewer)
        ));
    }

    #[tokio::test]
    async fn unknown_editor_is_a_spawn_error() {
        let viewer = EditorViewer::new(vec!["/nonexistent/borgtide-editor".into()]);
        assert!(matches!(
            viewer.show("nas", "x").await,
            Err(RunnerError::Spawn { .. })
        ));
    }
}

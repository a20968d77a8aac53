use std::path::{Path, PathBuf};

use crate::error::{Result, SchedulerError};

/// Plain-text file holding the epoch seconds of a job's last successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampFile {
    path: PathBuf,
}

impl TimestampFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when the file does not exist: the job has never run.
    pub fn read(&self) -> Result<Option<i64>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(self.io_error(source)),
        };
        content
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| SchedulerError::TimestampParse {
                path: self.path.display().to_string(),
                content,
            })
    }

    /// Replace the file content, creating parent directories as needed.
    ///
    /// Written to a sibling temp file first and renamed, so a crash never
    /// leaves a truncated timestamp behind.
    pub fn write(&self, epoch_secs: i64) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);
        std::fs::write(&staging, epoch_secs.to_string()).map_err(|e| self.io_error(e))?;
        std::fs::rename(&staging, &self.path).map_err(|e| self.io_error(e))
    }

    /// [`write`](Self::write) on the blocking thread pool, for async callers.
    pub async fn store(&self, epoch_secs: i64) -> Result<()> {
        let file = self.clone();
        tokio::task::spawn_blocking(move || file.write(epoch_secs))
            .await
            .map_err(|e| self.io_error(std::io::Error::other(e)))?
    }

    fn io_error(&self, source: std::io::Error) -> SchedulerError {
        SchedulerError::TimestampIo {
            path: self.path.display().to_string(),
            source,
        }
    }
}

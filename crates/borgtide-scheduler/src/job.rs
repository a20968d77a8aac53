use std::fmt::{Display, Write as _};

use chrono::{DateTime, TimeZone};
use tracing::warn;

use borgtide_core::{config::DEFAULT_ARCHIVE_TEMPLATE, BackupSpec};
use borgtide_probe::EnvironmentSet;

use crate::timestamp::TimestampFile;

/// A configured backup plus its persisted last-run marker.
#[derive(Debug, Clone)]
pub struct Job {
    spec: BackupSpec,
    timestamp: TimestampFile,
}

impl Job {
    pub fn new(spec: BackupSpec) -> Self {
        let timestamp = TimestampFile::new(spec.timestamp_file.clone());
        Self { spec, timestamp }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn host(&self) -> &str {
        &self.spec.host
    }

    pub fn spec(&self) -> &BackupSpec {
        &self.spec
    }

    pub fn timestamp(&self) -> &TimestampFile {
        &self.timestamp
    }

    /// Epoch seconds of the last successful run. Unreadable files count as
    /// "never run" so a broken marker triggers a backup instead of blocking one.
    pub fn last_run(&self) -> Option<i64> {
        match self.timestamp.read() {
            Ok(last) => last,
            Err(e) => {
                warn!(job = %self.name(), error = %e, "ignoring unreadable timestamp");
                None
            }
        }
    }

    pub fn is_due(&self, now: i64) -> bool {
        due_at(self.last_run(), self.spec.interval_secs, now)
    }

    pub fn is_eligible(&self, valid: &EnvironmentSet) -> bool {
        !self.spec.restrict_to_environments
            || self
                .spec
                .allowed_environments
                .iter()
                .any(|name| valid.contains(name))
    }

    /// Render the archive name template at `at`.
    pub fn archive_name<Tz>(&self, at: &DateTime<Tz>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let mut name = String::new();
        if write!(name, "{}", at.format(&self.spec.archive_name_template)).is_err() {
            warn!(job = %self.name(), "archive name template rejected, using default");
            name = at.format(DEFAULT_ARCHIVE_TEMPLATE).to_string();
        }
        name
    }
}

/// Strictly more than `interval_secs` must have passed since `last_run`.
pub fn due_at(last_run: Option<i64>, interval_secs: u64, now: i64) -> bool {
    match last_run {
        None => true,
        Some(last) => {
            let interval = i64::try_from(interval_secs).unwrap_or(i64::MAX);
            now.saturating_sub(last) > interval
        }
    }
}

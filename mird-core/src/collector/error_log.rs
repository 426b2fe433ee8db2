//! Plain-text collector error log
//!
//! Every rejected body and storage failure gets one line
//! `[YYYY-mm-dd HH:MM:SS] <message>`, independent of the tracing setup.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one line and mirrors it to tracing. Never fails.
    pub fn log(&self, message: &str) {
        self.log_at(message, Utc::now());
    }

    pub fn log_at(&self, message: &str, now: DateTime<Utc>) {
        tracing::error!("{}", message);

        let line = format!("[{}] {}\n", now.format("%Y-%m-%d %H:%M:%S"), message);
        let result = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|_| {
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?
                    .write_all(line.as_bytes())
            });

        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to write error log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_error_log_format() {
        let dir = TempDir::new().unwrap();
        let log = ErrorLog::new(dir.path().join("logs/analytics_errors.log"));

        let now = "2025-05-28T08:30:00Z".parse().unwrap();
        log.log_at("Invalid JSON received: {oops", now);
        log.log_at("Failed to write to data file", now);

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(
            content,
            "[2025-05-28 08:30:00] Invalid JSON received: {oops\n\
             [2025-05-28 08:30:00] Failed to write to data file\n"
        );
    }

    #[test]
    fn test_unwritable_log_does_not_panic() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("file"), "").unwrap();
        // parent is a regular file, so the directory cannot be created
        let log = ErrorLog::new(dir.path().join("file/errors.log"));
        log.log("still fine");
    }
}

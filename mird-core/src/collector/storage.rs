//! JSON-lines storage for received records
//!
//! Layout:
//! - `data_file`: every enriched record, one JSON object per line
//! - `data_file.<YYYY-mm-dd-HH-MM-SS>.bak`: rotated copies of `data_file`
//! - `session_dir/<sessionId>.jsonl`: raw client records of one open session
//!
//! Rotation and the main-log append run under one exclusive lock on
//! `data_file.lock`, so no writer can slip a line into a file that is being
//! renamed and two writers never both rotate. A session log is locked on
//! itself; reading it for the summary and deleting it happen under that lock.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::CollectorConfig;
use crate::error::{Error, Result};

use super::lock::{sidecar_path, FileLock};

/// Keeps only `[A-Za-z0-9_-]`.
pub fn sanitize_session_id(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Main and per-session event logs.
#[derive(Debug, Clone)]
pub struct EventLog {
    data_file: PathBuf,
    session_dir: PathBuf,
    max_file_size: u64,
}

impl EventLog {
    pub fn new(config: &CollectorConfig) -> Self {
        Self {
            data_file: config.data_file.clone(),
            session_dir: config.session_dir.clone(),
            max_file_size: config.max_file_size,
        }
    }

    pub fn data_file(&self) -> &Path {
        &self.data_file
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// Path of a session's log; `session_id` must already be sanitized.
    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.session_dir.join(format!("{session_id}.jsonl"))
    }

    /// Appends one record to a session's log under an exclusive lock.
    ///
    /// A log taken by [`take_session`](Self::take_session) while this call
    /// waited for the lock is gone; the record then starts a new log.
    pub fn append_session<T: Serialize>(&self, session_id: &str, record: &T) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.session_dir)?;
        let path = self.session_path(session_id);
        let line = json_line(record)?;

        let lock = loop {
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let lock = FileLock::on(file)?;
            if lock.file().metadata()?.nlink() > 0 {
                break lock;
            }
        };
        let mut file = lock.file();
        file.write_all(line.as_bytes())?;

        Ok(path)
    }

    /// Rotates the main log if needed, then appends one record to it.
    ///
    /// Returns the backup path when a rotation happened.
    pub fn append<T: Serialize>(&self, record: &T, now: DateTime<Utc>) -> Result<Option<PathBuf>> {
        let line = json_line(record)?;
        if let Some(parent) = self.data_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let _lock = FileLock::exclusive(&sidecar_path(&self.data_file))?;

        let rotated = self.rotate_if_needed(now)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.data_file)?;
        file.write_all(line.as_bytes())?;

        Ok(rotated)
    }

    /// Renames the main log to a timestamped backup when it exceeds the
    /// threshold. The next append recreates the file. Callers hold the lock.
    fn rotate_if_needed(&self, now: DateTime<Utc>) -> Result<Option<PathBuf>> {
        let size = match std::fs::metadata(&self.data_file) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if size <= self.max_file_size {
            return Ok(None);
        }

        let backup = self.backup_path(now);
        std::fs::rename(&self.data_file, &backup)?;
        tracing::info!(
            size,
            backup = %backup.display(),
            "Rotated analytics data file"
        );
        Ok(Some(backup))
    }

    fn backup_path(&self, now: DateTime<Utc>) -> PathBuf {
        let stamp = now.format("%Y-%m-%d-%H-%M-%S").to_string();
        let base = self.data_file.as_os_str().to_string_lossy().into_owned();

        let mut candidate = PathBuf::from(format!("{base}.{stamp}.bak"));
        let mut n = 1;
        while candidate.exists() {
            candidate = PathBuf::from(format!("{base}.{stamp}-{n}.bak"));
            n += 1;
        }
        candidate
    }

    /// Reads and deletes a session's log under its lock.
    ///
    /// Returns the non-empty lines; a missing log reads as `None`.
    pub fn take_session(&self, session_id: &str) -> Result<Option<Vec<String>>> {
        let path = self.session_path(session_id);
        let file = match OpenOptions::new().read(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let lock = FileLock::on(file)?;
        if lock.file().metadata()?.nlink() == 0 {
            // taken by someone else while we waited
            return Ok(None);
        }

        let mut content = String::new();
        let mut file = lock.file();
        file.read_to_string(&mut content)?;
        std::fs::remove_file(&path)?;

        Ok(Some(
            content
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(str::to_string)
                .collect(),
        ))
    }

    /// Rotated backups of the main log, oldest first.
    pub fn backups(&self) -> Result<Vec<PathBuf>> {
        let base = self.data_file.to_string_lossy();
        let pattern = format!("{}.*.bak", glob::Pattern::escape(&base));

        let mut backups = glob::glob(&pattern)
            .map_err(|e| Error::Storage(format!("invalid backup pattern: {}", e)))?
            .filter_map(|entry| entry.ok())
            .collect::<Vec<_>>();
        backups.sort();
        Ok(backups)
    }

    /// Current size of the main log in bytes (0 when absent).
    pub fn data_file_size(&self) -> Result<u64> {
        match std::fs::metadata(&self.data_file) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

fn json_line<T: Serialize>(record: &T) -> Result<String> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn event_log(dir: &TempDir, max_file_size: u64) -> EventLog {
        EventLog::new(&CollectorConfig {
            data_file: dir.path().join("analytics_data.json"),
            session_dir: dir.path().join("sessions"),
            max_file_size,
            ..Default::default()
        })
    }

    fn now() -> DateTime<Utc> {
        "2025-05-28T14:03:09Z".parse().unwrap()
    }

    #[test]
    fn test_sanitize_session_id() {
        assert_eq!(sanitize_session_id("abc 123!"), "abc123");
        assert_eq!(sanitize_session_id("../../etc/passwd"), "etcpasswd");
        assert_eq!(
            sanitize_session_id("3f2b9c1e-7d4a-4e8b-9a61-0c5d2e8f4b7a"),
            "3f2b9c1e-7d4a-4e8b-9a61-0c5d2e8f4b7a"
        );
        assert_eq!(sanitize_session_id("!!!"), "");
    }

    #[test]
    fn test_append_writes_json_lines() {
        let dir = TempDir::new().unwrap();
        let log = event_log(&dir, 1024 * 1024);

        log.append(&json!({"n": 1}), now()).unwrap();
        log.append(&json!({"n": 2}), now()).unwrap();

        let content = std::fs::read_to_string(log.data_file()).unwrap();
        assert_eq!(content, "{\"n\":1}\n{\"n\":2}\n");
        assert!(!log.session_dir().exists());
    }

    #[test]
    fn test_rotation_happens_once_before_next_append() {
        let dir = TempDir::new().unwrap();
        let log = event_log(&dir, 16);

        std::fs::write(log.data_file(), "x".repeat(17)).unwrap();

        let rotated = log.append(&json!({"n": 1}), now()).unwrap();
        let backup = rotated.expect("oversized file should rotate");
        assert_eq!(
            backup,
            dir.path()
                .join("analytics_data.json.2025-05-28-14-03-09.bak")
        );
        assert_eq!(std::fs::read_to_string(&backup).unwrap(), "x".repeat(17));
        assert_eq!(
            std::fs::read_to_string(log.data_file()).unwrap(),
            "{\"n\":1}\n"
        );

        // fresh file is under the threshold again
        assert!(log.append(&json!({"n": 2}), now()).unwrap().is_none());
        assert_eq!(log.backups().unwrap(), vec![backup]);
    }

    #[test]
    fn test_file_at_threshold_is_not_rotated() {
        let dir = TempDir::new().unwrap();
        let log = event_log(&dir, 16);
        std::fs::write(log.data_file(), "x".repeat(16)).unwrap();

        assert!(log.append(&json!({}), now()).unwrap().is_none());
        assert!(log.backups().unwrap().is_empty());
    }

    #[test]
    fn test_backup_names_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let log = event_log(&dir, 1);

        std::fs::write(log.data_file(), "xx").unwrap();
        let first = log.append(&json!({"n": 1}), now()).unwrap().unwrap();
        let second = log.append(&json!({"n": 2}), now()).unwrap().unwrap();

        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("2025-05-28-14-03-09-1.bak"));
        assert_eq!(log.backups().unwrap().len(), 2);
    }

    #[test]
    fn test_session_log_roundtrip() {
        let dir = TempDir::new().unwrap();
        let log = event_log(&dir, 1024);

        assert!(log.take_session("abc123").unwrap().is_none());

        let path = log.append_session("abc123", &json!({"type": "pageview"})).unwrap();
        log.append_session("abc123", &json!({"type": "event"})).unwrap();
        assert_eq!(path, dir.path().join("sessions/abc123.jsonl"));

        let lines = log.take_session("abc123").unwrap().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(!path.exists());
        assert!(log.take_session("abc123").unwrap().is_none());

        log.append_session("abc123", &json!({"type": "event"})).unwrap();
        assert_eq!(log.take_session("abc123").unwrap().unwrap().len(), 1);
    }

    #[test]
    fn test_take_session_never_loses_concurrent_appends() {
        let dir = TempDir::new().unwrap();
        let log = event_log(&dir, 1024);

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for n in 0..100 {
                        log.append_session("abc123", &json!({"t": t, "n": n})).unwrap();
                    }
                })
            })
            .collect();

        let mut taken = 0;
        while !writers.iter().all(|w| w.is_finished()) {
            if let Some(lines) = log.take_session("abc123").unwrap() {
                taken += lines.len();
            }
        }
        for writer in writers {
            writer.join().unwrap();
        }
        if let Some(lines) = log.take_session("abc123").unwrap() {
            taken += lines.len();
        }

        assert_eq!(taken, 400);
    }

    #[test]
    fn test_concurrent_appends_keep_whole_lines() {
        let dir = TempDir::new().unwrap();
        let log = event_log(&dir, 2048);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for n in 0..50 {
                        log.append(&json!({"t": t, "n": n, "pad": "y".repeat(40)}), Utc::now())
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut lines = 0;
        for path in log.backups().unwrap().into_iter().chain([log.data_file().to_path_buf()]) {
            for line in std::fs::read_to_string(path).unwrap().lines() {
                serde_json::from_str::<serde_json::Value>(line).unwrap();
                lines += 1;
            }
        }
        assert_eq!(lines, 400);
    }
}

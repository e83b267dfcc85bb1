//! Compaction event log (C8): an append-only JSON Lines file recording
//! every preemptive-summarization and compaction decision the
//! orchestrator makes. The log file is the only state this crate
//! persists to disk.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use jiff::{Zoned, tz::TimeZone};
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::{CompactorError, Result};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// The ten event kinds this crate ever writes. Carried as a string in
/// the `event` field rather than a `#[serde(tag)]` enum so a line's
/// shape stays `{event, timestamp, session_id, model, ...fields}`
/// rather than nesting the per-event payload under a variant key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    LoggerInitialized,
    SessionConfig,
    PreemptiveTrigger,
    PreemptiveComplete,
    PreemptiveSkip,
    PreemptiveError,
    CompactionDetected,
    CompactionApplied,
    CompactionFallback,
    CompactionError,
}

impl EventKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::LoggerInitialized => "logger_initialized",
            Self::SessionConfig => "session_config",
            Self::PreemptiveTrigger => "preemptive_trigger",
            Self::PreemptiveComplete => "preemptive_complete",
            Self::PreemptiveSkip => "preemptive_skip",
            Self::PreemptiveError => "preemptive_error",
            Self::CompactionDetected => "compaction_detected",
            Self::CompactionApplied => "compaction_applied",
            Self::CompactionFallback => "compaction_fallback",
            Self::CompactionError => "compaction_error",
        }
    }
}

/// Append-only writer for the compaction event log. Every write is
/// synchronous on the caller and serialized by a mutex; there is no
/// background flush loop.
pub struct EventLog {
    file: Mutex<File>,
}

impl EventLog {
    /// Opens (creating if needed) the log file at `path`, ensuring its
    /// parent directory exists with mode `0750` and the file itself is
    /// `0600`. Idempotent: reopening an existing file just appends.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
            set_permissions(parent, 0o750)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        set_permissions(path, 0o600)?;

        let log = Self { file: Mutex::new(file) };
        log.write(EventKind::LoggerInitialized, None, None, json!({"path": path_to_string(path)}))?;
        Ok(log)
    }

    /// Writes one line. `fields` is merged into the record alongside
    /// the standard `event`/`timestamp`/`session_id`/`model` keys.
    pub fn write(&self, kind: EventKind, session_id: Option<&str>, model: Option<&str>, fields: Value) -> Result<()> {
        let timestamp = Zoned::now().with_time_zone(TimeZone::UTC).strftime("%Y-%m-%dT%H:%M:%S%.9fZ").to_string();

        let mut record = json!({
            "event": kind.as_str(),
            "timestamp": timestamp,
            "session_id": session_id,
            "model": model,
        });

        if let (Value::Object(record_map), Value::Object(field_map)) = (&mut record, fields) {
            record_map.extend(field_map);
        }

        let mut line = serde_json::to_vec(&record).map_err(|e| CompactorError::EventLog(std::io::Error::other(e)))?;
        line.push(b'\n');

        let mut file = self.file.lock().unwrap();
        file.write_all(&line)?;
        Ok(())
    }

    /// Convenience wrapper for events carrying a typed payload instead
    /// of a raw [`Value`].
    pub fn write_typed<T: Serialize>(&self, kind: EventKind, session_id: Option<&str>, model: Option<&str>, fields: &T) -> Result<()> {
        let value = serde_json::to_value(fields).map_err(|e| CompactorError::EventLog(std::io::Error::other(e)))?;
        self.write(kind, session_id, model, value)
    }
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(mode);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};

    #[test]
    fn open_creates_parent_dir_and_writes_init_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("compaction.jsonl");

        let log = EventLog::open(&path).unwrap();
        log.write(EventKind::PreemptiveTrigger, Some("sess-1"), Some("claude-opus-4"), json!({"usage_percent": 80.0})).unwrap();

        let lines: Vec<Value> = BufReader::new(File::open(&path).unwrap())
            .lines()
            .map(|l| serde_json::from_str(&l.unwrap()).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "logger_initialized");
        assert_eq!(lines[1]["event"], "preemptive_trigger");
        assert_eq!(lines[1]["session_id"], "sess-1");
        assert_eq!(lines[1]["usage_percent"], 80.0);
    }

    #[cfg(unix)]
    #[test]
    fn sets_restrictive_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compaction.jsonl");
        EventLog::open(&path).unwrap();

        let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);

        let dir_mode = fs::metadata(dir.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o750);
    }

    #[test]
    fn reopening_an_existing_log_appends_rather_than_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compaction.jsonl");

        EventLog::open(&path).unwrap();
        EventLog::open(&path).unwrap();

        let line_count = BufReader::new(File::open(&path).unwrap()).lines().count();
        assert_eq!(line_count, 2);
    }
}

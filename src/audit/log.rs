//! Per-run audit trail.
//!
//! One append-only JSON-lines file per (target, run) pair plus an in-memory
//! mirror of the redacted messages, which is what a run returns to its
//! caller. Messages and metadata are redacted before they are written
//! anywhere, including the operational `tracing` stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::redactor::{redact, redact_value};
use crate::types::{Result, RunId, TargetId};

/// Severity of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One persisted audit line. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "level")]
    pub severity: Severity,
    #[serde(rename = "agent_run_id")]
    pub run_id: RunId,
    #[serde(rename = "expediente_id")]
    pub target_id: TargetId,
    #[serde(rename = "mensaje")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

// =============================================================================
// Store
// =============================================================================

/// Factory for per-run audit logs rooted at one directory.
#[derive(Debug, Clone)]
pub struct AuditStore {
    log_dir: PathBuf,
}

impl AuditStore {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// File backing the audit trail of one run.
    pub fn path_for(&self, target_id: &TargetId, run_id: &RunId) -> PathBuf {
        self.log_dir
            .join(safe_component(target_id.as_str()))
            .join(format!("{}.log", safe_component(run_id.as_str())))
    }

    /// Open the audit log for a run. Nothing touches the disk until the
    /// first entry is written.
    pub fn open(&self, target_id: &TargetId, run_id: &RunId) -> AuditLog {
        AuditLog {
            path: self.path_for(target_id, run_id),
            target_id: target_id.clone(),
            run_id: run_id.clone(),
            entries: Vec::new(),
            write_failures: 0,
        }
    }

    /// Read back a persisted trail.
    pub fn read(&self, target_id: &TargetId, run_id: &RunId) -> Result<Vec<LogEntry>> {
        let raw = fs::read_to_string(self.path_for(target_id, run_id))?;
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(Into::into))
            .collect()
    }
}

/// Keep ids from escaping the log directory.
fn safe_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.chars().all(|c| c == '.') {
        cleaned.replace('.', "_")
    } else {
        cleaned
    }
}

// =============================================================================
// Log
// =============================================================================

/// Audit log of a single run. Owned by exactly one orchestration.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    target_id: TargetId,
    run_id: RunId,
    entries: Vec<LogEntry>,
    write_failures: usize,
}

impl AuditLog {
    /// INFO entry without metadata. See [`AuditLog::record`] for the
    /// general form.
    pub fn log(&mut self, message: impl AsRef<str>) {
        self.info(message, None);
    }

    pub fn info(&mut self, message: impl AsRef<str>, metadata: Option<Value>) {
        self.record(Severity::Info, message.as_ref(), metadata);
    }

    pub fn warning(&mut self, message: impl AsRef<str>, metadata: Option<Value>) {
        self.record(Severity::Warning, message.as_ref(), metadata);
    }

    pub fn error(&mut self, message: impl AsRef<str>, metadata: Option<Value>) {
        self.record(Severity::Error, message.as_ref(), metadata);
    }

    /// Redact, persist and mirror one entry. General entry point behind
    /// `log`, `info`, `warning` and `error`.
    ///
    /// A failing disk write is reported through `tracing` and counted; the
    /// entry is still kept in memory so the run result stays complete.
    pub fn record(&mut self, severity: Severity, message: &str, metadata: Option<Value>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            severity,
            run_id: self.run_id.clone(),
            target_id: self.target_id.clone(),
            message: redact(message),
            metadata: metadata.as_ref().map(redact_value),
        };

        match severity {
            Severity::Info => tracing::info!(
                run_id = %self.run_id, target_id = %self.target_id, "{}", entry.message
            ),
            Severity::Warning => tracing::warn!(
                run_id = %self.run_id, target_id = %self.target_id, "{}", entry.message
            ),
            Severity::Error => tracing::error!(
                run_id = %self.run_id, target_id = %self.target_id, "{}", entry.message
            ),
        }

        if let Err(e) = self.append(&entry) {
            self.write_failures += 1;
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "audit_write_failed"
            );
        }

        self.entries.push(entry);
    }

    fn append(&self, entry: &LogEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Redacted messages in write order.
    pub fn entries(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }

    /// Full redacted records in write order.
    pub fn records(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn target_id(&self) -> &TargetId {
        &self.target_id
    }

    /// Number of entries that could not be persisted.
    pub fn write_failures(&self) -> usize {
        self.write_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracing_test::traced_test;

    fn ids() -> (TargetId, RunId) {
        (
            TargetId::from_string("EXP-2024-001".into()).unwrap(),
            RunId::from_string("RUN-1".into()).unwrap(),
        )
    }

    #[test]
    fn test_open_does_not_touch_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditStore::new(dir.path().join("runs"));
        let (target, run) = ids();
        let log = store.open(&target, &run);
        assert!(!log.path().exists());
        assert!(!dir.path().join("runs").exists());
    }

    #[test]
    fn test_first_write_creates_storage() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditStore::new(dir.path().join("runs"));
        let (target, run) = ids();
        let mut log = store.open(&target, &run);

        log.log("starting");

        assert!(log.path().exists());
        assert_eq!(
            log.path(),
            dir.path().join("runs").join("EXP-2024-001").join("RUN-1.log")
        );
    }

    #[test]
    fn test_persisted_line_is_redacted() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditStore::new(dir.path());
        let (target, run) = ids();
        let mut log = store.open(&target, &run);

        log.log("id 12345678A");

        let raw = fs::read_to_string(log.path()).unwrap();
        assert!(raw.contains("[DNI-REDACTED]"));
        assert!(!raw.contains("12345678A"));
        assert_eq!(log.entries(), vec!["id [DNI-REDACTED]".to_string()]);
    }

    #[test]
    fn test_metadata_redacted() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditStore::new(dir.path());
        let (target, run) = ids();
        let mut log = store.open(&target, &run);

        log.warning(
            "contact",
            Some(json!({"email": "juan@example.com", "attempt": 2})),
        );

        let persisted = store.read(&target, &run).unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].severity, Severity::Warning);
        let metadata = persisted[0].metadata.as_ref().unwrap();
        assert_eq!(metadata["email"], "[EMAIL-REDACTED]");
        assert_eq!(metadata["attempt"], 2);
    }

    #[test]
    fn test_info_entry_keeps_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditStore::new(dir.path());
        let (target, run) = ids();
        let mut log = store.open(&target, &run);

        log.info("routing loaded", Some(json!({"servers": 2})));
        log.record(Severity::Info, "plain", None);

        let persisted = store.read(&target, &run).unwrap();
        assert_eq!(persisted[0].severity, Severity::Info);
        assert_eq!(persisted[0].metadata, Some(json!({"servers": 2})));
        assert_eq!(persisted[1].metadata, None);
    }

    #[test]
    fn test_entries_are_append_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditStore::new(dir.path());
        let (target, run) = ids();
        let mut log = store.open(&target, &run);

        log.log("one");
        log.error("two", None);
        log.log("three");

        assert_eq!(log.entries(), vec!["one", "two", "three"]);
        let persisted = store.read(&target, &run).unwrap();
        let messages: Vec<&str> = persisted.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["one", "two", "three"]);
        assert_eq!(persisted[1].severity, Severity::Error);
    }

    #[test]
    fn test_wire_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditStore::new(dir.path());
        let (target, run) = ids();
        let mut log = store.open(&target, &run);
        log.log("hello");

        let raw = fs::read_to_string(log.path()).unwrap();
        let value: Value = serde_json::from_str(raw.trim()).unwrap();
        assert_eq!(value["level"], "INFO");
        assert_eq!(value["agent_run_id"], "RUN-1");
        assert_eq!(value["expediente_id"], "EXP-2024-001");
        assert_eq!(value["mensaje"], "hello");
        assert!(value.get("metadata").is_none());
    }

    #[test]
    fn test_runs_do_not_share_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditStore::new(dir.path());
        let target = TargetId::from_string("EXP-1".into()).unwrap();
        let run_a = RunId::from_string("RUN-A".into()).unwrap();
        let run_b = RunId::from_string("RUN-B".into()).unwrap();

        let mut a = store.open(&target, &run_a);
        let mut b = store.open(&target, &run_b);
        a.log("from a");
        b.log("from b");

        assert_ne!(a.path(), b.path());
        assert_eq!(store.read(&target, &run_a).unwrap().len(), 1);
        assert_eq!(store.read(&target, &run_b).unwrap().len(), 1);
    }

    #[test]
    fn test_path_traversal_neutralised() {
        let store = AuditStore::new("/var/log/agentix");
        let target = TargetId::from_string("../../etc".into()).unwrap();
        let run = RunId::from_string("x/y".into()).unwrap();
        let path = store.path_for(&target, &run);
        assert!(path.starts_with("/var/log/agentix"));
        assert_eq!(path.file_name().unwrap(), "x_y.log");
    }

    #[test]
    #[traced_test]
    fn test_write_failure_keeps_memory_copy() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the target directory should be.
        let blocker = dir.path().join("EXP-2024-001");
        fs::write(&blocker, b"not a dir").unwrap();

        let store = AuditStore::new(dir.path());
        let (target, run) = ids();
        let mut log = store.open(&target, &run);
        log.log("still recorded");

        assert_eq!(log.write_failures(), 1);
        assert_eq!(log.entries(), vec!["still recorded"]);
        assert!(logs_contain("audit_write_failed"));
    }
}

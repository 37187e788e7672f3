//! Audit trail with personal-data redaction.
//!
//! - [`redactor`]: pattern-based PII substitution, never fails towards callers
//! - [`log`]: per-run JSON-lines trail, one file per (target, run)

pub mod log;
pub mod redactor;

pub use log::{AuditLog, AuditStore, LogEntry, Severity};
pub use redactor::{redact, redact_bytes, redact_opt, redact_value, redact_value_text};

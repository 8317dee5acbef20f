//! Error log shared by the operations of a client.
//!
//! Every failed operation appends one record. The log is append-only and
//! unbounded; cloning an [`ErrorLog`] yields another handle to the same
//! records, so one log can be injected into several clients.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

use photodrive_common::Error;

/// Marker that opens every failure report.
pub const FAILURE_MARKER: &str = "error";

/// One recorded failure.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    /// When the failure was recorded.
    pub at: DateTime<Utc>,
    /// Client operation that failed (e.g. "list_files").
    pub operation: &'static str,
    /// Error variant label, see [`Error::kind`].
    pub kind: &'static str,
    /// Display form of the error.
    pub message: String,
    /// Full failure report including the cause chain.
    pub report: String,
}

/// Append-only, thread-safe error log.
#[derive(Debug, Clone, Default)]
pub struct ErrorLog {
    entries: Arc<Mutex<Vec<ErrorRecord>>>,
}

impl ErrorLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a failure of `operation`.
    pub fn record(&self, operation: &'static str, err: &Error) {
        warn!("{} failed: {}", operation, err);

        let record = ErrorRecord {
            at: Utc::now(),
            operation,
            kind: err.kind(),
            message: err.to_string(),
            report: failure_report(err),
        };
        self.lock().push(record);
    }

    /// Number of recorded failures.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of all records in insertion order.
    pub fn entries(&self) -> Vec<ErrorRecord> {
        self.lock().clone()
    }

    /// Most recent record, if any.
    pub fn last(&self) -> Option<ErrorRecord> {
        self.lock().last().cloned()
    }

    // A panic while holding the lock cannot leave a half-written Vec behind,
    // so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, Vec<ErrorRecord>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Render an error as `"error\n<message>\n<cause chain>"`.
///
/// The cause chain lists every `source()` below the error, one per line.
pub fn failure_report(err: &(dyn std::error::Error + 'static)) -> String {
    let mut report = format!("{}\n{}\n", FAILURE_MARKER, err);

    let mut source = err.source();
    while let Some(cause) = source {
        report.push_str("caused by: ");
        report.push_str(&cause.to_string());
        report.push('\n');
        source = cause.source();
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_record_appends_in_order() {
        let log = ErrorLog::new();
        assert!(log.is_empty());

        log.record("list_files", &Error::Network("connection reset".to_string()));
        log.record(
            "create_directory",
            &Error::PermissionDenied("Access denied".to_string()),
        );

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].operation, "list_files");
        assert_eq!(entries[0].kind, "network");
        assert_eq!(entries[1].operation, "create_directory");
        assert_eq!(log.last().unwrap().kind, "permission_denied");
    }

    #[test]
    fn test_clones_share_records() {
        let log = ErrorLog::new();
        let other = log.clone();

        other.record("upload_file", &Error::Network("timeout".to_string()));

        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_failure_report_format() {
        let err = Error::Api {
            status: 500,
            message: "backend error".to_string(),
        };
        let report = failure_report(&err);

        assert!(report.starts_with("error\n"));
        assert_eq!(report, "error\nAPI error (500): backend error\n");
    }

    #[test]
    fn test_failure_report_includes_causes() {
        let err = Error::Io(io::Error::new(io::ErrorKind::Other, "disk gone"));
        let report = failure_report(&err);

        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines[0], FAILURE_MARKER);
        assert_eq!(lines[1], "I/O error: disk gone");
        assert_eq!(lines[2], "caused by: disk gone");
    }

    #[test]
    fn test_concurrent_recording() {
        let log = ErrorLog::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        log.record("upload_files", &Error::Network("flaky".to_string()));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(log.len(), 200);
    }
}

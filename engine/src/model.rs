//! Core data model for import jobs.
//!
//! This module defines the data structures shared by the controller, its
//! workers and its observers:
//! - SourceHandle: the opaque identifier of the data being imported
//! - JobSnapshot: a read-only copy of the current (or last) job
//! - JobOutcome: how a job terminated

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ControllerError;

/// Identifies the data source of an import job.
///
/// A handle is either a plain filesystem path or a `file://` URI.
/// It is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SourceHandle(String);

impl SourceHandle {
    /// Parse a handle, rejecting empty or whitespace-only input.
    pub fn parse(raw: &str) -> Result<Self, ControllerError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ControllerError::InvalidArgument {
                reason: "source handle is empty",
            });
        }
        Ok(SourceHandle(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short human-readable name derived from the handle.
    ///
    /// This is the last path segment with any query string or fragment
    /// removed, e.g. `file:///sdcard/dict1.txt?x=1` becomes `dict1.txt`.
    /// Falls back to the whole handle when no segment is left.
    pub fn display_name(&self) -> &str {
        let end = self.0.find(['?', '#']).unwrap_or(self.0.len());
        let without_query = self.0[..end].trim_end_matches(['/', '\\']);
        let name = match without_query.rfind(['/', '\\']) {
            Some(idx) => &without_query[idx + 1..],
            None => without_query,
        };

        if name.is_empty() {
            &self.0
        } else {
            name
        }
    }

    /// Filesystem path view of the handle, with any `file://` scheme removed.
    pub fn to_path(&self) -> PathBuf {
        let raw = self.0.strip_prefix("file://").unwrap_or(&self.0);
        PathBuf::from(raw)
    }
}

impl fmt::Display for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How an import job terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    /// The worker ran to the end of its source
    Completed,
    /// The worker stopped after observing an abort request
    Cancelled,
    /// The worker returned an error or panicked
    Failed { error: String },
}

impl JobOutcome {
    /// Returns true only for a job that ran to completion.
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Completed)
    }

    /// Convert a failed outcome into a `ControllerError::WorkerFailure`.
    ///
    /// Cancellation is not an error.
    pub fn into_result(self) -> Result<(), ControllerError> {
        match self {
            JobOutcome::Completed | JobOutcome::Cancelled => Ok(()),
            JobOutcome::Failed { error } => Err(ControllerError::WorkerFailure(error)),
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Completed => write!(f, "completed"),
            JobOutcome::Cancelled => write!(f, "cancelled"),
            JobOutcome::Failed { error } => write!(f, "failed ({})", error),
        }
    }
}

/// Read-only view of the current or most recent import job.
///
/// `source` and `item_count` survive the end of a job so that a background
/// indicator can still describe it; both are reset when the next job starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    /// Identifier of the job, None until a job has been started
    pub id: Option<Uuid>,

    /// Data source of the job
    pub source: Option<SourceHandle>,

    /// Number of items the worker announced, 0 until it reports a total
    pub item_count: u64,

    /// True from acceptance of the start request until termination is relayed
    pub running: bool,

    /// When the job was accepted
    pub started_at: Option<DateTime<Utc>>,

    /// When the job's termination was relayed
    pub finished_at: Option<DateTime<Utc>>,

    /// Outcome of the last finished job
    pub last_outcome: Option<JobOutcome>,
}

impl JobSnapshot {
    /// Fresh state for a job that has just been accepted.
    pub(crate) fn started(id: Uuid, source: SourceHandle) -> Self {
        JobSnapshot {
            id: Some(id),
            source: Some(source),
            item_count: 0,
            running: true,
            started_at: Some(Utc::now()),
            finished_at: None,
            last_outcome: None,
        }
    }

    /// Returns true once any job has been started on this controller.
    pub fn has_started(&self) -> bool {
        self.source.is_some()
    }

    /// Label used for the background indicator.
    pub fn label(&self) -> Option<&str> {
        self.source.as_ref().map(SourceHandle::display_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_empty_handles() {
        assert!(matches!(
            SourceHandle::parse(""),
            Err(ControllerError::InvalidArgument { .. })
        ));
        assert!(matches!(
            SourceHandle::parse("   "),
            Err(ControllerError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_display_name_from_plain_name() {
        let handle = SourceHandle::parse("dict1").expect("valid handle");
        assert_eq!(handle.display_name(), "dict1");
    }

    #[test]
    fn test_display_name_strips_directories_and_query() {
        let handle =
            SourceHandle::parse("file:///sdcard/dicts/oxford.txt?mode=r#top").expect("valid handle");
        assert_eq!(handle.display_name(), "oxford.txt");

        let handle = SourceHandle::parse("C:\\dicts\\cedict.tsv").expect("valid handle");
        assert_eq!(handle.display_name(), "cedict.tsv");

        let handle = SourceHandle::parse("content://downloads/dict2/").expect("valid handle");
        assert_eq!(handle.display_name(), "dict2");
    }

    #[test]
    fn test_to_path_drops_file_scheme() {
        let handle = SourceHandle::parse("file:///tmp/dict.txt").expect("valid handle");
        assert_eq!(handle.to_path(), PathBuf::from("/tmp/dict.txt"));

        let handle = SourceHandle::parse("relative/dict.txt").expect("valid handle");
        assert_eq!(handle.to_path(), PathBuf::from("relative/dict.txt"));
    }

    #[test]
    fn test_started_snapshot_is_running_with_zero_items() {
        let handle = SourceHandle::parse("dict1").expect("valid handle");
        let id = Uuid::new_v4();
        let snapshot = JobSnapshot::started(id, handle.clone());
        assert!(snapshot.running);
        assert_eq!(snapshot.id, Some(id));
        assert_eq!(snapshot.item_count, 0);
        assert_eq!(snapshot.source, Some(handle));
        assert_eq!(snapshot.label(), Some("dict1"));
    }

    #[test]
    fn test_default_snapshot_has_not_started() {
        let snapshot = JobSnapshot::default();
        assert!(!snapshot.has_started());
        assert!(!snapshot.running);
        assert_eq!(snapshot.label(), None);
    }

    #[test]
    fn test_failed_outcome_maps_to_worker_failure() {
        let outcome = JobOutcome::Failed {
            error: "disk on fire".to_string(),
        };
        assert!(!outcome.is_success());
        match outcome.into_result() {
            Err(ControllerError::WorkerFailure(msg)) => assert_eq!(msg, "disk on fire"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(JobOutcome::Cancelled.into_result().is_ok());
    }
}

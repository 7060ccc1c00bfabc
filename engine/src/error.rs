//! Error types for the import engine.
//!
//! `ControllerError` is returned synchronously by `JobController` operations.
//! Worker failures never surface as a controller error while a job runs; they
//! are recorded in the job's `JobOutcome` and only converted into
//! `ControllerError::WorkerFailure` when a host asks for it.

use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::SourceHandle;

/// Error type produced by an `ImportWorker` run.
///
/// Workers are external collaborators and may fail with anything.
pub type WorkerError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors reported by the job controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The source handle was empty or otherwise unusable
    #[error("invalid source handle: {reason}")]
    InvalidArgument { reason: &'static str },

    /// An abort was requested while no job was running
    #[error("no import job is running")]
    NoActiveJob,

    /// A start was requested while another job was still running
    #[error("an import of '{current}' is already running")]
    JobAlreadyRunning { current: SourceHandle },

    /// The worker's run returned an error or panicked
    #[error("import worker failed: {0}")]
    WorkerFailure(String),

    /// The worker thread could not be spawned
    #[error("failed to spawn import worker thread")]
    Spawn(#[source] io::Error),
}

/// Errors raised by the dictionary file worker.
#[derive(Debug, Error)]
pub enum ImportError {
    /// The dictionary file could not be opened
    #[error("failed to open dictionary {}", .path.display())]
    Open { path: PathBuf, source: io::Error },

    /// Reading the dictionary file failed part way through
    #[error("failed to read dictionary {}", .path.display())]
    Read { path: PathBuf, source: io::Error },
}

impl ImportError {
    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Open { source, .. } | Self::Read { source, .. } => source.raw_os_error(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_running_names_current_source() {
        let current = SourceHandle::parse("/data/dict1.txt").expect("valid handle");
        let err = ControllerError::JobAlreadyRunning { current };
        assert_eq!(err.to_string(), "an import of '/data/dict1.txt' is already running");
    }

    #[test]
    fn test_import_error_keeps_io_source() {
        let err = ImportError::Open {
            path: PathBuf::from("missing.txt"),
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("missing.txt"));
    }
}

//! # Import Engine - Background Import Job Controller
//!
//! Runs one long import job at a time on a worker thread and broadcasts its
//! progress to whoever is watching. When nobody is watching, a standing
//! background observer takes over so progress is never lost.
//!
//! ## Overview
//!
//! - A single job slot: starting while a job runs is rejected
//! - Progress, totals and completion relayed in order to every observer
//! - Automatic hand-off between interactive observers and a background one
//! - Cooperative cancellation through a per-job token
//! - Worker errors and panics turned into a job outcome, never a crash
//!
//! ## Basic Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use engine::{DictFileWorker, JobController, MemoryStore};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let worker = DictFileWorker::new(MemoryStore::new());
//! let controller = JobController::builder(Arc::new(worker)).build()?;
//!
//! controller.start_import("/data/dict1.txt")?;
//! controller.wait();
//!
//! println!("{:?}", controller.current_job().last_outcome);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Job snapshot, source handle and outcome types
//! - **error**: Error types
//! - **progress**: Observer and sink traits
//! - **cancel**: Cancellation token
//! - **registry**: Observer registry and background substitution
//! - **worker**: Worker contract and the dictionary file worker
//! - **job**: The job controller

pub mod cancel;
pub mod error;
pub mod job;
pub mod model;
pub mod progress;
pub mod registry;
pub mod worker;

// Re-export main types
pub use cancel::CancellationToken;
pub use error::{ControllerError, ImportError, WorkerError};
pub use job::{JobController, JobControllerBuilder, JobHost};
pub use model::{JobOutcome, JobSnapshot, SourceHandle};
pub use progress::{BackgroundObserver, BackgroundRef, ImportObserver, ObserverRef, ProgressSink};
pub use registry::{ObserverRegistry, Recipient, RegistryMode};
pub use worker::{DictEntry, DictFileWorker, EntryStore, ImportWorker, MemoryStore};

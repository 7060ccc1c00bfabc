//! Progress reporting traits.
//!
//! This module defines the traits that decouple the import controller from
//! whatever shows progress to a user (a terminal, a window, a notification):
//! - ImportObserver: anything that wants to follow a job
//! - BackgroundObserver: the standing indicator used when nobody else watches
//! - ProgressSink: what a worker reports into
//!
//! Observer methods are called synchronously on the controller's dispatcher
//! thread, in registration order. They should hand work off quickly rather
//! than render slowly.

use std::sync::Arc;

use crate::model::JobOutcome;

/// Trait for receiving progress updates from an import job.
pub trait ImportObserver: Send + Sync {
    /// Called each time the worker reports how many items it has processed.
    fn on_progress(&self, current: u64);

    /// Called when the worker announces the total number of items.
    fn on_total(&self, total: u64);

    /// Called once when the job terminates, whatever the outcome.
    fn on_complete(&self);

    /// Called once when the job terminates.
    ///
    /// The default ignores the outcome and calls `on_complete`, so a failed
    /// or cancelled job looks the same as a finished one. Override this to
    /// tell them apart.
    fn on_finished(&self, outcome: &JobOutcome) {
        let _ = outcome;
        self.on_complete();
    }
}

/// The observer that takes over when no interactive observer is attached.
pub trait BackgroundObserver: ImportObserver {
    /// Prepare the indicator before it is installed.
    ///
    /// Called with the controller's state locked; must not call back into
    /// the controller.
    fn configure(&self, max: u64, label: &str);

    /// Stop rendering, an interactive observer has taken over.
    fn stop_notify(&self);
}

/// Shared handle to an interactive observer.
pub type ObserverRef = Arc<dyn ImportObserver>;

/// Shared handle to the background observer.
pub type BackgroundRef = Arc<dyn BackgroundObserver>;

/// Receiver of a worker's raw progress events.
pub trait ProgressSink: Send + Sync {
    fn on_total(&self, total: u64);

    fn on_progress(&self, current: u64);
}

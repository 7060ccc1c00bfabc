//! Job controller.
//!
//! `JobController` runs at most one import at a time and fans its progress
//! out to the registered observers:
//! - `start_import` spawns the worker on its own thread and returns at once
//! - the worker reports into an event sink that queues events on a channel
//! - a single dispatcher thread drains the channel, updates the job and
//!   delivers every event to the observers, in order
//! - `abort_import` sets the job's cancellation token and returns at once
//!
//! All controller state sits behind one mutex. Observers are always called
//! with that mutex released, so they may call back into the controller
//! (background `configure` is the exception, see `BackgroundObserver`).

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::error::ControllerError;
use crate::model::{JobOutcome, JobSnapshot, SourceHandle};
use crate::progress::{BackgroundRef, ObserverRef, ProgressSink};
use crate::registry::{ObserverRegistry, RegistryMode};
use crate::worker::ImportWorker;

const WORKER_THREAD_NAME: &str = "import-worker";
const DISPATCHER_THREAD_NAME: &str = "import-dispatcher";

/// The process hosting a controller.
///
/// `release` is called once per job, after its termination has been relayed
/// to the observers. A host typically uses it to shut itself down or to
/// let go of resources it kept alive for the job. No new job can start
/// until `release` has returned.
pub trait JobHost: Send + Sync {
    fn release(&self, job: &JobSnapshot);
}

/// Events queued by a worker for the dispatcher.
#[derive(Debug)]
enum Event {
    Total { job: Uuid, total: u64 },
    Progress { job: Uuid, current: u64 },
    Terminated { job: Uuid, outcome: JobOutcome },
}

/// The sink handed to a worker, bound to one job.
struct EventSink {
    job: Uuid,
    events: Sender<Event>,
}

impl EventSink {
    fn terminate(&self, outcome: JobOutcome) {
        let _ = self.events.send(Event::Terminated {
            job: self.job,
            outcome,
        });
    }
}

impl ProgressSink for EventSink {
    fn on_total(&self, total: u64) {
        let _ = self.events.send(Event::Total {
            job: self.job,
            total,
        });
    }

    fn on_progress(&self, current: u64) {
        let _ = self.events.send(Event::Progress {
            job: self.job,
            current,
        });
    }
}

struct ControllerState {
    job: JobSnapshot,
    registry: ObserverRegistry,
    cancel: Option<CancellationToken>,
    /// True while a finished job's outcome is still being delivered
    relaying: bool,
}

impl ControllerState {
    fn is_current(&self, job: Uuid) -> bool {
        self.job.running && self.job.id == Some(job)
    }

    fn is_busy(&self) -> bool {
        self.job.running || self.relaying
    }
}

struct Shared {
    state: Mutex<ControllerState>,
    idle: Condvar,
    background: Option<BackgroundRef>,
    host: Option<Arc<dyn JobHost>>,
}

impl Shared {
    /// Configure and install the background observer for the current job.
    ///
    /// Does nothing when substitution is suppressed, when no job has been
    /// started yet, or when an interactive observer is attached.
    fn substitute_background(&self, state: &mut ControllerState) {
        let Some(background) = &self.background else {
            return;
        };
        if state.registry.mode() == RegistryMode::Interactive {
            return;
        }
        let Some(label) = state.job.label() else {
            return;
        };

        background.configure(state.job.item_count, label);
        if state.registry.install_background(background.clone()) {
            debug!(label, max = state.job.item_count, "background observer took over");
        }
    }

    fn dispatch(&self, event: Event) {
        match event {
            Event::Total { job, total } => {
                let recipients = {
                    let mut state = self.state.lock();
                    if !state.is_current(job) {
                        trace!(%job, "dropping total from stale job");
                        return;
                    }
                    state.job.item_count = total;
                    state.registry.recipients()
                };

                debug!(%job, total, "relaying total");
                for recipient in &recipients {
                    contain(job, "on_total", || recipient.on_total(total));
                }
            }
            Event::Progress { job, current } => {
                let recipients = {
                    let state = self.state.lock();
                    if !state.is_current(job) {
                        trace!(%job, "dropping progress from stale job");
                        return;
                    }
                    state.registry.recipients()
                };

                trace!(%job, current, "relaying progress");
                for recipient in &recipients {
                    contain(job, "on_progress", || recipient.on_progress(current));
                }
            }
            Event::Terminated { job, outcome } => {
                let (recipients, snapshot) = {
                    let mut state = self.state.lock();
                    if !state.is_current(job) {
                        trace!(%job, "dropping termination of stale job");
                        return;
                    }
                    state.job.running = false;
                    state.job.finished_at = Some(Utc::now());
                    state.job.last_outcome = Some(outcome.clone());
                    state.cancel = None;
                    state.relaying = true;
                    (state.registry.recipients(), state.job.clone())
                };

                match &outcome {
                    JobOutcome::Failed { error } => {
                        warn!(%job, %error, "import worker failed")
                    }
                    _ => info!(%job, %outcome, items = snapshot.item_count, "import finished"),
                }

                for recipient in &recipients {
                    contain(job, "on_finished", || recipient.on_finished(&outcome));
                }
                if let Some(host) = &self.host {
                    contain(job, "release", || host.release(&snapshot));
                }

                self.state.lock().relaying = false;
                self.idle.notify_all();
            }
        }
    }
}

/// Run one observer or host callback, logging a panic instead of
/// unwinding through the dispatcher.
fn contain(job: Uuid, callback: &'static str, call: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(call)) {
        warn!(
            %job,
            callback,
            panic = panic_message(&*payload),
            "observer panicked, event dropped for it"
        );
    }
}

fn dispatch_loop(shared: Arc<Shared>, events: Receiver<Event>) {
    for event in events.iter() {
        shared.dispatch(event);
    }
    trace!("dispatcher stopped");
}

/// Run the worker, turning errors and panics into an outcome.
fn run_worker(
    worker: &dyn ImportWorker,
    source: &SourceHandle,
    sink: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> JobOutcome {
    let result = panic::catch_unwind(AssertUnwindSafe(|| worker.run(source, sink, cancel)));

    if cancel.is_cancelled() {
        return JobOutcome::Cancelled;
    }
    match result {
        Ok(Ok(())) => JobOutcome::Completed,
        Ok(Err(e)) => JobOutcome::Failed {
            error: e.to_string(),
        },
        Err(payload) => JobOutcome::Failed {
            error: format!("worker panicked: {}", panic_message(&*payload)),
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}

/// Builder for a `JobController`.
pub struct JobControllerBuilder {
    worker: Arc<dyn ImportWorker>,
    background: Option<BackgroundRef>,
    host: Option<Arc<dyn JobHost>>,
}

impl JobControllerBuilder {
    /// Observer installed whenever no interactive observer is attached.
    ///
    /// Without one, the registry is simply left empty.
    pub fn background(mut self, observer: BackgroundRef) -> Self {
        self.background = Some(observer);
        self
    }

    /// Host to release after each job terminates.
    pub fn host(mut self, host: Arc<dyn JobHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Start the dispatcher thread and return the controller.
    pub fn build(self) -> Result<JobController, ControllerError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(ControllerState {
                job: JobSnapshot::default(),
                registry: ObserverRegistry::new(),
                cancel: None,
                relaying: false,
            }),
            idle: Condvar::new(),
            background: self.background,
            host: self.host,
        });

        let (events_tx, events_rx) = unbounded();
        let dispatcher_shared = shared.clone();
        thread::Builder::new()
            .name(DISPATCHER_THREAD_NAME.to_string())
            .spawn(move || dispatch_loop(dispatcher_shared, events_rx))
            .map_err(ControllerError::Spawn)?;

        Ok(JobController {
            shared,
            worker: self.worker,
            events: events_tx,
        })
    }
}

/// Coordinates a single background import job and its observers.
///
/// Share it between threads with an `Arc`. Dropping the controller requests
/// cancellation of a running job.
pub struct JobController {
    shared: Arc<Shared>,
    worker: Arc<dyn ImportWorker>,
    events: Sender<Event>,
}

impl JobController {
    pub fn builder(worker: Arc<dyn ImportWorker>) -> JobControllerBuilder {
        JobControllerBuilder {
            worker,
            background: None,
            host: None,
        }
    }

    /// Start importing `source` on a worker thread.
    ///
    /// Returns the new job's id without waiting for the worker.
    ///
    /// # Errors
    /// - `InvalidArgument` if `source` is empty
    /// - `JobAlreadyRunning` if a job is still running, or its termination
    ///   is still being relayed to the observers and the host
    /// - `Spawn` if the worker thread could not be created; the job is then
    ///   terminated as failed through the usual relay
    ///
    /// The first two leave the controller untouched.
    pub fn start_import(&self, source: &str) -> Result<Uuid, ControllerError> {
        let source = SourceHandle::parse(source)?;
        let job_id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        {
            let mut state = self.shared.state.lock();
            if state.is_busy() {
                let current = state
                    .job
                    .source
                    .clone()
                    .unwrap_or_else(|| source.clone());
                return Err(ControllerError::JobAlreadyRunning { current });
            }

            state.job = JobSnapshot::started(job_id, source.clone());
            state.cancel = Some(cancel.clone());
            self.shared.substitute_background(&mut state);
        }

        let sink = EventSink {
            job: job_id,
            events: self.events.clone(),
        };
        let worker = self.worker.clone();
        let worker_source = source.clone();
        let spawned = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let outcome = run_worker(worker.as_ref(), &worker_source, &sink, &cancel);
                sink.terminate(outcome);
            });

        if let Err(e) = spawned {
            warn!(job = %job_id, error = %e, "failed to spawn import worker");
            self.abandon(job_id, e.to_string());
            return Err(ControllerError::Spawn(e));
        }

        info!(job = %job_id, %source, "import started");
        Ok(job_id)
    }

    /// Terminate a job whose worker never ran.
    ///
    /// Goes through the dispatcher like any other termination, so observers
    /// get `on_finished` and the host is released.
    fn abandon(&self, job: Uuid, error: String) {
        let _ = self.events.send(Event::Terminated {
            job,
            outcome: JobOutcome::Failed { error },
        });
    }

    /// Ask the running job to stop.
    ///
    /// Only sets the job's cancellation token; the worker stops at its next
    /// safe point. A worker stuck in a blocking call stops whenever that call
    /// returns, there is no way to force it.
    ///
    /// # Errors
    /// `NoActiveJob` if nothing is running.
    pub fn abort_import(&self) -> Result<(), ControllerError> {
        let state = self.shared.state.lock();
        if !state.job.running {
            return Err(ControllerError::NoActiveJob);
        }

        if let Some(cancel) = &state.cancel {
            if cancel.cancel() {
                info!(job = ?state.job.id, "import abort requested");
            }
        }
        Ok(())
    }

    /// Snapshot of the current or most recent job.
    pub fn current_job(&self) -> JobSnapshot {
        self.shared.state.lock().job.clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().job.running
    }

    /// Attach an interactive observer.
    ///
    /// Attaching the same observer twice has no effect. The background
    /// observer, if installed, is removed and told to stop.
    pub fn add_observer(&self, observer: ObserverRef) {
        let displaced = self.shared.state.lock().registry.add(observer);
        if let Some(background) = displaced {
            debug!("interactive observer attached, stopping background observer");
            background.stop_notify();
        }
    }

    /// Detach an interactive observer.
    ///
    /// When this leaves nobody watching and a job has been started, the
    /// background observer is configured and installed before returning.
    pub fn remove_observer(&self, observer: &ObserverRef) {
        let mut state = self.shared.state.lock();
        state.registry.remove(observer);
        if state.registry.is_empty() {
            self.shared.substitute_background(&mut state);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.shared.state.lock().registry.len()
    }

    pub fn registry_mode(&self) -> RegistryMode {
        self.shared.state.lock().registry.mode()
    }

    /// Block until no job is running and the last outcome has been relayed.
    pub fn wait(&self) {
        let mut state = self.shared.state.lock();
        self.shared.idle.wait_while(&mut state, |s| s.is_busy());
    }

    /// Like `wait`, giving up after `timeout`. Returns true if idle.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.shared.state.lock();
        self.shared
            .idle
            .wait_while_for(&mut state, |s| s.is_busy(), timeout);
        !state.is_busy()
    }
}

impl Drop for JobController {
    fn drop(&mut self) {
        if let Some(cancel) = &self.shared.state.lock().cancel {
            cancel.cancel();
        }
    }
}

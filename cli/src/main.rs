//! dict-import - Command-line host for the import engine.
//!
//! Imports a tab-separated dictionary file on a background worker while the
//! terminal follows along. The foreground progress bar can be detached part
//! way through to watch the background indicator take over, and the job can
//! be aborted at a given entry.

use clap::Parser;
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use engine::{
    BackgroundObserver, DictFileWorker, ImportObserver, JobController, JobHost, JobOutcome,
    JobSnapshot, MemoryStore, ObserverRef,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Minimum delay between two redraws of a progress line
const REDRAW_INTERVAL: Duration = Duration::from_millis(200);

/// dict-import - Import a dictionary file in the background
#[derive(Parser, Debug)]
#[command(name = "dict-import")]
#[command(version = "0.1.0")]
#[command(about = "Import a tab-separated dictionary with progress tracking")]
struct Args {
    /// Dictionary file (one `headword<TAB>definition` entry per line)
    #[arg(long, value_name = "PATH")]
    src: PathBuf,

    /// Report progress every N entries
    #[arg(long, value_name = "N", default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    progress_every: u64,

    /// Pause after each entry, in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 0)]
    entry_delay_ms: u64,

    /// Detach the progress bar once N entries are done
    #[arg(long, value_name = "N")]
    detach_after: Option<u64>,

    /// Abort the import once N entries are done
    #[arg(long, value_name = "N")]
    abort_after: Option<u64>,

    /// Print the final job as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(long)]
    verbose: bool,
}

/// What a finished run looked like
#[derive(Debug)]
struct RunReport {
    job: JobSnapshot,
    entries_imported: usize,
    detached: bool,
}

/// Limits how often a progress line is redrawn.
struct Throttle {
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    fn new() -> Self {
        Throttle {
            last: Mutex::new(None),
        }
    }

    fn ready(&self, force: bool) -> bool {
        let mut last = self.last.lock();
        let due = last.map_or(true, |at| at.elapsed() >= REDRAW_INTERVAL);
        if due || force {
            *last = Some(Instant::now());
        }
        due || force
    }
}

fn progress_bar(current: u64, total: u64) -> String {
    let total = total.max(1);
    let percent = (current.min(total) * 100 / total) as usize;
    let filled = percent / 5;
    format!(
        "[{}{}] {}%",
        "=".repeat(filled),
        " ".repeat(20 - filled),
        percent
    )
}

/// Foreground progress bar on stderr.
struct CliProgress {
    verbose: bool,
    total: AtomicU64,
    throttle: Throttle,
    started: Instant,
    feed: Sender<u64>,
}

impl CliProgress {
    fn new(verbose: bool, feed: Sender<u64>) -> Self {
        CliProgress {
            verbose,
            total: AtomicU64::new(0),
            throttle: Throttle::new(),
            started: Instant::now(),
            feed,
        }
    }
}

impl ImportObserver for CliProgress {
    fn on_progress(&self, current: u64) {
        let _ = self.feed.send(current);

        let total = self.total.load(Ordering::Relaxed);
        if !self.throttle.ready(current >= total) {
            return;
        }
        eprint!(
            "\rProgress: {} | {}/{} entries",
            progress_bar(current, total),
            current,
            total
        );
    }

    fn on_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        eprintln!("Found {} entries", total);
    }

    fn on_complete(&self) {
        self.on_finished(&JobOutcome::Completed);
    }

    fn on_finished(&self, outcome: &JobOutcome) {
        eprintln!();
        match outcome {
            JobOutcome::Completed => eprintln!("Import complete!"),
            JobOutcome::Cancelled => eprintln!("Import aborted."),
            JobOutcome::Failed { error } => eprintln!("Import failed: {}", error),
        }
        if self.verbose {
            eprintln!("Elapsed: {:.1}s", self.started.elapsed().as_secs_f64());
        }
    }
}

/// Persistent one-line indicator shown while nobody watches in the foreground.
struct TerminalIndicator {
    active: AtomicBool,
    max: AtomicU64,
    label: Mutex<String>,
    throttle: Throttle,
    feed: Sender<u64>,
}

impl TerminalIndicator {
    fn new(feed: Sender<u64>) -> Self {
        TerminalIndicator {
            active: AtomicBool::new(false),
            max: AtomicU64::new(0),
            label: Mutex::new(String::new()),
            throttle: Throttle::new(),
            feed,
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}

impl ImportObserver for TerminalIndicator {
    fn on_progress(&self, current: u64) {
        let _ = self.feed.send(current);

        let max = self.max.load(Ordering::Relaxed);
        if !self.is_active() || !self.throttle.ready(current >= max) {
            return;
        }
        eprint!(
            "\r[background] {} {} ({}/{})",
            self.label.lock(),
            progress_bar(current, max),
            current,
            max
        );
    }

    fn on_total(&self, total: u64) {
        self.max.store(total, Ordering::Relaxed);
    }

    fn on_complete(&self) {
        if self.is_active() {
            eprintln!();
            eprintln!("[background] {} finished", self.label.lock());
        }
    }
}

impl BackgroundObserver for TerminalIndicator {
    fn configure(&self, max: u64, label: &str) {
        self.max.store(max, Ordering::Relaxed);
        *self.label.lock() = label.to_string();
        self.active.store(true, Ordering::Relaxed);
    }

    fn stop_notify(&self) {
        if self.active.swap(false, Ordering::Relaxed) {
            eprintln!();
            eprintln!("[background] back in the foreground");
        }
    }
}

/// Hands the finished job back to the main thread.
struct CliHost {
    released: Sender<JobSnapshot>,
}

impl JobHost for CliHost {
    fn release(&self, job: &JobSnapshot) {
        tracing::debug!(job = ?job.id, "releasing host");
        let _ = self.released.try_send(job.clone());
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Parse and validate command-line arguments, then run the import
fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let exit_code = match run_cli(&args) {
        Ok(report) => {
            eprintln!(
                "Summary: {} of {} entries imported from {}{}",
                report.entries_imported,
                report.job.item_count,
                report.job.label().unwrap_or("(unknown)"),
                if report.detached { " (finished in background)" } else { "" }
            );
            if args.json {
                match serde_json::to_string_pretty(&report.job) {
                    Ok(json) => println!("{}", json),
                    Err(e) => eprintln!("Error: failed to encode job: {}", e),
                }
            }
            match report.job.last_outcome {
                Some(JobOutcome::Cancelled) => 1,
                _ => 0,
            }
        }
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Acts on progress milestones: detach the foreground bar, abort the job.
struct Milestones<'a> {
    controller: &'a JobController,
    foreground: &'a ObserverRef,
    detach_after: Option<u64>,
    abort_after: Option<u64>,
    detached: bool,
    aborted: bool,
}

impl Milestones<'_> {
    fn reached(&mut self, current: u64) {
        if !self.detached && self.detach_after.is_some_and(|n| current >= n) {
            self.controller.remove_observer(self.foreground);
            self.detached = true;
            tracing::info!(current, "foreground observer detached");
        }
        if !self.aborted && self.abort_after.is_some_and(|n| current >= n) {
            // The job may finish on its own before the abort lands
            if self.controller.abort_import().is_ok() {
                eprintln!();
                eprintln!("Aborting after {} entries...", current);
            }
            self.aborted = true;
        }
    }
}

/// Follow progress until the host is released.
fn drive(
    milestones: &mut Milestones<'_>,
    progress: &Receiver<u64>,
    released: &Receiver<JobSnapshot>,
) -> Result<JobSnapshot, String> {
    loop {
        select! {
            recv(progress) -> current => {
                if let Ok(current) = current {
                    milestones.reached(current);
                }
            }
            recv(released) -> job => {
                // Progress relayed before the release still counts
                for current in progress.try_iter() {
                    milestones.reached(current);
                }
                return job
                    .map_err(|_| "Import host was dropped before the job finished".to_string());
            }
        }
    }
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<RunReport, String> {
    if !args.src.exists() {
        return Err(format!("Source file does not exist: {}", args.src.display()));
    }
    if !args.src.is_file() {
        return Err(format!("Source is not a file: {}", args.src.display()));
    }

    let (progress_tx, progress_rx) = unbounded();
    let (released_tx, released_rx) = bounded(1);

    let store = Arc::new(MemoryStore::new());
    let worker = DictFileWorker::new(store.clone())
        .with_progress_interval(args.progress_every)
        .with_entry_delay(Duration::from_millis(args.entry_delay_ms));

    let controller = JobController::builder(Arc::new(worker))
        .background(Arc::new(TerminalIndicator::new(progress_tx.clone())))
        .host(Arc::new(CliHost {
            released: released_tx,
        }))
        .build()
        .map_err(|e| format!("Failed to start import engine: {}", e))?;

    let foreground: ObserverRef = Arc::new(CliProgress::new(args.verbose, progress_tx));
    controller.add_observer(foreground.clone());

    eprintln!("Importing {}", args.src.display());
    controller
        .start_import(&args.src.to_string_lossy())
        .map_err(|e| format!("Import could not start: {}", e))?;

    let mut milestones = Milestones {
        controller: &controller,
        foreground: &foreground,
        detach_after: args.detach_after,
        abort_after: args.abort_after,
        detached: false,
        aborted: false,
    };
    let job = drive(&mut milestones, &progress_rx, &released_rx)?;
    let detached = milestones.detached;

    if let Some(outcome) = job.last_outcome.clone() {
        outcome
            .into_result()
            .map_err(|e| format!("Import failed: {}", e))?;
    }

    Ok(RunReport {
        job,
        entries_imported: store.len(),
        detached,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_dict(dir: &TempDir, entries: usize) -> PathBuf {
        let path = dir.path().join("dict.txt");
        let contents: String = (0..entries)
            .map(|i| format!("word{}\tdefinition {}\n", i, i))
            .collect();
        std::fs::write(&path, contents).expect("Failed to write dictionary");
        path
    }

    fn args(src: PathBuf) -> Args {
        Args {
            src,
            progress_every: 1,
            entry_delay_ms: 0,
            detach_after: None,
            abort_after: None,
            json: false,
            verbose: false,
        }
    }

    #[test]
    fn test_cli_imports_whole_dictionary() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let src = write_dict(&dir, 25);

        let report = run_cli(&args(src)).expect("CLI should succeed");
        assert_eq!(report.entries_imported, 25);
        assert_eq!(report.job.item_count, 25);
        assert_eq!(report.job.last_outcome, Some(JobOutcome::Completed));
        assert_eq!(report.job.label(), Some("dict.txt"));
        assert!(!report.job.running);
        assert!(!report.detached);
    }

    #[test]
    fn test_cli_with_progress_interval() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let src = write_dict(&dir, 10);

        let mut args = args(src);
        args.progress_every = 4;

        let report = run_cli(&args).expect("CLI should succeed");
        assert_eq!(report.entries_imported, 10);
    }

    #[test]
    fn test_cli_detach_hands_over_to_background() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let src = write_dict(&dir, 30);

        let mut args = args(src);
        args.detach_after = Some(5);
        args.entry_delay_ms = 1;

        let report = run_cli(&args).expect("CLI should succeed");
        assert!(report.detached);
        assert_eq!(report.entries_imported, 30);
        assert_eq!(report.job.last_outcome, Some(JobOutcome::Completed));
    }

    #[test]
    fn test_cli_abort_cancels_import() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let src = write_dict(&dir, 500);

        let mut args = args(src);
        args.abort_after = Some(2);
        args.entry_delay_ms = 5;

        let report = run_cli(&args).expect("Aborted import is not an error");
        assert_eq!(report.job.last_outcome, Some(JobOutcome::Cancelled));
        assert!(report.entries_imported < 500);
    }

    #[test]
    fn test_cli_empty_dictionary_completes() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let src = write_dict(&dir, 0);

        let report = run_cli(&args(src)).expect("CLI should succeed");
        assert_eq!(report.entries_imported, 0);
        assert_eq!(report.job.item_count, 0);
        assert_eq!(report.job.last_outcome, Some(JobOutcome::Completed));
    }

    #[test]
    fn test_cli_rejects_missing_source() {
        let result = run_cli(&args(PathBuf::from("/nonexistent/dict.txt")));
        assert!(result.is_err(), "CLI should reject missing source");
    }

    #[test]
    fn test_cli_rejects_directory_source() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let result = run_cli(&args(dir.path().to_path_buf()));
        assert!(result.is_err(), "CLI should reject a directory");
    }

    #[test]
    fn test_progress_bar_rendering() {
        assert_eq!(progress_bar(0, 10), format!("[{}] 0%", " ".repeat(20)));
        assert_eq!(progress_bar(5, 10), format!("[{}{}] 50%", "=".repeat(10), " ".repeat(10)));
        assert_eq!(progress_bar(10, 10), format!("[{}] 100%", "=".repeat(20)));
        // Unknown total renders instead of dividing by zero
        assert_eq!(progress_bar(0, 0), format!("[{}] 0%", " ".repeat(20)));
    }
}

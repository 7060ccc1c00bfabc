//! Import workers.
//!
//! A worker performs the actual import on its own thread. The controller
//! hands it the source handle, a sink for progress events and a cancellation
//! token; the worker reports as it goes and returns once it is done or has
//! seen the token set.
//!
//! `DictFileWorker` is the bundled implementation. It reads a tab-separated
//! dictionary file (`headword<TAB>definition`, one entry per line) into an
//! `EntryStore`.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::error::{ImportError, WorkerError};
use crate::model::SourceHandle;
use crate::progress::ProgressSink;

/// Trait for the long-running operation the controller supervises.
pub trait ImportWorker: Send + Sync {
    /// Import everything behind `source`.
    ///
    /// Report totals and progress through `sink` as often as useful. Check
    /// `cancel` at safe points and return promptly once it is set.
    fn run(
        &self,
        source: &SourceHandle,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), WorkerError>;
}

/// A single imported dictionary entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DictEntry {
    pub headword: String,
    pub definition: String,
}

impl DictEntry {
    /// Parse one `headword<TAB>definition` line.
    ///
    /// Returns None for lines without a tab or with an empty headword.
    pub fn parse(line: &str) -> Option<Self> {
        let (headword, definition) = line.split_once('\t')?;
        let headword = headword.trim();
        if headword.is_empty() {
            return None;
        }
        Some(DictEntry {
            headword: headword.to_string(),
            definition: definition.trim().to_string(),
        })
    }
}

/// Destination for imported entries.
pub trait EntryStore: Send + Sync {
    fn insert(&self, entry: DictEntry);
}

/// In-memory entry store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Vec<DictEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn entries(&self) -> Vec<DictEntry> {
        self.entries.lock().clone()
    }

    pub fn lookup(&self, headword: &str) -> Option<DictEntry> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.headword == headword)
            .cloned()
    }
}

impl EntryStore for MemoryStore {
    fn insert(&self, entry: DictEntry) {
        self.entries.lock().push(entry);
    }
}

impl<S: EntryStore + ?Sized> EntryStore for std::sync::Arc<S> {
    fn insert(&self, entry: DictEntry) {
        (**self).insert(entry);
    }
}

/// Imports a tab-separated dictionary file into an `EntryStore`.
pub struct DictFileWorker<S> {
    store: S,
    progress_interval: u64,
    entry_delay: Duration,
}

impl<S: EntryStore> DictFileWorker<S> {
    pub fn new(store: S) -> Self {
        DictFileWorker {
            store,
            progress_interval: 1,
            entry_delay: Duration::ZERO,
        }
    }

    /// Report progress every `interval` entries (and always on the last one).
    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval.max(1);
        self
    }

    /// Pause after each entry. Only useful to slow a demo down.
    pub fn with_entry_delay(mut self, delay: Duration) -> Self {
        self.entry_delay = delay;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

/// Count the entry lines of a dictionary file.
///
/// Stops early, with a partial count, once `cancel` is set.
fn count_entries(path: &Path, cancel: &CancellationToken) -> Result<u64, ImportError> {
    let mut count = 0;
    for line in open(path)?.lines() {
        if cancel.is_cancelled() {
            break;
        }
        let line = line.map_err(|e| ImportError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        if is_entry_line(&line) {
            count += 1;
        }
    }
    Ok(count)
}

fn open(path: &Path) -> Result<BufReader<File>, ImportError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| ImportError::Open {
            path: path.to_path_buf(),
            source: e,
        })
}

fn is_entry_line(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && !trimmed.starts_with('#')
}

impl<S: EntryStore> ImportWorker for DictFileWorker<S> {
    fn run(
        &self,
        source: &SourceHandle,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), WorkerError> {
        let path = source.to_path();

        let total = count_entries(&path, cancel)?;
        if cancel.is_cancelled() {
            debug!(path = %path.display(), "dictionary import cancelled while counting");
            return Ok(());
        }
        sink.on_total(total);
        debug!(path = %path.display(), total, "counted dictionary entries");

        let mut processed = 0u64;
        let mut skipped = 0u64;
        for (line_no, line) in open(&path)?.lines().enumerate() {
            // Safe point: nothing half-written between entries
            if cancel.is_cancelled() {
                debug!(processed, "dictionary import cancelled");
                return Ok(());
            }

            let line = line.map_err(|e| ImportError::Read {
                path: path.clone(),
                source: e,
            })?;
            if !is_entry_line(&line) {
                continue;
            }

            match DictEntry::parse(&line) {
                Some(entry) => self.store.insert(entry),
                None => {
                    skipped += 1;
                    warn!(line = line_no + 1, "skipping malformed dictionary entry");
                }
            }

            processed += 1;
            if processed % self.progress_interval == 0 || processed == total {
                sink.on_progress(processed);
            }

            if !self.entry_delay.is_zero() {
                thread::sleep(self.entry_delay);
            }
        }

        debug!(processed, skipped, "dictionary import finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn get_events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    impl ProgressSink for RecordingSink {
        fn on_total(&self, total: u64) {
            self.events.lock().push(format!("total({})", total));
        }

        fn on_progress(&self, current: u64) {
            self.events.lock().push(format!("progress({})", current));
        }
    }

    /// Sink that cancels the job as soon as a given progress value is seen.
    struct CancellingSink {
        inner: RecordingSink,
        cancel: CancellationToken,
        at: u64,
    }

    impl ProgressSink for CancellingSink {
        fn on_total(&self, total: u64) {
            self.inner.on_total(total);
        }

        fn on_progress(&self, current: u64) {
            self.inner.on_progress(current);
            if current == self.at {
                self.cancel.cancel();
            }
        }
    }

    fn write_dict(dir: &tempfile::TempDir, contents: &str) -> SourceHandle {
        let path = dir.path().join("dict.txt");
        let mut file = File::create(&path).expect("Failed to create dictionary");
        file.write_all(contents.as_bytes())
            .expect("Failed to write dictionary");
        SourceHandle::parse(&path.to_string_lossy()).expect("valid handle")
    }

    #[test]
    fn test_parse_entry_line() {
        assert_eq!(
            DictEntry::parse("apple\ta red fruit"),
            Some(DictEntry {
                headword: "apple".to_string(),
                definition: "a red fruit".to_string(),
            })
        );
        assert_eq!(DictEntry::parse("no tab here"), None);
        assert_eq!(DictEntry::parse("\torphan definition"), None);
    }

    #[test]
    fn test_run_imports_entries_and_reports_progress() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let source = write_dict(
            &dir,
            "# sample\napple\ta red fruit\n\nbanana\ta yellow fruit\ncherry\ta small fruit\n",
        );

        let worker = DictFileWorker::new(MemoryStore::new());
        let sink = RecordingSink::default();
        worker
            .run(&source, &sink, &CancellationToken::new())
            .expect("Import should succeed");

        assert_eq!(
            sink.get_events(),
            vec!["total(3)", "progress(1)", "progress(2)", "progress(3)"]
        );
        assert_eq!(worker.store().len(), 3);
        assert_eq!(
            worker.store().lookup("banana").map(|e| e.definition),
            Some("a yellow fruit".to_string())
        );
    }

    #[test]
    fn test_progress_interval_always_reports_last_entry() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let contents: String = (0..5).map(|i| format!("word{}\tdef{}\n", i, i)).collect();
        let source = write_dict(&dir, &contents);

        let worker = DictFileWorker::new(MemoryStore::new()).with_progress_interval(2);
        let sink = RecordingSink::default();
        worker
            .run(&source, &sink, &CancellationToken::new())
            .expect("Import should succeed");

        assert_eq!(
            sink.get_events(),
            vec!["total(5)", "progress(2)", "progress(4)", "progress(5)"]
        );
    }

    #[test]
    fn test_malformed_lines_are_skipped_but_counted() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let source = write_dict(&dir, "good\tentry\nbroken line\nalso\tgood\n");

        let store = Arc::new(MemoryStore::new());
        let worker = DictFileWorker::new(store.clone());
        let sink = RecordingSink::default();
        worker
            .run(&source, &sink, &CancellationToken::new())
            .expect("Import should succeed");

        assert_eq!(store.len(), 2);
        assert_eq!(sink.get_events().last().map(String::as_str), Some("progress(3)"));
    }

    #[test]
    fn test_run_stops_at_safe_point_when_cancelled() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let contents: String = (0..10).map(|i| format!("word{}\tdef{}\n", i, i)).collect();
        let source = write_dict(&dir, &contents);

        let cancel = CancellationToken::new();
        let sink = CancellingSink {
            inner: RecordingSink::default(),
            cancel: cancel.clone(),
            at: 3,
        };
        let worker = DictFileWorker::new(MemoryStore::new());
        worker
            .run(&source, &sink, &cancel)
            .expect("Cancelled import returns Ok");

        assert_eq!(worker.store().len(), 3);
        assert_eq!(sink.inner.get_events().last().map(String::as_str), Some("progress(3)"));
    }

    #[test]
    fn test_cancel_before_counting_finishes_reports_nothing() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let contents: String = (0..1000).map(|i| format!("word{}\tdef{}\n", i, i)).collect();
        let source = write_dict(&dir, &contents);

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            count_entries(&source.to_path(), &cancel).expect("Count should succeed"),
            0
        );

        let worker = DictFileWorker::new(MemoryStore::new());
        let sink = RecordingSink::default();
        worker
            .run(&source, &sink, &cancel)
            .expect("Cancelled import returns Ok");

        assert!(sink.get_events().is_empty());
        assert!(worker.store().is_empty());
    }

    #[test]
    fn test_missing_file_is_an_open_error() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let source =
            SourceHandle::parse(&dir.path().join("absent.txt").to_string_lossy()).expect("valid handle");

        let worker = DictFileWorker::new(MemoryStore::new());
        let err = worker
            .run(&source, &RecordingSink::default(), &CancellationToken::new())
            .expect_err("Missing file should fail");

        let import_err = err
            .downcast_ref::<ImportError>()
            .expect("error should be an ImportError");
        assert!(matches!(import_err, ImportError::Open { .. }));
    }
}

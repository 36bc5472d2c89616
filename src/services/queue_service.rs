use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use crate::error::AppError;
use crate::models::image::{ImageRecord, OcrResult};
use crate::services::document_store::DocumentStore;
use crate::services::index_store::IndexStore;
use crate::services::ocr_service::OcrBackend;

pub const DEFAULT_ITEM_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Draining,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueProgress {
    pub state: WorkerState,
    pub queue_depth: usize,
    pub processed: usize,
    pub failed: usize,
    pub last_error: Option<String>,
}

impl Default for QueueProgress {
    fn default() -> Self {
        Self {
            state: WorkerState::Idle,
            queue_depth: 0,
            processed: 0,
            failed: 0,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub indexed: usize,
    pub failed: usize,
    /// Results dropped because the image was deleted or vanished.
    pub discarded: usize,
    pub persistence_errors: usize,
}

struct InFlight {
    path: String,
    recheck: bool,
    discarded: bool,
}

/// Puts the queue back to idle if a run stops before draining, either because
/// its future was dropped or the backend panicked. The interrupted path goes
/// back to the front of the queue unless it was deleted meanwhile.
struct DrainGuard<'a> {
    queue: &'a ProcessingQueue,
    finished: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = self.queue.lock_state();
        if let Some(interrupted) = state.in_flight.take() {
            if !interrupted.discarded && state.queued.insert(interrupted.path.clone()) {
                state.pending.push_front(interrupted.path);
            }
        }
        state.worker = WorkerState::Idle;
        let depth = state.pending.len();
        drop(state);

        tracing::warn!(remaining = depth, "image processing stopped before the queue drained");
        self.queue.progress.send_modify(|p| {
            p.state = WorkerState::Idle;
            p.queue_depth = depth;
        });
    }
}

struct QueueState {
    pending: VecDeque<String>,
    queued: HashSet<String>,
    in_flight: Option<InFlight>,
    worker: WorkerState,
}

/// Deduplicating FIFO of image paths drained by at most one worker.
pub struct ProcessingQueue {
    store: Arc<IndexStore>,
    documents: Arc<dyn DocumentStore>,
    ocr: Arc<dyn OcrBackend>,
    item_delay: Duration,
    state: Mutex<QueueState>,
    progress: watch::Sender<QueueProgress>,
}

impl ProcessingQueue {
    pub fn new(
        store: Arc<IndexStore>,
        documents: Arc<dyn DocumentStore>,
        ocr: Arc<dyn OcrBackend>,
        item_delay: Duration,
    ) -> Self {
        let (progress, _) = watch::channel(QueueProgress::default());
        Self {
            store,
            documents,
            ocr,
            item_delay,
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                queued: HashSet::new(),
                in_flight: None,
                worker: WorkerState::Idle,
            }),
            progress,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueProgress> {
        self.progress.subscribe()
    }

    pub fn queue_depth(&self) -> usize {
        self.lock_state().pending.len()
    }

    pub fn is_processing(&self) -> bool {
        self.lock_state().worker == WorkerState::Draining
    }

    /// Adds `path` unless it is already pending. A path currently being
    /// recognized is not queued twice; it is re-checked once the call returns.
    pub fn enqueue(&self, path: &str) -> bool {
        let mut state = self.lock_state();
        if let Some(in_flight) = state.in_flight.as_mut() {
            if in_flight.path == path {
                in_flight.recheck = true;
                return false;
            }
        }
        if !state.queued.insert(path.to_string()) {
            return false;
        }
        state.pending.push_back(path.to_string());
        let depth = state.pending.len();
        drop(state);

        self.progress.send_modify(|p| p.queue_depth = depth);
        true
    }

    /// Drops `path` from the queue and the index. An in-flight result for it is
    /// thrown away when it arrives.
    pub fn delete(&self, path: &str) -> Result<bool, AppError> {
        let mut state = self.lock_state();
        if state.queued.remove(path) {
            state.pending.retain(|p| p != path);
        }
        if let Some(in_flight) = state.in_flight.as_mut() {
            if in_flight.path == path {
                in_flight.discarded = true;
            }
        }
        let depth = state.pending.len();
        // still holding the lock so a finishing worker cannot write in between
        let removed = self.store.remove(path);
        drop(state);

        self.progress.send_modify(|p| p.queue_depth = depth);
        removed
    }

    /// Drains the queue. Returns `None` without doing anything when another
    /// call is already draining.
    pub async fn run(&self) -> Option<RunSummary> {
        {
            let mut state = self.lock_state();
            if state.worker == WorkerState::Draining {
                return None;
            }
            state.worker = WorkerState::Draining;
            let depth = state.pending.len();
            self.progress.send_replace(QueueProgress {
                state: WorkerState::Draining,
                queue_depth: depth,
                ..QueueProgress::default()
            });
        }

        let mut guard = DrainGuard {
            queue: self,
            finished: false,
        };
        let mut summary = RunSummary::default();
        loop {
            let path = {
                let mut state = self.lock_state();
                match state.pending.pop_front() {
                    Some(path) => {
                        state.queued.remove(&path);
                        state.in_flight = Some(InFlight {
                            path: path.clone(),
                            recheck: false,
                            discarded: false,
                        });
                        path
                    }
                    None => {
                        state.worker = WorkerState::Idle;
                        guard.finished = true;
                        break;
                    }
                }
            };

            tracing::debug!(path = %path, "processing image");
            let outcome = self.recognize(&path).await;
            let depth = self.finish(&path, outcome, &mut summary);

            self.progress.send_modify(|p| {
                p.queue_depth = depth;
                p.processed = summary.indexed + summary.failed + summary.discarded;
                p.failed = summary.failed;
            });

            if depth > 0 && !self.item_delay.is_zero() {
                tokio::time::sleep(self.item_delay).await;
            }
        }

        let depth = self.queue_depth();
        self.progress.send_modify(|p| {
            p.state = WorkerState::Idle;
            p.queue_depth = depth;
        });
        tracing::info!(
            indexed = summary.indexed,
            failed = summary.failed,
            discarded = summary.discarded,
            persistence_errors = summary.persistence_errors,
            "image index up to date"
        );
        Some(summary)
    }

    async fn recognize(&self, path: &str) -> Result<(i64, OcrResult), AppError> {
        // read the mtime now, not at enqueue time, so edits made while waiting are covered
        let entry = self
            .documents
            .stat(path)
            .ok_or_else(|| AppError::VanishedFile(path.to_string()))?;
        let absolute = self.documents.absolute_path(path);
        let result = self.ocr.recognize(&absolute).await?;
        Ok((entry.modified_at, result))
    }

    /// Applies one outcome and returns the remaining queue depth.
    fn finish(
        &self,
        path: &str,
        outcome: Result<(i64, OcrResult), AppError>,
        summary: &mut RunSummary,
    ) -> usize {
        let mut state = self.lock_state();
        let in_flight = state.in_flight.take();
        let recheck = in_flight.as_ref().map(|f| f.recheck).unwrap_or(false);
        let deleted = in_flight.as_ref().map(|f| f.discarded).unwrap_or(false);

        match outcome {
            Ok(_) if deleted || self.documents.stat(path).is_none() => {
                tracing::debug!(path = %path, "discarding OCR result for deleted image");
                summary.discarded += 1;
            }
            Ok((fingerprint, result)) => {
                let regions = result.items.len();
                match self
                    .store
                    .upsert(ImageRecord::from_ocr(path, fingerprint, result))
                {
                    Ok(()) => {
                        tracing::debug!(path = %path, regions, "indexed image");
                        summary.indexed += 1;
                    }
                    Err(err) => {
                        tracing::error!(path = %path, error = %err, "failed to persist OCR result");
                        summary.persistence_errors += 1;
                        let message = err.to_string();
                        self.progress.send_modify(|p| p.last_error = Some(message));
                    }
                }
            }
            Err(AppError::VanishedFile(_)) => {
                tracing::debug!(path = %path, "image vanished before processing");
                summary.discarded += 1;
            }
            Err(err) => {
                tracing::warn!(
                    path = %path,
                    kind = err.kind(),
                    error = %err,
                    "OCR failed; image stays stale until the next scan"
                );
                summary.failed += 1;
            }
        }

        if recheck && !deleted && !state.queued.contains(path) {
            let still_stale = match self.documents.stat(path) {
                Some(entry) => self.store.fingerprint(path) != Some(entry.modified_at),
                None => false,
            };
            if still_stale {
                tracing::debug!(path = %path, "re-queueing image modified during OCR");
                state.queued.insert(path.to_string());
                state.pending.push_back(path.to_string());
            }
        }

        state.pending.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryDocumentStore, ScriptedOcr};

    struct Fixture {
        store: Arc<IndexStore>,
        documents: Arc<MemoryDocumentStore>,
        ocr: Arc<ScriptedOcr>,
        queue: Arc<ProcessingQueue>,
    }

    fn fixture_with(ocr: ScriptedOcr, files: &[(&str, i64)]) -> Fixture {
        let store = Arc::new(IndexStore::open_in_memory().unwrap());
        let documents = Arc::new(MemoryDocumentStore::with_files(files));
        let ocr = Arc::new(ocr);
        let queue = Arc::new(ProcessingQueue::new(
            store.clone(),
            documents.clone(),
            ocr.clone(),
            Duration::ZERO,
        ));
        Fixture {
            store,
            documents,
            ocr,
            queue,
        }
    }

    fn texts(store: &IndexStore, path: &str) -> Vec<String> {
        store
            .get(path)
            .unwrap()
            .items
            .into_iter()
            .map(|i| i.text)
            .collect()
    }

    #[test]
    fn test_enqueue_deduplicates() {
        let f = fixture_with(ScriptedOcr::new(), &[]);
        assert!(f.queue.enqueue("a.png"));
        assert!(!f.queue.enqueue("a.png"));
        assert!(f.queue.enqueue("b.png"));
        assert_eq!(f.queue.queue_depth(), 2);
        assert_eq!(f.queue.subscribe().borrow().queue_depth, 2);
    }

    #[tokio::test]
    async fn test_run_drains_in_fifo_order() {
        let f = fixture_with(ScriptedOcr::new(), &[("b.png", 2), ("a.png", 1)]);
        f.ocr.respond("a.png", &["Hello World"]);
        f.queue.enqueue("b.png");
        f.queue.enqueue("a.png");

        let summary = f.queue.run().await.unwrap();

        assert_eq!(summary.indexed, 2);
        let calls: Vec<String> = f
            .ocr
            .calls()
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();
        assert_eq!(calls, vec!["/vault/b.png", "/vault/a.png"]);
        assert_eq!(f.store.fingerprint("a.png"), Some(1));
        assert_eq!(f.store.fingerprint("b.png"), Some(2));
        assert_eq!(texts(&f.store, "a.png"), vec!["Hello World"]);
        assert!(!f.queue.is_processing());

        let progress = f.queue.subscribe().borrow().clone();
        assert_eq!(progress.state, WorkerState::Idle);
        assert_eq!(progress.processed, 2);
        assert_eq!(progress.queue_depth, 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_run() {
        let f = fixture_with(
            ScriptedOcr::new(),
            &[("a.png", 1), ("b.png", 1), ("c.png", 1)],
        );
        f.ocr.fail("b.png", "connection refused");
        for p in ["a.png", "b.png", "c.png", "gone.png"] {
            f.queue.enqueue(p);
        }

        let summary = f.queue.run().await.unwrap();

        assert_eq!(
            summary,
            RunSummary {
                indexed: 2,
                failed: 1,
                discarded: 1,
                persistence_errors: 0,
            }
        );
        assert!(f.store.contains("a.png"));
        assert!(!f.store.contains("b.png"));
        assert!(f.store.contains("c.png"));
        assert!(!f.store.contains("gone.png"));
        // no retry within the run
        assert_eq!(f.ocr.calls().len(), 3);
        assert_eq!(f.queue.subscribe().borrow().failed, 1);
    }

    #[tokio::test]
    async fn test_reindex_fully_replaces_regions() {
        let f = fixture_with(ScriptedOcr::new(), &[("a.png", 1)]);
        f.ocr.respond("a.png", &["first", "second"]);
        f.queue.enqueue("a.png");
        f.queue.run().await.unwrap();

        f.documents.put("a.png", 2);
        f.ocr.respond("a.png", &["third"]);
        f.queue.enqueue("a.png");
        f.queue.run().await.unwrap();

        assert_eq!(texts(&f.store, "a.png"), vec!["third"]);
        assert_eq!(f.store.fingerprint("a.png"), Some(2));
    }

    #[tokio::test]
    async fn test_second_run_is_noop_while_draining() {
        let f = fixture_with(ScriptedOcr::gated(), &[("a.png", 1), ("b.png", 1)]);
        f.queue.enqueue("a.png");
        f.queue.enqueue("b.png");

        let worker = {
            let queue = f.queue.clone();
            tokio::spawn(async move { queue.run().await })
        };
        f.ocr.wait_entered().await;

        assert!(f.queue.is_processing());
        assert!(f.queue.run().await.is_none());
        assert_eq!(f.queue.queue_depth(), 1);

        f.ocr.release(2);
        let summary = worker.await.unwrap().unwrap();

        assert_eq!(summary.indexed, 2);
        assert_eq!(f.ocr.calls().len(), 2);
        assert_eq!(f.ocr.max_active(), 1);
    }

    #[tokio::test]
    async fn test_delete_during_flight_discards_result() {
        let f = fixture_with(ScriptedOcr::gated(), &[("a.png", 1)]);
        f.queue.enqueue("a.png");

        let worker = {
            let queue = f.queue.clone();
            tokio::spawn(async move { queue.run().await })
        };
        f.ocr.wait_entered().await;

        f.queue.delete("a.png").unwrap();
        f.ocr.release(1);
        let summary = worker.await.unwrap().unwrap();

        assert_eq!(summary.indexed, 0);
        assert_eq!(summary.discarded, 1);
        assert!(!f.store.contains("a.png"));
    }

    #[tokio::test]
    async fn test_delete_removes_existing_record_and_pending_entry() {
        let f = fixture_with(ScriptedOcr::gated(), &[("a.png", 2), ("b.png", 1)]);
        f.store
            .upsert(crate::test_support::record("a.png", 1, &["old"]))
            .unwrap();
        f.queue.enqueue("a.png");
        f.queue.enqueue("b.png");

        let worker = {
            let queue = f.queue.clone();
            tokio::spawn(async move { queue.run().await })
        };
        f.ocr.wait_entered().await;

        // a.png is in flight and b.png still pending
        assert!(f.queue.delete("a.png").unwrap());
        f.documents.delete("b.png");
        assert!(!f.queue.delete("b.png").unwrap());
        assert_eq!(f.queue.queue_depth(), 0);

        f.ocr.release(1);
        let summary = worker.await.unwrap().unwrap();

        assert_eq!(summary.discarded, 1);
        assert!(f.store.is_empty());
        assert_eq!(f.ocr.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_modify_during_flight_requeues_once_finished() {
        let f = fixture_with(ScriptedOcr::gated(), &[("a.png", 1)]);
        f.queue.enqueue("a.png");

        let worker = {
            let queue = f.queue.clone();
            tokio::spawn(async move { queue.run().await })
        };
        f.ocr.wait_entered().await;

        f.documents.put("a.png", 5);
        assert!(!f.queue.enqueue("a.png"));
        assert_eq!(f.queue.queue_depth(), 0);

        f.ocr.release(2);
        let summary = worker.await.unwrap().unwrap();

        assert_eq!(summary.indexed, 2);
        assert_eq!(f.ocr.calls().len(), 2);
        assert_eq!(f.store.fingerprint("a.png"), Some(5));
    }

    #[tokio::test]
    async fn test_unchanged_in_flight_path_is_not_requeued() {
        let f = fixture_with(ScriptedOcr::gated(), &[("a.png", 1)]);
        f.queue.enqueue("a.png");

        let worker = {
            let queue = f.queue.clone();
            tokio::spawn(async move { queue.run().await })
        };
        f.ocr.wait_entered().await;
        assert!(!f.queue.enqueue("a.png"));

        f.ocr.release(1);
        let summary = worker.await.unwrap().unwrap();

        assert_eq!(summary.indexed, 1);
        assert_eq!(f.ocr.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_interrupted_run_keeps_completed_items_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("index.db");
        let store = Arc::new(IndexStore::open(&db_path).unwrap());
        let documents = Arc::new(MemoryDocumentStore::with_files(&[
            ("1.png", 1),
            ("2.png", 1),
            ("3.png", 1),
            ("4.png", 1),
        ]));
        let ocr = Arc::new(ScriptedOcr::gated());
        let queue = Arc::new(ProcessingQueue::new(
            store.clone(),
            documents,
            ocr.clone(),
            Duration::ZERO,
        ));
        for p in ["1.png", "2.png", "3.png", "4.png"] {
            queue.enqueue(p);
        }

        let worker = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.run().await })
        };
        // let two items through, then stop while the third is in flight
        ocr.release(2);
        let mut progress = queue.subscribe();
        progress
            .wait_for(|p| p.processed == 2)
            .await
            .unwrap();
        ocr.wait_entered().await;
        worker.abort();
        let _ = worker.await;

        let reopened = IndexStore::open(&db_path).unwrap();
        let paths: Vec<String> = reopened.snapshot().keys().cloned().collect();
        assert_eq!(paths, vec!["1.png", "2.png"]);
    }

    #[tokio::test]
    async fn test_cancelled_run_leaves_queue_usable() {
        let f = fixture_with(ScriptedOcr::gated(), &[("a.png", 1), ("b.png", 1)]);
        f.queue.enqueue("a.png");

        let worker = {
            let queue = f.queue.clone();
            tokio::spawn(async move { queue.run().await })
        };
        f.ocr.wait_entered().await;
        worker.abort();
        assert!(worker.await.unwrap_err().is_cancelled());

        assert!(!f.queue.is_processing());
        assert_eq!(f.queue.subscribe().borrow().state, WorkerState::Idle);
        // the interrupted item is pending again
        assert_eq!(f.queue.queue_depth(), 1);

        f.queue.enqueue("b.png");
        f.ocr.release(2);
        let summary = f.queue.run().await.unwrap();

        assert_eq!(summary.indexed, 2);
        assert!(f.store.contains("a.png"));
        assert!(f.store.contains("b.png"));
        assert!(!f.queue.is_processing());
    }

    #[tokio::test]
    async fn test_cancelled_run_does_not_requeue_deleted_item() {
        let f = fixture_with(ScriptedOcr::gated(), &[("a.png", 1)]);
        f.queue.enqueue("a.png");

        let worker = {
            let queue = f.queue.clone();
            tokio::spawn(async move { queue.run().await })
        };
        f.ocr.wait_entered().await;
        f.queue.delete("a.png").unwrap();
        worker.abort();
        let _ = worker.await;

        assert!(!f.queue.is_processing());
        assert_eq!(f.queue.queue_depth(), 0);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_counted_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("index.db");
        let store = Arc::new(IndexStore::open(&db_path).unwrap());
        {
            let conn = rusqlite::Connection::open(&db_path).unwrap();
            conn.execute_batch("DROP TABLE images").unwrap();
        }
        let documents = Arc::new(MemoryDocumentStore::with_files(&[("a.png", 1)]));
        let queue = ProcessingQueue::new(
            store.clone(),
            documents,
            Arc::new(ScriptedOcr::new()),
            Duration::ZERO,
        );
        queue.enqueue("a.png");

        let summary = queue.run().await.unwrap();

        assert_eq!(summary.persistence_errors, 1);
        assert_eq!(summary.indexed, 0);
        assert!(!store.contains("a.png"));
        let progress = queue.subscribe().borrow().clone();
        assert!(progress.last_error.unwrap().contains("a.png"));
    }
}

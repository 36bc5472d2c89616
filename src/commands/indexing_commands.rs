use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::error::AppError;
use crate::services::indexing_service::{self, ScanReport};
use crate::services::queue_service::RunSummary;
use crate::state::{AppState, IndexStatus};

#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub scan: ScanReport,
    /// `None` when another worker was already draining the queue.
    pub run: Option<RunSummary>,
}

fn spawn_processing(state: &Arc<AppState>) {
    let state = state.clone();
    tokio::spawn(async move {
        state.process_queue().await;
    });
}

/// Starts the vault watcher and queues whatever changed while we were not
/// running. Calling it again while a watcher is active does nothing.
pub fn start_indexing(state: &Arc<AppState>, vault_root: &Path) -> Result<ScanReport, AppError> {
    // Hold the handle lock across setup so two concurrent calls cannot both
    // install a watcher.
    let mut handle_guard = state
        .watcher_handle
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if handle_guard.is_some() {
        return Ok(ScanReport::default());
    }

    let handle = indexing_service::start_watching(state.clone(), vault_root)?;
    *handle_guard = Some(handle);
    drop(handle_guard);

    let report = state.scan(false);
    if report.queued > 0 {
        spawn_processing(state);
    }
    Ok(report)
}

pub fn stop_indexing(state: &AppState) {
    let mut handle_guard = state
        .watcher_handle
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(handle) = handle_guard.take() {
        indexing_service::stop_watching(handle);
    }
}

/// Treats every image as stale and processes them in the background.
pub fn trigger_full_rescan(state: &Arc<AppState>) -> ScanReport {
    let report = state.scan(true);
    if report.queued > 0 {
        spawn_processing(state);
    }
    report
}

/// Scans and drains the queue in the caller's task.
pub async fn scan_and_process(state: &AppState, force: bool) -> ScanOutcome {
    let scan = state.scan(force);
    let run = state.process_queue().await;
    ScanOutcome { scan, run }
}

pub fn get_indexing_status(state: &AppState) -> IndexStatus {
    state.status()
}

pub fn clear_indexed_data(state: &AppState) -> Result<usize, AppError> {
    let removed = state.store.clear()?;
    tracing::info!(removed, "cleared image index");
    Ok(removed)
}

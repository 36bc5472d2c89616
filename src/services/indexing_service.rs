use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_mini::notify;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind};
use serde::Serialize;

use crate::error::AppError;
use crate::models::file_entry::FileEntry;
use crate::services::document_store::{DocumentStore, FsDocumentStore};
use crate::services::index_store::{IndexSnapshot, IndexStore};
use crate::services::ocr_service;
use crate::services::queue_service::ProcessingQueue;
use crate::state::AppState;

const WATCH_DEBOUNCE: Duration = Duration::from_millis(500);

pub struct IndexingHandle {
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub eligible: usize,
    pub queued: usize,
}

pub fn is_eligible(entry: &FileEntry) -> bool {
    entry
        .extension
        .as_deref()
        .map(ocr_service::is_ocr_extension)
        .unwrap_or(false)
}

/// Missing from the index, fingerprint changed, or a rebuild was requested.
pub fn needs_processing(snapshot: &IndexSnapshot, entry: &FileEntry, force: bool) -> bool {
    if force {
        return true;
    }
    match snapshot.get(&entry.path) {
        Some(record) => record.fingerprint != entry.modified_at,
        None => true,
    }
}

pub fn stale_paths(files: &[FileEntry], snapshot: &IndexSnapshot, force: bool) -> Vec<String> {
    files
        .iter()
        .filter(|entry| is_eligible(entry) && needs_processing(snapshot, entry, force))
        .map(|entry| entry.path.clone())
        .collect()
}

pub fn scan(
    documents: &dyn DocumentStore,
    store: &IndexStore,
    queue: &ProcessingQueue,
    force: bool,
) -> ScanReport {
    let files = documents.list_files();
    let snapshot = store.snapshot();
    let eligible = files.iter().filter(|e| is_eligible(e)).count();

    let queued = stale_paths(&files, &snapshot, force)
        .iter()
        .filter(|path| queue.enqueue(path))
        .count();

    if queued > 0 {
        tracing::info!(queued, eligible, force, "found images to process");
    } else {
        tracing::debug!(eligible, force, "image index already current");
    }
    ScanReport { eligible, queued }
}

/// Create and modify notifications: a one-file scan.
pub fn on_change(
    documents: &dyn DocumentStore,
    store: &IndexStore,
    queue: &ProcessingQueue,
    path: &str,
) -> bool {
    let Some(entry) = documents.stat(path) else {
        return false;
    };
    if !is_eligible(&entry) || !needs_processing(&store.snapshot(), &entry, false) {
        return false;
    }
    queue.enqueue(&entry.path)
}

/// Removes the record for `path`, or for every image under it when `path` is a
/// folder. Nothing is queued.
pub fn on_delete(store: &IndexStore, queue: &ProcessingQueue, path: &str) -> Result<usize, AppError> {
    let mut removed = usize::from(queue.delete(path)?);

    let prefix = format!("{}/", path.trim_end_matches('/'));
    let children: Vec<String> = store
        .snapshot()
        .range(prefix.clone()..)
        .map(|(key, _)| key)
        .take_while(|key| key.starts_with(&prefix))
        .cloned()
        .collect();
    for child in children {
        removed += usize::from(queue.delete(&child)?);
    }

    if removed > 0 {
        tracing::debug!(path = %path, removed, "removed deleted images from index");
    }
    Ok(removed)
}

fn is_hidden_path(rel: &str) -> bool {
    rel.split('/').any(|part| part.starts_with('.'))
}

/// Feeds changed paths into the pipeline. Existing files are re-checked,
/// existing folders (moved or copied in) are checked file by file, and missing
/// paths are dropped from the index. Returns whether anything was queued.
fn route_changes(state: &AppState, vault: &FsDocumentStore, paths: &[PathBuf]) -> bool {
    let mut queued = false;
    for path in paths {
        let Some(rel) = vault.relative_path(path) else {
            continue;
        };
        if is_hidden_path(&rel) {
            continue;
        }
        if path.is_dir() {
            for entry in vault.list_folder(&rel) {
                queued |= state.on_create(&entry.path);
            }
        } else if path.exists() {
            queued |= state.on_modify(&rel);
        } else if let Err(err) = state.on_delete(&rel) {
            tracing::error!(path = %rel, error = %err, "failed to drop deleted image");
        }
    }
    queued
}

/// Watches the vault and feeds create/modify/delete notifications into the
/// pipeline. Must be called from inside a tokio runtime.
pub fn start_watching(state: Arc<AppState>, vault_root: &Path) -> Result<IndexingHandle, AppError> {
    if !vault_root.is_dir() {
        return Err(AppError::Watcher(format!(
            "not a directory: {}",
            vault_root.display()
        )));
    }

    let vault = FsDocumentStore::new(vault_root);
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|e| AppError::Watcher(format!("no async runtime: {e}")))?;
    let watch_root = vault.root().to_path_buf();

    let mut debouncer = new_debouncer(WATCH_DEBOUNCE, move |result: DebounceEventResult| {
        match result {
            Ok(events) => {
                let paths: Vec<PathBuf> = events
                    .into_iter()
                    .filter(|event| {
                        matches!(
                            event.kind,
                            DebouncedEventKind::Any | DebouncedEventKind::AnyContinuous
                        )
                    })
                    .map(|event| event.path)
                    .collect();
                if route_changes(&state, &vault, &paths) {
                    let state = state.clone();
                    runtime.spawn(async move {
                        state.process_queue().await;
                    });
                }
            }
            Err(e) => {
                tracing::warn!(error = ?e, "watcher error");
            }
        }
    })
    .map_err(|e| AppError::Watcher(e.to_string()))?;

    debouncer
        .watcher()
        .watch(&watch_root, notify::RecursiveMode::Recursive)
        .map_err(|e| AppError::Watcher(e.to_string()))?;
    tracing::info!(root = %watch_root.display(), "watching vault for image changes");

    Ok(IndexingHandle {
        _debouncer: debouncer,
    })
}

pub fn stop_watching(handle: IndexingHandle) {
    drop(handle);
}

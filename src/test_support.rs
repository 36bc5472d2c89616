//! Test doubles shared by the unit tests.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use crate::error::AppError;
use crate::models::file_entry::FileEntry;
use crate::models::image::{ImageRecord, Location, OcrResult, TextRegion};
use crate::services::document_store::DocumentStore;
use crate::services::ocr_service::OcrBackend;

pub const VAULT_ROOT: &str = "/vault";

pub fn region(text: &str) -> TextRegion {
    TextRegion {
        text: text.to_string(),
        location: Location {
            left: 0.0,
            top: 0.0,
            right: 10.0,
            bottom: 10.0,
        },
    }
}

pub fn record(path: &str, fingerprint: i64, texts: &[&str]) -> ImageRecord {
    ImageRecord {
        path: path.to_string(),
        fingerprint,
        width: 100.0,
        height: 100.0,
        items: texts.iter().map(|t| region(t)).collect(),
        indexed_at: "2025-01-01T00:00:00Z".to_string(),
    }
}

/// In-memory document store keyed by path with controllable mtimes.
#[derive(Default)]
pub struct MemoryDocumentStore {
    files: Mutex<BTreeMap<String, i64>>,
}

impl MemoryDocumentStore {
    pub fn with_files(files: &[(&str, i64)]) -> Self {
        let store = Self::default();
        for (path, mtime) in files {
            store.put(path, *mtime);
        }
        store
    }

    pub fn put(&self, path: &str, modified_at: i64) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), modified_at);
    }

    pub fn delete(&self, path: &str) {
        self.files.lock().unwrap().remove(path);
    }

    fn entry(path: &str, modified_at: i64) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            extension: Path::new(path)
                .extension()
                .map(|e| e.to_string_lossy().to_string()),
            modified_at,
        }
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn list_files(&self) -> Vec<FileEntry> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .map(|(path, mtime)| Self::entry(path, *mtime))
            .collect()
    }

    fn stat(&self, path: &str) -> Option<FileEntry> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|mtime| Self::entry(path, *mtime))
    }

    fn absolute_path(&self, path: &str) -> PathBuf {
        Path::new(VAULT_ROOT).join(path)
    }
}

/// OCR backend returning canned regions, optionally blocking each call until
/// the test releases it.
pub struct ScriptedOcr {
    responses: Mutex<HashMap<PathBuf, Result<Vec<String>, String>>>,
    calls: Mutex<Vec<PathBuf>>,
    gate: Option<Semaphore>,
    entered: Notify,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedOcr {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn gated() -> Self {
        Self::build(Some(Semaphore::new(0)))
    }

    fn build(gate: Option<Semaphore>) -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            gate,
            entered: Notify::new(),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn respond(&self, path: &str, texts: &[&str]) {
        self.responses.lock().unwrap().insert(
            Path::new(VAULT_ROOT).join(path),
            Ok(texts.iter().map(|t| t.to_string()).collect()),
        );
    }

    pub fn fail(&self, path: &str, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(Path::new(VAULT_ROOT).join(path), Err(message.to_string()));
    }

    /// Lets `n` blocked (or future) calls proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrBackend for ScriptedOcr {
    async fn recognize(&self, image_path: &Path) -> Result<OcrResult, AppError> {
        self.calls.lock().unwrap().push(image_path.to_path_buf());
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.entered.notify_one();

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let scripted = self.responses.lock().unwrap().get(image_path).cloned();
        let texts = match scripted {
            Some(Ok(texts)) => texts,
            Some(Err(message)) => return Err(AppError::Ocr(message)),
            None => vec![format!(
                "text of {}",
                image_path.file_name().unwrap().to_string_lossy()
            )],
        };

        Ok(OcrResult {
            width: 100.0,
            height: 100.0,
            items: texts.iter().map(|t| region(t)).collect(),
        })
    }
}

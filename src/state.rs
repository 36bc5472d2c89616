use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::AppError;
use crate::services::document_store::{DocumentStore, FsDocumentStore};
use crate::services::index_store::IndexStore;
use crate::services::indexing_service::{self, IndexingHandle, ScanReport};
use crate::services::ocr_service::{HttpOcrClient, OcrBackend};
use crate::services::queue_service::{ProcessingQueue, RunSummary};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStatus {
    pub indexed_count: usize,
    pub queue_depth: usize,
    pub is_processing: bool,
}

/// Everything the pipeline owns. One per vault.
pub struct AppState {
    pub store: Arc<IndexStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub queue: Arc<ProcessingQueue>,
    pub watcher_handle: Mutex<Option<IndexingHandle>>,
}

impl AppState {
    pub fn new(
        store: Arc<IndexStore>,
        documents: Arc<dyn DocumentStore>,
        ocr: Arc<dyn OcrBackend>,
        item_delay: Duration,
    ) -> Self {
        let queue = Arc::new(ProcessingQueue::new(
            store.clone(),
            documents.clone(),
            ocr,
            item_delay,
        ));
        Self {
            store,
            documents,
            queue,
            watcher_handle: Mutex::new(None),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let store = Arc::new(IndexStore::open(&config.db_path)?);
        let documents = Arc::new(FsDocumentStore::new(&config.vault_root));
        let ocr = Arc::new(HttpOcrClient::new(
            config.ocr_endpoint.clone(),
            config.ocr_timeout,
        )?);
        tracing::info!(
            vault = %config.vault_root.display(),
            db = %config.db_path.display(),
            endpoint = %ocr.endpoint(),
            indexed = store.len(),
            "opened image index"
        );
        Ok(Self::new(store, documents, ocr, config.item_delay))
    }

    pub fn scan(&self, force: bool) -> ScanReport {
        indexing_service::scan(self.documents.as_ref(), &self.store, &self.queue, force)
    }

    pub fn on_create(&self, path: &str) -> bool {
        indexing_service::on_change(self.documents.as_ref(), &self.store, &self.queue, path)
    }

    pub fn on_modify(&self, path: &str) -> bool {
        indexing_service::on_change(self.documents.as_ref(), &self.store, &self.queue, path)
    }

    pub fn on_delete(&self, path: &str) -> Result<usize, AppError> {
        indexing_service::on_delete(&self.store, &self.queue, path)
    }

    pub async fn process_queue(&self) -> Option<RunSummary> {
        self.queue.run().await
    }

    pub fn status(&self) -> IndexStatus {
        IndexStatus {
            indexed_count: self.store.len(),
            queue_depth: self.queue.queue_depth(),
            is_processing: self.queue.is_processing(),
        }
    }
}

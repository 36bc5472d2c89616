pub mod commands;
pub mod config;
mod data;
pub mod error;
pub mod models;
pub mod services;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;
pub use error::AppError;
pub use models::image::{ImageRecord, Location, OcrResult, TextRegion};
pub use models::search::{HighlightBox, ImageMatch};
pub use services::document_store::{DocumentStore, FsDocumentStore};
pub use services::index_store::{IndexSnapshot, IndexStore};
pub use services::ocr_service::{HttpOcrClient, OcrBackend};
pub use services::queue_service::{ProcessingQueue, QueueProgress, RunSummary, WorkerState};
pub use state::{AppState, IndexStatus};

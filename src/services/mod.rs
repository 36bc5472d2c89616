pub mod document_store;
pub mod index_store;
pub mod indexing_service;
pub mod ocr_service;
pub mod queue_service;
pub mod search_service;

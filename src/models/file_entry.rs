use serde::{Deserialize, Serialize};

/// One file as reported by the document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub extension: Option<String>,
    pub modified_at: i64,
}

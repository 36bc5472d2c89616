use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("OCR error: {0}")]
    Ocr(String),

    #[error("Malformed OCR response: {0}")]
    MalformedResponse(String),

    #[error("File vanished before processing: {0}")]
    VanishedFile(String),

    #[error("Failed to persist index entry for {path}: {source}")]
    Persistence {
        path: String,
        #[source]
        source: Box<AppError>,
    },

    #[error("Watcher error: {0}")]
    Watcher(String),
}

impl AppError {
    pub fn persistence(path: &str, source: AppError) -> Self {
        Self::Persistence {
            path: path.to_string(),
            source: Box::new(source),
        }
    }

    /// Short label used in structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Database(_) => "database",
            Self::Io(_) => "io",
            Self::Serde(_) => "serde",
            Self::Ocr(_) => "backend",
            Self::MalformedResponse(_) => "malformed_response",
            Self::VanishedFile(_) => "vanished_file",
            Self::Persistence { .. } => "persistence",
            Self::Watcher(_) => "watcher",
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::services::ocr_service::{DEFAULT_OCR_ENDPOINT, DEFAULT_OCR_TIMEOUT};
use crate::services::queue_service::DEFAULT_ITEM_DELAY;

const DB_FILE_NAME: &str = "ocr-index.db";

/// Runtime configuration for one vault.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory whose images are indexed
    pub vault_root: PathBuf,
    /// SQLite index location
    pub db_path: PathBuf,
    /// OCR backend URL
    pub ocr_endpoint: String,
    /// Per-request OCR timeout
    pub ocr_timeout: Duration,
    /// Pause between two OCR requests
    pub item_delay: Duration,
    /// Log level used when RUST_LOG is unset
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vault_root: PathBuf::from("."),
            db_path: default_db_path(),
            ocr_endpoint: DEFAULT_OCR_ENDPOINT.to_string(),
            ocr_timeout: DEFAULT_OCR_TIMEOUT,
            item_delay: DEFAULT_ITEM_DELAY,
            log_level: "info".to_string(),
        }
    }
}

fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "ocr-index")
        .map(|dirs| dirs.data_dir().join(DB_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(DB_FILE_NAME))
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        Self::from_vars(&std::env::vars().collect())
    }

    pub fn from_vars(env: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| env.get(key).filter(|v| !v.trim().is_empty()).cloned();
        let millis = |key: &str| {
            get(key).and_then(|raw| match raw.trim().parse::<u64>() {
                Ok(ms) => Some(Duration::from_millis(ms)),
                Err(_) => {
                    tracing::warn!(key, value = %raw, "ignoring non-numeric duration");
                    None
                }
            })
        };

        Self {
            vault_root: get("OCR_INDEX_VAULT")
                .map(PathBuf::from)
                .unwrap_or(defaults.vault_root),
            db_path: get("OCR_INDEX_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            ocr_endpoint: get("OCR_INDEX_ENDPOINT").unwrap_or(defaults.ocr_endpoint),
            ocr_timeout: millis("OCR_INDEX_TIMEOUT_MS").unwrap_or(defaults.ocr_timeout),
            item_delay: millis("OCR_INDEX_DELAY_MS").unwrap_or(defaults.item_delay),
            log_level: get("OCR_INDEX_LOG").unwrap_or(defaults.log_level),
        }
    }
}

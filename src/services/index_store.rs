use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use rusqlite::Connection;

use crate::data::{self, repository};
use crate::error::AppError;
use crate::models::image::ImageRecord;

/// Immutable view of the index at one instant, sorted by path.
pub type IndexSnapshot = Arc<BTreeMap<String, ImageRecord>>;

/// Durable `path -> ImageRecord` mapping.
///
/// Reads are served from an in-memory copy-on-write map; every mutation is
/// written to SQLite first and only published to readers once it is durable,
/// so the in-memory view never gets ahead of what a restart would load.
pub struct IndexStore {
    conn: Mutex<Connection>,
    images: RwLock<IndexSnapshot>,
}

impl IndexStore {
    pub fn open(db_path: &Path) -> Result<Self, AppError> {
        Self::from_connection(data::open_database(db_path)?)
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        Self::from_connection(data::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, AppError> {
        let images: BTreeMap<String, ImageRecord> = repository::load_all_images(&conn)?
            .into_iter()
            .map(|record| (record.path.clone(), record))
            .collect();
        tracing::debug!(count = images.len(), "loaded image index");

        Ok(Self {
            conn: Mutex::new(conn),
            images: RwLock::new(Arc::new(images)),
        })
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        self.images
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn get(&self, path: &str) -> Option<ImageRecord> {
        self.snapshot().get(path).cloned()
    }

    pub fn fingerprint(&self, path: &str) -> Option<i64> {
        self.snapshot().get(path).map(|r| r.fingerprint)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.snapshot().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces the whole record for `record.path`.
    pub fn upsert(&self, record: ImageRecord) -> Result<(), AppError> {
        {
            let conn = self.lock_conn();
            repository::upsert_image(&conn, &record)
                .map_err(|e| AppError::persistence(&record.path, e))?;
        }
        let mut guard = self
            .images
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::make_mut(&mut *guard).insert(record.path.clone(), record);
        Ok(())
    }

    /// Returns whether a record existed.
    pub fn remove(&self, path: &str) -> Result<bool, AppError> {
        if !self.contains(path) {
            return Ok(false);
        }
        {
            let conn = self.lock_conn();
            repository::delete_image(&conn, path).map_err(|e| AppError::persistence(path, e))?;
        }
        let mut guard = self
            .images
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(Arc::make_mut(&mut *guard).remove(path).is_some())
    }

    pub fn clear(&self) -> Result<usize, AppError> {
        let removed = {
            let conn = self.lock_conn();
            repository::clear_images(&conn)?
        };
        let mut guard = self
            .images
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(BTreeMap::new());
        Ok(removed)
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

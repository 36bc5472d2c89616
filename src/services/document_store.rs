use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::models::file_entry::FileEntry;

/// The file collection being indexed. Paths are store-relative and use `/`.
pub trait DocumentStore: Send + Sync {
    fn list_files(&self) -> Vec<FileEntry>;

    /// Current metadata for one file, or `None` when it no longer exists.
    fn stat(&self, path: &str) -> Option<FileEntry>;

    fn absolute_path(&self, path: &str) -> PathBuf;
}

pub fn modified_millis(time: SystemTime) -> i64 {
    chrono::DateTime::<chrono::Utc>::from(time).timestamp_millis()
}

/// A vault directory on the local filesystem.
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps an absolute path back into the store, if it lies under the root.
    pub fn relative_path(&self, absolute: &Path) -> Option<String> {
        let rel = match absolute.strip_prefix(&self.root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => {
                // deleted files cannot be canonicalized, so resolve through the parent
                let parent = absolute.parent()?.canonicalize().ok()?;
                parent
                    .join(absolute.file_name()?)
                    .strip_prefix(&self.root)
                    .ok()?
                    .to_path_buf()
            }
        };
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        if parts.is_empty() {
            return None;
        }
        Some(parts.join("/"))
    }

    /// Files below the store-relative folder `path`, hidden entries skipped.
    pub fn list_folder(&self, path: &str) -> Vec<FileEntry> {
        self.walk(&self.absolute_path(path))
    }

    fn walk(&self, dir: &Path) -> Vec<FileEntry> {
        walkdir::WalkDir::new(dir)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| !is_hidden(e))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let rel = self.relative_path(e.path())?;
                self.entry_for(&rel, e.path())
            })
            .collect()
    }

    fn entry_for(&self, rel: &str, absolute: &Path) -> Option<FileEntry> {
        let metadata = absolute.metadata().ok()?;
        if !metadata.is_file() {
            return None;
        }
        let modified_at = metadata.modified().ok().map(modified_millis).unwrap_or(0);
        Some(FileEntry {
            path: rel.to_string(),
            extension: absolute
                .extension()
                .map(|e| e.to_string_lossy().to_string()),
            modified_at,
        })
    }
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

impl DocumentStore for FsDocumentStore {
    fn list_files(&self) -> Vec<FileEntry> {
        self.walk(&self.root)
    }

    fn stat(&self, path: &str) -> Option<FileEntry> {
        self.entry_for(path, &self.absolute_path(path))
    }

    fn absolute_path(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |acc, part| acc.join(part))
    }
}

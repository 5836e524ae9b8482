//! In-memory mappings from virtual paths to open files and known
//! directory locations.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::file::OpenFile;

/// Where a virtual directory lives: which backing file, which first page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DirLocation {
    pub backing: PathBuf,
    pub page: u64,
}

/// Path-keyed maps, each behind its own lock. Directory entries are
/// insertion-only and live for the lifetime of the filesystem; open-file
/// entries come and go with open/close.
pub(crate) struct Index {
    open_files: Mutex<HashMap<String, Arc<OpenFile>>>,
    dirs: Mutex<HashMap<String, DirLocation>>,
}

impl Index {
    pub(crate) fn new() -> Self {
        Self {
            open_files: Mutex::new(HashMap::new()),
            dirs: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn dir(&self, path: &str) -> Option<DirLocation> {
        self.dirs.lock().await.get(path).cloned()
    }

    /// Registers a directory. A second insert of the same path fails:
    /// every virtual path may be carried by at most one directory record
    /// across all backing files.
    pub(crate) async fn insert_dir(&self, path: String, location: DirLocation) -> Result<()> {
        let mut dirs = self.dirs.lock().await;
        if dirs.contains_key(&path) {
            return Err(Error::DirExists(path));
        }
        dirs.insert(path, location);
        Ok(())
    }

    pub(crate) async fn file(&self, path: &str) -> Option<Arc<OpenFile>> {
        self.open_files.lock().await.get(path).cloned()
    }

    pub(crate) async fn insert_file(&self, path: String, file: Arc<OpenFile>) -> Result<()> {
        let mut open = self.open_files.lock().await;
        if open.contains_key(&path) {
            return Err(Error::FileExists(path));
        }
        open.insert(path, file);
        Ok(())
    }

    /// Drops the open-file entry for `path`, but only while it still maps
    /// to `file`: a stale close must not evict a later opener's entry.
    pub(crate) async fn remove_file_if(&self, path: &str, file: &Arc<OpenFile>) {
        let mut open = self.open_files.lock().await;
        if open.get(path).is_some_and(|held| Arc::ptr_eq(held, file)) {
            open.remove(path);
        }
    }
}

//! Open virtual file state and the handle callers hold onto it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

/// Mode an open virtual file was opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Closed,
    Read,
    Write,
}

impl OpenMode {
    fn as_u8(self) -> u8 {
        match self {
            OpenMode::Closed => 0,
            OpenMode::Read => 1,
            OpenMode::Write => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => OpenMode::Read,
            2 => OpenMode::Write,
            _ => OpenMode::Closed,
        }
    }
}

/// Shared state of one open virtual file.
///
/// Refers to its backing file by host path, not by reference; the
/// filesystem resolves the identifier through its own map.
pub(crate) struct OpenFile {
    pub(crate) backing: PathBuf,
    pub(crate) path: String,
    pub(crate) first_page: u64,
    pub(crate) len: AtomicU64,
    pub(crate) readers: AtomicUsize,
    mode: AtomicU8,
}

impl OpenFile {
    pub(crate) fn new(
        backing: PathBuf,
        path: String,
        first_page: u64,
        len: u64,
        mode: OpenMode,
        readers: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            backing,
            path,
            first_page,
            len: AtomicU64::new(len),
            readers: AtomicUsize::new(readers),
            mode: AtomicU8::new(mode.as_u8()),
        })
    }

    pub(crate) fn mode(&self) -> OpenMode {
        OpenMode::from_u8(self.mode.load(Ordering::SeqCst))
    }

    pub(crate) fn set_mode(&self, mode: OpenMode) {
        self.mode.store(mode.as_u8(), Ordering::SeqCst);
    }
}

/// A handle for an open virtual file.
///
/// Cheap to clone; all clones share one open-file state. A handle must not
/// be used after it has been closed; reads and writes through it return 0
/// from then on.
#[derive(Clone)]
pub struct FileHandle(pub(crate) Arc<OpenFile>);

impl FileHandle {
    /// Full absolute virtual path.
    pub fn path(&self) -> &str {
        &self.0.path
    }

    /// Current content length in bytes.
    pub fn len(&self) -> u64 {
        self.0.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mode the handle is currently in.
    pub fn mode(&self) -> OpenMode {
        self.0.mode()
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.0.path)
            .field("first_page", &self.0.first_page)
            .field("len", &self.len())
            .field("mode", &self.mode())
            .finish()
    }
}

//! The filesystem itself: construction and bootstrap, the public
//! open/create/read/write/close capability, placement of new top-level
//! directories, and the reader/writer exclusion policy.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::Mutex;

use crate::backing::BackingFile;
use crate::dir::DirWalker;
use crate::error::{Error, Result};
use crate::file::{FileHandle, OpenFile, OpenMode};
use crate::index::{DirLocation, Index};
use crate::layout::{PageLayout, WORD};
use crate::page;
use crate::path;
use crate::record::{Record, RecordKind};

/// Most backing files one filesystem may be bound to.
pub const MAX_BACKING_FILES: usize = 5;

/// The virtual filesystem capability.
///
/// `open` admits any number of concurrent readers; `create` admits a
/// single writer and excludes everyone else until the handle is closed.
/// `read` and `write` return how many bytes they actually moved, and 0 on
/// any contract violation (wrong mode, empty buffer, closed handle).
#[async_trait]
pub trait Vfs: Send + Sync {
    /// Opens an existing virtual file for reading. Returns `None` when the
    /// path does not exist or a writer currently holds it.
    async fn open(&self, name: &str) -> Result<Option<FileHandle>>;

    /// Opens or creates a virtual file for writing, creating any missing
    /// directories along the path. Returns `None` while any handle for the
    /// path is outstanding. Existing content is kept; writes append.
    async fn create(&self, name: &str) -> Result<Option<FileHandle>>;

    /// Reads from the start of the file into `buf`, clamped to the file's
    /// length.
    async fn read(&self, file: &FileHandle, buf: &mut [u8]) -> Result<usize>;

    /// Appends `buf` at the file's current end.
    async fn write(&self, file: &FileHandle, buf: &[u8]) -> Result<usize>;

    /// Closes a handle. Read handles are shared: the entry is dropped when
    /// the last reader closes. A write handle is dropped on its first
    /// close.
    async fn close(&self, file: &FileHandle);
}

/// Virtual filesystem packed into a bounded set of page-chained backing
/// files.
pub struct PageFs {
    layout: PageLayout,
    backing: BTreeMap<PathBuf, Arc<BackingFile>>,
    index: Arc<Index>,
    /// Serializes all metadata edits: open, create, close.
    edit: Mutex<()>,
    file_total: Arc<AtomicU64>,
}

impl PageFs {
    /// Builds a filesystem over `files` (host paths, resolved under
    /// `root` when relative) with the default page geometry.
    pub async fn new<I, P, R>(files: I, root: R) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
        R: AsRef<Path>,
    {
        Self::with_layout(files, root, PageLayout::default()).await
    }

    /// Builds a filesystem with explicit page geometry. The geometry must
    /// match whatever previously wrote the backing files.
    pub async fn with_layout<I, P, R>(files: I, root: R, layout: PageLayout) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
        R: AsRef<Path>,
    {
        let files: Vec<PathBuf> = files
            .into_iter()
            .map(|p| p.as_ref().to_path_buf())
            .collect();
        if files.is_empty() {
            return Err(Error::NoBackingFiles);
        }
        if files.len() > MAX_BACKING_FILES {
            return Err(Error::TooManyBackingFiles(files.len()));
        }

        let root = root.as_ref();
        if tokio::fs::metadata(root).await.is_err() {
            tokio::fs::create_dir_all(root)
                .await
                .map_err(|_| Error::RootUnavailable(root.to_path_buf()))?;
        }
        let meta = tokio::fs::metadata(root)
            .await
            .map_err(|_| Error::RootUnavailable(root.to_path_buf()))?;
        if !meta.is_dir() {
            return Err(Error::RootNotADirectory(root.to_path_buf()));
        }
        let root = std::path::absolute(root)?;

        let mut backing = BTreeMap::new();
        for file in files {
            let host = if file.is_relative() {
                root.join(&file)
            } else {
                file
            };
            if backing.contains_key(&host) {
                return Err(Error::DuplicateBackingFile(host));
            }
            if let Some(parent) = host.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            let opened = BackingFile::open(&host).await?;
            if opened.size().await == 0 {
                // Fresh image: zero file header, then the root directory
                // page.
                let n = opened.append(&[0u8; WORD]).await?;
                if n != WORD {
                    return Err(Error::WriteFailed(host));
                }
                page::allocate_page(&opened, layout).await?;
            }
            backing.insert(host, Arc::new(opened));
        }

        let index = Arc::new(Index::new());
        let file_total = Arc::new(AtomicU64::new(0));

        // Each backing file has its own descriptor, so the scans can run
        // in parallel; they only share the lock-guarded index.
        let mut tasks = Vec::with_capacity(backing.len());
        for file in backing.values() {
            let file = Arc::clone(file);
            let index = Arc::clone(&index);
            let file_total = Arc::clone(&file_total);
            tasks.push(tokio::spawn(async move {
                bootstrap(&file, layout, &index, &file_total).await
            }));
        }
        for task in tasks {
            task.await.map_err(std::io::Error::other)??;
        }
        info!(
            "mounted {} backing file(s), {} virtual file(s)",
            backing.len(),
            file_total.load(Ordering::SeqCst)
        );

        Ok(Self {
            layout,
            backing,
            index,
            edit: Mutex::new(()),
            file_total,
        })
    }

    pub fn layout(&self) -> PageLayout {
        self.layout
    }

    /// Number of virtual files across all backing files.
    pub fn virtual_file_count(&self) -> u64 {
        self.file_total.load(Ordering::SeqCst)
    }

    fn backing_for(&self, host: &Path) -> Option<&Arc<BackingFile>> {
        self.backing.get(host)
    }

    /// The backing file currently holding the fewest bytes; new top-level
    /// directories land there.
    async fn smallest_backing(&self) -> (&PathBuf, &Arc<BackingFile>) {
        let mut best: Option<(&PathBuf, &Arc<BackingFile>)> = None;
        let mut best_size = u64::MAX;
        for (host, file) in &self.backing {
            let size = file.size().await;
            if size < best_size {
                best_size = size;
                best = Some((host, file));
            }
        }
        best.expect("a constructed filesystem has at least one backing file")
    }

    /// Walks `parent` up through the known directories, then tries to
    /// resolve the unknown suffix from disk, caching every directory it
    /// finds. Returns the deepest existing ancestor and the prefixes that
    /// remain missing, shallowest first.
    async fn resolve_dirs(&self, parent: &str) -> Result<(String, Vec<String>)> {
        let mut anchor = parent.to_string();
        let mut missing = Vec::new();
        while !path::is_root(&anchor) && self.index.dir(&anchor).await.is_none() {
            missing.push(anchor.clone());
            anchor = path::parent(&anchor).to_string();
        }
        missing.reverse();
        if missing.is_empty() || path::is_root(&anchor) {
            // Top-level directories are all loaded at bootstrap; nothing
            // below the root can resolve a missing one from disk.
            return Ok((anchor, missing));
        }

        let Some(mut location) = self.index.dir(&anchor).await else {
            return Ok((anchor, missing));
        };
        let Some(backing) = self.backing_for(&location.backing) else {
            return Ok((anchor, missing));
        };
        let walker = DirWalker::new(backing, self.layout);
        let mut resolved = 0;
        for target in &missing {
            match walker.lookup(location.page, target, RecordKind::Dir).await? {
                Some(entry_page) => {
                    location = DirLocation {
                        backing: location.backing.clone(),
                        page: entry_page,
                    };
                    self.index.insert_dir(target.clone(), location.clone()).await?;
                    anchor = target.clone();
                    resolved += 1;
                }
                None => break,
            }
        }
        missing.drain(..resolved);
        Ok((anchor, missing))
    }

    /// Increments the backing file's stored virtual-file count.
    async fn bump_file_header(&self, backing: &BackingFile) -> Result<()> {
        let mut header = [0u8; WORD];
        let n = backing.read_at(&mut header, 0).await?;
        if n != WORD {
            return Err(Error::ReadFailed(backing.path().to_path_buf()));
        }
        let count = u64::from_le_bytes(header) + 1;
        let n = backing.write_at(&count.to_le_bytes(), 0).await?;
        if n != WORD {
            return Err(Error::WriteFailed(backing.path().to_path_buf()));
        }
        self.file_total.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Scans one backing file's root chain, registering every directory
/// record. File records are skipped on purpose; files enter the index
/// lazily when opened.
async fn bootstrap(
    backing: &BackingFile,
    layout: PageLayout,
    index: &Index,
    file_total: &AtomicU64,
) -> Result<()> {
    let mut header = [0u8; WORD];
    let n = backing.read_at(&mut header, 0).await?;
    if n != WORD {
        return Err(Error::ReadFailed(backing.path().to_path_buf()));
    }
    let files = u64::from_le_bytes(header);
    if files == 0 {
        // Directory records only ever appear alongside at least one file
        // record, so an empty header means an empty root chain.
        return Ok(());
    }
    file_total.fetch_add(files, Ordering::SeqCst);

    let mut dirs = 0usize;
    let mut page = 0u64;
    loop {
        let buf = page::read_page(backing, layout, page).await?;
        let mut pos = 0usize;
        loop {
            let (record, next_pos) = crate::record::decode(layout, &buf, pos)?;
            match record {
                Record::Dir { name, page: first } => {
                    index
                        .insert_dir(
                            name,
                            DirLocation {
                                backing: backing.path().to_path_buf(),
                                page: first,
                            },
                        )
                        .await?;
                    dirs += 1;
                }
                Record::File { .. } => {}
                Record::End => break,
            }
            if next_pos == 0 || next_pos >= layout.record_bound() {
                break;
            }
            pos = next_pos;
        }
        page = page::next_page(layout, &buf);
        if page == 0 {
            break;
        }
    }
    debug!(
        "{}: {} file(s), {} top-level dir(s)",
        backing.path().display(),
        files,
        dirs
    );
    Ok(())
}

#[async_trait]
impl Vfs for PageFs {
    async fn open(&self, name: &str) -> Result<Option<FileHandle>> {
        let v_path = path::normalize(name);
        // Files live only in nested directories, never in the root.
        if path::is_root(&v_path) || path::is_root(path::parent(&v_path)) {
            return Ok(None);
        }

        let _edit = self.edit.lock().await;

        if let Some(existing) = self.index.file(&v_path).await {
            if existing.mode() != OpenMode::Read {
                return Ok(None);
            }
            existing.readers.fetch_add(1, Ordering::SeqCst);
            return Ok(Some(FileHandle(existing)));
        }

        let parent = path::parent(&v_path).to_string();
        let (_, missing) = self.resolve_dirs(&parent).await?;
        if !missing.is_empty() {
            return Ok(None);
        }
        let Some(location) = self.index.dir(&parent).await else {
            return Ok(None);
        };
        let Some(backing) = self.backing_for(&location.backing) else {
            return Ok(None);
        };

        let walker = DirWalker::new(backing, self.layout);
        let Some(first_page) = walker
            .lookup(location.page, &v_path, RecordKind::File)
            .await?
        else {
            return Ok(None);
        };
        let buf = page::read_page(backing, self.layout, first_page).await?;
        let len = page::data_length(&buf);

        let open = OpenFile::new(
            location.backing.clone(),
            v_path.clone(),
            first_page,
            len,
            OpenMode::Read,
            1,
        );
        self.index.insert_file(v_path, Arc::clone(&open)).await?;
        Ok(Some(FileHandle(open)))
    }

    async fn create(&self, name: &str) -> Result<Option<FileHandle>> {
        let v_path = path::normalize(name);
        if path::is_root(&v_path) || path::is_root(path::parent(&v_path)) {
            return Ok(None);
        }

        let _edit = self.edit.lock().await;

        // Any outstanding handle, reader or writer, excludes a new writer.
        if self.index.file(&v_path).await.is_some() {
            return Ok(None);
        }

        let parent = path::parent(&v_path).to_string();
        let (anchor, missing) = self.resolve_dirs(&parent).await?;

        // Placement: a path whose top directory does not exist yet starts
        // a new tree in the emptiest backing file; otherwise everything
        // stays in the ancestor's backing file.
        let (host, backing) = if path::is_root(&anchor) {
            let (host, backing) = self.smallest_backing().await;
            (host.clone(), Arc::clone(backing))
        } else {
            let Some(location) = self.index.dir(&anchor).await else {
                return Ok(None);
            };
            let Some(backing) = self.backing_for(&location.backing) else {
                return Ok(None);
            };
            (location.backing, Arc::clone(backing))
        };
        let walker = DirWalker::new(&backing, self.layout);

        // The record may already exist on disk from an earlier session.
        let existing_page = if missing.is_empty() {
            match self.index.dir(&parent).await {
                Some(location) => {
                    walker
                        .lookup(location.page, &v_path, RecordKind::File)
                        .await?
                }
                None => None,
            }
        } else {
            None
        };

        let _guard = backing.mutation_guard().await;

        // Create every missing directory, shallowest first.
        let mut dir_page = if path::is_root(&anchor) {
            0
        } else {
            match self.index.dir(&anchor).await {
                Some(location) => location.page,
                None => return Ok(None),
            }
        };
        for dir in &missing {
            dir_page = walker.append_entry(dir_page, RecordKind::Dir, dir).await?;
            self.index
                .insert_dir(
                    dir.clone(),
                    DirLocation {
                        backing: host.clone(),
                        page: dir_page,
                    },
                )
                .await?;
            debug!("created directory {dir} at page {dir_page}");
        }

        let (first_page, len) = match existing_page {
            Some(existing) => {
                let buf = page::read_page(&backing, self.layout, existing).await?;
                (existing, page::data_length(&buf))
            }
            None => {
                let entry_page = walker.append_entry(dir_page, RecordKind::File, &v_path).await?;
                self.bump_file_header(&backing).await?;
                (entry_page, 0)
            }
        };

        let open = OpenFile::new(host, v_path.clone(), first_page, len, OpenMode::Write, 0);
        self.index.insert_file(v_path, Arc::clone(&open)).await?;
        Ok(Some(FileHandle(open)))
    }

    async fn read(&self, file: &FileHandle, buf: &mut [u8]) -> Result<usize> {
        let state = &file.0;
        if buf.is_empty() || state.mode() != OpenMode::Read {
            return Ok(0);
        }
        let Some(backing) = self.backing_for(&state.backing) else {
            return Ok(0);
        };

        let len = (buf.len() as u64).min(state.len.load(Ordering::SeqCst)) as usize;
        if len == 0 {
            return Ok(0);
        }

        // Payload of the first page starts just past the length prefix.
        let first_base = self.layout.page_offset(state.first_page) + WORD as u64;
        let first_payload = self.layout.first_payload();
        if len <= first_payload {
            let n = backing.read_at(&mut buf[..len], first_base).await?;
            if n != len {
                return Err(Error::ReadFailed(state.backing.clone()));
            }
            return Ok(len);
        }

        let n = backing.read_at(&mut buf[..first_payload], first_base).await?;
        if n != first_payload {
            return Err(Error::ReadFailed(state.backing.clone()));
        }
        let mut done = first_payload;
        let mut current = state.first_page;
        while done < len {
            current = page::next_page_of(backing, self.layout, current).await?;
            if current == 0 {
                break;
            }
            let take = (len - done).min(self.layout.cont_payload());
            let n = backing
                .read_at(&mut buf[done..done + take], self.layout.page_offset(current))
                .await?;
            if n != take {
                return Err(Error::ReadFailed(state.backing.clone()));
            }
            done += take;
        }
        Ok(done)
    }

    async fn write(&self, file: &FileHandle, buf: &[u8]) -> Result<usize> {
        let state = &file.0;
        if buf.is_empty() || state.mode() != OpenMode::Write {
            return Ok(0);
        }
        let Some(backing) = self.backing_for(&state.backing) else {
            return Ok(0);
        };

        let _guard = backing.mutation_guard().await;

        let old_len = state.len.load(Ordering::SeqCst);
        let first_payload = self.layout.first_payload() as u64;
        let cont_payload = self.layout.cont_payload() as u64;

        // Walk to the chain's tail page.
        let mut tail = state.first_page;
        loop {
            let next = page::next_page_of(backing, self.layout, tail).await?;
            if next == 0 {
                break;
            }
            tail = next;
        }
        // First free byte within the tail. The first page's payload sits
        // behind the length prefix; continuation payloads start at 0.
        let tail_off = if old_len <= first_payload {
            WORD as u64 + old_len
        } else {
            let over = (old_len - first_payload) % cont_payload;
            if over == 0 {
                cont_payload
            } else {
                over
            }
        };

        let mut written = 0usize;
        let room = (self.layout.page_size() as u64 - WORD as u64 - tail_off) as usize;
        if room > 0 {
            let take = buf.len().min(room);
            let n = backing
                .write_at(&buf[..take], self.layout.page_offset(tail) + tail_off)
                .await?;
            if n != take {
                return Err(Error::WriteFailed(state.backing.clone()));
            }
            written = take;
        }
        while written < buf.len() {
            let fresh = page::allocate_page(backing, self.layout).await?;
            page::set_next_page(backing, self.layout, tail, fresh).await?;
            tail = fresh;
            let take = (buf.len() - written).min(cont_payload as usize);
            let n = backing
                .write_at(&buf[written..written + take], self.layout.page_offset(tail))
                .await?;
            if n != take {
                return Err(Error::WriteFailed(state.backing.clone()));
            }
            written += take;
        }

        let new_len = old_len + written as u64;
        state.len.store(new_len, Ordering::SeqCst);
        page::set_data_length(backing, self.layout, state.first_page, new_len).await?;
        Ok(written)
    }

    async fn close(&self, file: &FileHandle) {
        let state = &file.0;
        if state.mode() == OpenMode::Closed {
            return;
        }
        if state.readers.load(Ordering::SeqCst) > 0
            && state.readers.fetch_sub(1, Ordering::SeqCst) > 1
        {
            // Other readers still hold the file.
            return;
        }

        let _edit = self.edit.lock().await;
        state.set_mode(OpenMode::Closed);
        self.index.remove_file_if(&state.path, state).await;
    }
}

impl std::fmt::Debug for PageFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageFs")
            .field("backing", &self.backing.keys().collect::<Vec<_>>())
            .field("layout", &self.layout)
            .finish()
    }
}

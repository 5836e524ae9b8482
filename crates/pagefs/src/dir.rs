//! Directory chain traversal and record insertion over one backing file.

use log::debug;

use crate::backing::BackingFile;
use crate::error::{Error, Result};
use crate::layout::PageLayout;
use crate::page;
use crate::record::{self, RecordKind};

/// Walks the chained directory pages of a single backing file.
pub(crate) struct DirWalker<'a> {
    backing: &'a BackingFile,
    layout: PageLayout,
}

impl<'a> DirWalker<'a> {
    pub(crate) fn new(backing: &'a BackingFile, layout: PageLayout) -> Self {
        Self { backing, layout }
    }

    /// Resolves `path` to its entry's first page by scanning the directory
    /// chain starting at `first_page`.
    pub(crate) async fn lookup(
        &self,
        first_page: u64,
        path: &str,
        kind: RecordKind,
    ) -> Result<Option<u64>> {
        let mut page = first_page;
        loop {
            let buf = page::read_page(self.backing, self.layout, page).await?;
            if let Some(entry) = record::find(self.layout, &buf, path, kind)? {
                return Ok(Some(entry));
            }
            page = page::next_page(self.layout, &buf);
            if page == 0 {
                return Ok(None);
            }
        }
    }

    /// Appends a new entry record to the directory chain rooted at
    /// `dir_page` and returns the entry's freshly allocated first page.
    ///
    /// The record lands right after the last record of the chain's tail
    /// page; when it would reach into the chain link, a new directory page
    /// is linked in and the record starts that page instead.
    pub(crate) async fn append_entry(
        &self,
        dir_page: u64,
        kind: RecordKind,
        path: &str,
    ) -> Result<u64> {
        if record::encoded_len(path) > self.layout.record_bound() {
            return Err(Error::PathTooLong(path.to_string()));
        }

        let mut tail = dir_page;
        let mut buf = page::read_page(self.backing, self.layout, tail).await?;
        loop {
            let next = page::next_page(self.layout, &buf);
            if next == 0 {
                break;
            }
            tail = next;
            buf = page::read_page(self.backing, self.layout, tail).await?;
        }

        let entry_page = page::allocate_page(self.backing, self.layout).await?;
        let encoded = record::encode(kind, path, entry_page);
        let end = record::record_end(self.layout, &buf);

        let record_pos = if encoded.len() <= self.layout.record_bound() - end {
            self.layout.page_offset(tail) + end as u64
        } else {
            let fresh = page::allocate_page(self.backing, self.layout).await?;
            page::set_next_page(self.backing, self.layout, tail, fresh).await?;
            debug!(
                "directory chain of page {} grew a page ({})",
                dir_page, fresh
            );
            self.layout.page_offset(fresh)
        };
        let n = self.backing.write_at(&encoded, record_pos).await?;
        if n != encoded.len() {
            return Err(Error::WriteFailed(self.backing.path().to_path_buf()));
        }
        Ok(entry_page)
    }
}

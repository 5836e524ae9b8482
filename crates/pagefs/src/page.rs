//! Page-level I/O over a backing file: exact page reads, chain links,
//! content length prefixes, and allocation of fresh pages.

use crate::backing::BackingFile;
use crate::error::{Error, Result};
use crate::layout::{PageLayout, WORD};
use crate::record::read_word;

/// Reads one whole page; anything short of a full page is an error.
pub(crate) async fn read_page(
    backing: &BackingFile,
    layout: PageLayout,
    page: u64,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; layout.page_size()];
    let n = backing.read_at(&mut buf, layout.page_offset(page)).await?;
    if n != layout.page_size() {
        return Err(Error::ReadFailed(backing.path().to_path_buf()));
    }
    Ok(buf)
}

/// Next-page link from an in-memory page buffer (0 = end of chain).
pub(crate) fn next_page(layout: PageLayout, page_buf: &[u8]) -> u64 {
    read_word(page_buf, layout.page_size() - WORD)
}

/// Reads a page's next-page link straight from disk.
pub(crate) async fn next_page_of(
    backing: &BackingFile,
    layout: PageLayout,
    page: u64,
) -> Result<u64> {
    let mut buf = [0u8; WORD];
    let n = backing.read_at(&mut buf, layout.link_offset(page)).await?;
    if n != WORD {
        return Err(Error::ReadFailed(backing.path().to_path_buf()));
    }
    Ok(u64::from_le_bytes(buf))
}

/// Points a page's next-page link at `next`.
pub(crate) async fn set_next_page(
    backing: &BackingFile,
    layout: PageLayout,
    page: u64,
    next: u64,
) -> Result<()> {
    let n = backing
        .write_at(&next.to_le_bytes(), layout.link_offset(page))
        .await?;
    if n != WORD {
        return Err(Error::WriteFailed(backing.path().to_path_buf()));
    }
    Ok(())
}

/// Content length prefix of a file chain's first page.
pub(crate) fn data_length(page_buf: &[u8]) -> u64 {
    read_word(page_buf, 0)
}

/// Stores the content length prefix on a file chain's first page.
pub(crate) async fn set_data_length(
    backing: &BackingFile,
    layout: PageLayout,
    page: u64,
    len: u64,
) -> Result<()> {
    let n = backing
        .write_at(&len.to_le_bytes(), layout.page_offset(page))
        .await?;
    if n != WORD {
        return Err(Error::WriteFailed(backing.path().to_path_buf()));
    }
    Ok(())
}

/// Appends one zeroed page and returns its index, computed from the file
/// size after the append. Pages are only ever appended, so indexes grow
/// monotonically and chains stay acyclic.
pub(crate) async fn allocate_page(backing: &BackingFile, layout: PageLayout) -> Result<u64> {
    let zeroes = vec![0u8; layout.page_size()];
    let n = backing.append(&zeroes).await?;
    if n != layout.page_size() {
        return Err(Error::WriteFailed(backing.path().to_path_buf()));
    }
    Ok(layout.page_count(backing.size().await) - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fresh_backing(dir: &tempfile::TempDir) -> BackingFile {
        let backing = BackingFile::open(dir.path().join("b.vfs")).await.unwrap();
        // file header
        backing.append(&[0u8; WORD]).await.unwrap();
        backing
    }

    #[tokio::test]
    async fn test_allocate_returns_ascending_indexes() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = PageLayout::default();
        let backing = fresh_backing(&tmp).await;

        assert_eq!(allocate_page(&backing, layout).await.unwrap(), 0);
        assert_eq!(allocate_page(&backing, layout).await.unwrap(), 1);
        assert_eq!(allocate_page(&backing, layout).await.unwrap(), 2);
        assert_eq!(
            backing.size().await,
            WORD as u64 + 3 * layout.page_size() as u64
        );
    }

    #[tokio::test]
    async fn test_chain_links() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = PageLayout::default();
        let backing = fresh_backing(&tmp).await;

        let a = allocate_page(&backing, layout).await.unwrap();
        let b = allocate_page(&backing, layout).await.unwrap();

        assert_eq!(next_page_of(&backing, layout, a).await.unwrap(), 0);
        set_next_page(&backing, layout, a, b).await.unwrap();
        assert_eq!(next_page_of(&backing, layout, a).await.unwrap(), b);

        let buf = read_page(&backing, layout, a).await.unwrap();
        assert_eq!(next_page(layout, &buf), b);
    }

    #[tokio::test]
    async fn test_data_length_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = PageLayout::default();
        let backing = fresh_backing(&tmp).await;

        let page = allocate_page(&backing, layout).await.unwrap();
        set_data_length(&backing, layout, page, 1234).await.unwrap();
        let buf = read_page(&backing, layout, page).await.unwrap();
        assert_eq!(data_length(&buf), 1234);
    }

    #[tokio::test]
    async fn test_short_page_read_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = PageLayout::default();
        let backing = fresh_backing(&tmp).await;
        backing.append(&[0u8; 100]).await.unwrap();

        assert!(matches!(
            read_page(&backing, layout, 0).await,
            Err(Error::ReadFailed(_))
        ));
    }
}

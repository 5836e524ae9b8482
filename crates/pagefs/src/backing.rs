// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Byte-addressable I/O on one host file.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::Result;

struct Io {
    file: tokio::fs::File,
    size: u64,
}

/// One host file owned exclusively by the filesystem.
///
/// Individual reads and writes serialize on an inner lock so concurrent
/// page operations observe a consistent size and cursor. Multi-step
/// mutation sequences (creating entries, chained writes) additionally hold
/// the guard returned by [`BackingFile::mutation_guard`], which keeps other
/// mutators out between the steps without requiring a reentrant lock.
pub struct BackingFile {
    path: PathBuf,
    io: Mutex<Io>,
    mutation: Mutex<()>,
}

impl BackingFile {
    /// Opens (creating if absent) the host file at `path`.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;
        let size = file.metadata().await?.len();
        Ok(Self {
            path,
            io: Mutex::new(Io { file, size }),
            mutation: Mutex::new(()),
        })
    }

    /// Reads up to `buf.len()` bytes at `pos`, clamped at end of file.
    /// Returns the number of bytes actually read (0 if `pos` is at or past
    /// the end).
    pub async fn read_at(&self, buf: &mut [u8], pos: u64) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut io = self.io.lock().await;
        if pos >= io.size {
            return Ok(0);
        }
        let take = buf.len().min((io.size - pos) as usize);
        io.file.seek(SeekFrom::Start(pos)).await?;
        io.file.read_exact(&mut buf[..take]).await?;
        Ok(take)
    }

    /// Writes `buf` at `pos`, extending the file when the write reaches
    /// past the current end. Writes that *start* past the end are rejected
    /// with a 0 return.
    pub async fn write_at(&self, buf: &[u8], pos: u64) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut io = self.io.lock().await;
        if pos > io.size {
            return Ok(0);
        }
        io.file.seek(SeekFrom::Start(pos)).await?;
        io.file.write_all(buf).await?;
        io.file.flush().await?;
        let end = pos + buf.len() as u64;
        if end > io.size {
            io.size = end;
        }
        Ok(buf.len())
    }

    /// Appends `buf` at the current end of file.
    pub async fn append(&self, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut io = self.io.lock().await;
        let pos = io.size;
        io.file.seek(SeekFrom::Start(pos)).await?;
        io.file.write_all(buf).await?;
        io.file.flush().await?;
        io.size = pos + buf.len() as u64;
        Ok(buf.len())
    }

    /// Current size in bytes.
    pub async fn size(&self) -> u64 {
        self.io.lock().await.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serializes multi-step mutation sequences against this file. Held
    /// across entry creation and chained writes; individual page reads do
    /// not take it.
    pub async fn mutation_guard(&self) -> MutexGuard<'_, ()> {
        self.mutation.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let backing = BackingFile::open(tmp.path().join("b.vfs")).await.unwrap();

        assert_eq!(backing.append(b"hello world").await.unwrap(), 11);
        assert_eq!(backing.size().await, 11);

        let mut buf = [0u8; 5];
        assert_eq!(backing.read_at(&mut buf, 6).await.unwrap(), 5);
        assert_eq!(&buf, b"world");
    }

    #[tokio::test]
    async fn test_read_clamps_at_eof() {
        let tmp = tempfile::tempdir().unwrap();
        let backing = BackingFile::open(tmp.path().join("b.vfs")).await.unwrap();
        backing.append(b"abc").await.unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(backing.read_at(&mut buf, 1).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"bc");
        assert_eq!(backing.read_at(&mut buf, 3).await.unwrap(), 0);
        assert_eq!(backing.read_at(&mut buf, 100).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_write_past_end_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let backing = BackingFile::open(tmp.path().join("b.vfs")).await.unwrap();
        backing.append(b"abc").await.unwrap();

        assert_eq!(backing.write_at(b"x", 4).await.unwrap(), 0);
        // Writing exactly at the end extends.
        assert_eq!(backing.write_at(b"d", 3).await.unwrap(), 1);
        assert_eq!(backing.size().await, 4);
    }

    #[tokio::test]
    async fn test_reopen_recovers_size() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("b.vfs");
        {
            let backing = BackingFile::open(&path).await.unwrap();
            backing.append(&[7u8; 100]).await.unwrap();
        }
        let backing = BackingFile::open(&path).await.unwrap();
        assert_eq!(backing.size().await, 100);
    }
}

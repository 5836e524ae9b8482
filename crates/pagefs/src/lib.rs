//! Virtual filesystem packed into a bounded set of host "backing files".
//!
//! Virtual paths (`/a/b/c`) resolve to handles for reading or writing, while
//! the actual bytes live inside at most [`MAX_BACKING_FILES`] host files.
//! Each backing file is a sequence of fixed-size pages behind an 8-byte
//! header; the last 8 bytes of every page link to the next page of the same
//! chain (0 = end). Directory pages pack `[type][name_len][name][page]`
//! records; file chains start with an 8-byte length prefix followed by
//! payload. All on-disk integers are little-endian `u64`.
//!
//! Concurrency model: one writer *or* any number of readers per virtual
//! file. Metadata edits (`open`/`create`/`close`) serialize on a global
//! lock; page I/O serializes per backing file.

#![allow(dead_code)]
#![allow(unused_imports)]

mod backing;
mod dir;
mod error;
mod file;
mod fs;
mod index;
mod layout;
mod page;
mod path;
mod record;

pub use backing::BackingFile;
pub use error::{Error, Result};
pub use file::{FileHandle, OpenMode};
pub use fs::{PageFs, Vfs, MAX_BACKING_FILES};
pub use layout::{PageLayout, WORD};

#[cfg(test)]
mod tests;

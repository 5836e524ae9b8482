use std::path::PathBuf;

/// Filesystem error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Constructed with an empty backing file list
    #[error("no backing files were supplied")]
    NoBackingFiles,

    /// More backing files than the filesystem supports
    #[error("too many backing files: {0}")]
    TooManyBackingFiles(usize),

    /// The root host path exists but is not a directory
    #[error("root is not a directory: {0}")]
    RootNotADirectory(PathBuf),

    /// The root host directory could not be created
    #[error("root directory unavailable: {0}")]
    RootUnavailable(PathBuf),

    /// The same host path was supplied twice
    #[error("backing file already exists: {0}")]
    DuplicateBackingFile(PathBuf),

    /// A virtual file with this path is already indexed
    #[error("file already exists: {0}")]
    FileExists(String),

    /// A virtual directory with this path is already indexed
    #[error("directory already exists: {0}")]
    DirExists(String),

    /// A read that had to be exact came back short
    #[error("reading failed: {0}")]
    ReadFailed(PathBuf),

    /// A write that had to be exact came back short
    #[error("writing failed: {0}")]
    WriteFailed(PathBuf),

    /// The virtual path is too long for a metadata record to fit in a page
    #[error("virtual path too long: {0}")]
    PathTooLong(String),

    /// A directory page holds a record with an unknown type byte
    #[error("corrupt metadata record (type byte {0:#04x})")]
    CorruptRecord(u8),

    /// Host I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for filesystem operations
pub type Result<T> = std::result::Result<T, Error>;

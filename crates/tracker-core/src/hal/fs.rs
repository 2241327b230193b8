//! Flash filesystem interface

use serde::Serialize;
use thiserror::Error;

/// Filesystem errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("File not found")]
    NotFound,

    #[error("File already exists")]
    AlreadyExists,

    #[error("File is protected")]
    Protected,

    /// Recoverable: the device parks in `LogFileFull`
    #[error("Filesystem full")]
    FilesystemFull,

    #[error("Invalid file handle")]
    InvalidHandle,

    #[error("Operation not permitted in this open mode")]
    InvalidMode,

    #[error("Filesystem not mounted")]
    NotMounted,

    #[error("I/O error: {0}")]
    Io(String),
}

/// Fixed file identifiers
pub type FileId = u8;

pub mod file_id {
    use super::FileId;

    pub const CONF_PRIMARY: FileId = 0;
    pub const CONF_SECONDARY: FileId = 1;
    pub const APP_FIRM_IMAGE: FileId = 2;
    pub const LOG: FileId = 5;
    pub const CONF_COMMANDS: FileId = 6;
    pub const ARTIC_FIRM_IMAGE: FileId = 7;
}

/// Open mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsMode {
    ReadOnly,
    /// Append to an existing file
    WriteOnly,
    /// Create a new fill-mode file
    Create,
    /// Create a new file that wraps when storage is exhausted
    CreateCircular,
}

/// Opaque handle returned by `open`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileStat {
    pub size: u32,
    pub protected: bool,
    pub circular: bool,
}

pub trait FileSystem: Send {
    fn mount(&mut self) -> Result<(), FsError>;
    fn format(&mut self) -> Result<(), FsError>;
    fn open(&mut self, id: FileId, mode: FsMode) -> Result<FileHandle, FsError>;
    fn close(&mut self, handle: FileHandle) -> Result<(), FsError>;
    fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> Result<usize, FsError>;
    fn write(&mut self, handle: FileHandle, data: &[u8]) -> Result<usize, FsError>;
    fn flush(&mut self, handle: FileHandle) -> Result<(), FsError>;
    /// Set the read position of a read-only handle
    fn seek(&mut self, handle: FileHandle, offset: u32) -> Result<(), FsError>;
    fn stat(&self, id: FileId) -> Result<FileStat, FsError>;
    fn delete(&mut self, id: FileId) -> Result<(), FsError>;
    fn protect(&mut self, id: FileId) -> Result<(), FsError>;
    fn unprotect(&mut self, id: FileId) -> Result<(), FsError>;
}

/// Read a whole file into memory
pub fn read_all(fs: &mut dyn FileSystem, id: FileId) -> Result<Vec<u8>, FsError> {
    let stat = fs.stat(id)?;
    let handle = fs.open(id, FsMode::ReadOnly)?;
    let mut data = vec![0u8; stat.size as usize];
    let mut filled = 0;

    let result = loop {
        if filled == data.len() {
            break Ok(());
        }
        match fs.read(handle, &mut data[filled..]) {
            Ok(0) => break Ok(()),
            Ok(n) => filled += n,
            Err(e) => break Err(e),
        }
    };

    fs.close(handle)?;
    result?;
    data.truncate(filled);
    Ok(data)
}

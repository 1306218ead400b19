pub mod tempfs;

pub type INodeNum = u64;

/// Represents an open file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHandle {
    /// inode number of this file
    pub inode: INodeNum,
    /// allows filesystem to store its own metadata about open files
    pub fs_data: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// no file behind the handle
    NotFound,
    /// no space left on device
    NoSpace,
    /// error from the device underneath the filesystem
    Io,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::NoSpace => write!(f, "no space left on device"),
            Self::Io => write!(f, "I/O error"),
        }
    }
}

impl core::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;

/// Positional file access, as needed to page memory-mapped files in and out.
pub trait FileIo: Send {
    /// Read from file into buf at offset.
    ///
    /// Returns the number of bytes read, which is short if the file ends before `buf` is full.
    fn read_at(&mut self, file: FileHandle, offset: u64, buf: &mut [u8]) -> Result<usize>;
    /// Write to file from buf at offset, extending the file if needed.
    fn write_at(&mut self, file: FileHandle, offset: u64, buf: &[u8]) -> Result<usize>;
}

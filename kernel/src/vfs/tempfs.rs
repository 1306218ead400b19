use crate::vfs::{Error, FileHandle, FileIo, INodeNum, Result};
use alloc::{collections::BTreeMap, vec::Vec};
use core::cmp::min;

/// In-memory file store used as backing for memory-mapped files when no disk filesystem is
/// mounted.
pub struct TempFs {
    files: BTreeMap<INodeNum, Vec<u8>>,
    next_inode: INodeNum,
}

const ROOT_INO: INodeNum = 1;

impl Default for TempFs {
    fn default() -> Self {
        Self::new()
    }
}

impl TempFs {
    pub fn new() -> Self {
        Self {
            files: BTreeMap::new(),
            next_inode: ROOT_INO + 1,
        }
    }

    /// Create a file holding `data` and return an open handle to it.
    pub fn create(&mut self, data: &[u8]) -> FileHandle {
        let inode = self.next_inode;
        self.next_inode += 1;
        self.files.insert(inode, data.to_vec());
        FileHandle { inode, fs_data: 0 }
    }

    /// Current contents of the file, or `None` if the handle is stale.
    pub fn contents(&self, file: FileHandle) -> Option<&[u8]> {
        self.files.get(&file.inode).map(Vec::as_slice)
    }
}

impl FileIo for TempFs {
    fn read_at(&mut self, file: FileHandle, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let data = self.files.get(&file.inode).ok_or(Error::NotFound)?;
        let Ok(offset) = usize::try_from(offset) else {
            return Ok(0);
        };
        if offset >= data.len() {
            return Ok(0);
        }
        let n = min(buf.len(), data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&mut self, file: FileHandle, offset: u64, buf: &[u8]) -> Result<usize> {
        let data = self.files.get_mut(&file.inode).ok_or(Error::NotFound)?;
        let offset = usize::try_from(offset).map_err(|_| Error::NoSpace)?;
        let end = offset.checked_add(buf.len()).ok_or(Error::NoSpace)?;
        if end > data.len() {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(buf);
        Ok(buf.len())
    }
}

use super::block_error::BlockError;
use alloc::{string::String, vec, vec::Vec};
use core::fmt;

/// Size of a block device sector in bytes.
///
/// All IDE disks use this sector size, as do most USB and SCSI disks.
pub const BLOCK_SECTOR_SIZE: usize = 512;

/// Index of a block device sector.
///
/// Good enough for devices up to 2 TB.
pub type BlockSector = u32;

/// Sector-granular access to a block device.
pub trait BlockDevice: Send {
    /// Reads sector `sector` into `buf`, which must be exactly `BLOCK_SECTOR_SIZE` bytes.
    fn read(&mut self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError>;
    /// Writes `buf`, which must be exactly `BLOCK_SECTOR_SIZE` bytes, to sector `sector`.
    fn write(&mut self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError>;
    /// The size of the device in sectors.
    fn size(&self) -> BlockSector;
}

/// A block device kept entirely in memory. Used as the swap device until the ATA driver is
/// wired up, and by tests.
pub struct MemoryBlock {
    name: String,
    data: Vec<u8>,
    read_count: u32,
    write_count: u32,
}

impl MemoryBlock {
    pub fn new(name: &str, sectors: BlockSector) -> Self {
        Self {
            name: String::from(name),
            data: vec![0; sectors as usize * BLOCK_SECTOR_SIZE],
            read_count: 0,
            write_count: 0,
        }
    }

    pub fn read_count(&self) -> u32 {
        self.read_count
    }

    pub fn write_count(&self) -> u32 {
        self.write_count
    }

    /// Byte range of `sector`, after validating it against the device and `buf_len`.
    fn sector_range(
        &self,
        sector: BlockSector,
        buf_len: usize,
    ) -> Result<core::ops::Range<usize>, BlockError> {
        if buf_len != BLOCK_SECTOR_SIZE {
            return Err(BlockError::BufferInvalid);
        }
        if sector >= self.size() {
            return Err(BlockError::SectorOutOfBounds);
        }
        let start = sector as usize * BLOCK_SECTOR_SIZE;
        Ok(start..start + BLOCK_SECTOR_SIZE)
    }
}

impl BlockDevice for MemoryBlock {
    fn read(&mut self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError> {
        let range = self.sector_range(sector, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        self.read_count += 1;
        Ok(())
    }

    fn write(&mut self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError> {
        let range = self.sector_range(sector, buf.len())?;
        self.data[range].copy_from_slice(buf);
        self.write_count += 1;
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn size(&self) -> BlockSector {
        (self.data.len() / BLOCK_SECTOR_SIZE) as BlockSector
    }
}

impl fmt::Display for MemoryBlock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "\"{}\": {:04} sectors, {:04} read, {:04} write",
            self.name,
            self.size(),
            self.read_count,
            self.write_count
        )
    }
}

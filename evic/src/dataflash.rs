use crate::chunk::spans;
use crate::command::{byte_sum, Commander};
use crate::device::{MemoryRegion, RegionLayout};
use crate::readflash::ReadFlash;
use crate::{Error, ReadWrite};
use std::sync::atomic::{AtomicBool, Ordering};

/// Size of the data flash image kept by the bootloader.
pub const DATA_FLASH_SIZE: usize = 2048;

const CHECKSUM_OFFSET: usize = 0;
const HW_VERSION_OFFSET: usize = 8;
const BOOTFLAG_OFFSET: usize = 13;
const FW_VERSION_OFFSET: usize = 260;
const LDROM_VERSION_OFFSET: usize = 264;
const PRODUCT_ID_OFFSET: usize = 316;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum BootFlag {
    Aprom = 0,
    Ldrom = 1,
}

/// Device configuration stored in data flash.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFlash {
    data: Vec<u8>,
}

impl DataFlash {
    pub fn new(data: Vec<u8>) -> Result<Self, Error> {
        if data.len() != DATA_FLASH_SIZE {
            return Err(Error::Format(format!(
                "data flash is {} bytes, expected {}",
                data.len(),
                DATA_FLASH_SIZE
            )));
        }
        Ok(DataFlash { data })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    // offsets are constants inside DATA_FLASH_SIZE, which `new` enforces
    fn read_u32(&self, offset: usize) -> u32 {
        let mut word = [0_u8; 4];
        word.copy_from_slice(&self.data[offset..offset + 4]);
        u32::from_le_bytes(word)
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Checksum stored in the first word.
    pub fn stored_checksum(&self) -> u32 {
        self.read_u32(CHECKSUM_OFFSET)
    }

    /// Byte sum of everything after the checksum word.
    pub fn computed_checksum(&self) -> u32 {
        byte_sum(&self.data[4..])
    }

    pub fn verify(&self) -> Result<(), Error> {
        let expected = self.stored_checksum();
        let actual = self.computed_checksum();
        if expected != actual {
            return Err(Error::Integrity { expected, actual });
        }
        Ok(())
    }

    pub fn update_checksum(&mut self) {
        let checksum = self.computed_checksum();
        self.write_u32(CHECKSUM_OFFSET, checksum);
    }

    pub fn hw_version(&self) -> u32 {
        self.read_u32(HW_VERSION_OFFSET)
    }

    pub fn set_hw_version(&mut self, version: u32) {
        self.write_u32(HW_VERSION_OFFSET, version);
    }

    pub fn fw_version(&self) -> u32 {
        self.read_u32(FW_VERSION_OFFSET)
    }

    pub fn ldrom_version(&self) -> u32 {
        self.read_u32(LDROM_VERSION_OFFSET)
    }

    pub fn bootflag(&self) -> BootFlag {
        match self.data[BOOTFLAG_OFFSET] {
            0 => BootFlag::Aprom,
            _ => BootFlag::Ldrom,
        }
    }

    pub fn set_bootflag(&mut self, flag: BootFlag) {
        self.data[BOOTFLAG_OFFSET] = flag as u8;
    }

    pub fn product_id(&self) -> String {
        String::from_utf8_lossy(&self.data[PRODUCT_ID_OFFSET..PRODUCT_ID_OFFSET + 4]).into_owned()
    }
}

/// Reads `size` bytes of data flash, one chunk per command, in ascending
/// offset order. Nothing is written. A failed read aborts the dump.
pub fn dump<T: ReadWrite>(
    d: &T,
    layout: &RegionLayout,
    size: usize,
    abort: &AtomicBool,
) -> Result<Vec<u8>, Error> {
    if size > layout.max_size {
        return Err(Error::Size {
            len: size,
            max: layout.max_size,
        });
    }

    let mut data = Vec::with_capacity(size);

    for (offset, len) in spans(size, layout.chunk_size) {
        if abort.load(Ordering::SeqCst) {
            return Err(Error::Aborted {
                region: MemoryRegion::DataFlash,
                offset,
            });
        }

        log::debug!("reading data flash {:#x}+{}", offset, len);

        let chunk = ReadFlash {
            region: MemoryRegion::DataFlash,
            target_address: layout.address(offset),
            len,
        }
        .send(d)?;

        if chunk.len() != len {
            return Err(Error::Protocol(format!(
                "data flash read at {:#x} returned {} bytes, expected {}",
                offset,
                chunk.len(),
                len
            )));
        }

        data.extend_from_slice(&chunk);
    }

    Ok(data)
}

/// Frame encoding, response parsing and the bounded retry exchange.
pub mod command;
pub use command::*;

/// Identify the connected device. The result is the product id plus hardware and firmware versions.
mod identify;
pub use identify::*;

/// Erase an entire memory region. Never retried.
mod erase;
pub use erase::*;

/// Write one chunk of APROM or data flash.
mod writeflash;
pub use writeflash::*;

/// Read one chunk of APROM or data flash.
mod readflash;
pub use readflash::*;

/// Reset the device. No response arrives for this command.
mod reset;
pub use reset::*;

/// Firmware image codec: the Evic cipher and the encoded container.
pub mod image;

/// Sanity checks on plaintext APROM images.
pub mod aprom;

/// Data flash contents and the chunked data flash reader.
pub mod dataflash;

/// Memory regions, layouts and the table of known device models.
pub mod device;
pub use device::{DeviceModel, MemoryRegion, RegionLayout};

/// Splitting buffers into protocol sized chunks.
pub mod chunk;

/// The upload and dump state machine.
pub mod programmer;
pub use programmer::{Programmer, State, UploadOptions};

#[cfg(feature = "hidapi")]
mod hidapi_trait;
#[cfg(feature = "hidapi")]
pub use hidapi_trait::*;

#[cfg(test)]
mod mock;

/// Every HID report exchanged with the bootloader is exactly this long.
pub const REPORT_SIZE: usize = 64;

/// How long a single report read may block.
pub const TIMEOUT_MS: i32 = 1000;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum Error {
    /// The image is not in the expected encoded layout.
    #[error("format error: {0}")]
    Format(String),
    /// The checksum stored with the data does not match its contents.
    #[error("integrity error: stored checksum {expected:#010x}, computed {actual:#010x}")]
    Integrity { expected: u32, actual: u32 },
    /// A buffer is larger than the space available for it.
    #[error("size error: {len} bytes exceeds the limit of {max} bytes")]
    Size { len: usize, max: usize },
    #[error("no matching USB device found")]
    DeviceNotFound,
    #[error("transport error: {0}")]
    Transport(TransportError),
    /// The device answered with something the protocol does not allow.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The device understood the command but reported that it failed.
    #[error("device error: command {opcode:#04x} failed with status {status:#04x}")]
    Device { opcode: u8, status: u8 },
    #[error("write error: {region} write at offset {offset:#x} failed: {source}")]
    Write {
        region: MemoryRegion,
        offset: usize,
        #[source]
        source: Box<Error>,
    },
    #[error("read error: {region} read-back at offset {offset:#x} failed: {source}")]
    Read {
        region: MemoryRegion,
        offset: usize,
        #[source]
        source: Box<Error>,
    },
    #[error(
        "verification error: {region} chunk at offset {offset:#x} does not match \
         ({expected} bytes written, {actual} bytes read back)"
    )]
    Verification {
        region: MemoryRegion,
        offset: usize,
        expected: usize,
        actual: usize,
    },
    /// The firmware image failed a sanity check against the device.
    #[error("firmware error: {0}")]
    Firmware(String),
    #[error("aborted before {region} offset {offset:#x}")]
    Aborted { region: MemoryRegion, offset: usize },
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("timed out waiting for a report")]
    Timeout,
    #[error("short write of {0} bytes")]
    ShortWrite(usize),
    #[error("short read of {0} bytes")]
    ShortRead(usize),
    #[error("{0}")]
    Hid(String),
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::Transport(err)
    }
}

impl From<scroll::Error> for Error {
    fn from(err: scroll::Error) -> Self {
        Error::Protocol(err.to_string())
    }
}

/// Transport adapter for a HID handle. The handle is closed when it is dropped.
pub trait ReadWrite {
    fn write_report(&self, report: &[u8; REPORT_SIZE]) -> Result<(), Error>;
    fn read_report(&self, timeout_ms: i32) -> Result<[u8; REPORT_SIZE], Error>;
}

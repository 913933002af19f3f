use crate::command::{Command, CommandResponse, Commander};
use crate::device::MemoryRegion;
use crate::Error;

/// Read `len` bytes of APROM or data flash starting at `target_address`.
///
/// The bytes are returned as the device sent them. A device may answer with
/// fewer bytes than asked for, so callers compare lengths themselves.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ReadFlash {
    pub region: MemoryRegion,
    pub target_address: u32,
    pub len: usize,
}

impl Commander<Vec<u8>> for ReadFlash {
    fn command(&self) -> Command<'_> {
        Command::new(
            self.region.read_opcode(),
            self.target_address,
            self.len as u32,
        )
    }

    fn parse(&self, rsp: CommandResponse) -> Result<Vec<u8>, Error> {
        Ok(rsp.data)
    }
}

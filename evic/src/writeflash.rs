use crate::command::{expect_len, Command, CommandResponse, Commander, NoResponse};
use crate::device::MemoryRegion;
use crate::Error;

/// Write one chunk of APROM or data flash. Empty response.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct WriteFlash<'a> {
    pub region: MemoryRegion,
    pub target_address: u32,
    pub data: &'a [u8],
}

impl<'a> Commander<NoResponse> for WriteFlash<'a> {
    fn command(&self) -> Command<'_> {
        Command::with_payload(self.region.write_opcode(), self.target_address, self.data)
    }

    fn parse(&self, rsp: CommandResponse) -> Result<NoResponse, Error> {
        expect_len(&rsp, 0)?;
        Ok(NoResponse {})
    }
}

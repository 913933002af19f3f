use crate::command::{expect_len, Command, CommandResponse, Commander, NoResponse};
use crate::device::{MemoryRegion, RegionLayout};
use crate::Error;

/// Erases a whole region. Made exactly once: re-erasing a device that is
/// still busy erasing is unsafe.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Erase<'a> {
    pub region: MemoryRegion,
    pub layout: &'a RegionLayout,
}

impl<'a> Commander<NoResponse> for Erase<'a> {
    const ATTEMPTS: usize = 1;

    fn command(&self) -> Command<'_> {
        Command::new(
            self.region.erase_opcode(),
            self.layout.base,
            self.layout.max_size as u32,
        )
    }

    fn parse(&self, rsp: CommandResponse) -> Result<NoResponse, Error> {
        expect_len(&rsp, 0)?;
        Ok(NoResponse {})
    }
}

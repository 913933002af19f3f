use crate::command::{xmit, Command, CommandResponse, Commander, NoResponse, Opcode};
use crate::{Error, ReadWrite};

/// Reset the device. Usually the device drops off the bus, so no response is read.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Reset {}

impl Commander<NoResponse> for Reset {
    fn command(&self) -> Command<'_> {
        Command::new(Opcode::Reset, 0, 0)
    }

    fn parse(&self, _rsp: CommandResponse) -> Result<NoResponse, Error> {
        Ok(NoResponse {})
    }

    fn send<T: ReadWrite>(&self, d: &T) -> Result<NoResponse, Error> {
        xmit(&self.command(), d)?;

        Ok(NoResponse {})
    }
}

use crate::command::{expect_len, Command, CommandResponse, Commander, Opcode};
use crate::Error;
use scroll::{ctx, Pread, LE};

/// Asks the bootloader which board it is running on.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Identify {}

impl Commander<IdentifyResponse> for Identify {
    fn command(&self) -> Command<'_> {
        Command::new(Opcode::Identify, 0, 0)
    }

    fn parse(&self, rsp: CommandResponse) -> Result<IdentifyResponse, Error> {
        expect_len(&rsp, IDENTIFY_RESPONSE_SIZE)?;
        rsp.data.as_slice().pread_with(0, LE)
    }
}

const IDENTIFY_RESPONSE_SIZE: usize = 12;

///Response to the identify command
#[derive(Debug, Clone, PartialEq)]
pub struct IdentifyResponse {
    pub product_id: String,
    /// Hardware version times 100.
    pub hw_version: u32,
    /// Firmware version times 100.
    pub fw_version: u32,
}

impl<'a> ctx::TryFromCtx<'a, scroll::Endian> for IdentifyResponse {
    type Error = Error;
    fn try_from_ctx(this: &'a [u8], le: scroll::Endian) -> Result<(Self, usize), Self::Error> {
        if this.len() < IDENTIFY_RESPONSE_SIZE {
            return Err(Error::Protocol("identify response truncated".into()));
        }

        let mut offset = 0;
        let product_id = this.gread_with::<&[u8]>(&mut offset, 4)?;
        let product_id = core::str::from_utf8(product_id)
            .map_err(|_| Error::Protocol(format!("product id {:02X?} is not ASCII", product_id)))?;
        let hw_version = this.gread_with::<u32>(&mut offset, le)?;
        let fw_version = this.gread_with::<u32>(&mut offset, le)?;

        Ok((
            IdentifyResponse {
                product_id: product_id.into(),
                hw_version,
                fw_version,
            },
            offset,
        ))
    }
}

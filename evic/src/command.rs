use crate::{Error, ReadWrite, TransportError, REPORT_SIZE, TIMEOUT_MS};
use core::convert::TryFrom;
use scroll::{ctx, Pread, Pwrite, LE};

/// `HIDC` in little-endian byte order.
pub const SIGNATURE: u32 = 0x4344_4948;

/// Size of a command header including its trailing checksum.
pub const HEADER_SIZE: usize = 18;

/// Length field of every command header. The checksum is not counted.
const CHECKED_SIZE: u8 = 14;

/// Size of the status header at the start of the first response report.
pub const RESPONSE_HEADER_SIZE: usize = 4;

/// Attempts made for a command before a transport failure is surfaced.
pub const MAX_ATTEMPTS: usize = 3;

/// Reports with a foreign opcode skipped before a response is given up on.
const MAX_STALE_REPORTS: usize = 16;

/// Upper bound on reports discarded before a retry. A full data flash read
/// spans 33 reports.
const MAX_DRAIN_REPORTS: usize = 256;

/// Read timeout while discarding stale input.
const DRAIN_TIMEOUT_MS: i32 = 50;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Opcode {
    //Read a number of bytes of data flash.
    ReadDataFlash = 0x35,
    //Write a number of bytes of data flash. The data follows the header.
    WriteDataFlash = 0x53,
    //Read a number of bytes of APROM.
    ReadAprom = 0x3C,
    //Write a number of bytes of APROM. The data follows the header.
    WriteAprom = 0xC3,
    //Erase the whole APROM region.
    EraseAprom = 0xA3,
    //Erase the whole data flash region.
    EraseDataFlash = 0xA4,
    //Report product id, hardware and firmware version.
    Identify = 0xB1,
    //Reset the device. No response.
    Reset = 0xB4,
}

impl TryFrom<u8> for Opcode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x35 => Ok(Opcode::ReadDataFlash),
            0x53 => Ok(Opcode::WriteDataFlash),
            0x3C => Ok(Opcode::ReadAprom),
            0xC3 => Ok(Opcode::WriteAprom),
            0xA3 => Ok(Opcode::EraseAprom),
            0xA4 => Ok(Opcode::EraseDataFlash),
            0xB1 => Ok(Opcode::Identify),
            0xB4 => Ok(Opcode::Reset),
            _ => Err(Error::Protocol(format!("unknown opcode {:#04x}", value))),
        }
    }
}

impl Opcode {
    /// Whether the header is followed by `arg2` bytes of payload.
    pub fn carries_payload(self) -> bool {
        matches!(self, Opcode::WriteAprom | Opcode::WriteDataFlash)
    }
}

/// A single command frame: the 18 byte header and an optional payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Command<'a> {
    pub opcode: Opcode,
    pub arg1: u32,
    pub arg2: u32,
    pub payload: &'a [u8],
}

impl<'a> Command<'a> {
    pub fn new(opcode: Opcode, arg1: u32, arg2: u32) -> Self {
        Command {
            opcode,
            arg1,
            arg2,
            payload: &[],
        }
    }

    pub fn with_payload(opcode: Opcode, arg1: u32, payload: &'a [u8]) -> Self {
        Command {
            opcode,
            arg1,
            arg2: payload.len() as u32,
            payload,
        }
    }

    /// Header bytes without the checksum.
    fn checked_bytes(&self) -> Result<[u8; CHECKED_SIZE as usize], Error> {
        let mut bytes = [0_u8; CHECKED_SIZE as usize];
        let mut offset = 0;

        bytes.gwrite_with(self.opcode as u8, &mut offset, LE)?;
        bytes.gwrite_with(CHECKED_SIZE, &mut offset, LE)?;
        bytes.gwrite_with(self.arg1, &mut offset, LE)?;
        bytes.gwrite_with(self.arg2, &mut offset, LE)?;
        bytes.gwrite_with(SIGNATURE, &mut offset, LE)?;

        Ok(bytes)
    }

    /// Byte sum of the header, which the bootloader checks before acting.
    pub fn checksum(&self) -> Result<u32, Error> {
        Ok(byte_sum(&self.checked_bytes()?))
    }

    /// Serializes the frame and splits it into zero padded reports.
    pub fn to_reports(&self) -> Result<Vec<[u8; REPORT_SIZE]>, Error> {
        let mut frame = vec![0_u8; HEADER_SIZE + self.payload.len()];
        let len = frame.pwrite_with(self, 0, LE)?;
        debug_assert_eq!(len, frame.len());

        Ok(frame
            .chunks(REPORT_SIZE)
            .map(|chunk| {
                let mut report = [0_u8; REPORT_SIZE];
                report[..chunk.len()].copy_from_slice(chunk);
                report
            })
            .collect())
    }
}

impl<'a, 'b> ctx::TryIntoCtx<scroll::Endian> for &'b Command<'a> {
    type Error = Error;

    fn try_into_ctx(self, dst: &mut [u8], le: scroll::Endian) -> Result<usize, Self::Error> {
        if dst.len() < HEADER_SIZE + self.payload.len() {
            return Err(Error::Protocol("frame buffer too small".into()));
        }

        let mut offset = 0;
        let checked = self.checked_bytes()?;
        dst[..checked.len()].copy_from_slice(&checked);
        offset += checked.len();
        dst.gwrite_with(byte_sum(&checked), &mut offset, le)?;

        dst[offset..offset + self.payload.len()].copy_from_slice(self.payload);
        offset += self.payload.len();

        Ok(offset)
    }
}

/// Wrapping byte sum used for command headers and data flash.
pub fn byte_sum(data: &[u8]) -> u32 {
    data.iter()
        .fold(0_u32, |sum, byte| sum.wrapping_add(u32::from(*byte)))
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum CommandResponseStatus {
    //command understood and executed correctly
    Success,
    //command understood but execution failed, e.g. erase refused
    Failed(u8),
}

impl From<u8> for CommandResponseStatus {
    fn from(val: u8) -> Self {
        match val {
            0 => CommandResponseStatus::Success,
            other => CommandResponseStatus::Failed(other),
        }
    }
}

/// Response to a command, with report padding already stripped.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse {
    pub opcode: u8,
    pub status: CommandResponseStatus,
    pub data: Vec<u8>,
}

/// Status header of the first response report.
#[derive(Debug, Copy, Clone, PartialEq)]
struct ResponseHeader {
    opcode: u8,
    status: u8,
    length: u16,
}

impl<'a> ctx::TryFromCtx<'a, scroll::Endian> for ResponseHeader {
    type Error = Error;
    fn try_from_ctx(this: &'a [u8], le: scroll::Endian) -> Result<(Self, usize), Self::Error> {
        if this.len() < RESPONSE_HEADER_SIZE {
            return Err(Error::Protocol("response header truncated".into()));
        }

        let mut offset = 0;
        let opcode = this.gread_with::<u8>(&mut offset, le)?;
        let status = this.gread_with::<u8>(&mut offset, le)?;
        let length = this.gread_with::<u16>(&mut offset, le)?;

        Ok((
            ResponseHeader {
                opcode,
                status,
                length,
            },
            offset,
        ))
    }
}

/// Transmits every report of a frame.
pub fn xmit<T: ReadWrite>(command: &Command, d: &T) -> Result<(), Error> {
    log::debug!(
        "xmit {:?} arg1={:#x} arg2={:#x} payload={}",
        command.opcode,
        command.arg1,
        command.arg2,
        command.payload.len()
    );

    for report in command.to_reports()? {
        d.write_report(&report)?;
    }

    Ok(())
}

/// Receives the response to `opcode`, following continuation reports until
/// the announced length has arrived.
///
/// Reports echoing another opcode are left over from an earlier exchange and
/// are skipped, up to `MAX_STALE_REPORTS` of them.
pub fn rx<T: ReadWrite>(opcode: Opcode, d: &T) -> Result<CommandResponse, Error> {
    let mut stale = None;
    let mut skipped = 0;

    let (first, header) = loop {
        let report = match (d.read_report(TIMEOUT_MS), stale) {
            (Ok(report), _) => report,
            (Err(e), None) => return Err(e),
            (Err(e), Some(echoed)) => {
                log::debug!("no response after {} stale reports: {}", skipped, e);
                return Err(Error::Protocol(format!(
                    "response to {:?} echoed opcode {:#04x}",
                    opcode, echoed
                )));
            }
        };
        let header: ResponseHeader = report.pread_with(0, LE)?;

        if header.opcode == opcode as u8 {
            break (report, header);
        }

        skipped += 1;
        stale = Some(header.opcode);
        log::warn!(
            "skipping stale report echoing {:#04x} while waiting for {:?}",
            header.opcode,
            opcode
        );

        if skipped >= MAX_STALE_REPORTS {
            return Err(Error::Protocol(format!(
                "response to {:?} echoed opcode {:#04x}",
                opcode, header.opcode
            )));
        }
    };

    let length = header.length as usize;
    let mut data = Vec::with_capacity(length);
    let take = length.min(REPORT_SIZE - RESPONSE_HEADER_SIZE);
    data.extend_from_slice(&first[RESPONSE_HEADER_SIZE..RESPONSE_HEADER_SIZE + take]);

    while data.len() < length {
        let report = d.read_report(TIMEOUT_MS)?;
        let take = (length - data.len()).min(REPORT_SIZE);
        data.extend_from_slice(&report[..take]);
    }

    Ok(CommandResponse {
        opcode: header.opcode,
        status: header.status.into(),
        data,
    })
}

/// One request/response exchange. Transport failures re-send the whole frame,
/// up to `attempts` times in total.
pub fn exchange<T: ReadWrite>(
    command: &Command,
    attempts: usize,
    d: &T,
) -> Result<CommandResponse, Error> {
    let attempts = attempts.max(1);

    for attempt in 1..=attempts {
        if attempt > 1 {
            drain(d);
        }

        match xmit(command, d).and_then(|_| rx(command.opcode, d)) {
            Err(Error::Transport(e)) if attempt < attempts => {
                log::warn!(
                    "{:?} failed (attempt {}/{}): {}",
                    command.opcode,
                    attempt,
                    attempts,
                    e
                );
            }
            Ok(CommandResponse {
                status: CommandResponseStatus::Failed(status),
                ..
            }) => {
                return Err(Error::Device {
                    opcode: command.opcode as u8,
                    status,
                })
            }
            result => return result,
        }
    }

    Err(Error::Transport(TransportError::Timeout))
}

/// Discards reports still queued from an earlier attempt, such as a late
/// reply or the rest of a multi-report response.
pub fn drain<T: ReadWrite>(d: &T) {
    for discarded in 0..MAX_DRAIN_REPORTS {
        if let Err(e) = d.read_report(DRAIN_TIMEOUT_MS) {
            if discarded > 0 {
                log::debug!("discarded {} stale reports ({})", discarded, e);
            }
            return;
        }
    }
    log::warn!("input still pending after {} reports", MAX_DRAIN_REPORTS);
}

pub trait Commander<RES> {
    /// Attempts made before a transport failure is surfaced.
    const ATTEMPTS: usize = MAX_ATTEMPTS;

    fn command(&self) -> Command<'_>;

    fn parse(&self, rsp: CommandResponse) -> Result<RES, Error>;

    fn send<T: ReadWrite>(&self, d: &T) -> Result<RES, Error> {
        let command = self.command();
        let rsp = exchange(&command, Self::ATTEMPTS, d)?;
        self.parse(rsp)
    }
}

/// Checks that a response carries exactly `expected` bytes.
pub(crate) fn expect_len(rsp: &CommandResponse, expected: usize) -> Result<(), Error> {
    if rsp.data.len() != expected {
        return Err(Error::Protocol(format!(
            "response to {:#04x} carried {} bytes, expected {}",
            rsp.opcode,
            rsp.data.len(),
            expected
        )));
    }
    Ok(())
}

#[derive(Debug, PartialEq)]
pub struct NoResponse {}

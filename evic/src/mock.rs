use crate::command::{Opcode, HEADER_SIZE, RESPONSE_HEADER_SIZE, SIGNATURE};
use crate::device::RegionLayout;
use crate::{Error, ReadWrite, TransportError, REPORT_SIZE};
use core::convert::TryFrom;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// Simulated device memory.
pub struct Memory {
    pub aprom: Vec<u8>,
    pub data_flash: Vec<u8>,
}

struct Inner {
    aprom_layout: RegionLayout,
    df_layout: RegionLayout,
    memory: Memory,
    product_id: [u8; 4],
    hw_version: u32,
    fw_version: u32,
    pending: Vec<u8>,
    responses: VecDeque<[u8; REPORT_SIZE]>,
    log: Vec<(Opcode, u32, u32)>,
    read_failures: HashMap<(Opcode, u32), (Fault, usize)>,
    /// Reports delivered before the next read times out.
    stall: Option<usize>,
    corrupt_reads: Vec<(Opcode, u32)>,
    truncate_reads: Vec<(Opcode, u32)>,
    echo_opcode: Option<u8>,
    erase_status: u8,
    handles_open: usize,
    handles_closed: usize,
}

/// How an injected read failure shows up on the host side.
#[derive(Debug, Copy, Clone, PartialEq)]
enum Fault {
    /// The device never answers.
    Lost,
    /// The read times out, the reply is queued afterwards.
    Late,
    /// The first report arrives, the read of the next one times out. The
    /// rest stays queued.
    Stalled,
}

/// An in-memory bootloader speaking the HID command protocol.
#[derive(Clone)]
pub struct MockDevice {
    inner: Rc<RefCell<Inner>>,
}

/// Owned handle to a `MockDevice`. Dropping it counts as closing the device.
pub struct MockHandle {
    device: MockDevice,
}

impl MockDevice {
    pub fn default_aprom() -> RegionLayout {
        RegionLayout {
            base: 0,
            max_size: 1024,
            chunk_size: 128,
        }
    }

    pub fn default_data_flash() -> RegionLayout {
        RegionLayout {
            base: 0x4000,
            max_size: 256,
            chunk_size: 64,
        }
    }

    pub fn new() -> Self {
        Self::with_layouts(Self::default_aprom(), Self::default_data_flash())
    }

    pub fn with_layouts(aprom_layout: RegionLayout, df_layout: RegionLayout) -> Self {
        MockDevice {
            inner: Rc::new(RefCell::new(Inner {
                aprom_layout,
                df_layout,
                memory: Memory {
                    aprom: vec![0xFF; aprom_layout.max_size],
                    data_flash: vec![0xFF; df_layout.max_size],
                },
                product_id: *b"TEST",
                hw_version: 100,
                fw_version: 300,
                pending: vec![],
                responses: VecDeque::new(),
                log: vec![],
                read_failures: HashMap::new(),
                stall: None,
                corrupt_reads: vec![],
                truncate_reads: vec![],
                echo_opcode: None,
                erase_status: 0,
                handles_open: 0,
                handles_closed: 0,
            })),
        }
    }

    pub fn handle(&self) -> MockHandle {
        self.inner.borrow_mut().handles_open += 1;
        MockHandle {
            device: self.clone(),
        }
    }

    /// Whether every handle given out has been dropped.
    pub fn all_closed(&self) -> bool {
        let inner = self.inner.borrow();
        inner.handles_open == inner.handles_closed
    }

    pub fn df_base(&self) -> u32 {
        self.inner.borrow().df_layout.base
    }

    pub fn set_identity(&self, product_id: &[u8; 4], hw_version: u32) {
        let mut inner = self.inner.borrow_mut();
        inner.product_id = *product_id;
        inner.hw_version = hw_version;
    }

    pub fn memory<R>(&self, f: impl FnOnce(&Memory) -> R) -> R {
        f(&self.inner.borrow().memory)
    }

    pub fn memory_mut<R>(&self, f: impl FnOnce(&mut Memory) -> R) -> R {
        f(&mut self.inner.borrow_mut().memory)
    }

    /// Every command frame received, retries included.
    pub fn commands(&self) -> Vec<(Opcode, u32, u32)> {
        self.inner.borrow().log.clone()
    }

    pub fn commands_with(&self, opcode: Opcode) -> Vec<(u32, u32)> {
        self.commands()
            .into_iter()
            .filter(|(op, _, _)| *op == opcode)
            .map(|(_, arg1, arg2)| (arg1, arg2))
            .collect()
    }

    /// The next `count` responses to `opcode` at `address` are lost.
    pub fn fail_reads(&self, opcode: Opcode, address: u32, count: usize) {
        self.inject(opcode, address, Fault::Lost, count);
    }

    /// The next `count` responses to `opcode` at `address` arrive only after
    /// the host has timed out waiting for them.
    pub fn delay_reads(&self, opcode: Opcode, address: u32, count: usize) {
        self.inject(opcode, address, Fault::Late, count);
    }

    /// The next `count` responses to `opcode` at `address` stall after their
    /// first report.
    pub fn stall_reads(&self, opcode: Opcode, address: u32, count: usize) {
        self.inject(opcode, address, Fault::Stalled, count);
    }

    fn inject(&self, opcode: Opcode, address: u32, fault: Fault, count: usize) {
        self.inner
            .borrow_mut()
            .read_failures
            .insert((opcode, address), (fault, count));
    }

    /// Queues a raw report ahead of any response.
    pub fn queue_report(&self, report: [u8; REPORT_SIZE]) {
        self.inner.borrow_mut().responses.push_back(report);
    }

    /// Reads of `opcode` at `address` return altered data.
    pub fn corrupt_reads(&self, opcode: Opcode, address: u32) {
        self.inner.borrow_mut().corrupt_reads.push((opcode, address));
    }

    /// Reads of `opcode` at `address` return one byte less than asked for.
    pub fn truncate_reads(&self, opcode: Opcode, address: u32) {
        self.inner.borrow_mut().truncate_reads.push((opcode, address));
    }

    /// Responses echo `opcode` instead of the command's own.
    pub fn echo_opcode(&self, opcode: u8) {
        self.inner.borrow_mut().echo_opcode = Some(opcode);
    }

    /// Erase commands report `status`.
    pub fn fail_erase(&self, status: u8) {
        self.inner.borrow_mut().erase_status = status;
    }
}

impl Inner {
    fn receive(&mut self, report: &[u8; REPORT_SIZE]) {
        self.pending.extend_from_slice(report);

        if self.pending.len() < HEADER_SIZE {
            return;
        }

        let opcode = Opcode::try_from(self.pending[0]).expect("unknown opcode");
        let word = |i: usize| {
            u32::from_le_bytes([
                self.pending[i],
                self.pending[i + 1],
                self.pending[i + 2],
                self.pending[i + 3],
            ])
        };
        let (arg1, arg2, signature, checksum) = (word(2), word(6), word(10), word(14));
        assert_eq!(self.pending[1], 14);
        assert_eq!(signature, SIGNATURE);
        assert_eq!(checksum, crate::command::byte_sum(&self.pending[..14]));

        let payload_len = if opcode.carries_payload() {
            arg2 as usize
        } else {
            0
        };
        let frame_len = HEADER_SIZE + payload_len;
        let padded = (frame_len + REPORT_SIZE - 1) / REPORT_SIZE * REPORT_SIZE;
        if self.pending.len() < padded {
            return;
        }

        let payload = self.pending[HEADER_SIZE..frame_len].to_vec();
        self.pending.clear();
        self.process(opcode, arg1, arg2, &payload);
    }

    fn region(&mut self, opcode: Opcode) -> (RegionLayout, &mut Vec<u8>) {
        match opcode {
            Opcode::ReadAprom | Opcode::WriteAprom | Opcode::EraseAprom => {
                (self.aprom_layout, &mut self.memory.aprom)
            }
            _ => (self.df_layout, &mut self.memory.data_flash),
        }
    }

    fn process(&mut self, opcode: Opcode, arg1: u32, arg2: u32, payload: &[u8]) {
        self.log.push((opcode, arg1, arg2));

        let mut fault = None;
        if let Some((kind, remaining)) = self.read_failures.get_mut(&(opcode, arg1)) {
            if *remaining > 0 {
                *remaining -= 1;
                fault = Some(*kind);
            }
        }

        let (status, data) = match opcode {
            Opcode::Identify => {
                let mut data = self.product_id.to_vec();
                data.extend_from_slice(&self.hw_version.to_le_bytes());
                data.extend_from_slice(&self.fw_version.to_le_bytes());
                (0, data)
            }
            Opcode::EraseAprom | Opcode::EraseDataFlash => {
                let status = self.erase_status;
                if status == 0 {
                    let (_, memory) = self.region(opcode);
                    memory.iter_mut().for_each(|b| *b = 0xFF);
                }
                (status, vec![])
            }
            Opcode::WriteAprom | Opcode::WriteDataFlash => {
                let (layout, memory) = self.region(opcode);
                let offset = (arg1 - layout.base) as usize;
                match memory.get_mut(offset..offset + payload.len()) {
                    Some(target) => {
                        target.copy_from_slice(payload);
                        (0, vec![])
                    }
                    None => (2, vec![]),
                }
            }
            Opcode::ReadAprom | Opcode::ReadDataFlash => {
                let corrupt = self.corrupt_reads.contains(&(opcode, arg1));
                let truncate = self.truncate_reads.contains(&(opcode, arg1));
                let (layout, memory) = self.region(opcode);
                let offset = (arg1 - layout.base) as usize;
                match memory.get(offset..offset + arg2 as usize) {
                    Some(source) => {
                        let mut data = source.to_vec();
                        if corrupt {
                            data[0] ^= 0xFF;
                        }
                        if truncate {
                            data.pop();
                        }
                        (0, data)
                    }
                    None => (2, vec![]),
                }
            }
            Opcode::Reset => return,
        };

        let echo = self.echo_opcode.unwrap_or(opcode as u8);
        let mut stream = vec![echo, status];
        stream.extend_from_slice(&(data.len() as u16).to_le_bytes());
        stream.extend_from_slice(&data);
        debug_assert_eq!(stream.len(), RESPONSE_HEADER_SIZE + data.len());

        match fault {
            Some(Fault::Lost) => return,
            Some(Fault::Late) => self.stall = Some(self.responses.len()),
            Some(Fault::Stalled) => self.stall = Some(self.responses.len() + 1),
            None => {}
        }

        for chunk in stream.chunks(REPORT_SIZE) {
            let mut report = [0_u8; REPORT_SIZE];
            report[..chunk.len()].copy_from_slice(chunk);
            self.responses.push_back(report);
        }
    }
}

impl ReadWrite for MockDevice {
    fn write_report(&self, report: &[u8; REPORT_SIZE]) -> Result<(), Error> {
        self.inner.borrow_mut().receive(report);
        Ok(())
    }

    fn read_report(&self, _timeout_ms: i32) -> Result<[u8; REPORT_SIZE], Error> {
        let mut inner = self.inner.borrow_mut();

        let stall = inner.stall;
        match stall {
            Some(0) => {
                inner.stall = None;
                return Err(TransportError::Timeout.into());
            }
            Some(n) => inner.stall = Some(n - 1),
            None => {}
        }

        inner
            .responses
            .pop_front()
            .ok_or_else(|| TransportError::Timeout.into())
    }
}

impl ReadWrite for MockHandle {
    fn write_report(&self, report: &[u8; REPORT_SIZE]) -> Result<(), Error> {
        self.device.write_report(report)
    }

    fn read_report(&self, timeout_ms: i32) -> Result<[u8; REPORT_SIZE], Error> {
        self.device.read_report(timeout_ms)
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.device.inner.borrow_mut().handles_closed += 1;
    }
}

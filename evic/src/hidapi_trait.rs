use crate::device::vendor_map;
use crate::{Error, ReadWrite, TransportError, REPORT_SIZE};
use hidapi::{HidApi, HidDevice};

impl ReadWrite for HidDevice {
    fn write_report(&self, report: &[u8; REPORT_SIZE]) -> Result<(), Error> {
        // the bootloader does not use numbered reports, so report id 0 leads
        let mut buf = [0_u8; REPORT_SIZE + 1];
        buf[1..].copy_from_slice(report);

        let written = self.write(&buf)?;
        if written < REPORT_SIZE {
            return Err(TransportError::ShortWrite(written).into());
        }
        Ok(())
    }

    fn read_report(&self, timeout_ms: i32) -> Result<[u8; REPORT_SIZE], Error> {
        let mut buf = [0_u8; REPORT_SIZE];

        match self.read_timeout(&mut buf, timeout_ms)? {
            0 => Err(TransportError::Timeout.into()),
            n if n < REPORT_SIZE => Err(TransportError::ShortRead(n).into()),
            _ => Ok(buf),
        }
    }
}

impl From<hidapi::HidError> for Error {
    fn from(err: hidapi::HidError) -> Self {
        Error::Transport(TransportError::Hid(err.to_string()))
    }
}

/// Opens the bootloader by vid/pid, or the first known bootloader from
/// `vendor_map` when either is missing.
pub fn open(api: &HidApi, vid: Option<u16>, pid: Option<u16>) -> Result<HidDevice, Error> {
    if let (Some(v), Some(p)) = (vid, pid) {
        return api.open(v, p).map_err(|e| {
            log::debug!("open {:04x}:{:04x} failed: {}", v, p, e);
            Error::DeviceNotFound
        });
    }

    let vendor = vendor_map();

    for device_info in api.device_list() {
        if let Some(products) = vendor.get(&device_info.vendor_id()) {
            if products.contains(&device_info.product_id()) {
                if let Ok(d) = device_info.open_device(api) {
                    return Ok(d);
                }
            }
        }
    }

    Err(Error::DeviceNotFound)
}

use crate::chunk::chunks;
use crate::command::Commander;
use crate::device::{self, DeviceModel, MemoryRegion, RegionLayout, MODELS};
use crate::image::FirmwareImage;
use crate::{aprom, dataflash};
use crate::{Erase, Error, Identify, IdentifyResponse, ReadFlash, ReadWrite, Reset, WriteFlash};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct UploadOptions {
    /// Read back and compare every APROM chunk after writing it.
    pub verify_aprom: bool,
    /// Read back and compare every data flash chunk after writing it.
    pub verify_data_flash: bool,
    /// Check the image against the identified device before erasing.
    pub check_firmware: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        UploadOptions {
            verify_aprom: true,
            verify_data_flash: true,
            check_firmware: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum State {
    Idle,
    Connected,
    Identified,
    Erasing(MemoryRegion),
    Writing(MemoryRegion),
    Verifying(MemoryRegion),
    Dumping,
    Finalizing,
    Done,
    Failed(Error),
}

/// Exclusive ownership of an open device handle.
struct Session<T: ReadWrite> {
    handle: T,
}

impl<T: ReadWrite> Drop for Session<T> {
    fn drop(&mut self) {
        log::debug!("closing device handle");
    }
}

/// Drives one upload or dump against one device.
///
/// The device handle is owned for the lifetime of the operation and released
/// when the machine reaches `Done` or `Failed`.
pub struct Programmer<'m, T: ReadWrite> {
    models: &'m [DeviceModel],
    options: UploadOptions,
    state: State,
    session: Option<Session<T>>,
    model: Option<&'m DeviceModel>,
    identity: Option<IdentifyResponse>,
    abort: Arc<AtomicBool>,
}

impl<T: ReadWrite> Programmer<'static, T> {
    pub fn new(options: UploadOptions) -> Self {
        Programmer::with_models(MODELS, options)
    }
}

impl<'m, T: ReadWrite> Programmer<'m, T> {
    pub fn with_models(models: &'m [DeviceModel], options: UploadOptions) -> Self {
        Programmer {
            models,
            options,
            state: State::Idle,
            session: None,
            model: None,
            identity: None,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Raising this flag stops the operation before the next chunk.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    pub fn model(&self) -> Option<&'m DeviceModel> {
        self.model
    }

    pub fn identity(&self) -> Option<&IdentifyResponse> {
        self.identity.as_ref()
    }

    /// Opens the device with `open`.
    pub fn connect<F>(&mut self, open: F) -> Result<(), Error>
    where
        F: FnOnce() -> Result<T, Error>,
    {
        let result = self.expect_state(&State::Idle).and_then(|_| open());
        let handle = self.finish(result)?;

        self.session = Some(Session { handle });
        self.transition(State::Connected);
        Ok(())
    }

    /// Asks the device who it is and selects its memory layout.
    pub fn identify(&mut self) -> Result<&'m DeviceModel, Error> {
        let result = self.run_identify();
        self.finish(result)
    }

    /// Writes `firmware` to APROM and, if given, `data_flash` to data flash,
    /// then resets the device.
    pub fn upload(
        &mut self,
        firmware: &FirmwareImage,
        data_flash: Option<&[u8]>,
    ) -> Result<(), Error> {
        let result = self.run_upload(firmware, data_flash);
        self.finish(result)
    }

    /// Reads `size` bytes of data flash, or the whole region if `None`.
    pub fn dump_data_flash(&mut self, size: Option<usize>) -> Result<Vec<u8>, Error> {
        let result = self.run_dump(size);
        self.finish(result)
    }

    fn run_identify(&mut self) -> Result<&'m DeviceModel, Error> {
        self.expect_state(&State::Connected)?;

        let identity = Identify {}.send(self.handle()?)?;
        let model = device::lookup(self.models, &identity.product_id).ok_or_else(|| {
            Error::Protocol(format!("unknown product id {:?}", identity.product_id))
        })?;

        log::debug!(
            "identified {} ({}), hardware {}, firmware {}",
            model.name,
            identity.product_id,
            identity.hw_version,
            identity.fw_version
        );

        self.model = Some(model);
        self.identity = Some(identity);
        self.transition(State::Identified);
        Ok(model)
    }

    fn run_upload(
        &mut self,
        firmware: &FirmwareImage,
        data_flash: Option<&[u8]>,
    ) -> Result<(), Error> {
        let model = self.identified_model()?;

        if firmware.is_empty() {
            return Err(Error::Format("firmware image is empty".into()));
        }
        check_size(firmware.len(), &model.aprom)?;
        if let Some(data_flash) = data_flash {
            check_size(data_flash.len(), &model.data_flash)?;
        }

        if self.options.check_firmware {
            if let Some(identity) = &self.identity {
                aprom::verify(firmware.as_bytes(), model.firmware_ids, identity.hw_version)?;
            }
        }

        self.program(
            MemoryRegion::Aprom,
            &model.aprom,
            firmware.as_bytes(),
            self.options.verify_aprom,
        )?;

        match data_flash {
            Some(data_flash) => self.program(
                MemoryRegion::DataFlash,
                &model.data_flash,
                data_flash,
                self.options.verify_data_flash,
            )?,
            None => log::debug!("no data flash given, skipping"),
        }

        self.transition(State::Finalizing);
        Reset {}.send(self.handle()?)?;
        self.session = None;
        self.transition(State::Done);
        Ok(())
    }

    /// Erase, then write every chunk in ascending order, reading each one back
    /// right away when `verify` is set.
    fn program(
        &mut self,
        region: MemoryRegion,
        layout: &RegionLayout,
        data: &[u8],
        verify: bool,
    ) -> Result<(), Error> {
        self.transition(State::Erasing(region));
        Erase { region, layout }.send(self.handle()?)?;

        for chunk in chunks(data, layout.chunk_size) {
            self.check_abort(region, chunk.offset)?;
            let target_address = layout.address(chunk.offset);

            self.transition(State::Writing(region));
            WriteFlash {
                region,
                target_address,
                data: chunk.data,
            }
            .send(self.handle()?)
            .map_err(|e| Error::Write {
                region,
                offset: chunk.offset,
                source: Box::new(e),
            })?;

            if !verify {
                continue;
            }

            self.transition(State::Verifying(region));
            let read_back = ReadFlash {
                region,
                target_address,
                len: chunk.data.len(),
            }
            .send(self.handle()?)
            .map_err(|e| Error::Read {
                region,
                offset: chunk.offset,
                source: Box::new(e),
            })?;

            if read_back != chunk.data {
                return Err(Error::Verification {
                    region,
                    offset: chunk.offset,
                    expected: chunk.data.len(),
                    actual: read_back.len(),
                });
            }
        }

        log::debug!("{} bytes of {} written", data.len(), region);
        Ok(())
    }

    fn run_dump(&mut self, size: Option<usize>) -> Result<Vec<u8>, Error> {
        let model = self.identified_model()?;
        let size = size.unwrap_or(model.data_flash.max_size);

        self.transition(State::Dumping);
        let data = dataflash::dump(self.handle()?, &model.data_flash, size, &self.abort)?;

        self.session = None;
        self.transition(State::Done);
        Ok(data)
    }

    fn handle(&self) -> Result<&T, Error> {
        self.session
            .as_ref()
            .map(|session| &session.handle)
            .ok_or_else(|| Error::Protocol("no open device".into()))
    }

    fn identified_model(&self) -> Result<&'m DeviceModel, Error> {
        self.expect_state(&State::Identified)?;
        self.model
            .ok_or_else(|| Error::Protocol("no device model selected".into()))
    }

    fn expect_state(&self, expected: &State) -> Result<(), Error> {
        if &self.state != expected {
            return Err(Error::Protocol(format!(
                "expected state {:?}, programmer is {:?}",
                expected, self.state
            )));
        }
        Ok(())
    }

    fn check_abort(&self, region: MemoryRegion, offset: usize) -> Result<(), Error> {
        if self.abort.load(Ordering::SeqCst) {
            return Err(Error::Aborted { region, offset });
        }
        Ok(())
    }

    fn transition(&mut self, next: State) {
        log::trace!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Moves to `Failed` and closes the device on error.
    fn finish<R>(&mut self, result: Result<R, Error>) -> Result<R, Error> {
        if let Err(e) = &result {
            log::error!("{:?} failed: {}", self.state, e);
            self.session = None;
            self.transition(State::Failed(e.clone()));
        }
        result
    }
}

fn check_size(len: usize, layout: &RegionLayout) -> Result<(), Error> {
    if len > layout.max_size {
        return Err(Error::Size {
            len,
            max: layout.max_size,
        });
    }
    Ok(())
}

use crate::Error;
use crc_any::CRCu32;
use scroll::{Pread, Pwrite, LE};

/// Marks an encoded firmware container.
pub const MAGIC: [u8; 4] = *b"EVFW";

/// Magic, payload length and checksum.
pub const HEADER_SIZE: usize = 12;

const KEY_BASE: usize = 408_376;

/// Plaintext firmware, ready to be written to APROM.
#[derive(Debug, Clone, PartialEq)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Takes bytes that are already plaintext, bypassing the codec.
    pub fn from_plaintext(data: Vec<u8>) -> Self {
        FirmwareImage { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Header plus ciphered payload, as stored on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    data: Vec<u8>,
}

impl EncodedImage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Key byte for position `index` of a `len` byte payload.
fn key(len: usize, index: usize) -> u8 {
    (len + KEY_BASE + index - len / KEY_BASE) as u8
}

/// Applies the Evic cipher. The transform is its own inverse.
pub fn convert(data: &[u8]) -> Vec<u8> {
    let len = data.len();
    data.iter()
        .enumerate()
        .map(|(i, byte)| byte ^ key(len, i))
        .collect()
}

pub fn checksum(data: &[u8]) -> u32 {
    let mut crc = CRCu32::crc32();
    crc.digest(data);
    crc.get_crc()
}

/// Whether `data` starts with the container magic.
pub fn is_encoded(data: &[u8]) -> bool {
    data.len() >= MAGIC.len() && data[..MAGIC.len()] == MAGIC
}

pub fn encode(image: &FirmwareImage) -> Result<EncodedImage, Error> {
    let payload = image.as_bytes();
    if payload.len() > u32::MAX as usize {
        return Err(Error::Size {
            len: payload.len(),
            max: u32::MAX as usize,
        });
    }

    let mut data = vec![0_u8; HEADER_SIZE + payload.len()];
    let mut offset = 0;

    data[..MAGIC.len()].copy_from_slice(&MAGIC);
    offset += MAGIC.len();
    data.gwrite_with(payload.len() as u32, &mut offset, LE)?;
    data.gwrite_with(checksum(payload), &mut offset, LE)?;
    data[offset..].copy_from_slice(&convert(payload));

    log::debug!("encoded {} byte image", payload.len());

    Ok(EncodedImage { data })
}

pub fn decode(data: &[u8]) -> Result<FirmwareImage, Error> {
    if !is_encoded(data) || data.len() < HEADER_SIZE {
        return Err(Error::Format("missing firmware image header".into()));
    }

    let mut offset = MAGIC.len();
    let len = data.gread_with::<u32>(&mut offset, LE)? as usize;
    let expected = data.gread_with::<u32>(&mut offset, LE)?;

    let body = &data[HEADER_SIZE..];
    if len > body.len() {
        return Err(Error::Size {
            len,
            max: body.len(),
        });
    }
    if len < body.len() {
        return Err(Error::Format(format!(
            "{} trailing bytes after the declared payload",
            body.len() - len
        )));
    }

    let plaintext = convert(body);
    let actual = checksum(&plaintext);
    if actual != expected {
        return Err(Error::Integrity { expected, actual });
    }

    Ok(FirmwareImage { data: plaintext })
}

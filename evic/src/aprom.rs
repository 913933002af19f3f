use crate::Error;

/// Every genuine Joyetech APROM image contains this string.
pub const MANUFACTURER_MARKER: &[u8] = b"Joyetech APROM";

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Maximum hardware version the image supports for `product_id`, if the
/// product id is present. The version is stored in the three bytes after it.
pub fn max_hw_version(image: &[u8], product_id: &str) -> Option<u32> {
    let index = find(image, product_id.as_bytes())? + product_id.len();
    let bytes = image.get(index..index + 3)?;
    Some(u32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]))
}

/// Whether `image` looks like plaintext APROM rather than a ciphered one.
pub fn is_plaintext(image: &[u8]) -> bool {
    find(image, MANUFACTURER_MARKER).is_some()
}

/// Checks a plaintext image before it is written to a device with hardware
/// version `hw_version`. The first of `product_ids` found in the image
/// decides the supported hardware versions.
pub fn verify(image: &[u8], product_ids: &[&str], hw_version: u32) -> Result<(), Error> {
    if !is_plaintext(image) {
        return Err(Error::Firmware(
            "manufacturer marker not found, is the image encrypted?".into(),
        ));
    }

    let (product_id, max) = product_ids
        .iter()
        .find_map(|id| max_hw_version(image, id).map(|max| (*id, max)))
        .ok_or_else(|| {
            Error::Firmware(format!(
                "image does not support any of {}",
                product_ids.join(", ")
            ))
        })?;

    if hw_version > max {
        return Err(Error::Firmware(format!(
            "image supports hardware versions up to {}, device is {}",
            max, hw_version
        )));
    }

    log::debug!(
        "image supports {} up to hardware version {}",
        product_id,
        max
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> Vec<u8> {
        let mut data = vec![0xFF_u8; 64];
        data.extend_from_slice(b"Joyetech APROM");
        data.extend_from_slice(&[0; 10]);
        data.extend_from_slice(b"E052");
        // maximum hardware version 0x000200 << 8
        data.extend_from_slice(&[0x00, 0x02, 0x00]);
        data.extend_from_slice(&[0xFF; 16]);
        data
    }

    #[test]
    fn accepts_supported_device() {
        assert_eq!(max_hw_version(&image(), "E052"), Some(0x0002_0000));
        verify(&image(), &["E052"], 106).unwrap();
    }

    #[test]
    fn rejects_other_device() {
        assert!(matches!(
            verify(&image(), &["W007"], 106),
            Err(Error::Firmware(_))
        ));
    }

    #[test]
    fn rejects_newer_hardware() {
        assert!(matches!(
            verify(&image(), &["E052"], 0x0003_0000),
            Err(Error::Firmware(_))
        ));
    }

    #[test]
    fn rejects_missing_marker() {
        let data = crate::image::convert(&image());
        assert!(!is_plaintext(&data));
        assert!(is_plaintext(&image()));
        assert!(matches!(verify(&data, &["E052"], 106), Err(Error::Firmware(_))));
    }

    #[test]
    fn accepts_any_listed_id() {
        verify(&image(), &["W007", "E052"], 106).unwrap();
        assert!(matches!(
            verify(&image(), &["W007", "M011"], 106),
            Err(Error::Firmware(_))
        ));
    }
}

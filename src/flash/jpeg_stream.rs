//! Stage C: streaming JPEG decode into a storage-resident RGB plane.

use log::{debug, trace};

use crate::error::IcerError;
use crate::jpeg::{ByteSource, StreamingDecoder};
use crate::storage::{Mode, Storage};

/// Rows between periodic flushes of the RGB output file.
const FLUSH_ROW_INTERVAL: u32 = 50;

/// Decode `jpeg_name` into `rgb_name` as packed RGB888 rows and return the
/// image dimensions. The output file grows organically as MCU bands land;
/// it is never pre-allocated. On any failure the output file is removed.
pub fn decode_jpeg_to_rgb(
    storage: &dyn Storage,
    jpeg_name: &str,
    rgb_name: &str,
) -> Result<(u32, u32), IcerError> {
    storage.remove(rgb_name);
    let result = decode_inner(storage, jpeg_name, rgb_name);
    if result.is_err() {
        storage.remove(rgb_name);
    }
    result
}

fn decode_inner(
    storage: &dyn Storage,
    jpeg_name: &str,
    rgb_name: &str,
) -> Result<(u32, u32), IcerError> {
    let mut jpeg_file = storage.open(jpeg_name, Mode::Read)?;
    let mut rgb_file = storage.open(rgb_name, Mode::Write)?;

    let mut pull = |buf: &mut [u8]| jpeg_file.read(buf);
    let mut src = ByteSource::new(&mut pull);

    let mut decoder = StreamingDecoder::prepare(&mut src)?;
    let width = decoder.width();
    let height = decoder.height();
    debug!("jpeg decode: {}x{}", width, height);

    let row_bytes = width as u64 * 3;
    let mut storage_error: Option<IcerError> = None;
    let mut last_flush_row = 0u32;

    let mut accept_rect = |rect: &crate::jpeg::Rect, rgb: &[u8]| -> bool {
        let band_row_bytes = rect.width() as usize * 3;
        for y in 0..rect.height() {
            let row = rect.top + y;
            let offset = row as u64 * row_bytes + rect.left as u64 * 3;
            if !rgb_file.seek(offset) {
                storage_error = Some(IcerError::StorageSeekFailed);
                return false;
            }
            let src_off = y as usize * band_row_bytes;
            let written = rgb_file.write(&rgb[src_off..src_off + band_row_bytes]);
            if written != band_row_bytes {
                storage_error = Some(IcerError::StorageWriteShort);
                return false;
            }
        }
        if rect.bottom >= last_flush_row + FLUSH_ROW_INTERVAL {
            rgb_file.flush();
            last_flush_row = rect.bottom;
        }
        trace!("jpeg decode: rows {}..={}", rect.top, rect.bottom);
        true
    };

    let decode = decoder.decompress(&mut src, &mut accept_rect);
    drop(src);
    drop(pull);

    rgb_file.flush();
    rgb_file.close();
    jpeg_file.close();

    match decode {
        Ok(()) => Ok((width, height)),
        Err(e) => Err(storage_error.unwrap_or(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStorage;

    // A 16x16 flat gray baseline JPEG: four 8x8 MCUs, DC predicted across
    // blocks, every block EOB-only.
    fn gray_16x16_jpeg() -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8];
        data.extend_from_slice(&[0xFF, 0xDB, 0x00, 0x43, 0x00]);
        data.extend_from_slice(&[1u8; 64]);
        data.extend_from_slice(&[
            0xFF, 0xC0, 0x00, 0x0B, 0x08, 0x00, 0x10, 0x00, 0x10, 0x01, 0x01, 0x11, 0x00,
        ]);
        let dc_lengths: [u8; 16] = [0, 1, 5, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0];
        let dc_values: [u8; 12] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];
        data.extend_from_slice(&[0xFF, 0xC4, 0x00, 0x1F, 0x00]);
        data.extend_from_slice(&dc_lengths);
        data.extend_from_slice(&dc_values);
        let mut ac_lengths = [0u8; 16];
        ac_lengths[0] = 1;
        data.extend_from_slice(&[0xFF, 0xC4, 0x00, 0x14, 0x10]);
        data.extend_from_slice(&ac_lengths);
        data.extend_from_slice(&[0x00]);
        data.extend_from_slice(&[
            0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00,
        ]);
        // Four MCUs x ("00" DC + "0" EOB) = 12 bits, padded to 2 bytes.
        data.extend_from_slice(&[0b0000_0000, 0b0000_1111]);
        data.extend_from_slice(&[0xFF, 0xD9]);
        data
    }

    #[test]
    fn writes_full_rgb_plane() {
        let fs = MemStorage::new();
        fs.put("in.jpg", &gray_16x16_jpeg());
        let (w, h) = decode_jpeg_to_rgb(&fs, "in.jpg", "rgb.tmp").unwrap();
        assert_eq!((w, h), (16, 16));
        let rgb = fs.get("rgb.tmp").unwrap();
        assert_eq!(rgb.len(), 16 * 16 * 3);
        assert!(rgb.iter().all(|&v| v == 128));
    }

    #[test]
    fn bad_header_removes_output() {
        let fs = MemStorage::new();
        fs.put("in.jpg", &[0x12, 0x34]);
        assert_eq!(
            decode_jpeg_to_rgb(&fs, "in.jpg", "rgb.tmp").unwrap_err(),
            IcerError::JpegHeaderBad
        );
        assert!(!fs.exists("rgb.tmp"));
    }

    #[test]
    fn missing_input_fails_open() {
        let fs = MemStorage::new();
        assert_eq!(
            decode_jpeg_to_rgb(&fs, "none.jpg", "rgb.tmp").unwrap_err(),
            IcerError::StorageOpenFailed
        );
        assert!(!fs.exists("rgb.tmp"));
    }
}

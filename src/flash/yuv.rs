//! Stage D: RGB plane to Y/U/V channel planes, scanline at a time.

use log::{debug, trace};

use crate::error::IcerError;
use crate::storage::{Mode, Storage, StorageFile};

/// Byte ordering of a YUV422 sensor buffer.
///
/// `Yuyv` is `Y0 U0 Y1 V0 ...`; `Uyvy` is `U0 Y0 V0 Y1 ...`. Confirm the
/// actual sensor layout at integration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Yuv422Order {
    #[default]
    Yuyv,
    Uyvy,
}

/// BT.601 full-range RGB to YUV with coefficients scaled by 10^6,
/// truncating division, clamped to [0, 255].
#[inline]
pub fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u16, u16, u16) {
    let (r, g, b) = (r as i64, g as i64, b as i64);
    let y = (299_000 * r + 587_000 * g + 114_000 * b) / 1_000_000;
    let u = (-168_736 * r - 331_264 * g + 500_000 * b) / 1_000_000 + 128;
    let v = (500_000 * r - 418_688 * g - 81_312 * b) / 1_000_000 + 128;
    (
        y.clamp(0, 255) as u16,
        u.clamp(0, 255) as u16,
        v.clamp(0, 255) as u16,
    )
}

fn write_channel_row(file: &mut dyn StorageFile, row: &[u16]) -> Result<(), IcerError> {
    let mut bytes = Vec::with_capacity(row.len() * 2);
    for &v in row {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    if file.write(&bytes) != bytes.len() {
        return Err(IcerError::StorageWriteShort);
    }
    Ok(())
}

/// Split `rgb_name` into three `u16` channel planes. Peak RAM is four
/// scanline buffers. The channel files are removed on any failure.
pub fn split_rgb_to_yuv(
    storage: &dyn Storage,
    rgb_name: &str,
    y_name: &str,
    u_name: &str,
    v_name: &str,
    width: usize,
    height: usize,
) -> Result<(), IcerError> {
    storage.remove(y_name);
    storage.remove(u_name);
    storage.remove(v_name);

    let result = split_inner(storage, rgb_name, y_name, u_name, v_name, width, height);
    if result.is_err() {
        storage.remove(y_name);
        storage.remove(u_name);
        storage.remove(v_name);
    }
    result
}

fn split_inner(
    storage: &dyn Storage,
    rgb_name: &str,
    y_name: &str,
    u_name: &str,
    v_name: &str,
    width: usize,
    height: usize,
) -> Result<(), IcerError> {
    if width == 0 || height == 0 {
        return Err(IcerError::InvalidDimensions);
    }
    debug!("rgb->yuv split: {}x{}", width, height);

    let mut rgb_file = storage.open(rgb_name, Mode::Read)?;
    let mut y_file = storage.open(y_name, Mode::Write)?;
    let mut u_file = storage.open(u_name, Mode::Write)?;
    let mut v_file = storage.open(v_name, Mode::Write)?;

    let mut rgb_row = vec![0u8; width * 3];
    let mut y_row = vec![0u16; width];
    let mut u_row = vec![0u16; width];
    let mut v_row = vec![0u16; width];

    for row in 0..height {
        if rgb_file.read(&mut rgb_row) != rgb_row.len() {
            return Err(IcerError::StorageReadShort);
        }
        for col in 0..width {
            let (y, u, v) = rgb_to_yuv(
                rgb_row[col * 3],
                rgb_row[col * 3 + 1],
                rgb_row[col * 3 + 2],
            );
            y_row[col] = y;
            u_row[col] = u;
            v_row[col] = v;
        }
        write_channel_row(y_file.as_mut(), &y_row)?;
        write_channel_row(u_file.as_mut(), &u_row)?;
        write_channel_row(v_file.as_mut(), &v_row)?;

        if row > 0 && row % 100 == 0 {
            y_file.flush();
            u_file.flush();
            v_file.flush();
            trace!("rgb->yuv split: row {} of {}", row, height);
        }
    }

    y_file.flush();
    u_file.flush();
    v_file.flush();
    y_file.close();
    u_file.close();
    v_file.close();
    rgb_file.close();
    Ok(())
}

/// Alternate entry point for a raw YUV422 sensor buffer: write the same
/// three channel planes, replicating the shared chroma onto both pixels of
/// each pair. A missing trailing chroma reuses the previous value (neutral
/// 128 when there is none).
pub fn split_yuv422_buffer(
    storage: &dyn Storage,
    data: &[u8],
    width: usize,
    height: usize,
    order: Yuv422Order,
    y_name: &str,
    u_name: &str,
    v_name: &str,
) -> Result<(), IcerError> {
    storage.remove(y_name);
    storage.remove(u_name);
    storage.remove(v_name);

    let result = split_yuv422_inner(storage, data, width, height, order, y_name, u_name, v_name);
    if result.is_err() {
        storage.remove(y_name);
        storage.remove(u_name);
        storage.remove(v_name);
    }
    result
}

fn split_yuv422_inner(
    storage: &dyn Storage,
    data: &[u8],
    width: usize,
    height: usize,
    order: Yuv422Order,
    y_name: &str,
    u_name: &str,
    v_name: &str,
) -> Result<(), IcerError> {
    let scanline = width
        .checked_mul(2)
        .ok_or(IcerError::TransformOverflow)?;
    let total = scanline
        .checked_mul(height)
        .ok_or(IcerError::TransformOverflow)?;
    if width == 0 || height == 0 || data.len() < total {
        return Err(IcerError::InvalidDimensions);
    }

    let mut y_file = storage.open(y_name, Mode::Write)?;
    let mut u_file = storage.open(u_name, Mode::Write)?;
    let mut v_file = storage.open(v_name, Mode::Write)?;

    let mut y_row = vec![0u16; width];
    let mut u_row = vec![0u16; width];
    let mut v_row = vec![0u16; width];

    let (y_off, u_off, v_off) = match order {
        Yuv422Order::Yuyv => (0usize, 1usize, 3usize),
        Yuv422Order::Uyvy => (1, 0, 2),
    };

    for row in 0..height {
        let line = &data[row * scanline..(row + 1) * scanline];
        for col in 0..width {
            let base = col * 2;
            y_row[col] = line[base + y_off] as u16;
            if col % 2 == 0 {
                u_row[col] = if base + u_off < scanline {
                    line[base + u_off] as u16
                } else {
                    128
                };
                v_row[col] = if base + v_off < scanline {
                    line[base + v_off] as u16
                } else if col > 0 {
                    v_row[col - 1]
                } else {
                    128
                };
            } else {
                u_row[col] = u_row[col - 1];
                v_row[col] = v_row[col - 1];
            }
        }
        write_channel_row(y_file.as_mut(), &y_row)?;
        write_channel_row(u_file.as_mut(), &u_row)?;
        write_channel_row(v_file.as_mut(), &v_row)?;
    }

    y_file.flush();
    u_file.flush();
    v_file.flush();
    y_file.close();
    u_file.close();
    v_file.close();
    Ok(())
}

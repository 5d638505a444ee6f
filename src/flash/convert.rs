//! Stage F: LL-mean subtraction and sign-magnitude conversion.
//!
//! The LL(S) subband is small enough to buffer whole; the rest of the plane
//! streams row by row through a temporary file which then replaces the
//! original. Twos-complement to sign-magnitude is not an involution, so the
//! pipeline state machine runs this stage at most once per plane.

use log::{debug, trace};

use crate::error::IcerError;
use crate::flash::names;
use crate::icer::wavelet::to_sign_magnitude;
use crate::storage::{replace_file, Mode, Storage, StorageFile};

fn row_offset(row: usize, width: usize) -> Result<u64, IcerError> {
    row.checked_mul(width)
        .and_then(|v| v.checked_mul(2))
        .map(|v| v as u64)
        .ok_or(IcerError::TransformOverflow)
}

fn read_ll_region(
    file: &mut dyn StorageFile,
    width: usize,
    ll_w: usize,
    ll_h: usize,
) -> Result<Vec<u16>, IcerError> {
    let mut region = vec![0u16; ll_w * ll_h];
    let mut bytes = vec![0u8; ll_w * 2];
    for row in 0..ll_h {
        if !file.seek(row_offset(row, width)?) {
            return Err(IcerError::StorageSeekFailed);
        }
        if file.read(&mut bytes) != bytes.len() {
            return Err(IcerError::StorageReadShort);
        }
        for (i, chunk) in bytes.chunks_exact(2).enumerate() {
            region[row * ll_w + i] = u16::from_le_bytes([chunk[0], chunk[1]]);
        }
    }
    Ok(region)
}

/// Mean of the `ll_w x ll_h` top-left subband as a 16-bit value.
/// Fails with `IntegerOverflow` when the mean exceeds the 15-bit range.
pub fn compute_ll_mean(
    storage: &dyn Storage,
    name: &str,
    width: usize,
    ll_w: usize,
    ll_h: usize,
) -> Result<u16, IcerError> {
    let mut file = storage.open(name, Mode::Read)?;
    let region = read_ll_region(file.as_mut(), width, ll_w, ll_h)?;
    file.close();

    let sum: u64 = region.iter().map(|&v| v as u64).sum();
    let mean = sum / (ll_w as u64 * ll_h as u64);
    if mean > i16::MAX as u64 {
        return Err(IcerError::IntegerOverflow);
    }
    trace!("{}: LL mean {}", name, mean);
    Ok(mean as u16)
}

/// Subtract `mean` from every LL(S) sample in place, signed 16-bit.
pub fn subtract_ll_mean(
    storage: &dyn Storage,
    name: &str,
    width: usize,
    ll_w: usize,
    ll_h: usize,
    mean: u16,
) -> Result<(), IcerError> {
    let mut region = {
        let mut file = storage.open(name, Mode::Read)?;
        let region = read_ll_region(file.as_mut(), width, ll_w, ll_h)?;
        file.close();
        region
    };
    for v in region.iter_mut() {
        *v = (*v as i16).wrapping_sub(mean as i16) as u16;
    }

    let mut file = storage.open(name, Mode::Write)?;
    let mut bytes = vec![0u8; ll_w * 2];
    for row in 0..ll_h {
        if !file.seek(row_offset(row, width)?) {
            return Err(IcerError::StorageSeekFailed);
        }
        for (i, chunk) in bytes.chunks_exact_mut(2).enumerate() {
            chunk.copy_from_slice(&region[row * ll_w + i].to_le_bytes());
        }
        if file.write(&bytes) != bytes.len() {
            return Err(IcerError::StorageWriteShort);
        }
    }
    file.flush();
    file.close();
    Ok(())
}

/// Convert the whole plane to sign-magnitude, streaming through a scratch
/// file that then replaces the original.
pub fn convert_to_sign_magnitude(
    storage: &dyn Storage,
    name: &str,
    width: usize,
    height: usize,
) -> Result<(), IcerError> {
    debug!("{}: sign-magnitude conversion", name);
    storage.remove(names::TEMP_CONVERT);

    let result = convert_inner(storage, name, width, height);
    if result.is_err() {
        storage.remove(names::TEMP_CONVERT);
    }
    result
}

fn convert_inner(
    storage: &dyn Storage,
    name: &str,
    width: usize,
    height: usize,
) -> Result<(), IcerError> {
    {
        let mut src = storage.open(name, Mode::Read)?;
        let mut dst = storage.open(names::TEMP_CONVERT, Mode::Write)?;
        let mut row = vec![0u16; width];
        let mut bytes = vec![0u8; width * 2];
        for _ in 0..height {
            if src.read(&mut bytes) != bytes.len() {
                return Err(IcerError::StorageReadShort);
            }
            for (i, v) in row.iter_mut().enumerate() {
                *v = u16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]);
            }
            to_sign_magnitude(&mut row);
            for (i, &v) in row.iter().enumerate() {
                bytes[2 * i..2 * i + 2].copy_from_slice(&v.to_le_bytes());
            }
            if dst.write(&bytes) != bytes.len() {
                return Err(IcerError::StorageWriteShort);
            }
        }
        dst.flush();
        dst.close();
        src.close();
    }
    replace_file(storage, names::TEMP_CONVERT, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStorage;

    fn put_plane(fs: &MemStorage, name: &str, samples: &[u16]) {
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for &v in samples {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        fs.put(name, &bytes);
    }

    fn get_plane(fs: &MemStorage, name: &str) -> Vec<u16> {
        fs.get(name)
            .unwrap()
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect()
    }

    #[test]
    fn mean_and_subtraction_zero_the_subband() {
        let fs = MemStorage::new();
        let (w, h) = (8usize, 8usize);
        // LL(1) of a 8x8 plane is 4x4; fill it with 100..116, rest with 7.
        let mut plane = vec![7u16; w * h];
        for y in 0..4 {
            for x in 0..4 {
                plane[y * w + x] = 100 + (y * 4 + x) as u16;
            }
        }
        put_plane(&fs, "p", &plane);

        let mean = compute_ll_mean(&fs, "p", w, 4, 4).unwrap();
        assert_eq!(mean, 107);
        subtract_ll_mean(&fs, "p", w, 4, 4, mean).unwrap();

        let out = get_plane(&fs, "p");
        let mut sum = 0i64;
        for y in 0..4 {
            for x in 0..4 {
                sum += out[y * w + x] as i16 as i64;
            }
        }
        // Truncating mean leaves a small nonnegative residual under one
        // count per sample.
        assert!(sum >= 0 && sum < 16, "residual sum {sum}");
        // Outside LL untouched.
        assert_eq!(out[4], 7);
        assert_eq!(out[5 * w], 7);
    }

    #[test]
    fn mean_over_15_bits_rejected() {
        let fs = MemStorage::new();
        put_plane(&fs, "p", &[0x9000u16; 16]);
        assert_eq!(
            compute_ll_mean(&fs, "p", 4, 4, 4).unwrap_err(),
            IcerError::IntegerOverflow
        );
    }

    #[test]
    fn conversion_swaps_plane_and_removes_temp() {
        let fs = MemStorage::new();
        let plane: Vec<u16> = vec![5, (-5i16) as u16, 0, (-32000i16) as u16];
        put_plane(&fs, "p", &plane);
        convert_to_sign_magnitude(&fs, "p", 4, 1).unwrap();
        assert_eq!(get_plane(&fs, "p"), vec![5, 0x8005, 0, 0x8000 | 32000]);
        assert!(!fs.exists(names::TEMP_CONVERT));
        // Plane size unchanged.
        assert_eq!(fs.get("p").unwrap().len(), 8);
    }

    #[test]
    fn double_conversion_corrupts() {
        let fs = MemStorage::new();
        let plane: Vec<u16> = vec![(-3i16) as u16; 8];
        put_plane(&fs, "p", &plane);
        convert_to_sign_magnitude(&fs, "p", 8, 1).unwrap();
        let once = get_plane(&fs, "p");
        convert_to_sign_magnitude(&fs, "p", 8, 1).unwrap();
        assert_ne!(get_plane(&fs, "p"), once);
    }
}

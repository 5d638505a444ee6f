//! Stage E: out-of-core multi-stage 2-D wavelet transform.
//!
//! Each stage runs a streamed row pass into a compact scratch file, then a
//! column pass that buffers a batch of adjacent columns in an interleaved
//! layout so both reads and writes stay sequential per row; the 1-D kernel
//! runs once per column with the batch width as its stride. For stages past
//! the first, the stage output goes to a per-stage scratch and is copied
//! back so regions outside the current LL stay bit-identical.

use log::{debug, trace, warn};

use crate::error::IcerError;
use crate::flash::names;
use crate::icer::wavelet::{wavelet_transform_1d, Filter};
use crate::scratch::{PoolHint, ScratchAllocator};
use crate::storage::{copy_bytes, replace_file, Mode, Storage, StorageFile};

/// Column-batch memory budget in bytes.
const COLUMN_BUDGET: usize = 150 * 1024;

/// Hard cap on columns per batch.
const MAX_BATCH_COLS: usize = 200;

fn checked_offset(row: usize, stride: usize, col: usize) -> Result<u64, IcerError> {
    let samples = row
        .checked_mul(stride)
        .and_then(|v| v.checked_add(col))
        .ok_or(IcerError::TransformOverflow)?;
    let bytes = samples.checked_mul(2).ok_or(IcerError::TransformOverflow)?;
    Ok(bytes as u64)
}

fn read_samples(
    file: &mut dyn StorageFile,
    scratch: &mut [u8],
    out: &mut [u16],
) -> Result<(), IcerError> {
    let bytes = &mut scratch[..out.len() * 2];
    if file.read(bytes) != bytes.len() {
        return Err(IcerError::StorageReadShort);
    }
    for (i, v) in out.iter_mut().enumerate() {
        *v = u16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]);
    }
    Ok(())
}

fn write_samples(
    file: &mut dyn StorageFile,
    scratch: &mut [u8],
    src: &[u16],
) -> Result<(), IcerError> {
    let bytes = &mut scratch[..src.len() * 2];
    for (i, &v) in src.iter().enumerate() {
        bytes[2 * i..2 * i + 2].copy_from_slice(&v.to_le_bytes());
    }
    if file.write(bytes) != bytes.len() {
        return Err(IcerError::StorageWriteShort);
    }
    Ok(())
}

fn zero_fill(file: &mut dyn StorageFile, total: u64) -> Result<(), IcerError> {
    let chunk = [0u8; 4096];
    let mut remaining = total;
    while remaining > 0 {
        let want = remaining.min(chunk.len() as u64) as usize;
        if file.write(&chunk[..want]) != want {
            return Err(IcerError::StorageWriteShort);
        }
        remaining -= want as u64;
    }
    Ok(())
}

/// Apply `stages` stages of the separable 2-D transform to the plane in
/// `input_name`, producing `output_name` with the canonical pyramid layout.
/// `stages == 0` copies the plane byte-identically.
pub fn streaming_wavelet_transform(
    storage: &dyn Storage,
    scratch: &ScratchAllocator,
    input_name: &str,
    output_name: &str,
    width: usize,
    height: usize,
    stages: u8,
    filter: Filter,
) -> Result<(), IcerError> {
    if width == 0 || height == 0 {
        return Err(IcerError::InvalidDimensions);
    }
    let total_bytes = width
        .checked_mul(height)
        .and_then(|v| v.checked_mul(2))
        .ok_or(IcerError::TransformOverflow)? as u64;

    storage.remove(output_name);
    if stages == 0 {
        let mut src = storage.open(input_name, Mode::Read)?;
        let mut dst = storage.open(output_name, Mode::Write)?;
        let res = copy_bytes(src.as_mut(), dst.as_mut(), total_bytes);
        dst.flush();
        src.close();
        dst.close();
        if res.is_err() {
            storage.remove(output_name);
        }
        return res;
    }

    let result = transform_inner(
        storage, scratch, input_name, output_name, width, height, stages, filter, total_bytes,
    );
    storage.remove(names::WAVELET_TEMP);
    storage.remove(names::WAVELET_STAGE_TEMP);
    if result.is_err() {
        storage.remove(output_name);
    }
    result
}

#[allow(clippy::too_many_arguments)]
fn transform_inner(
    storage: &dyn Storage,
    scratch: &ScratchAllocator,
    input_name: &str,
    output_name: &str,
    width: usize,
    height: usize,
    stages: u8,
    filter: Filter,
    total_bytes: u64,
) -> Result<(), IcerError> {
    let mut current_w = width;
    let mut current_h = height;
    debug!("wavelet transform: {} stages over {}x{}", stages, width, height);

    for stage in 0..stages {
        trace!(
            "wavelet stage {} of {}: {}x{}",
            stage + 1,
            stages,
            current_w,
            current_h
        );

        // Row pass: stream LL-region rows through the 1-D kernel into a
        // compact scratch file.
        let stage_input = if stage == 0 { input_name } else { output_name };
        {
            let mut stage_in = storage.open(stage_input, Mode::Read)?;
            storage.remove(names::WAVELET_TEMP);
            let mut temp_out = storage.open(names::WAVELET_TEMP, Mode::Write)?;

            let mut row_buf = scratch.alloc_u16(current_w, PoolHint::Primary)?;
            let mut byte_buf = scratch.alloc_u8(current_w * 2, PoolHint::Primary)?;
            for row in 0..current_h {
                let pos = checked_offset(row, width, 0)?;
                if !stage_in.seek(pos) {
                    return Err(IcerError::StorageSeekFailed);
                }
                read_samples(stage_in.as_mut(), &mut byte_buf, &mut row_buf)?;
                wavelet_transform_1d(&mut row_buf, current_w, 1, filter);
                write_samples(temp_out.as_mut(), &mut byte_buf, &row_buf)?;
            }
            temp_out.flush();
            temp_out.close();
            stage_in.close();
        }

        // Column pass: batch adjacent columns interleaved so file access
        // stays sequential per row.
        let stage_out_name = if stage == 0 {
            output_name
        } else {
            names::WAVELET_STAGE_TEMP
        };
        {
            let mut temp_in = storage.open(names::WAVELET_TEMP, Mode::Read)?;
            storage.remove(stage_out_name);
            let mut stage_out = storage.open(stage_out_name, Mode::Write)?;

            if stage == 0 {
                zero_fill(stage_out.as_mut(), total_bytes)?;
            } else {
                let mut existing = storage.open(output_name, Mode::Read)?;
                copy_bytes(existing.as_mut(), stage_out.as_mut(), total_bytes)?;
                existing.close();
            }
            if !stage_out.seek(0) {
                return Err(IcerError::StorageSeekFailed);
            }

            let col_size = current_h
                .checked_mul(2)
                .ok_or(IcerError::TransformOverflow)?;
            let mut batch = (COLUMN_BUDGET / col_size).max(1).min(MAX_BATCH_COLS);
            if col_size > COLUMN_BUDGET {
                warn!(
                    "column of {} bytes exceeds the {} byte budget; batching one column",
                    col_size, COLUMN_BUDGET
                );
                batch = 1;
            }
            batch = batch.min(current_w);
            let batch_samples = batch
                .checked_mul(current_h)
                .ok_or(IcerError::TransformOverflow)?;

            let mut col_buf = scratch.alloc_u16(batch_samples, PoolHint::Auxiliary)?;
            let mut byte_buf = scratch.alloc_u8(batch * 2, PoolHint::Primary)?;

            let mut col_start = 0usize;
            while col_start < current_w {
                let cols = batch.min(current_w - col_start);

                for row in 0..current_h {
                    let pos = checked_offset(row, current_w, col_start)?;
                    if !temp_in.seek(pos) {
                        return Err(IcerError::StorageSeekFailed);
                    }
                    let dst = row * batch;
                    read_samples(
                        temp_in.as_mut(),
                        &mut byte_buf,
                        &mut col_buf[dst..dst + cols],
                    )?;
                }

                for col in 0..cols {
                    wavelet_transform_1d(&mut col_buf[col..], current_h, batch, filter);
                }

                for row in 0..current_h {
                    let pos = checked_offset(row, width, col_start)?;
                    if !stage_out.seek(pos) {
                        return Err(IcerError::StorageSeekFailed);
                    }
                    let src = row * batch;
                    write_samples(stage_out.as_mut(), &mut byte_buf, &col_buf[src..src + cols])?;
                }

                col_start += cols;
            }
            stage_out.flush();
            stage_out.close();
            temp_in.close();
        }

        if stage > 0 {
            replace_file(storage, names::WAVELET_STAGE_TEMP, output_name)?;
        }
        storage.remove(names::WAVELET_TEMP);

        current_w = current_w.div_ceil(2);
        current_h = current_h.div_ceil(2);
    }
    Ok(())
}

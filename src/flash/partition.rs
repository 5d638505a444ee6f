//! Stage G: tile-streaming partition coder.
//!
//! For each segment of a partition: read its rows from the channel file into
//! a padded tile buffer, replicate the border, and drive the bit-plane coder
//! into a freshly allocated segment record. The padded border gives the
//! coder valid neighbours at segment edges without bespoke boundary code.

use crate::error::IcerError;
use crate::icer::bitplane::compress_bitplane;
use crate::icer::coder::{CoderContext, ContextModel};
use crate::icer::partition::{segment_rects, PartitionParams};
use crate::icer::segment::{DataStream, SegmentId};
use crate::icer::PacketContext;
use crate::scratch::{PoolHint, ScratchAllocator};
use crate::storage::StorageFile;

/// Process every segment of `params` for the packet `pkt`, sealing one
/// segment record per tile and reporting each through `register`.
///
/// `file_offset` is the byte offset of the subband origin within the channel
/// file; `rowstride` is the full image width in samples.
#[allow(clippy::too_many_arguments)]
pub fn compress_partition(
    file: &mut dyn StorageFile,
    file_offset: u64,
    params: &PartitionParams,
    rowstride: usize,
    pkt: &PacketContext,
    ds: &mut DataStream,
    scratch: &ScratchAllocator,
    register: &mut dyn FnMut(u16, SegmentId),
) -> Result<(), IcerError> {
    let (w_max, h_max) = params.max_segment_dims();
    let padded_w = w_max + 2;
    let padded_h = h_max + 2;
    let mut tile = scratch.alloc_u16(padded_w * padded_h, PoolHint::Primary)?;
    let mut row_bytes = scratch.alloc_u8(w_max * 2, PoolHint::Primary)?;

    for (segment_num, x0, y0, seg_w, seg_h) in segment_rects(params) {
        read_padded_tile(
            file,
            file_offset,
            rowstride,
            x0,
            y0,
            seg_w,
            seg_h,
            &mut tile,
            padded_w,
            &mut row_bytes,
        )?;

        let mut model = ContextModel::new(pkt.subband_type);
        let handle = ds.allocate_segment()?;
        let coding = {
            let region = ds.payload_region(handle);
            let mut coder = CoderContext::new(region);
            match compress_bitplane(
                &tile,
                padded_w + 1,
                seg_w,
                seg_h,
                padded_w,
                &mut model,
                &mut coder,
                pkt,
            ) {
                Ok(()) => coder.finish(),
                Err(e) => Err(e),
            }
        };
        match coding {
            Ok((payload_bytes, data_bits)) => {
                let id = ds.seal_segment(handle, pkt, segment_num, payload_bytes, data_bits);
                register(segment_num, id);
            }
            Err(e) => {
                ds.release_failed(handle);
                return Err(e);
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn read_padded_tile(
    file: &mut dyn StorageFile,
    file_offset: u64,
    rowstride: usize,
    x0: usize,
    y0: usize,
    seg_w: usize,
    seg_h: usize,
    tile: &mut [u16],
    padded_w: usize,
    row_bytes: &mut [u8],
) -> Result<(), IcerError> {
    for row in 0..seg_h {
        let samples = (y0 + row)
            .checked_mul(rowstride)
            .and_then(|v| v.checked_add(x0))
            .and_then(|v| v.checked_mul(2))
            .ok_or(IcerError::TransformOverflow)?;
        let pos = file_offset
            .checked_add(samples as u64)
            .ok_or(IcerError::TransformOverflow)?;
        if !file.seek(pos) {
            return Err(IcerError::StorageSeekFailed);
        }
        let bytes = &mut row_bytes[..seg_w * 2];
        if file.read(bytes) != bytes.len() {
            return Err(IcerError::StorageReadShort);
        }

        let interior = (row + 1) * padded_w + 1;
        for i in 0..seg_w {
            tile[interior + i] = u16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]);
        }
        // Left and right edge replication.
        tile[interior - 1] = tile[interior];
        tile[interior + seg_w] = tile[interior + seg_w - 1];
    }

    // Top and bottom padding rows replicate the nearest interior row,
    // including its left/right padding.
    for col in 0..padded_w.min(seg_w + 2) {
        tile[col] = tile[padded_w + col];
        tile[(seg_h + 1) * padded_w + col] = tile[seg_h * padded_w + col];
    }
    Ok(())
}

//! Bit-plane coding of one sign-magnitude tile.
//!
//! Samples are scanned in raster order. A sample that is not yet significant
//! (no magnitude bit above the current plane) gets a significance bit whose
//! context comes from the eight neighbours; on becoming significant its sign
//! bit follows. An already-significant sample gets a magnitude refinement
//! bit. Neighbour lookups dereference `pos ± 1` and `pos ± rowstride`, which
//! is why the caller hands in a tile with a one-pixel replicated border.

use crate::error::IcerError;
use crate::icer::coder::{CoderContext, ContextModel};
use crate::icer::PacketContext;

#[inline]
fn magnitude(sample: u16) -> u32 {
    (sample & 0x7FFF) as u32
}

#[inline]
fn is_negative(sample: u16) -> bool {
    sample & 0x8000 != 0
}

/// Significance of a neighbour. Neighbours already scanned this pass are
/// judged including the current plane's bit; the rest only on higher planes.
#[inline]
fn significant(sample: u16, plane: u8, scanned: bool) -> bool {
    let floor = if scanned { plane } else { plane + 1 };
    (magnitude(sample) >> floor) != 0
}

#[inline]
fn sign_contrib(sample: u16, plane: u8, scanned: bool) -> i8 {
    if significant(sample, plane, scanned) {
        if is_negative(sample) {
            -1
        } else {
            1
        }
    } else {
        0
    }
}

/// Compress bit-plane `pkt.bit_plane` of the `w x h` tile whose top-left
/// interior sample sits at `buf[origin]`, rows `rowstride` apart.
pub fn compress_bitplane(
    buf: &[u16],
    origin: usize,
    w: usize,
    h: usize,
    rowstride: usize,
    model: &mut ContextModel,
    coder: &mut CoderContext,
    pkt: &PacketContext,
) -> Result<(), IcerError> {
    let plane = pkt.bit_plane;

    for y in 0..h {
        for x in 0..w {
            let pos = origin + y * rowstride + x;
            let sample = buf[pos];
            let mag = magnitude(sample);
            let bit = ((mag >> plane) & 1) as u8;

            let left = buf[pos - 1];
            let right = buf[pos + 1];
            let up = buf[pos - rowstride];
            let down = buf[pos + rowstride];

            if (mag >> (plane + 1)) == 0 {
                // Not yet significant: code significance, then sign on a hit.
                let h_cnt = significant(left, plane, true) as u8
                    + significant(right, plane, false) as u8;
                let v_cnt = significant(up, plane, true) as u8
                    + significant(down, plane, false) as u8;
                let d_cnt = significant(buf[pos - rowstride - 1], plane, true) as u8
                    + significant(buf[pos - rowstride + 1], plane, true) as u8
                    + significant(buf[pos + rowstride - 1], plane, false) as u8
                    + significant(buf[pos + rowstride + 1], plane, false) as u8;

                let cx = model.significance_context(h_cnt, v_cnt, d_cnt);
                coder.encode_bit(bit, cx, model)?;

                if bit == 1 {
                    let h_contrib = (sign_contrib(left, plane, true)
                        + sign_contrib(right, plane, false))
                    .clamp(-2, 2);
                    let v_contrib = (sign_contrib(up, plane, true)
                        + sign_contrib(down, plane, false))
                    .clamp(-2, 2);
                    let (sc, xor) = ContextModel::sign_context(h_contrib, v_contrib);
                    let sign = is_negative(sample) as u8;
                    coder.encode_bit(sign ^ xor, sc, model)?;
                }
            } else {
                // Refinement bit for a sample significant from higher planes.
                let refined_before = (mag >> (plane + 2)) != 0;
                let any_sig = significant(left, plane, true)
                    || significant(right, plane, false)
                    || significant(up, plane, true)
                    || significant(down, plane, false);
                let cx = ContextModel::refinement_context(refined_before, any_sig);
                coder.encode_bit(bit, cx, model)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icer::{Channel, Subband};

    fn test_pkt(plane: u8) -> PacketContext {
        PacketContext {
            subband_type: Subband::Hh,
            decomp_level: 1,
            ll_mean: 0,
            bit_plane: plane,
            priority: 1,
            channel: Channel::Y,
            image_w: 8,
            image_h: 8,
        }
    }

    /// Build a padded tile with replicated borders, like the partition coder.
    fn padded(tile: &[u16], w: usize, h: usize) -> (Vec<u16>, usize, usize) {
        let pw = w + 2;
        let ph = h + 2;
        let mut buf = vec![0u16; pw * ph];
        for y in 0..h {
            for x in 0..w {
                buf[(y + 1) * pw + x + 1] = tile[y * w + x];
            }
            buf[(y + 1) * pw] = tile[y * w];
            buf[(y + 1) * pw + w + 1] = tile[y * w + w - 1];
        }
        for x in 0..pw {
            buf[x] = buf[pw + x];
            buf[(ph - 1) * pw + x] = buf[(ph - 2) * pw + x];
        }
        (buf, pw + 1, pw)
    }

    #[test]
    fn all_zero_plane_codes_to_nothing() {
        let tile = vec![0u16; 16];
        let (buf, origin, stride) = padded(&tile, 4, 4);
        let mut model = ContextModel::new(Subband::Hh);
        let mut out = [0u8; 128];
        let mut coder = CoderContext::new(&mut out);
        compress_bitplane(
            &buf,
            origin,
            4,
            4,
            stride,
            &mut model,
            &mut coder,
            &test_pkt(3),
        )
        .unwrap();
        let (bytes, bits) = coder.finish().unwrap();
        assert_eq!((bytes, bits), (0, 0));
    }

    #[test]
    fn significant_samples_produce_output() {
        // 0x4000 has bit 14 set; plane 14 sees fresh significance + signs.
        let mut tile = vec![0u16; 16];
        tile[5] = 0x4000;
        tile[10] = 0x8000 | 0x4000;
        let (buf, origin, stride) = padded(&tile, 4, 4);
        let mut model = ContextModel::new(Subband::Lh);
        let mut out = [0u8; 128];
        let mut coder = CoderContext::new(&mut out);
        compress_bitplane(
            &buf,
            origin,
            4,
            4,
            stride,
            &mut model,
            &mut coder,
            &test_pkt(14),
        )
        .unwrap();
        let (bytes, bits) = coder.finish().unwrap();
        assert!(bytes > 0);
        assert!(bits > 0);
    }

    #[test]
    fn tiny_capacity_trips_quota() {
        let tile: Vec<u16> = (0..64u16).map(|i| (i * 521) ^ 0x2AAA).collect();
        let (buf, origin, stride) = padded(&tile, 8, 8);
        let mut model = ContextModel::new(Subband::Hl);
        let mut out = [0u8; 1];
        let mut coder = CoderContext::new(&mut out);
        let mut err = None;
        for plane in (0..8).rev() {
            let res = compress_bitplane(
                &buf,
                origin,
                8,
                8,
                stride,
                &mut model,
                &mut coder,
                &test_pkt(plane),
            );
            if let Err(e) = res {
                err = Some(e);
                break;
            }
        }
        assert_eq!(err, Some(IcerError::ByteQuotaExceeded));
    }
}

//! Segment partition parameters.
//!
//! A subband is tiled into error-containment segments by an irregular grid:
//! a top region of `r_t` rows with `c` columns and an optional bottom region
//! of `r - r_t` rows with `c + 1` columns. Within a region the first rows
//! are one pixel shorter and the first columns one pixel narrower, so the
//! segment dimensions sum exactly to the subband dimensions.

use crate::error::IcerError;
use crate::icer::MAX_SEGMENTS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionParams {
    /// Total segment rows.
    pub r: u16,
    /// Columns in the top region (bottom region has `c + 1`).
    pub c: u16,
    /// Rows belonging to the top region.
    pub r_t: u16,
    /// Top-region rows with height `y_t` (the rest have `y_t + 1`).
    pub r_t0: u16,
    /// Top-region columns with width `x_t` (the rest have `x_t + 1`).
    pub c_t0: u16,
    pub x_t: u16,
    pub y_t: u16,
    /// Bottom-region analogues.
    pub r_b0: u16,
    pub c_b0: u16,
    pub x_b: u16,
    pub y_b: u16,
    /// Top region height in pixels.
    pub h_t: u16,
    /// Total segments in the partition.
    pub segments: u16,
}

impl PartitionParams {
    /// Largest segment width and height this partition can produce.
    pub fn max_segment_dims(&self) -> (usize, usize) {
        let mut w_max = self.x_t as usize + 1;
        let mut h_max = self.y_t as usize + 1;
        if self.r > self.r_t {
            w_max = w_max.max(self.x_b as usize + 1);
            h_max = h_max.max(self.y_b as usize + 1);
        }
        (w_max, h_max)
    }
}

fn isqrt(v: usize) -> usize {
    if v < 2 {
        return v;
    }
    let mut x = v;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + v / x) / 2;
    }
    x
}

/// Derive partition parameters for a `w x h` subband and a requested segment
/// count. The count is clamped so every segment stays non-empty; more than
/// [`MAX_SEGMENTS`] is rejected.
pub fn generate_partition_params(
    w: usize,
    h: usize,
    segments: u8,
) -> Result<PartitionParams, IcerError> {
    if w == 0 || h == 0 || segments == 0 {
        return Err(IcerError::InvalidArgument);
    }
    if segments as usize > MAX_SEGMENTS {
        return Err(IcerError::TooManySegments);
    }
    let area = w.checked_mul(h).ok_or(IcerError::TransformOverflow)?;
    let s = (segments as usize).min(h).min(area);

    // Aim for roughly square segments, then walk r upward until the column
    // counts fit the subband width.
    let mut r = isqrt(s * h / w.max(1)).clamp(1, s.min(h));
    loop {
        let c = s / r;
        let r_t = r * (c + 1) - s;
        let fits_top = c <= w;
        let fits_bottom = r_t == r || c + 1 <= w;
        if fits_top && fits_bottom {
            break;
        }
        r += 1;
    }
    let r = r;
    let c = s / r;
    let r_t = r * (c + 1) - s;
    let r_b = r - r_t;

    // Split the pixel rows between the regions in proportion, keeping at
    // least one pixel per segment row on both sides.
    let h_t = if r_t == 0 {
        0
    } else if r_b == 0 {
        h
    } else {
        (h * r_t / r).clamp(r_t, h - r_b)
    };
    let h_b = h - h_t;

    let (y_t, r_t0) = if r_t > 0 {
        let y = h_t / r_t;
        (y, r_t * (y + 1) - h_t)
    } else {
        (0, 0)
    };
    let x_t = w / c;
    let c_t0 = c * (x_t + 1) - w;

    let (y_b, r_b0) = if r_b > 0 {
        let y = h_b / r_b;
        (y, r_b * (y + 1) - h_b)
    } else {
        (0, 0)
    };
    let (x_b, c_b0) = if r_b > 0 {
        let x = w / (c + 1);
        (x, (c + 1) * (x + 1) - w)
    } else {
        (0, 0)
    };

    Ok(PartitionParams {
        r: r as u16,
        c: c as u16,
        r_t: r_t as u16,
        r_t0: r_t0 as u16,
        c_t0: c_t0 as u16,
        x_t: x_t as u16,
        y_t: y_t as u16,
        r_b0: r_b0 as u16,
        c_b0: c_b0 as u16,
        x_b: x_b as u16,
        y_b: y_b as u16,
        h_t: h_t as u16,
        segments: s as u16,
    })
}

/// Iterate the segment rectangles of a partition in coding order:
/// `(segment_number, x0, y0, w, h)`.
pub fn segment_rects(params: &PartitionParams) -> Vec<(u16, usize, usize, usize, usize)> {
    let mut rects = Vec::with_capacity(params.segments as usize);
    let mut seg = 0u16;
    let mut row_ind = 0usize;

    for row in 0..params.r_t {
        let seg_h = params.y_t as usize + usize::from(row >= params.r_t0);
        let mut col_ind = 0usize;
        for col in 0..params.c {
            let seg_w = params.x_t as usize + usize::from(col >= params.c_t0);
            rects.push((seg, col_ind, row_ind, seg_w, seg_h));
            col_ind += seg_w;
            seg += 1;
        }
        row_ind += seg_h;
    }
    for row in 0..(params.r - params.r_t) {
        let seg_h = params.y_b as usize + usize::from(row >= params.r_b0);
        let mut col_ind = 0usize;
        for col in 0..(params.c + 1) {
            let seg_w = params.x_b as usize + usize::from(col >= params.c_b0);
            rects.push((seg, col_ind, row_ind, seg_w, seg_h));
            col_ind += seg_w;
            seg += 1;
        }
        row_ind += seg_h;
    }
    rects
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_tiles(w: usize, h: usize, segments: u8) {
        let params = generate_partition_params(w, h, segments).unwrap();
        let rects = segment_rects(&params);
        assert_eq!(rects.len(), params.segments as usize);

        let mut covered = vec![false; w * h];
        for &(_, x0, y0, sw, sh) in &rects {
            assert!(sw > 0 && sh > 0, "empty segment in {}x{}/{}", w, h, segments);
            for y in y0..y0 + sh {
                for x in x0..x0 + sw {
                    assert!(x < w && y < h, "segment exceeds subband");
                    assert!(!covered[y * w + x], "overlap at ({x},{y})");
                    covered[y * w + x] = true;
                }
            }
        }
        assert!(covered.iter().all(|&c| c), "hole in {}x{}/{}", w, h, segments);
    }

    #[test]
    fn partitions_tile_exactly() {
        assert_tiles(64, 64, 6);
        assert_tiles(640, 480, 6);
        assert_tiles(320, 240, 10);
        assert_tiles(17, 11, 5);
        assert_tiles(8, 8, 2);
        assert_tiles(4, 4, 2);
        // Counts that do not divide evenly exercise the bottom region.
        assert_tiles(64, 64, 5);
        assert_tiles(2, 8, 5);
        assert_tiles(100, 3, 7);
    }

    #[test]
    fn odd_width_uses_both_column_widths() {
        // 7 wide with 2 columns: widths 3 and 4 must both appear.
        let params = generate_partition_params(7, 8, 4).unwrap();
        let rects = segment_rects(&params);
        let widths: std::collections::BTreeSet<usize> =
            rects.iter().map(|&(_, _, _, w, _)| w).collect();
        assert!(widths.len() >= 2, "expected mixed widths, got {:?}", widths);
        assert_tiles(7, 8, 4);
    }

    #[test]
    fn degenerate_plane_clamps_segment_count() {
        let params = generate_partition_params(1, 1, 2).unwrap();
        assert_eq!(params.segments, 1);
        let rects = segment_rects(&params);
        assert_eq!(rects, vec![(0, 0, 0, 1, 1)]);
    }

    #[test]
    fn single_column_plane() {
        assert_tiles(1, 16, 4);
    }

    #[test]
    fn segment_count_over_limit_rejected() {
        assert_eq!(
            generate_partition_params(64, 64, 33).unwrap_err(),
            IcerError::TooManySegments
        );
    }
}

//! Context-model entropy coder.
//!
//! A binary arithmetic coder over a 47-state probability table drives all
//! bit-plane output. Contexts live in a [`ContextModel`] seeded per subband:
//! nine significance contexts selected through orientation-specific
//! neighbour tables, five sign contexts carrying an XOR bit, and three
//! magnitude-refinement contexts.
//!
//! The coder is encode-only and writes into a caller-provided byte region
//! with a hard capacity; hitting the cap surfaces as `ByteQuotaExceeded`.
//! `finish` selects the lower bound of the final interval and truncates
//! trailing zero bytes, so a segment whose every coded bit is the more
//! probable symbol has a data length of exactly zero bits.

use crate::error::IcerError;
use crate::icer::Subband;

// (qe, next-state on MPS, next-state on LPS, MPS switch)
const MQ_TABLE: [(u16, u8, u8, u8); 47] = [
    (0x5601, 1, 1, 1),
    (0x3401, 2, 6, 0),
    (0x1801, 3, 9, 0),
    (0x0AC1, 4, 12, 0),
    (0x0521, 5, 29, 0),
    (0x0221, 38, 33, 0),
    (0x5601, 7, 6, 1),
    (0x5401, 8, 14, 0),
    (0x4801, 9, 14, 0),
    (0x3801, 10, 14, 0),
    (0x3001, 11, 17, 0),
    (0x2401, 12, 18, 0),
    (0x1C01, 13, 20, 0),
    (0x1601, 29, 21, 0),
    (0x5601, 15, 14, 1),
    (0x5401, 16, 14, 0),
    (0x5101, 17, 15, 0),
    (0x4801, 18, 16, 0),
    (0x3801, 19, 17, 0),
    (0x3401, 20, 18, 0),
    (0x3001, 21, 19, 0),
    (0x2801, 22, 19, 0),
    (0x2401, 23, 19, 0),
    (0x2201, 24, 19, 0),
    (0x1C01, 25, 20, 0),
    (0x1801, 26, 21, 0),
    (0x1601, 27, 22, 0),
    (0x1401, 28, 23, 0),
    (0x1201, 29, 24, 0),
    (0x1101, 30, 25, 0),
    (0x0AC1, 31, 26, 0),
    (0x09C1, 32, 27, 0),
    (0x08A1, 33, 28, 0),
    (0x0521, 34, 29, 0),
    (0x0441, 35, 30, 0),
    (0x02A1, 36, 31, 0),
    (0x0221, 37, 32, 0),
    (0x0141, 38, 33, 0),
    (0x0111, 39, 34, 0),
    (0x0085, 40, 35, 0),
    (0x0049, 41, 36, 0),
    (0x0025, 42, 37, 0),
    (0x0015, 43, 38, 0),
    (0x0009, 44, 39, 0),
    (0x0005, 45, 40, 0),
    (0x0001, 45, 41, 0),
    (0x5601, 46, 46, 0),
];

/// Number of coding contexts in a model.
pub const NUM_CONTEXTS: usize = 17;

const SIGN_CONTEXT_BASE: usize = 9;
const MR_CONTEXT_BASE: usize = 14;

/// Adaptive context states for one segment, seeded by subband type.
pub struct ContextModel {
    subband: Subband,
    // (state << 1) | mps
    states: [u8; NUM_CONTEXTS],
}

impl ContextModel {
    pub fn new(subband: Subband) -> Self {
        let mut states = [0u8; NUM_CONTEXTS];
        // Significance contexts start skewed towards zero (MPS = 0). The
        // seed state keeps Qe under 0x4000 so runs of zeros never leave the
        // lower sub-interval.
        let seed = match subband {
            Subband::Ll => 3,
            Subband::Hl | Subband::Lh => 2,
            Subband::Hh => 1,
        };
        for s in states.iter_mut().take(SIGN_CONTEXT_BASE) {
            *s = seed << 1;
        }
        Self { subband, states }
    }

    /// Significance context from horizontal/vertical/diagonal significant
    /// neighbour counts, through the orientation table for this subband.
    pub fn significance_context(&self, h: u8, v: u8, d: u8) -> usize {
        match self.subband {
            // HL is horizontally high-pass: swap the roles of h and v.
            Subband::Hl => Self::zc_lookup(v, h, d),
            Subband::Ll | Subband::Lh => Self::zc_lookup(h, v, d),
            Subband::Hh => match (d, h + v) {
                (d, _) if d >= 3 => 8,
                (2, hv) if hv >= 1 => 7,
                (2, 0) => 6,
                (1, hv) if hv >= 2 => 5,
                (1, 1) => 4,
                (1, 0) => 3,
                (0, hv) if hv >= 2 => 2,
                (0, 1) => 1,
                _ => 0,
            },
        }
    }

    fn zc_lookup(a: u8, b: u8, d: u8) -> usize {
        match (a, b, d) {
            (2, _, _) => 8,
            (1, b, _) if b >= 1 => 7,
            (1, 0, d) if d >= 1 => 6,
            (1, 0, 0) => 5,
            (0, 2, _) => 4,
            (0, 1, _) => 3,
            (0, 0, d) if d >= 2 => 2,
            (0, 0, 1) => 1,
            _ => 0,
        }
    }

    /// Sign context from signed horizontal/vertical contributions (each in
    /// -2..=2). Returns `(context, xor_bit)`.
    pub fn sign_context(h: i8, v: i8) -> (usize, u8) {
        let (offset, xor) = match (h, v) {
            (2, 2) => (4, 1),
            (2, 1) | (1, 2) => (3, 1),
            (2, 0) | (0, 2) => (2, 1),
            (2, -1) | (-1, 2) => (1, 1),
            (2, -2) | (-2, 2) => (0, 1),
            (1, 1) => (4, 0),
            (1, 0) | (0, 1) => (3, if h == 1 { 0 } else { 1 }),
            (1, -1) | (-1, 1) => (2, if h == 1 { 0 } else { 1 }),
            (1, -2) | (-2, 1) => (1, 0),
            (0, 0) => (0, 0),
            (0, -1) | (-1, 0) => (3, 0),
            (0, -2) | (-2, 0) => (2, 0),
            (-1, -1) => (4, 0),
            (-1, -2) | (-2, -1) => (3, 0),
            (-2, -2) => (4, 0),
            _ => (0, 0),
        };
        (SIGN_CONTEXT_BASE + offset, xor)
    }

    /// Magnitude refinement context.
    pub fn refinement_context(refined_before: bool, any_sig_neighbour: bool) -> usize {
        if refined_before {
            MR_CONTEXT_BASE + 2
        } else if any_sig_neighbour {
            MR_CONTEXT_BASE + 1
        } else {
            MR_CONTEXT_BASE
        }
    }
}

/// Arithmetic coder bound to one segment's payload region.
pub struct CoderContext<'a> {
    out: &'a mut [u8],
    pos: usize,
    a: u16,
    c: u32,
    ct: u8,
}

impl<'a> CoderContext<'a> {
    /// `out` is the payload capacity remaining in the datastream buffer.
    pub fn new(out: &'a mut [u8]) -> Self {
        Self {
            out,
            pos: 0,
            a: 0x8000,
            c: 0,
            ct: 12,
        }
    }

    pub fn encode_bit(
        &mut self,
        bit: u8,
        cx: usize,
        model: &mut ContextModel,
    ) -> Result<(), IcerError> {
        let ctx = model.states[cx];
        let idx = (ctx >> 1) as usize;
        let mps = ctx & 1;
        let (qe, nmps, nlps, switch) = MQ_TABLE[idx];

        self.a -= qe;

        if bit == mps {
            if self.a < 0x8000 {
                if self.a < qe {
                    self.c += self.a as u32;
                    self.a = qe;
                }
                model.states[cx] = (nmps << 1) | mps;
                self.renormalize()?;
            }
        } else {
            if qe > self.a {
                self.a = qe;
            } else {
                self.c += self.a as u32;
                self.a = qe;
            }
            let next_mps = if switch == 1 { 1 - mps } else { mps };
            model.states[cx] = (nlps << 1) | next_mps;
            self.renormalize()?;
        }
        Ok(())
    }

    fn renormalize(&mut self) -> Result<(), IcerError> {
        loop {
            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;
            if self.ct == 0 {
                self.byte_out()?;
                self.ct = 8;
            }
            if self.a >= 0x8000 {
                break;
            }
        }
        Ok(())
    }

    fn byte_out(&mut self) -> Result<(), IcerError> {
        if self.pos >= self.out.len() {
            return Err(IcerError::ByteQuotaExceeded);
        }
        let b = (self.c >> 19) as u8;
        if b == 0xFF {
            self.ct = 7;
        }
        self.c &= 0x7FFFF;
        self.out[self.pos] = b;
        self.pos += 1;
        Ok(())
    }

    /// Flush the lower interval bound and truncate trailing zeros.
    /// Returns `(payload_bytes, data_length_bits)`.
    pub fn finish(mut self) -> Result<(usize, u32), IcerError> {
        for _ in 0..4 {
            if self.c == 0 {
                break;
            }
            self.c <<= self.ct;
            self.byte_out()?;
            self.ct = 8;
        }
        while self.pos > 0 && self.out[self.pos - 1] == 0 {
            self.pos -= 1;
        }
        let bits = if self.pos == 0 {
            0
        } else {
            self.pos as u32 * 8 - self.out[self.pos - 1].trailing_zeros()
        };
        Ok((self.pos, bits))
    }
}

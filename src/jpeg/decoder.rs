//! Baseline sequential JPEG decoding, one MCU band at a time.

use crate::error::IcerError;
use crate::jpeg::huffman::{extend_value, BitReader, HuffmanTable};
use crate::jpeg::idct::{idct_8x8, ZIGZAG_ORDER};
use crate::jpeg::{ByteSource, Rect};

#[derive(Clone, Debug)]
struct Component {
    id: u8,
    h: usize,
    v: usize,
    quant_table: usize,
    dc_table: usize,
    ac_table: usize,
}

/// Streaming baseline decoder.
///
/// `prepare` parses the headers up to the start of scan and yields the frame
/// dimensions; `decompress` then drives the `accept_rect` capability with
/// one MCU band per call until the image is complete.
#[derive(Debug)]
pub struct StreamingDecoder {
    width: usize,
    height: usize,
    components: Vec<Component>,
    quant_tables: [Option<[u16; 64]>; 4],
    dc_tables: [Option<HuffmanTable>; 4],
    ac_tables: [Option<HuffmanTable>; 4],
    restart_interval: usize,
    hmax: usize,
    vmax: usize,
}

impl StreamingDecoder {
    /// Parse headers through SOS. Rejects anything but 8-bit sequential
    /// baseline with 1 or 3 components and sampling factors 1-2.
    pub fn prepare(src: &mut ByteSource) -> Result<Self, IcerError> {
        if src.read_u8()? != 0xFF || src.read_u8()? != 0xD8 {
            return Err(IcerError::JpegHeaderBad);
        }

        let mut decoder = Self {
            width: 0,
            height: 0,
            components: Vec::new(),
            quant_tables: [None, None, None, None],
            dc_tables: [None, None, None, None],
            ac_tables: [None, None, None, None],
            restart_interval: 0,
            hmax: 1,
            vmax: 1,
        };
        let mut have_frame = false;

        loop {
            let marker = Self::next_marker(src)?;
            match marker {
                0xDB => decoder.read_dqt(src)?,
                0xC0 | 0xC1 => {
                    if have_frame {
                        return Err(IcerError::JpegHeaderBad);
                    }
                    decoder.read_sof(src)?;
                    have_frame = true;
                }
                0xC4 => decoder.read_dht(src)?,
                0xDD => {
                    let len = src.read_u16be()? as usize;
                    if len != 4 {
                        return Err(IcerError::JpegHeaderBad);
                    }
                    decoder.restart_interval = src.read_u16be()? as usize;
                }
                0xDA => {
                    if !have_frame {
                        return Err(IcerError::JpegHeaderBad);
                    }
                    decoder.read_sos(src)?;
                    break;
                }
                // Progressive, lossless, arithmetic and hierarchical frames.
                0xC2 | 0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF => {
                    return Err(IcerError::JpegHeaderBad)
                }
                0xE0..=0xEF | 0xFE => {
                    let len = src.read_u16be()? as usize;
                    if len < 2 {
                        return Err(IcerError::JpegHeaderBad);
                    }
                    src.skip(len - 2)?;
                }
                _ => return Err(IcerError::JpegHeaderBad),
            }
        }

        for comp in &decoder.components {
            if decoder.quant_tables[comp.quant_table].is_none()
                || decoder.dc_tables[comp.dc_table].is_none()
                || decoder.ac_tables[comp.ac_table].is_none()
            {
                return Err(IcerError::JpegHeaderBad);
            }
        }
        Ok(decoder)
    }

    pub fn width(&self) -> u32 {
        self.width as u32
    }

    pub fn height(&self) -> u32 {
        self.height as u32
    }

    fn next_marker(src: &mut ByteSource) -> Result<u8, IcerError> {
        // Skip fill bytes until a marker code follows 0xFF.
        loop {
            let mut b = src.read_u8()?;
            if b != 0xFF {
                continue;
            }
            while b == 0xFF {
                b = src.read_u8()?;
            }
            if b != 0x00 {
                return Ok(b);
            }
        }
    }

    fn read_dqt(&mut self, src: &mut ByteSource) -> Result<(), IcerError> {
        let len = src.read_u16be()? as usize;
        let mut remaining = len.checked_sub(2).ok_or(IcerError::JpegHeaderBad)?;
        while remaining > 0 {
            let pq_tq = src.read_u8()?;
            let pq = pq_tq >> 4;
            let tq = (pq_tq & 0x0F) as usize;
            if pq != 0 || tq > 3 || remaining < 65 {
                return Err(IcerError::JpegHeaderBad);
            }
            // Stored in zig-zag order, applied at the zig-zag index.
            let mut table = [0u16; 64];
            for entry in table.iter_mut() {
                *entry = src.read_u8()? as u16;
            }
            self.quant_tables[tq] = Some(table);
            remaining -= 65;
        }
        Ok(())
    }

    fn read_sof(&mut self, src: &mut ByteSource) -> Result<(), IcerError> {
        let len = src.read_u16be()? as usize;
        let precision = src.read_u8()?;
        self.height = src.read_u16be()? as usize;
        self.width = src.read_u16be()? as usize;
        let ncomp = src.read_u8()? as usize;
        if precision != 8
            || self.width == 0
            || self.height == 0
            || !(ncomp == 1 || ncomp == 3)
            || len != 8 + 3 * ncomp
        {
            return Err(IcerError::JpegHeaderBad);
        }
        for _ in 0..ncomp {
            let id = src.read_u8()?;
            let hv = src.read_u8()?;
            let tq = (src.read_u8()? & 0x0F) as usize;
            let h = (hv >> 4) as usize;
            let v = (hv & 0x0F) as usize;
            if !(1..=2).contains(&h) || !(1..=2).contains(&v) || tq > 3 {
                return Err(IcerError::JpegHeaderBad);
            }
            self.hmax = self.hmax.max(h);
            self.vmax = self.vmax.max(v);
            self.components.push(Component {
                id,
                h,
                v,
                quant_table: tq,
                dc_table: 0,
                ac_table: 0,
            });
        }
        Ok(())
    }

    fn read_dht(&mut self, src: &mut ByteSource) -> Result<(), IcerError> {
        let len = src.read_u16be()? as usize;
        let mut remaining = len.checked_sub(2).ok_or(IcerError::JpegHeaderBad)?;
        while remaining > 0 {
            let tc_th = src.read_u8()?;
            let tc = tc_th >> 4;
            let th = (tc_th & 0x0F) as usize;
            if tc > 1 || th > 3 || remaining < 17 {
                return Err(IcerError::JpegHeaderBad);
            }
            let mut lengths = [0u8; 16];
            let mut count = 0usize;
            for l in lengths.iter_mut() {
                *l = src.read_u8()?;
                count += *l as usize;
            }
            if remaining < 17 + count || count > 256 {
                return Err(IcerError::JpegHeaderBad);
            }
            let mut values = vec![0u8; count];
            for val in values.iter_mut() {
                *val = src.read_u8()?;
            }
            let table = HuffmanTable::build_from_dht(&lengths, &values);
            if tc == 0 {
                self.dc_tables[th] = Some(table);
            } else {
                self.ac_tables[th] = Some(table);
            }
            remaining -= 17 + count;
        }
        Ok(())
    }

    fn read_sos(&mut self, src: &mut ByteSource) -> Result<(), IcerError> {
        let len = src.read_u16be()? as usize;
        let ns = src.read_u8()? as usize;
        if ns != self.components.len() || len != 6 + 2 * ns {
            return Err(IcerError::JpegHeaderBad);
        }
        for _ in 0..ns {
            let cs = src.read_u8()?;
            let td_ta = src.read_u8()?;
            let comp = self
                .components
                .iter_mut()
                .find(|c| c.id == cs)
                .ok_or(IcerError::JpegHeaderBad)?;
            comp.dc_table = (td_ta >> 4) as usize;
            comp.ac_table = (td_ta & 0x0F) as usize;
            if comp.dc_table > 3 || comp.ac_table > 3 {
                return Err(IcerError::JpegHeaderBad);
            }
        }
        // Ss, Se, Ah/Al: fixed for baseline.
        let ss = src.read_u8()?;
        let se = src.read_u8()?;
        let _ahal = src.read_u8()?;
        if ss != 0 || se != 63 {
            return Err(IcerError::JpegHeaderBad);
        }
        Ok(())
    }

    /// Decode the entropy-coded scan, emitting every MCU band as a packed
    /// RGB888 rectangle. `emit` returning `false` aborts the decode.
    pub fn decompress(
        &mut self,
        src: &mut ByteSource,
        emit: &mut dyn FnMut(&Rect, &[u8]) -> bool,
    ) -> Result<(), IcerError> {
        let mcu_w = self.hmax * 8;
        let mcu_h = self.vmax * 8;
        let mcus_x = self.width.div_ceil(mcu_w);
        let mcus_y = self.height.div_ceil(mcu_h);
        let ncomp = self.components.len();

        // Spatial samples of one MCU per component, at component resolution.
        let mut comp_pixels: Vec<Vec<u8>> = self
            .components
            .iter()
            .map(|c| vec![0u8; (c.h * 8) * (c.v * 8)])
            .collect();
        let mut rgb = vec![0u8; mcu_w * mcu_h * 3];
        let mut dc_preds = vec![0i32; ncomp];
        let mut block = [0i32; 64];
        let mut spatial = [0u8; 64];

        let mut reader = BitReader::new(src);
        let mut mcu_index = 0usize;

        for my in 0..mcus_y {
            for mx in 0..mcus_x {
                if self.restart_interval > 0
                    && mcu_index > 0
                    && mcu_index % self.restart_interval == 0
                {
                    reader.restart()?;
                    dc_preds.iter_mut().for_each(|p| *p = 0);
                }

                for (ci, comp) in self.components.iter().enumerate() {
                    let dc_table = self.dc_tables[comp.dc_table]
                        .as_ref()
                        .ok_or(IcerError::JpegDecodeFailed)?;
                    let ac_table = self.ac_tables[comp.ac_table]
                        .as_ref()
                        .ok_or(IcerError::JpegDecodeFailed)?;
                    let qt = self.quant_tables[comp.quant_table]
                        .as_ref()
                        .ok_or(IcerError::JpegDecodeFailed)?;

                    for by in 0..comp.v {
                        for bx in 0..comp.h {
                            Self::decode_block(
                                &mut reader,
                                dc_table,
                                ac_table,
                                qt,
                                &mut dc_preds[ci],
                                &mut block,
                            )?;
                            idct_8x8(&block, &mut spatial);

                            let comp_stride = comp.h * 8;
                            for y in 0..8 {
                                let dst = (by * 8 + y) * comp_stride + bx * 8;
                                comp_pixels[ci][dst..dst + 8]
                                    .copy_from_slice(&spatial[y * 8..y * 8 + 8]);
                            }
                        }
                    }
                }

                let left = mx * mcu_w;
                let top = my * mcu_h;
                let rect_w = mcu_w.min(self.width - left);
                let rect_h = mcu_h.min(self.height - top);

                for y in 0..rect_h {
                    for x in 0..rect_w {
                        let dst = (y * rect_w + x) * 3;
                        if ncomp == 1 {
                            let luma = comp_pixels[0][y * (self.hmax * 8) + x];
                            rgb[dst] = luma;
                            rgb[dst + 1] = luma;
                            rgb[dst + 2] = luma;
                        } else {
                            let sample = |ci: usize| {
                                let comp = &self.components[ci];
                                let sx = x * comp.h / self.hmax;
                                let sy = y * comp.v / self.vmax;
                                comp_pixels[ci][sy * (comp.h * 8) + sx] as i32
                            };
                            let luma = sample(0);
                            let cb = sample(1) - 128;
                            let cr = sample(2) - 128;
                            rgb[dst] = (luma + ((91881 * cr) >> 16)).clamp(0, 255) as u8;
                            rgb[dst + 1] = (luma - ((22554 * cb + 46802 * cr) >> 16))
                                .clamp(0, 255) as u8;
                            rgb[dst + 2] = (luma + ((116130 * cb) >> 16)).clamp(0, 255) as u8;
                        }
                    }
                }

                let rect = Rect {
                    left: left as u32,
                    top: top as u32,
                    right: (left + rect_w - 1) as u32,
                    bottom: (top + rect_h - 1) as u32,
                };
                if !emit(&rect, &rgb[..rect_w * rect_h * 3]) {
                    return Err(IcerError::JpegDecodeFailed);
                }
                mcu_index += 1;
            }
        }
        Ok(())
    }

    fn decode_block(
        reader: &mut BitReader<'_, '_>,
        dc_table: &HuffmanTable,
        ac_table: &HuffmanTable,
        qt: &[u16; 64],
        dc_pred: &mut i32,
        block: &mut [i32; 64],
    ) -> Result<(), IcerError> {
        block.fill(0);

        let dc_cat = dc_table.decode(reader)?;
        if dc_cat > 11 {
            return Err(IcerError::JpegDecodeFailed);
        }
        let diff_bits = reader.read_bits(dc_cat)?;
        *dc_pred += extend_value(diff_bits, dc_cat);
        block[0] = *dc_pred * qt[0] as i32;

        let mut k = 1usize;
        while k < 64 {
            let symbol = ac_table.decode(reader)?;
            if symbol == 0 {
                break;
            }
            if symbol == 0xF0 {
                k += 16;
                continue;
            }
            let run = (symbol >> 4) as usize;
            let cat = symbol & 0x0F;
            k += run;
            if k >= 64 || cat > 10 {
                return Err(IcerError::JpegDecodeFailed);
            }
            let bits = reader.read_bits(cat)?;
            block[ZIGZAG_ORDER[k]] = extend_value(bits, cat) * qt[k] as i32;
            k += 1;
        }
        Ok(())
    }
}

//! Huffman tables and entropy-coded bit reading.

use crate::error::IcerError;
use crate::jpeg::ByteSource;

/// Canonical Huffman table built from a DHT segment.
#[derive(Clone, Debug)]
pub struct HuffmanTable {
    min_code: [i32; 16],
    max_code: [i32; 16],
    val_ptr: [i32; 16],
    values: Vec<u8>,
}

impl HuffmanTable {
    pub fn build_from_dht(lengths: &[u8; 16], values: &[u8]) -> Self {
        let mut table = Self {
            min_code: [0; 16],
            max_code: [-1; 16],
            val_ptr: [0; 16],
            values: values.to_vec(),
        };

        let mut code = 0i32;
        let mut val_idx = 0usize;
        for i in 0..16 {
            let n = lengths[i] as usize;
            if n > 0 {
                table.min_code[i] = code;
                table.val_ptr[i] = val_idx as i32;
                code += n as i32;
                val_idx += n;
                table.max_code[i] = code - 1;
            }
            code <<= 1;
        }
        table
    }

    pub fn decode(&self, reader: &mut BitReader<'_, '_>) -> Result<u8, IcerError> {
        let mut code = 0i32;
        for i in 0..16 {
            code = (code << 1) | reader.read_bits(1)? as i32;
            if self.max_code[i] >= 0 && code <= self.max_code[i] {
                let idx = self.val_ptr[i] + (code - self.min_code[i]);
                return self
                    .values
                    .get(idx as usize)
                    .copied()
                    .ok_or(IcerError::JpegDecodeFailed);
            }
        }
        Err(IcerError::JpegDecodeFailed)
    }
}

/// Entropy-segment bit reader with 0xFF00 unstuffing.
pub struct BitReader<'s, 'a> {
    src: &'s mut ByteSource<'a>,
    bit_buffer: u32,
    bits: i32,
    pending_marker: Option<u8>,
}

impl<'s, 'a> BitReader<'s, 'a> {
    pub fn new(src: &'s mut ByteSource<'a>) -> Self {
        Self {
            src,
            bit_buffer: 0,
            bits: 0,
            pending_marker: None,
        }
    }

    pub fn read_bits(&mut self, count: u8) -> Result<u16, IcerError> {
        if count == 0 {
            return Ok(0);
        }
        let count = count as i32;
        while self.bits < count {
            let byte = self.read_byte_unstuffed()?;
            self.bit_buffer = (self.bit_buffer << 8) | byte as u32;
            self.bits += 8;
        }
        let shift = self.bits - count;
        let val = (self.bit_buffer >> shift) & ((1 << count) - 1);
        self.bits = shift;
        self.bit_buffer &= if shift > 0 { (1 << shift) - 1 } else { 0 };
        Ok(val as u16)
    }

    fn read_byte_unstuffed(&mut self) -> Result<u8, IcerError> {
        let byte = self.src.next_byte().ok_or(IcerError::JpegDecodeFailed)?;
        if byte == 0xFF {
            // A stuffed zero is dropped; anything else is a marker byte that
            // the restart handling consumes explicitly.
            let next = self.src.next_byte().ok_or(IcerError::JpegDecodeFailed)?;
            if next != 0x00 {
                self.pending_marker = Some(next);
            }
        }
        Ok(byte)
    }

    /// Discard partial bits and consume an expected restart marker.
    pub fn restart(&mut self) -> Result<(), IcerError> {
        self.bits = 0;
        self.bit_buffer = 0;
        if let Some(m) = self.pending_marker.take() {
            if (0xD0..=0xD7).contains(&m) {
                return Ok(());
            }
            return Err(IcerError::JpegDecodeFailed);
        }
        // Marker not yet pulled: it sits next in the byte stream.
        let b0 = self.src.next_byte().ok_or(IcerError::JpegDecodeFailed)?;
        let b1 = self.src.next_byte().ok_or(IcerError::JpegDecodeFailed)?;
        if b0 == 0xFF && (0xD0..=0xD7).contains(&b1) {
            Ok(())
        } else {
            Err(IcerError::JpegDecodeFailed)
        }
    }
}

/// Sign-extend `bits` received for a category-`cat` value (JPEG "EXTEND").
pub fn extend_value(bits: u16, cat: u8) -> i32 {
    if cat == 0 {
        return 0;
    }
    let threshold = 1i32 << (cat - 1);
    if (bits as i32) >= threshold {
        bits as i32
    } else {
        bits as i32 - (1 << cat) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extend_matches_jpeg_tables() {
        // Category 3 covers -7..-4 and 4..7.
        assert_eq!(extend_value(0b100, 3), 4);
        assert_eq!(extend_value(0b111, 3), 7);
        assert_eq!(extend_value(0b000, 3), -7);
        assert_eq!(extend_value(0b011, 3), -4);
        assert_eq!(extend_value(0, 0), 0);
    }

    #[test]
    fn canonical_table_decodes_two_symbols() {
        // Two codes: "0" -> 5, "10" -> 9.
        let mut lengths = [0u8; 16];
        lengths[0] = 1;
        lengths[1] = 1;
        let table = HuffmanTable::build_from_dht(&lengths, &[5, 9]);

        let data = [0b0_10_0_10_00u8];
        let mut offset = 0usize;
        let mut pull = |buf: &mut [u8]| {
            let n = (data.len() - offset).min(buf.len());
            buf[..n].copy_from_slice(&data[offset..offset + n]);
            offset += n;
            n
        };
        let mut src = ByteSource::new(&mut pull);
        let mut reader = BitReader::new(&mut src);
        assert_eq!(table.decode(&mut reader).unwrap(), 5);
        assert_eq!(table.decode(&mut reader).unwrap(), 9);
        assert_eq!(table.decode(&mut reader).unwrap(), 5);
        assert_eq!(table.decode(&mut reader).unwrap(), 9);
    }
}

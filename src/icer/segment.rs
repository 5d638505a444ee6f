//! Segment records and the datastream buffer.
//!
//! A sealed segment is a fixed 32-byte header followed immediately by
//! `ceil(data_length / 8)` payload bytes. All headers and payloads live in
//! one contiguous datastream buffer for the whole compression call, because
//! emission re-reads them after coding finishes. The buffer is sized
//! `min(byte_quota, cap)`; running out is graceful truncation, not
//! corruption.

use crate::error::IcerError;
use crate::icer::{Channel, PacketContext};
use crate::scratch::ScratchBuf;

/// Wire size of a segment header.
pub const HEADER_BYTES: usize = 32;

/// Header magic.
pub const SEGMENT_PREAMBLE: u16 = 0x5650;

const LSB_MASK: u16 = 0x003F;
const CHAN_SHIFT: u16 = 6;

/// Parsed form of the 32-byte segment header (little-endian wire layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub preamble: u16,
    pub decomp_level: u8,
    pub subband_type: u8,
    pub segment_number: u16,
    pub lsb_chan: u16,
    pub ll_mean: u16,
    pub image_w: u32,
    pub image_h: u32,
    /// Payload length in bits.
    pub data_length: u32,
    /// CRC32 over the header with this field zeroed.
    pub header_crc32: u32,
    /// CRC32 over the payload bytes.
    pub data_crc32: u32,
}

impl SegmentHeader {
    pub fn channel_bits(channel: Channel) -> u16 {
        (channel as u16) << CHAN_SHIFT
    }

    pub fn bit_plane(&self) -> u8 {
        (self.lsb_chan & LSB_MASK) as u8
    }

    pub fn channel_index(&self) -> u8 {
        (self.lsb_chan >> CHAN_SHIFT) as u8 & 0x3
    }

    pub fn payload_bytes(&self) -> usize {
        crate::icer::ceil_div_u32(self.data_length, 8) as usize
    }

    pub fn write_to(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&self.preamble.to_le_bytes());
        out[2] = self.decomp_level;
        out[3] = self.subband_type;
        out[4..6].copy_from_slice(&self.segment_number.to_le_bytes());
        out[6..8].copy_from_slice(&self.lsb_chan.to_le_bytes());
        out[8..10].copy_from_slice(&self.ll_mean.to_le_bytes());
        out[10..12].copy_from_slice(&0u16.to_le_bytes());
        out[12..16].copy_from_slice(&self.image_w.to_le_bytes());
        out[16..20].copy_from_slice(&self.image_h.to_le_bytes());
        out[20..24].copy_from_slice(&self.data_length.to_le_bytes());
        out[24..28].copy_from_slice(&self.header_crc32.to_le_bytes());
        out[28..32].copy_from_slice(&self.data_crc32.to_le_bytes());
    }

    pub fn read_from(src: &[u8]) -> Self {
        let u16le = |o: usize| u16::from_le_bytes([src[o], src[o + 1]]);
        let u32le = |o: usize| u32::from_le_bytes([src[o], src[o + 1], src[o + 2], src[o + 3]]);
        Self {
            preamble: u16le(0),
            decomp_level: src[2],
            subband_type: src[3],
            segment_number: u16le(4),
            lsb_chan: u16le(6),
            ll_mean: u16le(8),
            image_w: u32le(12),
            image_h: u32le(16),
            data_length: u32le(20),
            header_crc32: u32le(24),
            data_crc32: u32le(28),
        }
    }
}

/// CRC32 over the header bytes with the `header_crc32` field zeroed.
pub fn header_crc(header_bytes: &[u8]) -> u32 {
    let mut h = crc32fast::Hasher::new();
    h.update(&header_bytes[..24]);
    h.update(&[0u8; 4]);
    h.update(&header_bytes[28..HEADER_BYTES]);
    h.finalize()
}

/// CRC32 over the payload bytes.
pub fn payload_crc(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

/// Handle to a segment under construction or sealed in the datastream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHandle {
    offset: usize,
}

/// Identifier of a sealed segment, usable from the emission index.
pub type SegmentId = u32;

struct SealedSegment {
    offset: usize,
    total_len: usize,
}

/// The contiguous buffer holding all in-flight segment headers and payloads.
pub struct DataStream {
    buf: ScratchBuf<u8>,
    used: usize,
    sealed: Vec<SealedSegment>,
}

impl DataStream {
    pub fn new(buf: ScratchBuf<u8>) -> Self {
        Self {
            buf,
            used: 0,
            sealed: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn size_used(&self) -> usize {
        self.used
    }

    /// Reserve a header slot for a new segment. The payload region is
    /// whatever capacity remains behind it.
    pub fn allocate_segment(&mut self) -> Result<SegmentHandle, IcerError> {
        if self.used + HEADER_BYTES > self.buf.len() {
            return Err(IcerError::SegmentAllocFailed);
        }
        let offset = self.used;
        self.buf[offset..offset + HEADER_BYTES].fill(0);
        self.used += HEADER_BYTES;
        Ok(SegmentHandle { offset })
    }

    /// Payload region for a freshly allocated segment.
    pub fn payload_region(&mut self, handle: SegmentHandle) -> &mut [u8] {
        let start = handle.offset + HEADER_BYTES;
        &mut self.buf[start..]
    }

    /// Release the most recent allocation after a coder failure.
    pub fn release_failed(&mut self, handle: SegmentHandle) {
        debug_assert_eq!(handle.offset + HEADER_BYTES, self.used);
        self.used = handle.offset;
    }

    /// Write the header, account the payload and record the segment.
    /// The channel bits and header CRC are finalized at emission time.
    pub fn seal_segment(
        &mut self,
        handle: SegmentHandle,
        pkt: &PacketContext,
        segment_number: u16,
        payload_bytes: usize,
        data_length_bits: u32,
    ) -> SegmentId {
        let payload_start = handle.offset + HEADER_BYTES;
        let data_crc = payload_crc(&self.buf[payload_start..payload_start + payload_bytes]);
        let header = SegmentHeader {
            preamble: SEGMENT_PREAMBLE,
            decomp_level: pkt.decomp_level,
            subband_type: pkt.subband_type as u8,
            segment_number,
            lsb_chan: pkt.bit_plane as u16 & LSB_MASK,
            ll_mean: pkt.ll_mean,
            image_w: pkt.image_w,
            image_h: pkt.image_h,
            data_length: data_length_bits,
            header_crc32: 0,
            data_crc32: data_crc,
        };
        header.write_to(&mut self.buf[handle.offset..handle.offset + HEADER_BYTES]);
        self.used = payload_start + payload_bytes;

        let id = self.sealed.len() as SegmentId;
        self.sealed.push(SealedSegment {
            offset: handle.offset,
            total_len: HEADER_BYTES + payload_bytes,
        });
        id
    }

    /// Finalize a sealed segment for emission: OR the channel bits into
    /// `lsb_chan`, recompute the header CRC, and return the full record
    /// bytes (header + payload).
    pub fn finalize_for_emission(&mut self, id: SegmentId, channel: Channel) -> &[u8] {
        let seg = &self.sealed[id as usize];
        let (offset, total_len) = (seg.offset, seg.total_len);

        let lsb_chan_off = offset + 6;
        let mut lsb_chan =
            u16::from_le_bytes([self.buf[lsb_chan_off], self.buf[lsb_chan_off + 1]]);
        lsb_chan |= SegmentHeader::channel_bits(channel);
        self.buf[lsb_chan_off..lsb_chan_off + 2].copy_from_slice(&lsb_chan.to_le_bytes());

        let crc = header_crc(&self.buf[offset..offset + HEADER_BYTES]);
        self.buf[offset + 24..offset + 28].copy_from_slice(&crc.to_le_bytes());

        &self.buf[offset..offset + total_len]
    }

    /// Record bytes of a sealed segment (header + payload).
    pub fn segment_bytes(&self, id: SegmentId) -> &[u8] {
        let seg = &self.sealed[id as usize];
        &self.buf[seg.offset..seg.offset + seg.total_len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icer::{Channel, Subband};
    use crate::scratch::{PoolHint, ScratchAllocator};

    fn pkt() -> PacketContext {
        PacketContext {
            subband_type: Subband::Hl,
            decomp_level: 2,
            ll_mean: 130,
            bit_plane: 7,
            priority: 64,
            channel: Channel::U,
            image_w: 64,
            image_h: 48,
        }
    }

    fn stream(cap: usize) -> DataStream {
        let alloc = ScratchAllocator::new(0);
        DataStream::new(alloc.alloc_u8(cap, PoolHint::Auxiliary).unwrap())
    }

    #[test]
    fn header_roundtrip() {
        let header = SegmentHeader {
            preamble: SEGMENT_PREAMBLE,
            decomp_level: 3,
            subband_type: Subband::Hh as u8,
            segment_number: 11,
            lsb_chan: 5 | SegmentHeader::channel_bits(Channel::V),
            ll_mean: 127,
            image_w: 640,
            image_h: 480,
            data_length: 1234,
            header_crc32: 0,
            data_crc32: 0xDEAD_BEEF,
        };
        let mut raw = [0u8; HEADER_BYTES];
        header.write_to(&mut raw);
        let back = SegmentHeader::read_from(&raw);
        assert_eq!(back, header);
        assert_eq!(back.bit_plane(), 5);
        assert_eq!(back.channel_index(), Channel::V as u8);
        assert_eq!(back.payload_bytes(), 155);
    }

    #[test]
    fn seal_accounts_header_and_payload() {
        let mut ds = stream(256);
        let h = ds.allocate_segment().unwrap();
        let region = ds.payload_region(h);
        region[..3].copy_from_slice(&[0xAA, 0xBB, 0x01]);
        let id = ds.seal_segment(h, &pkt(), 0, 3, 17);
        assert_eq!(ds.size_used(), HEADER_BYTES + 3);

        let bytes = ds.segment_bytes(id);
        assert_eq!(bytes.len(), HEADER_BYTES + 3);
        let header = SegmentHeader::read_from(bytes);
        assert_eq!(header.data_length, 17);
        assert_eq!(header.payload_bytes(), 3);
        assert_eq!(header.data_crc32, payload_crc(&[0xAA, 0xBB, 0x01]));
        // Channel bits are not set until emission.
        assert_eq!(header.channel_index(), 0);
    }

    #[test]
    fn finalize_sets_channel_and_header_crc() {
        let mut ds = stream(256);
        let h = ds.allocate_segment().unwrap();
        let id = ds.seal_segment(h, &pkt(), 4, 0, 0);
        let bytes = ds.finalize_for_emission(id, Channel::U).to_vec();
        let header = SegmentHeader::read_from(&bytes);
        assert_eq!(header.channel_index(), Channel::U as u8);
        assert_eq!(header.header_crc32, header_crc(&bytes[..HEADER_BYTES]));
    }

    #[test]
    fn allocation_fails_when_full() {
        let mut ds = stream(HEADER_BYTES + 8);
        let h = ds.allocate_segment().unwrap();
        ds.seal_segment(h, &pkt(), 0, 8, 64);
        assert_eq!(ds.allocate_segment().unwrap_err(), IcerError::SegmentAllocFailed);
    }

    #[test]
    fn release_rewinds_header() {
        let mut ds = stream(256);
        let h = ds.allocate_segment().unwrap();
        assert_eq!(ds.size_used(), HEADER_BYTES);
        ds.release_failed(h);
        assert_eq!(ds.size_used(), 0);
    }
}

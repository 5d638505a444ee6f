//! Stage H: packet scheduling and segment emission.
//!
//! Packets are generated per (stage, bit-plane, channel) for the three
//! detail subbands plus the final LL, sorted by priority, and handed to the
//! partition coder. After coding, segments are emitted in a canonical order
//! that depends only on segment identity, never on coding order.

use log::{debug, info};

use crate::error::IcerError;
use crate::icer::segment::{DataStream, SegmentId};
use crate::icer::{
    pow_u, Channel, PacketContext, Subband, BITPLANES, MAX_DECOMP_STAGES, MAX_PACKETS,
    MAX_SEGMENTS,
};
use crate::storage::StorageFile;

/// Build the packet list for an `image_w x image_h` image with `stages`
/// decomposition levels.
///
/// Base priority is `2^stage`, doubled for luminance. HL and LH take
/// `base << bit_plane`; HH takes `((base/2) << bit_plane) + 1` as a
/// tie-breaker below them; the final LL takes `(2*base) << bit_plane`.
pub fn build_packet_list(
    stages: u8,
    ll_means: [u16; Channel::COUNT],
    image_w: u32,
    image_h: u32,
) -> Result<Vec<PacketContext>, IcerError> {
    let mut packets = Vec::new();
    let mut push = |pkt: PacketContext| -> Result<(), IcerError> {
        if packets.len() >= MAX_PACKETS {
            return Err(IcerError::PacketCountExceeded);
        }
        packets.push(pkt);
        Ok(())
    };

    for stage in 1..=stages {
        for bit_plane in 0..BITPLANES as u8 {
            for chan in Channel::ALL {
                let base = pow_u(2, stage as u32) * if chan == Channel::Y { 2 } else { 1 };
                let common = PacketContext {
                    subband_type: Subband::Hl,
                    decomp_level: stage,
                    ll_mean: ll_means[chan as usize],
                    bit_plane,
                    priority: base << bit_plane,
                    channel: chan,
                    image_w,
                    image_h,
                };
                push(common)?;
                push(PacketContext {
                    subband_type: Subband::Lh,
                    ..common
                })?;
                push(PacketContext {
                    subband_type: Subband::Hh,
                    priority: ((base / 2) << bit_plane) + 1,
                    ..common
                })?;
            }
        }
    }

    for bit_plane in 0..BITPLANES as u8 {
        for chan in Channel::ALL {
            let base = pow_u(2, stages as u32) * if chan == Channel::Y { 2 } else { 1 };
            push(PacketContext {
                subband_type: Subband::Ll,
                decomp_level: stages,
                ll_mean: ll_means[chan as usize],
                bit_plane,
                priority: (2 * base) << bit_plane,
                channel: chan,
                image_w,
                image_h,
            })?;
        }
    }

    debug!("packet list: {} packets", packets.len());
    Ok(packets)
}

/// Sort by priority descending; ties by subband type ascending. The sort is
/// stable with respect to insertion order, making emission deterministic.
pub fn sort_packets(packets: &mut [PacketContext]) {
    packets.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.subband_type.cmp(&b.subband_type))
    });
}

const INDEX_SLOTS: usize =
    Channel::COUNT * (MAX_DECOMP_STAGES + 1) * Subband::COUNT * BITPLANES * (MAX_SEGMENTS + 1);

/// Five-axis sparse index from segment identity to sealed segment, stored as
/// a flat slot array with an index function.
pub struct SegmentIndex {
    slots: Vec<Option<SegmentId>>,
}

impl Default for SegmentIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentIndex {
    pub fn new() -> Self {
        Self {
            slots: vec![None; INDEX_SLOTS],
        }
    }

    fn slot(chan: Channel, stage: u8, subband: Subband, bit_plane: u8, segment: u16) -> usize {
        let mut idx = chan as usize;
        idx = idx * (MAX_DECOMP_STAGES + 1) + stage as usize;
        idx = idx * Subband::COUNT + subband as usize;
        idx = idx * BITPLANES + bit_plane as usize;
        idx * (MAX_SEGMENTS + 1) + segment as usize
    }

    pub fn set(&mut self, pkt: &PacketContext, segment: u16, id: SegmentId) {
        let idx = Self::slot(
            pkt.channel,
            pkt.decomp_level,
            pkt.subband_type,
            pkt.bit_plane,
            segment,
        );
        self.slots[idx] = Some(id);
    }

    pub fn get(
        &self,
        chan: Channel,
        stage: u8,
        subband: Subband,
        bit_plane: u8,
        segment: u16,
    ) -> Option<SegmentId> {
        self.slots[Self::slot(chan, stage, subband, bit_plane, segment)]
    }
}

/// Emit all sealed segments in the canonical order — segment index
/// ascending, subband descending, stage descending, bit-plane descending,
/// channel ascending — through the storage write sink. Returns the total
/// bytes written.
pub fn emit_segments(
    ds: &mut DataStream,
    index: &SegmentIndex,
    sink: Option<&mut dyn StorageFile>,
) -> Result<u64, IcerError> {
    let sink = sink.ok_or(IcerError::NoOutputSink)?;

    let mut total = 0u64;
    let mut emitted = 0usize;
    for segment in 0..=MAX_SEGMENTS as u16 {
        for subband_idx in (0..Subband::COUNT as u8).rev() {
            let subband = Subband::from_index(subband_idx).ok_or(IcerError::InvalidOperation)?;
            for stage in (0..=MAX_DECOMP_STAGES as u8).rev() {
                for bit_plane in (0..BITPLANES as u8).rev() {
                    for chan in Channel::ALL {
                        let Some(id) = index.get(chan, stage, subband, bit_plane, segment) else {
                            continue;
                        };
                        let bytes = ds.finalize_for_emission(id, chan);
                        if sink.write(bytes) != bytes.len() {
                            return Err(IcerError::StorageWriteShort);
                        }
                        total += bytes.len() as u64;
                        emitted += 1;
                    }
                }
            }
        }
    }
    info!("emitted {} segments, {} bytes", emitted, total);
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_count_matches_formula() {
        let packets = build_packet_list(4, [100, 120, 130], 64, 64).unwrap();
        assert_eq!(packets.len(), 3 * 4 * BITPLANES * 3 + BITPLANES * 3);
    }

    #[test]
    fn max_stage_count_stays_under_limit() {
        let packets = build_packet_list(6, [0, 0, 0], 8, 8).unwrap();
        assert_eq!(packets.len(), MAX_PACKETS);
    }

    #[test]
    fn luminance_precedes_chrominance() {
        let mut packets = build_packet_list(2, [0, 0, 0], 16, 16).unwrap();
        sort_packets(&mut packets);
        let first_y = packets
            .iter()
            .position(|p| p.channel == Channel::Y && p.decomp_level == 2)
            .unwrap();
        let first_u = packets
            .iter()
            .position(|p| p.channel == Channel::U && p.decomp_level == 2)
            .unwrap();
        assert!(first_y < first_u);
    }

    #[test]
    fn sort_is_deterministic_and_hl_before_lh() {
        let mut a = build_packet_list(3, [0, 0, 0], 32, 32).unwrap();
        let mut b = a.clone();
        sort_packets(&mut a);
        sort_packets(&mut b);
        assert_eq!(a, b);

        // Equal priority: HL must land before LH, U before V.
        for window in a.windows(2) {
            if window[0].priority == window[1].priority
                && window[0].channel == window[1].channel
                && window[0].decomp_level == window[1].decomp_level
                && window[0].bit_plane == window[1].bit_plane
            {
                assert!(window[0].subband_type <= window[1].subband_type);
            }
        }
    }

    #[test]
    fn ll_packets_outrank_detail_at_same_level() {
        let mut packets = build_packet_list(3, [0, 0, 0], 32, 32).unwrap();
        sort_packets(&mut packets);
        // The single highest-priority packet is the Y LL at the top
        // bit-plane.
        assert_eq!(packets[0].subband_type, Subband::Ll);
        assert_eq!(packets[0].channel, Channel::Y);
        assert_eq!(packets[0].bit_plane, BITPLANES as u8 - 1);
    }

    #[test]
    fn index_roundtrip() {
        let mut index = SegmentIndex::new();
        let pkt = PacketContext {
            subband_type: Subband::Lh,
            decomp_level: 3,
            ll_mean: 0,
            bit_plane: 9,
            priority: 1,
            channel: Channel::V,
            image_w: 8,
            image_h: 8,
        };
        index.set(&pkt, 17, 42);
        assert_eq!(index.get(Channel::V, 3, Subband::Lh, 9, 17), Some(42));
        assert_eq!(index.get(Channel::V, 3, Subband::Lh, 9, 16), None);
        assert_eq!(index.get(Channel::U, 3, Subband::Lh, 9, 17), None);
    }

    #[test]
    fn missing_sink_is_rejected() {
        let alloc = crate::scratch::ScratchAllocator::new(0);
        let buf = alloc
            .alloc_u8(64, crate::scratch::PoolHint::Primary)
            .unwrap();
        let mut ds = DataStream::new(buf);
        let index = SegmentIndex::new();
        assert_eq!(
            emit_segments(&mut ds, &index, None).unwrap_err(),
            IcerError::NoOutputSink
        );
    }
}

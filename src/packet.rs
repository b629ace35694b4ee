//! Segment chains and packet metadata.
//!
//! A [`Packet`] is a singly linked chain of owned buffer segments plus the
//! aggregate metadata the transmit path needs: total length, segment count,
//! offload flags, VLAN tags, and the L2/L3 header-length hints consumed by
//! hardware offloads. Logical byte offsets address the chain as one flat
//! region; [`Packet::write_at`] and [`Packet::read_at`] handle spans that
//! straddle segment boundaries.

use crate::{ProbeError, Result};

/// Maximum segments per packet; the segment count is carried in a u8.
pub const MAX_SEGS_PER_PACKET: usize = 255;

/// Per-packet transmit offload request flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PktFlags(pub u32);

impl PktFlags {
    /// Insert the VLAN tag from `vlan_tci` in hardware.
    pub const VLAN: u32 = 1 << 0;
    /// Insert the outer VLAN tag from `vlan_tci_outer` in hardware (QinQ).
    pub const QINQ: u32 = 1 << 1;
    /// MACsec-protect the frame in hardware.
    pub const MACSEC: u32 = 1 << 2;

    pub fn insert(&mut self, flag: u32) {
        self.0 |= flag;
    }

    pub fn has(&self, flag: u32) -> bool {
        (self.0 & flag) != 0
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

/// One physically contiguous chunk of a packet.
#[derive(Debug)]
pub struct Segment {
    data: Box<[u8]>,
    len: usize,
    next: Option<Box<Segment>>,
}

impl Segment {
    /// Wrap a buffer with a logical length. The length must fit the buffer.
    pub fn new(data: Box<[u8]>, len: usize) -> Self {
        debug_assert!(len <= data.len());
        Self { data, len, next: None }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The logically valid bytes of this segment.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Give up the underlying buffer, for return to a pool.
    ///
    /// Drops any chained successors; callers dismantling a whole chain should
    /// go through [`Packet::into_buffers`] instead.
    pub fn into_buffer(self) -> Box<[u8]> {
        self.data
    }
}

/// A packet: the head of a segment chain plus aggregate metadata.
#[derive(Debug)]
pub struct Packet {
    head: Segment,
    pkt_len: u32,
    nb_segs: u8,
    pub ol_flags: PktFlags,
    pub vlan_tci: u16,
    pub vlan_tci_outer: u16,
    pub l2_len: u8,
    pub l3_len: u8,
}

impl Packet {
    /// Single-segment packet.
    pub fn single(data: Box<[u8]>, len: usize) -> Self {
        Self {
            head: Segment::new(data, len),
            pkt_len: len as u32,
            nb_segs: 1,
            ol_flags: PktFlags::default(),
            vlan_tci: 0,
            vlan_tci_outer: 0,
            l2_len: 0,
            l3_len: 0,
        }
    }

    /// Chain `segments` in order into one packet.
    ///
    /// An empty list or one longer than [`MAX_SEGS_PER_PACKET`] is handed
    /// back unconsumed, so callers can return the buffers to their pool.
    pub fn from_segments(segments: Vec<Segment>) -> std::result::Result<Self, Vec<Segment>> {
        if segments.is_empty() || segments.len() > MAX_SEGS_PER_PACKET {
            return Err(segments);
        }
        let nb_segs = segments.len() as u8;
        let pkt_len: u32 = segments.iter().map(|s| s.len as u32).sum();

        // Link back-to-front so each segment owns its successor.
        let mut iter = segments.into_iter().rev();
        let Some(mut head) = iter.next() else {
            return Err(Vec::new());
        };
        for mut seg in iter {
            seg.next = Some(Box::new(head));
            head = seg;
        }

        Ok(Self {
            head,
            pkt_len,
            nb_segs,
            ol_flags: PktFlags::default(),
            vlan_tci: 0,
            vlan_tci_outer: 0,
            l2_len: 0,
            l3_len: 0,
        })
    }

    /// Total logical length across all segments.
    pub fn pkt_len(&self) -> usize {
        self.pkt_len as usize
    }

    /// Number of segments in the chain.
    pub fn nb_segs(&self) -> u8 {
        self.nb_segs
    }

    /// Iterate the segment chain head-first.
    pub fn segments(&self) -> Segments<'_> {
        Segments { next: Some(&self.head) }
    }

    /// Copy `bytes` into the chain starting at logical offset `offset`,
    /// spilling across segment boundaries as needed.
    pub fn write_at(&mut self, mut offset: usize, mut bytes: &[u8]) -> Result<()> {
        if offset + bytes.len() > self.pkt_len as usize {
            return Err(ProbeError::malformed(format!(
                "write of {} bytes at offset {offset} exceeds packet length {}",
                bytes.len(),
                self.pkt_len
            )));
        }
        if bytes.is_empty() {
            return Ok(());
        }

        let mut seg = &mut self.head;
        while offset >= seg.len {
            offset -= seg.len;
            seg = seg
                .next
                .as_deref_mut()
                .ok_or_else(|| ProbeError::malformed("segment chain shorter than packet length"))?;
        }
        loop {
            let take = (seg.len - offset).min(bytes.len());
            seg.data[offset..offset + take].copy_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
            if bytes.is_empty() {
                return Ok(());
            }
            offset = 0;
            seg = seg
                .next
                .as_deref_mut()
                .ok_or_else(|| ProbeError::malformed("segment chain shorter than packet length"))?;
        }
    }

    /// Copy bytes out of the chain starting at logical offset `offset`.
    pub fn read_at(&self, mut offset: usize, out: &mut [u8]) -> Result<()> {
        if offset + out.len() > self.pkt_len as usize {
            return Err(ProbeError::malformed(format!(
                "read of {} bytes at offset {offset} exceeds packet length {}",
                out.len(),
                self.pkt_len
            )));
        }
        if out.is_empty() {
            return Ok(());
        }

        let mut filled = 0;
        let mut seg = &self.head;
        while offset >= seg.len {
            offset -= seg.len;
            seg = seg
                .next
                .as_deref()
                .ok_or_else(|| ProbeError::malformed("segment chain shorter than packet length"))?;
        }
        loop {
            let take = (seg.len - offset).min(out.len() - filled);
            out[filled..filled + take].copy_from_slice(&seg.data[offset..offset + take]);
            filled += take;
            if filled == out.len() {
                return Ok(());
            }
            offset = 0;
            seg = seg
                .next
                .as_deref()
                .ok_or_else(|| ProbeError::malformed("segment chain shorter than packet length"))?;
        }
    }

    /// Dismantle the chain into its raw buffers, for return to a pool.
    pub fn into_buffers(self) -> Vec<Box<[u8]>> {
        let mut out = Vec::with_capacity(self.nb_segs as usize);
        let mut cur = self.head;
        loop {
            let Segment { data, next, .. } = cur;
            out.push(data);
            match next {
                Some(boxed) => cur = *boxed,
                None => break,
            }
        }
        out
    }
}

/// Iterator over a packet's segment chain.
pub struct Segments<'a> {
    next: Option<&'a Segment>,
}

impl<'a> Iterator for Segments<'a> {
    type Item = &'a Segment;

    fn next(&mut self) -> Option<Self::Item> {
        let seg = self.next?;
        self.next = seg.next.as_deref();
        Some(seg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn packet_with_lens(lens: &[usize]) -> Packet {
        let segs = lens
            .iter()
            .map(|&len| Segment::new(vec![0u8; len.max(8)].into_boxed_slice(), len))
            .collect();
        Packet::from_segments(segs).expect("valid segment list")
    }

    proptest! {
        // Packet length is always the sum of its segment lengths.
        #[test]
        fn pkt_len_is_sum_of_segment_lens(
            lens in prop::collection::vec(1usize..64, 1..16)
        ) {
            let pkt = packet_with_lens(&lens);
            prop_assert_eq!(pkt.pkt_len(), lens.iter().sum::<usize>());
            prop_assert_eq!(pkt.nb_segs() as usize, lens.len());
            let walked: Vec<usize> = pkt.segments().map(|s| s.len()).collect();
            prop_assert_eq!(walked, lens);
        }

        // A write followed by a read at the same offset reproduces the bytes,
        // wherever the span falls relative to segment boundaries.
        #[test]
        fn write_read_roundtrip_across_boundaries(
            lens in prop::collection::vec(1usize..8, 2..12),
            offset_seed in any::<u16>(),
            payload in prop::collection::vec(any::<u8>(), 1..24),
        ) {
            let mut pkt = packet_with_lens(&lens);
            let total = pkt.pkt_len();
            prop_assume!(payload.len() <= total);
            let offset = offset_seed as usize % (total - payload.len() + 1);

            pkt.write_at(offset, &payload).unwrap();
            let mut back = vec![0u8; payload.len()];
            pkt.read_at(offset, &mut back).unwrap();
            prop_assert_eq!(back, payload);
        }
    }

    #[test]
    fn out_of_bounds_spans_are_rejected() {
        let mut pkt = packet_with_lens(&[4, 4]);
        assert!(pkt.write_at(6, &[0; 4]).is_err());
        let mut buf = [0u8; 4];
        assert!(pkt.read_at(6, &mut buf).is_err());
        // In-bounds straddle is fine.
        assert!(pkt.write_at(2, &[1, 2, 3, 4]).is_ok());
    }

    #[test]
    fn from_segments_rejects_empty_and_oversized_chains() {
        assert!(Packet::from_segments(Vec::new()).is_err());
        let segs: Vec<Segment> = (0..MAX_SEGS_PER_PACKET + 1)
            .map(|_| Segment::new(vec![0u8; 8].into_boxed_slice(), 8))
            .collect();
        let rejected = Packet::from_segments(segs).unwrap_err();
        // The buffers come back intact for return to the pool.
        assert_eq!(rejected.len(), MAX_SEGS_PER_PACKET + 1);
    }

    #[test]
    fn into_buffers_returns_every_segment() {
        let pkt = packet_with_lens(&[8, 8, 8]);
        assert_eq!(pkt.into_buffers().len(), 3);
    }

    #[test]
    fn flags_compose() {
        let mut flags = PktFlags::default();
        flags.insert(PktFlags::VLAN);
        flags.insert(PktFlags::MACSEC);
        assert!(flags.has(PktFlags::VLAN));
        assert!(!flags.has(PktFlags::QINQ));
        assert_eq!(flags.value(), PktFlags::VLAN | PktFlags::MACSEC);
    }
}

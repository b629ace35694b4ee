//! Multi-segment packet assembly.
//!
//! Turns a template plus a segment plan into a ready-to-send [`Packet`]:
//! buffers come from the pool (the extras in one atomic bulk request),
//! header bytes are copied across segment boundaries, and packet metadata is
//! derived from the port profile. Any failure returns every acquired buffer
//! to the pool before reporting.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::config::SplitMode;
use crate::packet::{Packet, PktFlags, Segment};
use crate::pool::BufferPool;
use crate::port::{PortProfile, TxOffloadCaps};
use crate::template::PacketTemplate;
use crate::wire::{EthernetHeader, Ipv4Header};
use crate::{ProbeError, Result};

/// Builds transmit packets from a fixed segment plan.
#[derive(Debug)]
pub struct Assembler {
    plan: Vec<u16>,
    split: SplitMode,
    rng: SmallRng,
}

impl Assembler {
    pub fn new(plan: Vec<u16>, split: SplitMode) -> Self {
        Self { plan, split, rng: SmallRng::from_entropy() }
    }

    /// Deterministic variant for tests and benchmarks.
    pub fn with_seed(plan: Vec<u16>, split: SplitMode, seed: u64) -> Self {
        Self { plan, split, rng: SmallRng::seed_from_u64(seed) }
    }

    /// Segment count for the next packet: the full plan, or a random prefix
    /// of it in [`SplitMode::Random`].
    fn segment_count(&mut self) -> usize {
        match self.split {
            SplitMode::Off | SplitMode::On => self.plan.len(),
            SplitMode::Random => self.rng.gen_range(1..=self.plan.len()),
        }
    }

    /// Assemble one packet.
    ///
    /// Fails with [`ProbeError::NoBuffer`] when the pool cannot cover the
    /// chosen segment count; the pool's available count is unchanged in that
    /// case.
    pub fn assemble(
        &mut self,
        pool: &mut BufferPool,
        template: &PacketTemplate,
        eth: &EthernetHeader,
        profile: &PortProfile,
    ) -> Result<Packet> {
        let nb_segs = self.segment_count();
        let lens = &self.plan[..nb_segs];

        let head_buf = pool.alloc()?;
        let extra = match pool.alloc_bulk(nb_segs - 1) {
            Ok(bufs) => bufs,
            Err(err) => {
                pool.free(head_buf);
                return Err(err);
            }
        };

        let mut segments = Vec::with_capacity(nb_segs);
        segments.push(Segment::new(head_buf, lens[0] as usize));
        for (buf, &len) in extra.into_iter().zip(&lens[1..]) {
            segments.push(Segment::new(buf, len as usize));
        }

        let mut packet = match Packet::from_segments(segments) {
            Ok(packet) => packet,
            Err(segments) => {
                for seg in segments {
                    pool.free(seg.into_buffer());
                }
                return Err(ProbeError::config("segment plan outside packet limits"));
            }
        };

        packet.l2_len = EthernetHeader::SIZE as u8;
        packet.l3_len = Ipv4Header::SIZE as u8;
        packet.vlan_tci = profile.vlan_tci;
        packet.vlan_tci_outer = profile.vlan_tci_outer;
        if profile.tx_offloads.has(TxOffloadCaps::VLAN_INSERT) {
            packet.ol_flags.insert(PktFlags::VLAN);
        }
        if profile.tx_offloads.has(TxOffloadCaps::QINQ_INSERT) {
            packet.ol_flags.insert(PktFlags::QINQ);
        }
        if profile.tx_offloads.has(TxOffloadCaps::MACSEC_INSERT) {
            packet.ol_flags.insert(PktFlags::MACSEC);
        }

        let copied = Self::copy_headers(&mut packet, template, eth);
        if let Err(err) = copied {
            pool.free_packet(packet);
            return Err(err);
        }
        Ok(packet)
    }

    fn copy_headers(
        packet: &mut Packet,
        template: &PacketTemplate,
        eth: &EthernetHeader,
    ) -> Result<()> {
        packet.write_at(0, &eth.to_bytes())?;
        packet.write_at(EthernetHeader::SIZE, &template.ip_bytes())?;
        packet.write_at(template.transport_offset(), &template.transport_bytes())?;
        Ok(())
    }
}

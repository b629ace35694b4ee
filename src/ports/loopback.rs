//! Software loopback port.
//!
//! Behaves like a zero-latency peer on the other end of the wire: every
//! transmitted ICMP echo request is turned into a well-formed echo reply
//! (addresses swapped, type flipped, checksums refreshed) and queued for the
//! next receive burst. Non-echo traffic is swallowed like a discard service
//! would. Device counters move exactly the way a real port's would, so the
//! statistics path can be exercised end to end without hardware.

use std::collections::VecDeque;

use tracing::trace;

use crate::packet::Packet;
use crate::port::{PortCounters, PortProfile, ProbePort, TxBurst, TxOffloadCaps};
use crate::wire::{
    EthernetHeader, IcmpEchoHeader, Ipv4Header, MacAddr, ICMP_ECHO_REPLY, IPPROTO_ICMP,
};

/// A port wired back to itself through a software echo responder.
#[derive(Debug)]
pub struct LoopbackPort {
    profile: PortProfile,
    counters: PortCounters,
    rx_queue: VecDeque<Packet>,
    /// Non-echoed transmits are parked here so their buffers stay reachable.
    sunk: Vec<Packet>,
    echo: bool,
}

impl LoopbackPort {
    /// Echo responder: transmitted echo requests come back as replies.
    pub fn echo(mac: MacAddr) -> Self {
        Self::with_profile(
            PortProfile { mac, tx_offloads: TxOffloadCaps::default(), vlan_tci: 0, vlan_tci_outer: 0 },
            true,
        )
    }

    /// Silent sink: everything transmitted is swallowed.
    pub fn sink(mac: MacAddr) -> Self {
        Self::with_profile(
            PortProfile { mac, tx_offloads: TxOffloadCaps::default(), vlan_tci: 0, vlan_tci_outer: 0 },
            false,
        )
    }

    pub fn with_profile(profile: PortProfile, echo: bool) -> Self {
        Self { profile, counters: PortCounters::default(), rx_queue: VecDeque::new(), sunk: Vec::new(), echo }
    }

    /// Reclaim swallowed packets, e.g. to return their buffers to a pool.
    pub fn drain_sunk(&mut self) -> Vec<Packet> {
        std::mem::take(&mut self.sunk)
    }

    /// Rewrite a transmitted echo request into the reply a peer would send.
    /// Returns false for packets that are not ICMP echo traffic, which are
    /// left untouched.
    pub(crate) fn reflect(packet: &mut Packet) -> bool {
        const HDR_LEN: usize = EthernetHeader::SIZE + Ipv4Header::SIZE + IcmpEchoHeader::SIZE;
        let mut hdr = [0u8; HDR_LEN];
        if packet.pkt_len() < HDR_LEN || packet.read_at(0, &mut hdr).is_err() {
            return false;
        }

        let ip_at = EthernetHeader::SIZE;
        let icmp_at = ip_at + Ipv4Header::SIZE;
        let Some(mut ip) = Ipv4Header::parse(&hdr[ip_at..icmp_at]) else {
            return false;
        };
        if ip.protocol != IPPROTO_ICMP {
            return false;
        }
        let Some(mut icmp) = IcmpEchoHeader::parse(&hdr[icmp_at..]) else {
            return false;
        };

        // Ethernet: reply travels back the way it came.
        let mut dst = [0u8; 6];
        let mut src = [0u8; 6];
        dst.copy_from_slice(&hdr[0..6]);
        src.copy_from_slice(&hdr[6..12]);
        hdr[0..6].copy_from_slice(&src);
        hdr[6..12].copy_from_slice(&dst);

        std::mem::swap(&mut ip.src, &mut ip.dst);
        ip.finish();
        icmp.icmp_type = ICMP_ECHO_REPLY;
        icmp.finish();

        hdr[ip_at..icmp_at].copy_from_slice(&ip.to_bytes());
        hdr[icmp_at..].copy_from_slice(&icmp.to_bytes());
        // The header span fits: checked against pkt_len above.
        let _ = packet.write_at(0, &hdr);
        true
    }
}

impl ProbePort for LoopbackPort {
    fn profile(&self) -> PortProfile {
        self.profile
    }

    fn counters(&self) -> PortCounters {
        self.counters
    }

    fn tx_burst(&mut self, _queue: u16, packets: Vec<Packet>) -> TxBurst {
        let accepted = packets.len();
        for mut packet in packets {
            self.counters.opackets += 1;
            self.counters.obytes += packet.pkt_len() as u64;
            if self.echo && Self::reflect(&mut packet) {
                self.rx_queue.push_back(packet);
            } else {
                self.sunk.push(packet);
            }
        }
        trace!(accepted, "loopback transmit");
        TxBurst { accepted, rejected: Vec::new() }
    }

    fn rx_burst(&mut self, _queue: u16, max: usize) -> Vec<Packet> {
        let take = max.min(self.rx_queue.len());
        let mut out = Vec::with_capacity(take);
        for _ in 0..take {
            if let Some(packet) = self.rx_queue.pop_front() {
                self.counters.ipackets += 1;
                self.counters.ibytes += packet.pkt_len() as u64;
                out.push(packet);
            }
        }
        out
    }
}

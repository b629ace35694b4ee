//! Per-run packet template.
//!
//! Built once at run start: the IPv4 header and the transport header for the
//! configured probe kind, with checksums precomputed. The Ethernet header is
//! not part of the template because its source address belongs to the port;
//! the assembler supplies it. The only mutation during a run is sequence
//! stamping on the echo transport header, which re-sums that header alone.

use std::net::Ipv4Addr;

use crate::config::ProbeKind;
use crate::wire::{
    EthernetHeader, IcmpEchoHeader, Ipv4Header, UdpHeader, IPPROTO_ICMP, IPPROTO_UDP,
};
use crate::{ProbeError, Result};

/// Source address for synthesized frames, from the RFC 2544 benchmarking
/// range (198.18.0.0/15).
pub const SOURCE_ADDR: Ipv4Addr = Ipv4Addr::new(198, 18, 0, 1);

/// Destination address for synthesized frames.
pub const DEST_ADDR: Ipv4Addr = Ipv4Addr::new(198, 18, 0, 2);

/// The transport header variant carried behind the IPv4 header.
#[derive(Debug, Clone, Copy)]
pub enum TransportHeader {
    Icmp(IcmpEchoHeader),
    Udp(UdpHeader),
}

impl TransportHeader {
    fn to_bytes(self) -> [u8; 8] {
        match self {
            TransportHeader::Icmp(hdr) => hdr.to_bytes(),
            TransportHeader::Udp(hdr) => hdr.to_bytes(),
        }
    }
}

/// Immutable-per-run header images for one probe flow.
#[derive(Debug, Clone)]
pub struct PacketTemplate {
    kind: ProbeKind,
    ip: Ipv4Header,
    transport: TransportHeader,
    frame_len: usize,
}

impl PacketTemplate {
    /// Build the template for `kind` at total on-wire length `frame_len`.
    ///
    /// Fails with [`ProbeError::InvalidLength`] when the frame cannot hold
    /// the Ethernet, IPv4, and transport headers.
    pub fn build(kind: ProbeKind, frame_len: usize) -> Result<Self> {
        let min = kind.min_frame_len();
        if frame_len < min || frame_len > u16::MAX as usize {
            return Err(ProbeError::InvalidLength { frame_len, min });
        }
        let payload_len = frame_len - min;
        let ip_total = (frame_len - EthernetHeader::SIZE) as u16;

        let (protocol, transport) = match kind {
            ProbeKind::Echo => {
                let ident = std::process::id() as u16;
                (IPPROTO_ICMP, TransportHeader::Icmp(IcmpEchoHeader::request(ident)))
            }
            ProbeKind::Discard => {
                (IPPROTO_UDP, TransportHeader::Udp(UdpHeader::discard(payload_len as u16)))
            }
        };

        let ip = Ipv4Header::new(protocol, ip_total, SOURCE_ADDR, DEST_ADDR);
        Ok(Self { kind, ip, transport, frame_len })
    }

    pub fn kind(&self) -> ProbeKind {
        self.kind
    }

    /// Total on-wire frame length this template was built for.
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// The IP protocol number replies are expected to carry.
    pub fn protocol(&self) -> u8 {
        self.ip.protocol
    }

    /// Byte offset of the transport header within the frame.
    pub fn transport_offset(&self) -> usize {
        EthernetHeader::SIZE + Ipv4Header::SIZE
    }

    pub fn ip_bytes(&self) -> [u8; Ipv4Header::SIZE] {
        self.ip.to_bytes()
    }

    pub fn transport_bytes(&self) -> [u8; 8] {
        self.transport.to_bytes()
    }

    /// Stamp the echo sequence number and refresh the transport checksum.
    /// No-op for kinds without a sequence field.
    pub fn stamp_echo_sequence(&mut self, seq: u16) {
        if let TransportHeader::Icmp(ref mut hdr) = self.transport {
            hdr.set_seq(seq);
        }
    }
}

//! On-wire header layouts.
//!
//! Byte-exact Ethernet, IPv4, ICMP echo, and UDP header images with their
//! checksum rules. Each header type renders itself into a fixed-size
//! big-endian byte array; the template builder composes those arrays and the
//! assembler copies them into segment chains. Parsing is limited to what the
//! receive path needs to recognize an echo reply.

pub mod checksum;
mod ethernet;
mod icmp;
mod ipv4;
mod udp;

pub use ethernet::{EthernetHeader, MacAddr, ETHERTYPE_IPV4};
pub use icmp::{IcmpEchoHeader, ICMP_ECHO_REPLY, ICMP_ECHO_REQUEST};
pub use ipv4::Ipv4Header;
pub use udp::UdpHeader;

/// IP protocol number for ICMP.
pub const IPPROTO_ICMP: u8 = 1;

/// IP protocol number for UDP.
pub const IPPROTO_UDP: u8 = 17;

//! ICMP echo header image.

use super::checksum;

/// ICMP type for an echo request.
pub const ICMP_ECHO_REQUEST: u8 = 8;

/// ICMP type for an echo reply.
pub const ICMP_ECHO_REPLY: u8 = 0;

/// The 8-byte ICMP echo request/reply header.
///
/// The checksum covers the header bytes only, matching the probe's wire
/// behavior: the payload behind it is never summed, so stamping a new
/// sequence number only requires re-summing these eight bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpEchoHeader {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
    pub ident: u16,
    pub seq: u16,
}

impl IcmpEchoHeader {
    pub const SIZE: usize = 8;

    /// Echo request with a zeroed sequence placeholder, checksum computed.
    pub fn request(ident: u16) -> Self {
        let mut hdr = Self { icmp_type: ICMP_ECHO_REQUEST, code: 0, checksum: 0, ident, seq: 0 };
        hdr.finish();
        hdr
    }

    /// Recompute the checksum over the current field values.
    pub fn finish(&mut self) {
        self.checksum = 0;
        self.checksum = checksum::finalize(checksum::raw_sum(&self.to_bytes()));
    }

    /// Stamp a new sequence number and refresh the checksum.
    pub fn set_seq(&mut self, seq: u16) {
        self.seq = seq;
        self.finish();
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0] = self.icmp_type;
        bytes[1] = self.code;
        bytes[2..4].copy_from_slice(&self.checksum.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.ident.to_be_bytes());
        bytes[6..8].copy_from_slice(&self.seq.to_be_bytes());
        bytes
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            icmp_type: bytes[0],
            code: bytes[1],
            checksum: u16::from_be_bytes([bytes[2], bytes[3]]),
            ident: u16::from_be_bytes([bytes[4], bytes[5]]),
            seq: u16::from_be_bytes([bytes[6], bytes[7]]),
        })
    }

    /// Verify the stored checksum against the header bytes.
    pub fn checksum_ok(bytes: &[u8]) -> bool {
        bytes.len() >= Self::SIZE && checksum::verify(&bytes[..Self::SIZE])
    }
}

//! Port abstraction.
//!
//! The engine drives a port through this trait: best-effort bounded bursts,
//! live device counters, and a read-only profile (MAC, offload capabilities,
//! VLAN tags). Calls never block; a burst moves whatever the device can take
//! or has ready right now. Ownership of packets transfers on transmit;
//! rejected packets come back to the caller, which must free them.

use crate::packet::Packet;
use crate::wire::MacAddr;

/// Device-advertised transmit offload capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxOffloadCaps(pub u32);

impl TxOffloadCaps {
    /// Hardware VLAN tag insertion.
    pub const VLAN_INSERT: u32 = 1 << 0;
    /// Hardware outer VLAN (QinQ) tag insertion.
    pub const QINQ_INSERT: u32 = 1 << 1;
    /// Hardware MACsec protection.
    pub const MACSEC_INSERT: u32 = 1 << 2;
    /// Device frees transmitted buffers without per-packet bookkeeping.
    pub const MBUF_FAST_FREE: u32 = 1 << 3;

    pub fn has(&self, cap: u32) -> bool {
        (self.0 & cap) != 0
    }
}

/// Read-only per-port configuration consumed by the assembler and engine.
#[derive(Debug, Clone, Copy)]
pub struct PortProfile {
    /// The port's own MAC address; goes into the Ethernet source field.
    pub mac: MacAddr,
    /// Offloads enabled on this port.
    pub tx_offloads: TxOffloadCaps,
    /// Inner VLAN tag for hardware insertion.
    pub vlan_tci: u16,
    /// Outer VLAN tag for hardware insertion.
    pub vlan_tci_outer: u16,
}

/// Device-level counters, cumulative since port start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortCounters {
    pub ipackets: u64,
    pub opackets: u64,
    pub ibytes: u64,
    pub obytes: u64,
    pub ierrors: u64,
    pub oerrors: u64,
    /// Packets the device dropped for lack of ring space.
    pub imissed: u64,
    /// Receive allocations that failed for lack of buffers.
    pub rx_nombuf: u64,
}

impl PortCounters {
    /// Counters relative to a `baseline` snapshot, saturating at zero in
    /// case the device reset underneath us.
    pub fn since(&self, baseline: &PortCounters) -> PortCounters {
        PortCounters {
            ipackets: self.ipackets.saturating_sub(baseline.ipackets),
            opackets: self.opackets.saturating_sub(baseline.opackets),
            ibytes: self.ibytes.saturating_sub(baseline.ibytes),
            obytes: self.obytes.saturating_sub(baseline.obytes),
            ierrors: self.ierrors.saturating_sub(baseline.ierrors),
            oerrors: self.oerrors.saturating_sub(baseline.oerrors),
            imissed: self.imissed.saturating_sub(baseline.imissed),
            rx_nombuf: self.rx_nombuf.saturating_sub(baseline.rx_nombuf),
        }
    }
}

/// Outcome of a transmit burst.
#[derive(Debug)]
pub struct TxBurst {
    /// Packets the device accepted; it now owns their buffers.
    pub accepted: usize,
    /// Packets the device turned away; the caller still owns them.
    pub rejected: Vec<Packet>,
}

/// A network port the probe can drive.
pub trait ProbePort {
    /// Port MAC, offloads, and VLAN tags. Stable for the run.
    fn profile(&self) -> PortProfile;

    /// Live device counters.
    fn counters(&self) -> PortCounters;

    /// Offer `packets` to queue `queue`. Best-effort, non-blocking.
    fn tx_burst(&mut self, queue: u16, packets: Vec<Packet>) -> TxBurst;

    /// Drain up to `max` received packets from queue `queue`. Non-blocking.
    fn rx_burst(&mut self, queue: u16, max: usize) -> Vec<Packet>;
}

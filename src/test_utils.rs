//! Shared fixtures for tests and benchmarks.
//!
//! A manually advanced cycle clock and a capture port with programmable
//! acceptance make the forwarding loop fully deterministic: tests advance
//! time by exact pacing periods and inspect every packet the engine emitted.

#![cfg(any(test, feature = "benchmark"))]

use std::cell::Cell;
use std::collections::VecDeque;

use crate::clock::{cycles_for_us, CycleClock};
use crate::config::ProbeConfig;
use crate::engine::ProbeEngine;
use crate::packet::Packet;
use crate::port::{PortCounters, PortProfile, ProbePort, TxBurst, TxOffloadCaps};
use crate::ports::LoopbackPort;
use crate::wire::MacAddr;

/// Peer MAC used across tests.
pub fn peer_mac() -> MacAddr {
    "aa:bb:cc:dd:ee:ff".parse().expect("literal MAC")
}

/// Port MAC used across tests.
pub fn port_mac() -> MacAddr {
    "02:00:00:00:00:01".parse().expect("literal MAC")
}

/// Echo configuration with the stock defaults.
pub fn echo_config() -> ProbeConfig {
    ProbeConfig::echo(peer_mac())
}

/// Engine over a capture port and a manual 1 MHz clock (1 cycle = 1 us).
pub fn manual_engine(cfg: ProbeConfig) -> ProbeEngine<CapturePort, ManualClock> {
    ProbeEngine::new(cfg, CapturePort::new(port_mac()), ManualClock::new(1_000_000))
        .expect("test config must validate")
}

/// A cycle clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    cycles: Cell<u64>,
    hz: u64,
}

impl ManualClock {
    pub fn new(hz: u64) -> Self {
        // Start at 1: cycle 0 is the send-time table's "unset" sentinel.
        Self { cycles: Cell::new(1), hz }
    }

    pub fn advance(&self, cycles: u64) {
        self.cycles.set(self.cycles.get() + cycles);
    }
}

impl CycleClock for ManualClock {
    fn cycles(&self) -> u64 {
        self.cycles.get()
    }

    fn hz(&self) -> u64 {
        self.hz
    }

    /// Advance instead of spinning; a manual clock never moves on its own.
    fn delay_us(&self, us: u64) {
        self.advance(cycles_for_us(self.hz, us));
    }
}

/// A port that captures transmits and replays injected receives, with
/// programmable acceptance for short-send scenarios.
#[derive(Debug)]
pub struct CapturePort {
    profile: PortProfile,
    counters: PortCounters,
    rx_queue: VecDeque<Packet>,
    transmitted: Vec<Packet>,
    accept_limit: Option<usize>,
    reject_bursts: usize,
}

impl CapturePort {
    pub fn new(mac: MacAddr) -> Self {
        Self {
            profile: PortProfile {
                mac,
                tx_offloads: TxOffloadCaps::default(),
                vlan_tci: 0,
                vlan_tci_outer: 0,
            },
            counters: PortCounters::default(),
            rx_queue: VecDeque::new(),
            transmitted: Vec::new(),
            accept_limit: None,
            reject_bursts: 0,
        }
    }

    pub fn set_profile(&mut self, profile: PortProfile) {
        self.profile = profile;
    }

    /// Accept at most `limit` packets per burst from now on.
    pub fn set_accept_limit(&mut self, limit: usize) {
        self.accept_limit = Some(limit);
    }

    /// Reject the next `bursts` transmit bursts wholesale.
    pub fn set_reject_next(&mut self, bursts: usize) {
        self.reject_bursts = bursts;
    }

    pub fn transmitted_count(&self) -> usize {
        self.transmitted.len()
    }

    pub fn take_transmitted(&mut self) -> Vec<Packet> {
        std::mem::take(&mut self.transmitted)
    }

    /// Queue a raw packet for the next receive burst.
    pub fn inject_rx(&mut self, packet: Packet) {
        self.rx_queue.push_back(packet);
    }

    /// Turn a captured probe into the echo reply a peer would send, then
    /// queue it for receive.
    pub fn inject_echo_reply(&mut self, mut packet: Packet) {
        LoopbackPort::reflect(&mut packet);
        self.rx_queue.push_back(packet);
    }
}

impl ProbePort for CapturePort {
    fn profile(&self) -> PortProfile {
        self.profile
    }

    fn counters(&self) -> PortCounters {
        self.counters
    }

    fn tx_burst(&mut self, _queue: u16, mut packets: Vec<Packet>) -> TxBurst {
        if self.reject_bursts > 0 {
            self.reject_bursts -= 1;
            return TxBurst { accepted: 0, rejected: packets };
        }
        let limit = self.accept_limit.unwrap_or(packets.len()).min(packets.len());
        let rejected = packets.split_off(limit);
        for packet in packets {
            self.counters.opackets += 1;
            self.counters.obytes += packet.pkt_len() as u64;
            self.transmitted.push(packet);
        }
        TxBurst { accepted: limit, rejected }
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

//! Probe run configuration.
//!
//! Everything that used to live in scattered globals in generators of this
//! shape is collected here and validated once, before the engine starts.
//! Probe kind and direction are explicit, mutually exclusive choices.

use serde::{Deserialize, Serialize};

use crate::packet::MAX_SEGS_PER_PACKET;
use crate::wire::{EthernetHeader, IcmpEchoHeader, Ipv4Header, MacAddr, UdpHeader};
use crate::{ProbeError, Result};

/// What the synthesized frames carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeKind {
    /// ICMP echo requests; replies are matched by sequence number to measure
    /// round-trip latency.
    Echo,
    /// UDP datagrams to the discard service; no replies are expected.
    Discard,
}

impl ProbeKind {
    /// Transport header size for this kind, in bytes.
    pub fn transport_len(self) -> usize {
        match self {
            ProbeKind::Echo => IcmpEchoHeader::SIZE,
            ProbeKind::Discard => UdpHeader::SIZE,
        }
    }

    /// Smallest frame that still holds all required headers.
    pub fn min_frame_len(self) -> usize {
        EthernetHeader::SIZE + Ipv4Header::SIZE + self.transport_len()
    }
}

/// Which halves of the forwarding loop run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Send probes and poll for replies.
    SendReceive,
    /// Send only; the receive phase is skipped.
    SendOnly,
    /// Poll and free received packets only; nothing is transmitted.
    ReceiveOnly,
}

impl Direction {
    pub fn sends(self) -> bool {
        !matches!(self, Direction::ReceiveOnly)
    }

    pub fn receives(self) -> bool {
        !matches!(self, Direction::SendOnly)
    }
}

/// Segment splitting policy for transmitted packets.
///
/// `Off` and `On` both use the full configured segment plan; `Random` picks a
/// uniformly random prefix of it (at least one segment) per packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitMode {
    Off,
    On,
    Random,
}

/// Bounded retransmit policy for short sends.
///
/// Disabled (`attempts == 0`) for the single-packet echo path; bulk senders
/// enable it to ride out transient ring pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional transmit attempts after a short send.
    pub attempts: u32,
    /// Busy-wait between attempts, in microseconds.
    pub delay_us: u64,
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        Self { attempts: 0, delay_us: 0 }
    }

    /// The bulk-path default: up to 64 retries, 1us apart.
    pub fn bulk() -> Self {
        Self { attempts: 64, delay_us: 1 }
    }

    pub fn is_enabled(&self) -> bool {
        self.attempts > 0
    }
}

fn default_frame_len() -> usize {
    64
}

fn default_interval_us() -> u64 {
    1_000_000
}

fn default_probe_count() -> u64 {
    10
}

fn default_rx_burst() -> usize {
    32
}

fn default_warmup_ms() -> u64 {
    1_000
}

fn default_pool_buffers() -> usize {
    512
}

fn default_buf_capacity() -> usize {
    2048
}

/// Complete configuration for one probe run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Frame payload kind; also decides what counts as a reply.
    pub kind: ProbeKind,
    /// Which halves of the loop run.
    pub direction: Direction,
    /// Destination MAC for synthesized frames.
    pub peer_mac: MacAddr,
    /// Total on-wire frame length, headers included.
    #[serde(default = "default_frame_len")]
    pub frame_len: usize,
    /// Per-segment lengths; empty means one segment of `frame_len`.
    #[serde(default)]
    pub segment_lengths: Vec<u16>,
    /// Segment splitting policy.
    #[serde(default = "ProbeConfig::default_split")]
    pub split: SplitMode,
    /// Minimum spacing between consecutive sends, in microseconds.
    #[serde(default = "default_interval_us")]
    pub interval_us: u64,
    /// Number of probes to send before the run completes.
    #[serde(default = "default_probe_count")]
    pub probe_count: u64,
    /// Upper bound on packets drained per receive poll.
    #[serde(default = "default_rx_burst")]
    pub rx_burst: usize,
    /// Short-send retry policy.
    #[serde(default = "RetryPolicy::disabled")]
    pub retry: RetryPolicy,
    /// Settle time excluded from rate calculations, in milliseconds.
    #[serde(default = "default_warmup_ms")]
    pub warmup_ms: u64,
    /// Queue index used for both transmit and receive.
    #[serde(default)]
    pub queue: u16,
    /// Number of buffers in the run's pool.
    #[serde(default = "default_pool_buffers")]
    pub pool_buffers: usize,
    /// Capacity of each pool buffer, in bytes.
    #[serde(default = "default_buf_capacity")]
    pub buf_capacity: usize,
}

impl ProbeConfig {
    fn default_split() -> SplitMode {
        SplitMode::Off
    }

    /// Echo-latency probe toward `peer_mac` with the stock defaults.
    pub fn echo(peer_mac: MacAddr) -> Self {
        Self::with_kind(ProbeKind::Echo, Direction::SendReceive, peer_mac)
    }

    /// Discard-service generator toward `peer_mac`; send-only.
    pub fn discard(peer_mac: MacAddr) -> Self {
        Self::with_kind(ProbeKind::Discard, Direction::SendOnly, peer_mac)
    }

    fn with_kind(kind: ProbeKind, direction: Direction, peer_mac: MacAddr) -> Self {
        Self {
            kind,
            direction,
            peer_mac,
            frame_len: default_frame_len(),
            segment_lengths: Vec::new(),
            split: SplitMode::Off,
            interval_us: default_interval_us(),
            probe_count: default_probe_count(),
            rx_burst: default_rx_burst(),
            retry: RetryPolicy::disabled(),
            warmup_ms: default_warmup_ms(),
            queue: 0,
            pool_buffers: default_pool_buffers(),
            buf_capacity: default_buf_capacity(),
        }
    }

    /// The effective segment plan: the configured lengths, or one segment
    /// covering the whole frame.
    pub fn segment_plan(&self) -> Vec<u16> {
        if self.segment_lengths.is_empty() {
            vec![self.frame_len as u16]
        } else {
            self.segment_lengths.clone()
        }
    }

    /// Check internal consistency. Called once before the engine starts; the
    /// forwarding loop assumes a validated configuration.
    pub fn validate(&self) -> Result<()> {
        let min = self.kind.min_frame_len();
        if self.frame_len < min {
            return Err(ProbeError::InvalidLength { frame_len: self.frame_len, min });
        }
        if self.frame_len > u16::MAX as usize {
            return Err(ProbeError::config(format!(
                "frame length {} exceeds the 16-bit IP total-length space",
                self.frame_len
            )));
        }

        let plan = self.segment_plan();
        if plan.len() > MAX_SEGS_PER_PACKET {
            return Err(ProbeError::config(format!(
                "segment plan has {} entries, maximum is {MAX_SEGS_PER_PACKET}",
                plan.len()
            )));
        }
        if plan.iter().any(|&len| len == 0) {
            return Err(ProbeError::config("segment plan contains a zero-length segment"));
        }
        if plan.iter().any(|&len| len as usize > self.buf_capacity) {
            return Err(ProbeError::config(format!(
                "segment plan entry exceeds buffer capacity {}",
                self.buf_capacity
            )));
        }
        let plan_total: usize = plan.iter().map(|&len| len as usize).sum();
        if plan_total != self.frame_len {
            return Err(ProbeError::config(format!(
                "segment plan totals {plan_total} bytes but frame length is {}",
                self.frame_len
            )));
        }
        // Random splitting may truncate the plan to any prefix, so the first
        // segment alone must hold every header.
        if self.split == SplitMode::Random && (plan[0] as usize) < min {
            return Err(ProbeError::config(format!(
                "random split needs a first segment of at least {min} bytes to hold the headers"
            )));
        }

        if self.probe_count == 0 {
            return Err(ProbeError::config("probe count must be nonzero"));
        }
        if self.probe_count > u64::from(u16::MAX) {
            return Err(ProbeError::config(
                "probe count exceeds the 16-bit echo sequence space",
            ));
        }
        if self.interval_us == 0 {
            return Err(ProbeError::config("send interval must be nonzero"));
        }
        if self.rx_burst == 0 {
            return Err(ProbeError::config("receive burst must be nonzero"));
        }
        if self.pool_buffers < plan.len() {
            return Err(ProbeError::config(format!(
                "pool of {} buffers cannot hold one {}-segment packet",
                self.pool_buffers,
                plan.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> MacAddr {
        "aa:bb:cc:dd:ee:ff".parse().unwrap()
    }

    #[test]
    fn defaults_validate() {
        assert!(ProbeConfig::echo(peer()).validate().is_ok());
        assert!(ProbeConfig::discard(peer()).validate().is_ok());
    }

    #[test]
    fn too_short_frame_is_invalid_length() {
        let mut cfg = ProbeConfig::echo(peer());
        cfg.frame_len = 41; // one byte short of eth + ip + icmp
        match cfg.validate() {
            Err(ProbeError::InvalidLength { frame_len: 41, min: 42 }) => {}
            other => panic!("expected InvalidLength, got {other:?}"),
        }
    }

    #[test]
    fn plan_must_total_frame_length() {
        let mut cfg = ProbeConfig::echo(peer());
        cfg.frame_len = 64;
        cfg.segment_lengths = vec![32, 16];
        assert!(cfg.validate().is_err());
        cfg.segment_lengths = vec![32, 16, 16];
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_counts_are_rejected() {
        let mut cfg = ProbeConfig::echo(peer());
        cfg.probe_count = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = ProbeConfig::echo(peer());
        cfg.interval_us = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = ProbeConfig::echo(peer());
        cfg.rx_burst = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn random_split_requires_headers_in_first_segment() {
        let mut cfg = ProbeConfig::echo(peer());
        cfg.frame_len = 64;
        cfg.segment_lengths = vec![32, 32];
        cfg.split = SplitMode::Random;
        assert!(cfg.validate().is_err());

        cfg.segment_lengths = vec![48, 16];
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn direction_predicates() {
        assert!(Direction::SendReceive.sends() && Direction::SendReceive.receives());
        assert!(Direction::SendOnly.sends() && !Direction::SendOnly.receives());
        assert!(!Direction::ReceiveOnly.sends() && Direction::ReceiveOnly.receives());
    }

    #[test]
    fn config_roundtrips_through_serde() {
        let cfg = ProbeConfig::echo(peer());
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ProbeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.peer_mac, cfg.peer_mac);
        assert_eq!(back.probe_count, cfg.probe_count);
    }
}

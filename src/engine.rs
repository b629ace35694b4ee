//! The timed forwarding loop.
//!
//! One engine owns everything a run needs: the port, the clock, the buffer
//! pool, the packet template, the assembler, the send-time ring, and the
//! statistics. Each `tick()` drains a bounded receive burst, enforces the
//! pacing period against the cycle counter, and sends at most one probe.
//! Nothing in the loop blocks and nothing in it is fatal: allocation
//! failures and short sends become drop counts, unmatched or malformed
//! replies are discarded, and the run ends itself after the configured
//! number of send cycles.

use tracing::{debug, trace};

use crate::assemble::Assembler;
use crate::clock::{cycles_for_us, CycleClock};
use crate::config::{ProbeConfig, ProbeKind};
use crate::packet::Packet;
use crate::pool::BufferPool;
use crate::port::ProbePort;
use crate::stats::RunStats;
use crate::template::PacketTemplate;
use crate::wire::{EthernetHeader, IcmpEchoHeader, Ipv4Header};
use crate::Result;

/// Floor on the send-time ring size, independent of the configured probe
/// count.
pub const MIN_SEND_TABLE_SLOTS: usize = 16;

/// Ring of send timestamps indexed by echo sequence number.
///
/// Sized so every sequence in a run gets a distinct slot; a slot value of 0
/// is the "unset" sentinel.
#[derive(Debug)]
struct SendTimeTable {
    slots: Box<[u64]>,
}

impl SendTimeTable {
    /// Ring sized for `probe_count` sequences (1-based), power-of-two and at
    /// least [`MIN_SEND_TABLE_SLOTS`].
    fn for_probe_count(probe_count: u64) -> Self {
        let slots = (probe_count + 1)
            .next_power_of_two()
            .max(MIN_SEND_TABLE_SLOTS as u64) as usize;
        Self { slots: vec![0; slots].into_boxed_slice() }
    }

    fn index(&self, seq: u16) -> usize {
        seq as usize & (self.slots.len() - 1)
    }

    fn record(&mut self, seq: u16, cycles: u64) {
        // 0 is the sentinel; a real timestamp of 0 would read as unset.
        self.slots[self.index(seq)] = cycles.max(1);
    }

    fn lookup(&self, seq: u16) -> Option<u64> {
        match self.slots[self.index(seq)] {
            0 => None,
            cycles => Some(cycles),
        }
    }

    fn clear(&mut self) {
        self.slots.fill(0);
    }
}

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Created but `begin()` has not run.
    Idle,
    /// Ticking.
    Running,
    /// The run completed; further ticks are no-ops.
    Done,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    /// Pacing (or state) allowed no work this tick.
    Idle,
    /// The tick made progress (received and/or sent).
    Active,
    /// The run just completed; the driver should stop ticking.
    Done,
}

/// One matched echo reply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySample {
    /// Echo sequence number of the matched probe.
    pub seq: u16,
    /// Round-trip time in cycle-counter ticks.
    pub cycles: u64,
    /// Round-trip time in microseconds.
    pub micros: f64,
}

impl LatencySample {
    fn new(seq: u16, cycles: u64, hz: u64) -> Self {
        Self { seq, cycles, micros: cycles as f64 / hz as f64 * 1e6 }
    }
}

/// Everything a tick produced.
#[derive(Debug)]
pub struct TickOutcome {
    pub status: TickStatus,
    pub samples: Vec<LatencySample>,
}

impl TickOutcome {
    fn idle() -> Self {
        Self { status: TickStatus::Idle, samples: Vec::new() }
    }
}

/// The single-flow probe engine.
pub struct ProbeEngine<P, C> {
    cfg: ProbeConfig,
    port: P,
    clock: C,
    pool: BufferPool,
    template: PacketTemplate,
    assembler: Assembler,
    send_times: SendTimeTable,
    stats: RunStats,
    seq: u64,
    period_cycles: u64,
    prev_send_cycles: u64,
    state: EngineState,
}

impl<P: ProbePort, C: CycleClock> ProbeEngine<P, C> {
    /// Validate `cfg` and set up the run. No packets move until `begin()`.
    pub fn new(cfg: ProbeConfig, port: P, clock: C) -> Result<Self> {
        cfg.validate()?;
        let template = PacketTemplate::build(cfg.kind, cfg.frame_len)?;
        let assembler = Assembler::new(cfg.segment_plan(), cfg.split);
        let pool = BufferPool::new(cfg.pool_buffers, cfg.buf_capacity);
        let send_times = SendTimeTable::for_probe_count(cfg.probe_count);
        let stats = RunStats::new(cfg.warmup_ms);

        Ok(Self {
            cfg,
            port,
            clock,
            pool,
            template,
            assembler,
            send_times,
            stats,
            seq: 0,
            period_cycles: 0,
            prev_send_cycles: 0,
            state: EngineState::Idle,
        })
    }

    /// Arm the pacing timer and reset statistics; transitions to `Running`.
    pub fn begin(&mut self) {
        self.period_cycles = cycles_for_us(self.clock.hz(), self.cfg.interval_us);
        let now = self.clock.cycles();
        self.prev_send_cycles = now;
        self.seq = 0;
        self.send_times.clear();
        self.stats.reset(self.port.counters(), now);
        self.state = EngineState::Running;
        debug!(
            period_cycles = self.period_cycles,
            probe_count = self.cfg.probe_count,
            "probe engine armed"
        );
    }

    /// Run one cooperative tick: receive, pace, maybe send.
    pub fn tick(&mut self) -> TickOutcome {
        match self.state {
            EngineState::Running => {}
            EngineState::Idle => return TickOutcome::idle(),
            EngineState::Done => {
                return TickOutcome { status: TickStatus::Done, samples: Vec::new() }
            }
        }

        let mut samples = Vec::new();
        let mut received = 0;
        if self.cfg.direction.receives() {
            received = self.receive_phase(&mut samples);
        }

        if !self.cfg.direction.sends() {
            let status = if received > 0 { TickStatus::Active } else { TickStatus::Idle };
            return TickOutcome { status, samples };
        }

        // Pacing: compare cycle deltas, never sleep.
        let now = self.clock.cycles();
        if now.wrapping_sub(self.prev_send_cycles) < self.period_cycles {
            let status = if received > 0 { TickStatus::Active } else { TickStatus::Idle };
            return TickOutcome { status, samples };
        }
        self.prev_send_cycles = now;

        self.seq += 1;
        self.send_phase();

        // A cycle whose send was dropped still counts toward completion.
        if self.seq >= self.cfg.probe_count {
            self.state = EngineState::Done;
            return TickOutcome { status: TickStatus::Done, samples };
        }
        TickOutcome { status: TickStatus::Active, samples }
    }

    /// Final report. Terminal: the engine stays `Done` afterwards.
    pub fn end(&mut self) -> String {
        self.state = EngineState::Done;
        self.stats.render(
            self.port.counters(),
            self.cfg.queue,
            self.clock.cycles(),
            self.clock.hz(),
        )
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Post-run settle time before the final report is meaningful.
    pub fn settle_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.cfg.warmup_ms)
    }

    /// Drain one receive burst; returns how many packets were taken.
    fn receive_phase(&mut self, samples: &mut Vec<LatencySample>) -> usize {
        let packets = self.port.rx_burst(self.cfg.queue, self.cfg.rx_burst);
        let count = packets.len();
        for packet in packets {
            self.stats.stream.rx_packets += 1;
            if let Some(sample) = self.inspect_reply(&packet) {
                trace!(seq = sample.seq, micros = sample.micros, "echo reply matched");
                samples.push(sample);
            }
            // Freed regardless of match outcome.
            self.pool.free_packet(packet);
        }
        count
    }

    /// Classify one received packet; a matched reply yields a sample.
    ///
    /// Non-matching protocols and truncated or malformed packets are dropped
    /// without ceremony; checksum failures are counted.
    fn inspect_reply(&mut self, packet: &Packet) -> Option<LatencySample> {
        const HDR_LEN: usize = EthernetHeader::SIZE + Ipv4Header::SIZE + IcmpEchoHeader::SIZE;
        let mut hdr = [0u8; HDR_LEN];
        if packet.pkt_len() < HDR_LEN {
            return None;
        }
        packet.read_at(0, &mut hdr).ok()?;

        let ip_bytes = &hdr[EthernetHeader::SIZE..EthernetHeader::SIZE + Ipv4Header::SIZE];
        let ip = Ipv4Header::parse(ip_bytes)?;
        if ip.protocol != self.template.protocol() {
            return None;
        }
        if !Ipv4Header::checksum_ok(ip_bytes) {
            self.stats.stream.rx_bad_ip_csum += 1;
            return None;
        }
        if self.cfg.kind != ProbeKind::Echo {
            // Discard traffic has no reply to correlate.
            return None;
        }

        let icmp_bytes = &hdr[self.template.transport_offset()..];
        let icmp = IcmpEchoHeader::parse(icmp_bytes)?;
        if icmp.code != 0 {
            return None;
        }
        if !IcmpEchoHeader::checksum_ok(icmp_bytes) {
            self.stats.stream.rx_bad_l4_csum += 1;
            return None;
        }

        match self.send_times.lookup(icmp.seq) {
            Some(sent) => {
                let rtt = self.clock.cycles().saturating_sub(sent);
                Some(LatencySample::new(icmp.seq, rtt, self.clock.hz()))
            }
            None => {
                debug!(seq = icmp.seq, "reply sequence has no recorded send time");
                None
            }
        }
    }

    /// Stamp, assemble, and transmit one probe for the current sequence.
    fn send_phase(&mut self) {
        let seq = self.seq as u16;
        self.template.stamp_echo_sequence(seq);

        let profile = self.port.profile();
        let eth = EthernetHeader::ipv4(self.cfg.peer_mac, profile.mac);
        let packet = match self.assembler.assemble(&mut self.pool, &self.template, &eth, &profile)
        {
            Ok(packet) => packet,
            Err(err) => {
                // Pool exhaustion: count the drop, skip this cycle's send.
                debug!(seq, %err, "probe assembly failed");
                self.stats.stream.dropped += 1;
                return;
            }
        };

        // Recorded before the transmit attempt so a fast reply can always
        // find its send time.
        self.send_times.record(seq, self.clock.cycles());
        self.transmit(vec![packet]);
    }

    /// Offer packets to the device, retrying short sends per policy; the
    /// remainder is freed and counted as dropped.
    fn transmit(&mut self, packets: Vec<Packet>) {
        let offered = packets.len();
        let mut burst = self.port.tx_burst(self.cfg.queue, packets);
        let mut accepted = burst.accepted;
        let mut rejected = burst.rejected;

        if accepted < offered && self.cfg.retry.is_enabled() {
            let mut attempts = 0;
            while !rejected.is_empty() && attempts < self.cfg.retry.attempts {
                self.clock.delay_us(self.cfg.retry.delay_us);
                burst = self.port.tx_burst(self.cfg.queue, rejected);
                accepted += burst.accepted;
                rejected = burst.rejected;
                attempts += 1;
            }
        }

        self.stats.stream.tx_packets += accepted as u64;
        if !rejected.is_empty() {
            debug!(
                offered,
                accepted,
                dropped = rejected.len(),
                "device accepted a short burst"
            );
            self.stats.stream.dropped += rejected.len() as u64;
            for packet in rejected {
                self.pool.free_packet(packet);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Direction, RetryPolicy};
    use crate::test_utils::{echo_config, manual_engine};

    #[test]
    fn send_table_sentinel_means_no_sample() {
        let table = SendTimeTable::for_probe_count(10);
        for seq in [0u16, 1, 5, 15] {
            assert_eq!(table.lookup(seq), None);
        }
    }

    #[test]
    fn send_table_records_and_clears() {
        let mut table = SendTimeTable::for_probe_count(10);
        table.record(3, 12345);
        assert_eq!(table.lookup(3), Some(12345));
        // A zero timestamp is stored as 1, never as the sentinel.
        table.record(4, 0);
        assert_eq!(table.lookup(4), Some(1));
        table.clear();
        assert_eq!(table.lookup(3), None);
    }

    #[test]
    fn send_table_capacity_covers_the_run() {
        // Ten probes fit without any slot collision.
        let mut table = SendTimeTable::for_probe_count(10);
        for seq in 1..=10u16 {
            table.record(seq, u64::from(seq) * 100);
        }
        for seq in 1..=10u16 {
            assert_eq!(table.lookup(seq), Some(u64::from(seq) * 100));
        }
        // And the floor holds for tiny runs.
        let table = SendTimeTable::for_probe_count(1);
        assert_eq!(table.slots.len(), MIN_SEND_TABLE_SLOTS);
    }

    #[test]
    fn run_completes_after_exactly_the_configured_probes() {
        let mut engine = manual_engine(echo_config());
        engine.begin();
        assert_eq!(engine.state(), EngineState::Running);

        let mut done_seen = 0;
        let mut ticks = 0;
        while engine.state() != EngineState::Done && ticks < 10_000 {
            engine.clock.advance(1_000_000); // one pacing period per tick
            if engine.tick().status == TickStatus::Done {
                done_seen += 1;
            }
            ticks += 1;
        }

        assert_eq!(done_seen, 1);
        assert_eq!(engine.stats().stream.tx_packets, 10);
        assert_eq!(engine.port().transmitted_count(), 10);

        // Further ticks never produce an 11th probe.
        engine.clock.advance(10_000_000);
        let outcome = engine.tick();
        assert_eq!(outcome.status, TickStatus::Done);
        assert_eq!(engine.port().transmitted_count(), 10);
    }

    #[test]
    fn pacing_blocks_sends_between_periods() {
        let mut engine = manual_engine(echo_config());
        engine.begin();

        // No time elapsed: tick after tick without a send.
        for _ in 0..5 {
            assert_eq!(engine.tick().status, TickStatus::Idle);
        }
        assert_eq!(engine.stats().stream.tx_packets, 0);

        // Just under one period: still nothing.
        engine.clock.advance(999_999);
        assert_eq!(engine.tick().status, TickStatus::Idle);

        // Crossing the period releases exactly one probe.
        engine.clock.advance(1);
        assert_eq!(engine.tick().status, TickStatus::Active);
        assert_eq!(engine.stats().stream.tx_packets, 1);

        // And the very next tick is paced again.
        assert_eq!(engine.tick().status, TickStatus::Idle);
        assert_eq!(engine.stats().stream.tx_packets, 1);
    }

    #[test]
    fn matched_replies_yield_latency_samples() {
        let mut engine = manual_engine(echo_config());
        engine.begin();

        // Send probe 1.
        engine.clock.advance(1_000_000);
        assert_eq!(engine.tick().status, TickStatus::Active);

        // Echo it back 250us later.
        let sent = engine.port_mut().take_transmitted();
        assert_eq!(sent.len(), 1);
        for pkt in sent {
            engine.port_mut().inject_echo_reply(pkt);
        }
        engine.clock.advance(250);

        let outcome = engine.tick();
        assert_eq!(outcome.samples.len(), 1);
        let sample = &outcome.samples[0];
        assert_eq!(sample.seq, 1);
        assert_eq!(sample.cycles, 250);
        assert!((sample.micros - 250.0).abs() < f64::EPSILON);
        assert_eq!(engine.stats().stream.rx_packets, 1);
    }

    #[test]
    fn unmatched_sequence_yields_no_sample() {
        let mut engine = manual_engine(echo_config());
        engine.begin();

        engine.clock.advance(1_000_000);
        engine.tick();

        // Rewrite the reply's sequence to one that was never sent.
        let mut sent = engine.port_mut().take_transmitted();
        let mut pkt = sent.pop().unwrap();
        let mut icmp = crate::wire::IcmpEchoHeader::parse(&{
            let mut b = [0u8; 8];
            pkt.read_at(34, &mut b).unwrap();
            b
        })
        .unwrap();
        icmp.set_seq(9); // never sent
        pkt.write_at(34, &icmp.to_bytes()).unwrap();
        engine.port_mut().inject_echo_reply(pkt);

        let outcome = engine.tick();
        assert!(outcome.samples.is_empty());
        assert_eq!(engine.stats().stream.rx_packets, 1);
    }

    #[test]
    fn foreign_protocol_and_bad_checksums_are_counted_or_ignored() {
        let mut engine = manual_engine(echo_config());
        engine.begin();
        engine.clock.advance(1_000_000);
        engine.tick();

        let mut sent = engine.port_mut().take_transmitted();
        let mut pkt = sent.pop().unwrap();
        // Corrupt the IP header checksum field.
        pkt.write_at(24, &[0xde, 0xad]).unwrap();
        engine.port_mut().inject_rx(pkt);

        let outcome = engine.tick();
        assert!(outcome.samples.is_empty());
        assert_eq!(engine.stats().stream.rx_bad_ip_csum, 1);
    }

    #[test]
    fn pool_exhaustion_counts_drops_and_leaks_nothing() {
        let mut cfg = echo_config();
        cfg.pool_buffers = 2;
        let mut engine = manual_engine(cfg);
        engine.begin();

        // First two sends take both buffers (the capture port retains them).
        for _ in 0..2 {
            engine.clock.advance(1_000_000);
            engine.tick();
        }
        assert_eq!(engine.pool().available(), 0);
        assert_eq!(engine.stats().stream.dropped, 0);

        // Third send finds the pool empty.
        engine.clock.advance(1_000_000);
        engine.tick();
        assert_eq!(engine.stats().stream.dropped, 1);
        assert_eq!(engine.pool().available(), 0);
        assert_eq!(engine.stats().stream.tx_packets, 2);
    }

    #[test]
    fn short_sends_free_the_remainder_and_count_drops() {
        let mut engine = manual_engine(echo_config());
        engine.port_mut().set_accept_limit(0);
        engine.begin();

        engine.clock.advance(1_000_000);
        engine.tick();

        assert_eq!(engine.stats().stream.tx_packets, 0);
        assert_eq!(engine.stats().stream.dropped, 1);
        // The rejected packet's buffer came back to the pool.
        assert_eq!(engine.pool().available(), engine.pool().capacity());
    }

    #[test]
    fn retry_policy_recovers_short_sends() {
        let mut cfg = echo_config();
        cfg.retry = RetryPolicy { attempts: 3, delay_us: 1 };
        let mut engine = manual_engine(cfg);
        // Reject the first two attempts, accept the third.
        engine.port_mut().set_reject_next(2);
        engine.begin();

        engine.clock.advance(1_000_000);
        engine.tick();

        assert_eq!(engine.stats().stream.tx_packets, 1);
        assert_eq!(engine.stats().stream.dropped, 0);
    }

    #[test]
    fn receive_only_direction_never_sends() {
        let mut cfg = echo_config();
        cfg.direction = Direction::ReceiveOnly;
        let mut engine = manual_engine(cfg);
        engine.begin();

        for _ in 0..20 {
            engine.clock.advance(1_000_000);
            let outcome = engine.tick();
            assert_ne!(outcome.status, TickStatus::Done);
        }
        assert_eq!(engine.port().transmitted_count(), 0);
        assert_eq!(engine.stats().stream.tx_packets, 0);
    }

    #[test]
    fn tick_before_begin_is_a_noop() {
        let mut engine = manual_engine(echo_config());
        let outcome = engine.tick();
        assert_eq!(outcome.status, TickStatus::Idle);
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn end_renders_a_report() {
        let mut engine = manual_engine(echo_config());
        engine.begin();
        for _ in 0..3 {
            engine.clock.advance(1_000_000);
            engine.tick();
        }
        let report = engine.end();
        assert_eq!(engine.state(), EngineState::Done);
        assert!(report.contains("TX-packets: 3"));
        assert!(report.contains("Accumulated forward statistics"));
    }
}

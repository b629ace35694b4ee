//! Run statistics: accumulation, snapshots, and report rendering.
//!
//! `reset()` captures a device-counter baseline and zeroes the stream
//! counters; `render()` subtracts the baseline from live counters, excludes
//! the warm-up settle time from the elapsed window, and prints rate figures.
//! Elapsed time is clamped to one cycle so a report taken immediately after
//! reset can never divide by zero.

use std::fmt::Write as _;

use crate::clock::cycles_for_us;
use crate::port::PortCounters;

/// Per-stream software counters, owned and mutated by the forwarding loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Packets drained from the receive queue.
    pub rx_packets: u64,
    /// Packets the device accepted for transmit.
    pub tx_packets: u64,
    /// Packets dropped: failed assembly or short sends.
    pub dropped: u64,
    /// Received packets whose IP header checksum did not verify.
    pub rx_bad_ip_csum: u64,
    /// Received packets whose transport checksum did not verify.
    pub rx_bad_l4_csum: u64,
}

impl StreamStats {
    pub fn reset(&mut self) {
        *self = StreamStats::default();
    }
}

/// Device-counter baseline captured at reset time.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortSnapshot {
    baseline: PortCounters,
    at_cycles: u64,
}

impl PortSnapshot {
    pub fn capture(counters: PortCounters, now: u64) -> Self {
        Self { baseline: counters, at_cycles: now }
    }

    /// Run-relative counters.
    pub fn relative(&self, live: PortCounters) -> PortCounters {
        live.since(&self.baseline)
    }

    pub fn at_cycles(&self) -> u64 {
        self.at_cycles
    }
}

/// The statistics state for one run: stream counters plus the port baseline.
#[derive(Debug, Default)]
pub struct RunStats {
    pub stream: StreamStats,
    snapshot: PortSnapshot,
    warmup_ms: u64,
}

impl RunStats {
    pub fn new(warmup_ms: u64) -> Self {
        Self { stream: StreamStats::default(), snapshot: PortSnapshot::default(), warmup_ms }
    }

    /// Capture a fresh baseline and zero all stream counters.
    pub fn reset(&mut self, counters: PortCounters, now: u64) {
        self.snapshot = PortSnapshot::capture(counters, now);
        self.stream.reset();
    }

    /// Cycles elapsed since reset, with the warm-up settle time excluded and
    /// a floor of one cycle.
    pub fn elapsed_cycles(&self, now: u64, hz: u64) -> u64 {
        let warmup = cycles_for_us(hz, self.warmup_ms.saturating_mul(1_000));
        now.saturating_sub(self.snapshot.at_cycles)
            .saturating_sub(warmup)
            .max(1)
    }

    fn pps(count: u64, elapsed: u64, hz: u64) -> f64 {
        count as f64 / elapsed as f64 * hz as f64
    }

    /// Full bordered report against live device counters.
    pub fn render(&self, live: PortCounters, port_id: u16, now: u64, hz: u64) -> String {
        let border = "----------------------";
        let acc_border = "+++++++++++++++";
        let rel = self.snapshot.relative(live);
        let elapsed = self.elapsed_cycles(now, hz);
        let s = &self.stream;

        let mut out = String::new();
        let _ = writeln!(out, "  {border} Forward statistics for port {port_id:<2} {border}");
        let _ = writeln!(
            out,
            "  RX-packets: {:<14} RX-dropped: {:<14} RX-total: {}",
            rel.ipackets,
            rel.imissed,
            rel.ipackets + rel.imissed
        );
        if s.rx_bad_ip_csum + s.rx_bad_l4_csum > 0 {
            let _ = writeln!(
                out,
                "  Bad-ipcsum: {:<14} Bad-l4csum: {}",
                s.rx_bad_ip_csum, s.rx_bad_l4_csum
            );
        }
        if rel.ierrors + rel.rx_nombuf > 0 {
            let _ = writeln!(out, "  RX-error: {}", rel.ierrors);
            let _ = writeln!(out, "  RX-nombufs: {:<14}", rel.rx_nombuf);
        }
        let _ = writeln!(
            out,
            "  TX-packets: {:<14} TX-dropped: {:<14} TX-total: {}",
            s.tx_packets,
            s.dropped,
            s.tx_packets + s.dropped
        );
        let _ = writeln!(
            out,
            "  RX-PPS: {:<19.2} TX-PPS: {:<14.2}",
            Self::pps(rel.ipackets, elapsed, hz),
            Self::pps(s.tx_packets, elapsed, hz)
        );
        let _ = writeln!(out, "  {border}--------------------------------{border}");

        let total_rx_dropped = rel.imissed;
        let total_tx_dropped = s.dropped + rel.oerrors;
        let _ = writeln!(
            out,
            "  {acc_border} Accumulated forward statistics for all ports {acc_border}"
        );
        let _ = writeln!(
            out,
            "  RX-packets: {:<14} RX-dropped: {:<14} RX-total: {}",
            rel.ipackets,
            total_rx_dropped,
            rel.ipackets + total_rx_dropped
        );
        let _ = writeln!(
            out,
            "  TX-packets: {:<14} TX-dropped: {:<14} TX-total: {}",
            rel.opackets,
            total_tx_dropped,
            rel.opackets + total_tx_dropped
        );
        if rel.rx_nombuf > 0 {
            let _ = writeln!(out, "  RX-nombufs: {:<14}", rel.rx_nombuf);
        }
        let _ = writeln!(
            out,
            "  {acc_border}++++++++++++++++++++++++++++++++++++++++++++++{acc_border}"
        );
        out
    }

    /// One-line rate summary.
    pub fn render_brief(&self, live: PortCounters, port_id: u16, now: u64, hz: u64) -> String {
        let rel = self.snapshot.relative(live);
        let elapsed = self.elapsed_cycles(now, hz);
        format!(
            "port {port_id}: tx-pps: {:<14.2}\nall: tx-pps: {:<14.2}\n",
            Self::pps(self.stream.tx_packets, elapsed, hz),
            Self::pps(rel.opackets, elapsed, hz)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live() -> PortCounters {
        PortCounters {
            ipackets: 110,
            opackets: 110,
            ibytes: 7040,
            obytes: 7040,
            ..Default::default()
        }
    }

    fn baseline() -> PortCounters {
        PortCounters { ipackets: 100, opackets: 100, ibytes: 6400, obytes: 6400, ..Default::default() }
    }

    #[test]
    fn reset_zeroes_stream_and_rebases_counters() {
        let mut stats = RunStats::new(0);
        stats.stream.tx_packets = 5;
        stats.stream.dropped = 2;

        stats.reset(baseline(), 1_000);
        assert_eq!(stats.stream, StreamStats::default());

        let rel = stats.snapshot.relative(live());
        assert_eq!(rel.ipackets, 10);
        assert_eq!(rel.opackets, 10);
    }

    #[test]
    fn elapsed_is_clamped_to_one_cycle() {
        let mut stats = RunStats::new(1_000);
        stats.reset(PortCounters::default(), 500);
        // Report taken at reset time, before the warm-up window has passed.
        assert_eq!(stats.elapsed_cycles(500, 1_000_000_000), 1);
        // And even "before" reset (counter quirk) stays clamped.
        assert_eq!(stats.elapsed_cycles(0, 1_000_000_000), 1);
    }

    #[test]
    fn zero_elapsed_render_has_no_nan_or_panic() {
        let mut stats = RunStats::new(0);
        stats.reset(PortCounters::default(), 100);
        stats.stream.tx_packets = 10;

        let report = stats.render(PortCounters::default(), 0, 100, 1_000_000_000);
        assert!(!report.contains("NaN"));
        assert!(!report.contains("inf"));
        assert!(report.contains("TX-packets: 10"));
    }

    #[test]
    fn rates_are_elapsed_normalized() {
        let mut stats = RunStats::new(0);
        stats.reset(baseline(), 0);
        stats.stream.tx_packets = 10;

        // 10 packets over 2 seconds at 1 GHz.
        let now = 2_000_000_000;
        let report = stats.render(live(), 0, now, 1_000_000_000);
        assert!(report.contains("TX-PPS: 5.00"), "report was:\n{report}");
        assert!(report.contains("RX-PPS: 5.00"), "report was:\n{report}");
    }

    #[test]
    fn quiet_reports_omit_error_sections() {
        let mut stats = RunStats::new(0);
        stats.reset(PortCounters::default(), 0);
        let report = stats.render(PortCounters::default(), 0, 10, 1_000);
        assert!(!report.contains("RX-error"));
        assert!(!report.contains("Bad-ipcsum"));
        assert!(!report.contains("RX-nombufs"));
    }

    #[test]
    fn brief_render_reports_tx_pps() {
        let mut stats = RunStats::new(0);
        stats.reset(baseline(), 0);
        stats.stream.tx_packets = 20;
        let brief = stats.render_brief(live(), 3, 2_000_000_000, 1_000_000_000);
        assert!(brief.starts_with("port 3: tx-pps: 10.00"));
    }
}

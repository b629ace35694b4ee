//! Single-flow traffic generator and echo-latency probe.
//!
//! Wireprobe builds synthetic Ethernet/IPv4/ICMP (or UDP) frames from a
//! per-run template, paces them onto a port against a raw cycle counter,
//! matches echo replies back to their probes by sequence number, and reports
//! throughput and round-trip latency.
//!
//! # Features
//!
//! - **Paced sending**: cycle-counter pacing, never timer sleeps
//! - **Multi-segment frames**: scattered packets over a pooled segment chain
//! - **Latency correlation**: sequence-indexed send times, per-reply samples
//! - **Run statistics**: baseline-relative device counters and PPS rates
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use wireprobe::{LoopbackPort, ProbeConfig, Wireprobe};
//!
//! #[tokio::main]
//! async fn main() -> wireprobe::Result<()> {
//!     let peer = "aa:bb:cc:dd:ee:ff".parse()?;
//!     let port = LoopbackPort::echo("02:00:00:00:00:01".parse()?);
//!
//!     let mut run = Wireprobe::launch(ProbeConfig::echo(peer), port)?;
//!     while let Some(sample) = run.samples.recv().await {
//!         println!("rtt: {:.2}us (seq {})", sample.micros, sample.seq);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Real NIC backends implement [`ProbePort`]; the bundled [`LoopbackPort`]
//! is a software echo peer for tests and demos.

// Core types and error handling
mod error;
pub mod clock;
pub mod config;
pub mod packet;
pub mod pool;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod wire;

// Packet construction
pub mod assemble;
pub mod template;

// Forwarding loop and run management
pub mod driver;
pub mod engine;
pub mod port;
pub mod ports;
pub mod stats;
pub mod stream;

// Core exports
pub use error::*;

pub use clock::{CycleClock, SystemClock};
pub use config::{Direction, ProbeConfig, ProbeKind, RetryPolicy, SplitMode};
pub use packet::{Packet, PktFlags, Segment, MAX_SEGS_PER_PACKET};
pub use pool::BufferPool;
pub use wire::MacAddr;

// Construction exports
pub use assemble::Assembler;
pub use template::PacketTemplate;

// Run exports
pub use driver::{Driver, ProbeChannels};
pub use engine::{EngineState, LatencySample, ProbeEngine, TickOutcome, TickStatus};
pub use port::{PortCounters, PortProfile, ProbePort, TxBurst, TxOffloadCaps};
pub use ports::LoopbackPort;
pub use stats::{PortSnapshot, RunStats, StreamStats};
pub use stream::{sample_stream, LatencySummary, Summarize, SummarizeExt};

/// Unified entry point for probe runs.
///
/// Wires a validated configuration, a port, and the system cycle clock into
/// an engine, and hands the run to the [`Driver`]. Must be called within a
/// tokio runtime.
///
/// # Example
///
/// ```rust,no_run
/// use wireprobe::{LoopbackPort, ProbeConfig, Wireprobe};
///
/// # #[tokio::main]
/// # async fn main() -> wireprobe::Result<()> {
/// let config = ProbeConfig::echo("aa:bb:cc:dd:ee:ff".parse()?);
/// let run = Wireprobe::launch(config, LoopbackPort::echo("02:00:00:00:00:01".parse()?))?;
/// # Ok(())
/// # }
/// ```
pub struct Wireprobe;

impl Wireprobe {
    /// Validate `config` and launch the probe run against `port`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is inconsistent or the frame
    /// length cannot hold the required headers.
    pub fn launch<P>(config: ProbeConfig, port: P) -> Result<ProbeChannels>
    where
        P: ProbePort + Send + 'static,
    {
        let engine = ProbeEngine::new(config, port, SystemClock::new())?;
        Ok(Driver::spawn(engine))
    }
}

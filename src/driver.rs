//! Driver spawns and supervises the probe run.
//!
//! The engine's tick loop is a tight cooperative poll, so it runs on a
//! blocking task that it owns outright; results come back over channels.
//! Latency samples stream out as they are matched, the final statistics
//! report lands in a watch channel, and a [`CancellationToken`] — checked
//! once per tick boundary — is the external stop request.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::clock::CycleClock;
use crate::engine::{LatencySample, ProbeEngine, TickStatus};
use crate::port::ProbePort;

/// Handles to a running probe.
pub struct ProbeChannels {
    /// Matched echo replies, in arrival order.
    pub samples: mpsc::UnboundedReceiver<LatencySample>,
    /// The final statistics report; `None` until the run finishes.
    pub report: watch::Receiver<Option<Arc<String>>>,
    /// Cooperative stop request for the run.
    pub cancel: CancellationToken,
}

/// Spawns and manages the forwarding-loop task.
pub struct Driver;

impl Driver {
    /// Launch `engine` on a blocking task. Must be called within a tokio
    /// runtime.
    ///
    /// The run ends when the engine completes its configured probe count or
    /// the returned token is cancelled; either way the final report is
    /// published before the task exits.
    pub fn spawn<P, C>(mut engine: ProbeEngine<P, C>) -> ProbeChannels
    where
        P: ProbePort + Send + 'static,
        C: CycleClock + Send + 'static,
    {
        let (sample_tx, sample_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let cancel_loop = cancel.clone();

        tokio::task::spawn_blocking(move || {
            engine.begin();
            info!("probe run started");

            loop {
                if cancel_loop.is_cancelled() {
                    debug!("probe run cancelled");
                    break;
                }
                let outcome = engine.tick();
                for sample in outcome.samples {
                    trace!(seq = sample.seq, micros = sample.micros, "latency sample");
                    // A dropped receiver is fine; the run still finishes for
                    // the report.
                    let _ = sample_tx.send(sample);
                }
                match outcome.status {
                    TickStatus::Done => break,
                    TickStatus::Idle => std::hint::spin_loop(),
                    TickStatus::Active => {}
                }
            }

            if !cancel_loop.is_cancelled() {
                // Let the device drain in-flight packets before the final
                // counter read.
                std::thread::sleep(engine.settle_delay());
            }

            let report = engine.end();
            info!("probe run finished\n{report}");
            let _ = report_tx.send(Some(Arc::new(report)));
        });

        ProbeChannels { samples: sample_rx, report: report_rx, cancel }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::ProbeConfig;
    use crate::ports::LoopbackPort;
    use crate::test_utils::{peer_mac, port_mac};
    use std::time::Duration;

    fn fast_config(probes: u64) -> ProbeConfig {
        let mut cfg = ProbeConfig::echo(peer_mac());
        cfg.interval_us = 100;
        cfg.probe_count = probes;
        cfg.warmup_ms = 0;
        cfg
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_completes_and_publishes_a_report() {
        let engine =
            ProbeEngine::new(fast_config(3), LoopbackPort::echo(port_mac()), SystemClock::new())
                .unwrap();
        let mut channels = Driver::spawn(engine);

        tokio::time::timeout(Duration::from_secs(5), channels.report.changed())
            .await
            .expect("run should finish promptly")
            .expect("report sender must not drop early");

        let report = channels.report.borrow().clone().expect("report present");
        assert!(report.contains("TX-packets: 3"), "report was:\n{report}");

        // Replies to all but the final probe are collected before the run
        // ends; the loopback answers instantly, so expect at least two.
        let mut samples = Vec::new();
        while let Ok(sample) = channels.samples.try_recv() {
            samples.push(sample);
        }
        assert!(samples.len() >= 2, "got {} samples", samples.len());
        assert!(samples.iter().all(|s| s.micros >= 0.0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancellation_stops_an_endless_run() {
        // A run long enough to outlive the test unless cancelled.
        let engine = ProbeEngine::new(
            fast_config(60_000),
            LoopbackPort::echo(port_mac()),
            SystemClock::new(),
        )
        .unwrap();
        let mut channels = Driver::spawn(engine);

        tokio::time::sleep(Duration::from_millis(20)).await;
        channels.cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), channels.report.changed())
            .await
            .expect("cancelled run must still report")
            .expect("report sender must not drop early");
        assert!(channels.report.borrow().is_some());
    }
}

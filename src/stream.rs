//! Latency sample streams.
//!
//! Adapters for consuming a run's [`LatencySample`] channel as a `Stream`,
//! plus a windowed summarizer for display consumers that want per-interval
//! aggregates instead of every individual sample.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{ready, Stream};
use pin_project_lite::pin_project;
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::engine::LatencySample;

/// View a run's sample channel as a `Stream`.
pub fn sample_stream(
    samples: mpsc::UnboundedReceiver<LatencySample>,
) -> UnboundedReceiverStream<LatencySample> {
    UnboundedReceiverStream::new(samples)
}

/// Aggregate of the samples that arrived within one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    pub count: u64,
    pub min_us: f64,
    pub max_us: f64,
    pub mean_us: f64,
}

#[derive(Debug, Default)]
struct WindowAccum {
    count: u64,
    sum_us: f64,
    min_us: f64,
    max_us: f64,
}

impl WindowAccum {
    fn push(&mut self, sample: &LatencySample) {
        if self.count == 0 {
            self.min_us = sample.micros;
            self.max_us = sample.micros;
        } else {
            self.min_us = self.min_us.min(sample.micros);
            self.max_us = self.max_us.max(sample.micros);
        }
        self.count += 1;
        self.sum_us += sample.micros;
    }

    fn take(&mut self) -> Option<LatencySummary> {
        if self.count == 0 {
            return None;
        }
        let summary = LatencySummary {
            count: self.count,
            min_us: self.min_us,
            max_us: self.max_us,
            mean_us: self.sum_us / self.count as f64,
        };
        *self = WindowAccum::default();
        Some(summary)
    }
}

/// Extension trait adding windowed summarization to sample streams.
pub trait SummarizeExt: Stream<Item = LatencySample> {
    /// Emit one [`LatencySummary`] per `window` in which samples arrived.
    ///
    /// Empty windows emit nothing; a final partial window is flushed when
    /// the source ends.
    fn summarize(self, window: Duration) -> Summarize<Self>
    where
        Self: Sized,
    {
        Summarize::new(self, window)
    }
}

impl<S: Stream<Item = LatencySample>> SummarizeExt for S {}

pin_project! {
    /// Stream combinator that folds samples into per-window summaries.
    pub struct Summarize<S> {
        #[pin]
        stream: S,
        interval: Interval,
        accum: WindowAccum,
        source_done: bool,
    }
}

impl<S> Summarize<S> {
    fn new(stream: S, window: Duration) -> Self {
        let mut interval = interval(window);
        // Late windows should not burst.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { stream, interval, accum: WindowAccum::default(), source_done: false }
    }
}

impl<S: Stream<Item = LatencySample>> Stream for Summarize<S> {
    type Item = LatencySummary;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if *this.source_done {
                return Poll::Ready(this.accum.take());
            }

            ready!(this.interval.poll_tick(cx));

            // Fold in everything that arrived during the window.
            loop {
                match this.stream.as_mut().poll_next(cx) {
                    Poll::Ready(Some(sample)) => this.accum.push(&sample),
                    Poll::Ready(None) => {
                        *this.source_done = true;
                        break;
                    }
                    Poll::Pending => break,
                }
            }

            if let Some(summary) = this.accum.take() {
                return Poll::Ready(Some(summary));
            }
            if *this.source_done {
                return Poll::Ready(None);
            }
            // Empty window: wait out the next tick.
        }
    }
}

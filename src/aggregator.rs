use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::event::OutcomeEvent;
use crate::sink::{msec, MetricsSink};
use crate::stats::{Snapshot, StatisticsWindow};

/// Single consumer of every prober's outcomes.
///
/// Owns one window per target. Events and flushes are serialized through
/// `run`, so windows are never shared and need no locking.
#[derive(Debug)]
pub struct Aggregator<S> {
    windows: BTreeMap<Arc<str>, StatisticsWindow>,
    resolution: Duration,
    sink: S,
}

impl<S: MetricsSink> Aggregator<S> {
    pub fn new(targets: impl IntoIterator<Item = Arc<str>>, resolution: Duration, sink: S) -> Self {
        Self {
            windows: targets
                .into_iter()
                .map(|target| (target, StatisticsWindow::new()))
                .collect(),
            resolution,
            sink,
        }
    }

    pub fn record(&mut self, event: OutcomeEvent) {
        if !self.windows.contains_key(&event.target) {
            debug!("{}: first event from unconfigured target", event.target);
        }
        self.windows
            .entry(event.target)
            .or_default()
            .record(event.outcome);
    }

    /// Publishes every window and starts new ones.
    pub fn flush(&mut self) {
        for (target, window) in self.windows.iter_mut() {
            let snapshot = window.flush();
            log_snapshot(target, &snapshot);
            self.sink.publish(target, &snapshot);
        }
    }

    pub fn window(&self, target: &str) -> Option<&StatisticsWindow> {
        self.windows.get(target)
    }

    /// Consumes events until every sender is gone, flushing once per
    /// resolution period. A tick that coincides with an event is handled
    /// first, so that event lands in the next window.
    pub async fn run(mut self, mut events: mpsc::Receiver<OutcomeEvent>) {
        let mut ticker = interval_at(Instant::now() + self.resolution, self.resolution);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = ticker.tick() => self.flush(),
                event = events.recv() => match event {
                    Some(event) => self.record(event),
                    None => {
                        debug!("all probers stopped, publishing final window");
                        self.flush();
                        return;
                    }
                },
            }
        }
    }
}

fn log_snapshot(target: &str, snapshot: &Snapshot) {
    let rtt = |d: Option<Duration>| d.map(msec).unwrap_or(0.0);
    info!(
        "{}: dropped_packets={} total_packets={} duplicate_packets={} loss={:.2} \
         rtt_min_msec={:.3} rtt_avg_msec={:.3} rtt_max_msec={:.3} rtt_stddev_msec={:.3}",
        target,
        snapshot.dropped,
        snapshot.sent,
        snapshot.duplicates,
        snapshot.loss,
        rtt(snapshot.min),
        rtt(snapshot.avg),
        rtt(snapshot.max),
        rtt(snapshot.stddev),
    );
}

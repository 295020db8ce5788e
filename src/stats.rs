use std::time::Duration;

use crate::event::Outcome;

/// Running statistics for one target over one window.
///
/// Memory use is constant: the mean comes from an exact nanosecond sum
/// divided at snapshot time, the spread from Welford's accumulator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatisticsWindow {
    sent: u64,
    received: u64,
    duplicates: u64,
    min: Option<Duration>,
    max: Option<Duration>,
    sum_nanos: u128,
    mean_nanos: f64,
    m2: f64,
}

/// Frozen view of a window at flush time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub sent: u64,
    pub received: u64,
    pub dropped: u64,
    pub duplicates: u64,
    /// `dropped / sent`, 0 for an empty window.
    pub loss: f64,
    pub min: Option<Duration>,
    pub avg: Option<Duration>,
    pub max: Option<Duration>,
    /// Population standard deviation of the round-trip times.
    pub stddev: Option<Duration>,
}

impl StatisticsWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Delivered(rtt) => {
                self.sent += 1;
                self.received += 1;
                self.add_sample(rtt);
            }
            Outcome::Dropped => self.sent += 1,
            Outcome::DuplicateReply => self.duplicates += 1,
        }
    }

    fn add_sample(&mut self, rtt: Duration) {
        self.min = Some(self.min.map_or(rtt, |min| min.min(rtt)));
        self.max = Some(self.max.map_or(rtt, |max| max.max(rtt)));
        self.sum_nanos += rtt.as_nanos();

        let x = rtt.as_nanos() as f64;
        let delta = x - self.mean_nanos;
        self.mean_nanos += delta / self.received as f64;
        self.m2 += delta * (x - self.mean_nanos);
    }

    pub fn snapshot(&self) -> Snapshot {
        let dropped = self.sent - self.received;
        let loss = if self.sent == 0 {
            0.0
        } else {
            dropped as f64 / self.sent as f64
        };
        let (avg, stddev) = if self.received == 0 {
            (None, None)
        } else {
            let avg = nanos(self.sum_nanos / u128::from(self.received));
            let variance = self.m2 / self.received as f64;
            (Some(avg), Some(Duration::from_nanos(variance.sqrt().round() as u64)))
        };
        Snapshot {
            sent: self.sent,
            received: self.received,
            dropped,
            duplicates: self.duplicates,
            loss,
            min: self.min,
            avg,
            max: self.max,
            stddev,
        }
    }

    /// Returns the current snapshot and starts a fresh window.
    pub fn flush(&mut self) -> Snapshot {
        let snapshot = self.snapshot();
        *self = Self::new();
        snapshot
    }
}

fn nanos(n: u128) -> Duration {
    Duration::from_nanos(u64::try_from(n).unwrap_or(u64::MAX))
}

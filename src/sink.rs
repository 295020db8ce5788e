use std::time::Duration;

use prometheus::{GaugeVec, Opts, Registry};

use crate::error::Result;
use crate::stats::Snapshot;

const NAMESPACE: &str = "networkloss";
const TARGET_LABEL: &str = "monitor_target";

/// Receives one finalized snapshot per target at every window boundary.
pub trait MetricsSink: Send {
    fn publish(&self, target: &str, snapshot: &Snapshot);
}

impl<F> MetricsSink for F
where
    F: Fn(&str, &Snapshot) + Send,
{
    fn publish(&self, target: &str, snapshot: &Snapshot) {
        self(target, snapshot)
    }
}

/// Exposes snapshots as gauges labelled by target.
#[derive(Debug, Clone)]
pub struct PrometheusSink {
    total: GaugeVec,
    received: GaugeVec,
    dropped: GaugeVec,
    duplicates: GaugeVec,
    loss: GaugeVec,
    rtt_min: GaugeVec,
    rtt_avg: GaugeVec,
    rtt_max: GaugeVec,
    rtt_stddev: GaugeVec,
}

impl PrometheusSink {
    pub fn register(registry: &Registry) -> Result<Self> {
        let gauge = |name: &str, help: &str| -> Result<GaugeVec> {
            let gauge = GaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), &[TARGET_LABEL])?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };

        Ok(Self {
            total: gauge("total_packets", "Number of transmitted packets")?,
            received: gauge("received_packets", "Number of answered packets")?,
            dropped: gauge("dropped_packets", "Number of unanswered packets")?,
            duplicates: gauge("duplicate_packets", "Number of duplicate replies")?,
            loss: gauge("loss_percentage", "0.0 - 1.0 ratio of dropped packets")?,
            rtt_min: gauge("rtt_min_msec", "Minimum observed round trip time")?,
            rtt_avg: gauge("rtt_avg_msec", "Average observed round trip time")?,
            rtt_max: gauge("rtt_max_msec", "Maximum observed round trip time")?,
            rtt_stddev: gauge(
                "rtt_stddev_msec",
                "Standard deviation of observed round trip times",
            )?,
        })
    }
}

impl MetricsSink for PrometheusSink {
    fn publish(&self, target: &str, snapshot: &Snapshot) {
        let labels = [target];
        self.total
            .with_label_values(&labels)
            .set(snapshot.sent as f64);
        self.received
            .with_label_values(&labels)
            .set(snapshot.received as f64);
        self.dropped
            .with_label_values(&labels)
            .set(snapshot.dropped as f64);
        self.duplicates
            .with_label_values(&labels)
            .set(snapshot.duplicates as f64);
        self.loss.with_label_values(&labels).set(snapshot.loss);

        set_or_remove(&self.rtt_min, target, snapshot.min);
        set_or_remove(&self.rtt_avg, target, snapshot.avg);
        set_or_remove(&self.rtt_max, target, snapshot.max);
        set_or_remove(&self.rtt_stddev, target, snapshot.stddev);
    }
}

// A window without replies has no latency; drop the series rather than
// reporting 0ms.
fn set_or_remove(gauge: &GaugeVec, target: &str, value: Option<Duration>) {
    match value {
        Some(value) => gauge.with_label_values(&[target]).set(msec(value)),
        None => {
            let _ = gauge.remove_label_values(&[target]);
        }
    }
}

pub(crate) fn msec(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

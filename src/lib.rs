pub mod aggregator;
pub mod config;
pub mod correlate;
pub mod error;
pub mod event;
pub mod packet;
pub mod prober;
pub mod server;
pub mod sink;
pub mod socket;
pub mod stats;
pub mod target;
pub mod transport;

#[cfg(unix)]
#[path = "sys/unix.rs"]
mod sys;

pub use aggregator::Aggregator;
pub use config::Config;
pub use error::{Error, Result};
pub use event::{Outcome, OutcomeEvent};
pub use prober::{Prober, ProberConfig};
pub use sink::{MetricsSink, PrometheusSink};
pub use stats::{Snapshot, StatisticsWindow};
pub use target::Target;

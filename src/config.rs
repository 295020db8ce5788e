use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::packet::ECHO_HEADER_LEN;
use crate::prober::ProberConfig;
use crate::socket::SocketKind;

/// Environment variable naming the JSON configuration file.
pub const CONFIG_ENV: &str = "NETLOSS_CONFIG";

// IPv6 header plus echo header within a 1500 byte MTU.
const MAX_PAYLOAD_SIZE: usize = 1500 - 40 - ECHO_HEADER_LEN;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Hosts to probe, names or IP literals.
    pub targets: Vec<String>,
    /// Pause before each echo request.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// How long to wait for a reply, measured from the send.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Length of one statistics window.
    #[serde(with = "humantime_serde")]
    pub resolution: Duration,
    /// Address of the metrics endpoint.
    pub listen: SocketAddr,
    pub socket: SocketKind,
    pub payload_size: usize,
    pub ttl: Option<u32>,
    /// Capacity of the outcome queue shared by all probers.
    pub queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            targets: vec!["1.0.0.1".to_string()],
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(1),
            resolution: Duration::from_secs(30),
            listen: SocketAddr::from(([127, 0, 0, 1], 9321)),
            socket: SocketKind::default(),
            payload_size: 56,
            ttl: None,
            queue_capacity: 100,
        }
    }
}

impl Config {
    /// Reads the file named by `NETLOSS_CONFIG`, or falls back to the
    /// defaults when it is unset.
    pub fn load() -> Result<Self> {
        match env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(path),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(Error::Config("no targets configured".to_string()));
        }
        if let Some(target) = self.targets.iter().find(|t| t.trim().is_empty()) {
            return Err(Error::Config(format!("invalid target {:?}", target)));
        }
        for (name, value) in [
            ("interval", self.interval),
            ("timeout", self.timeout),
            ("resolution", self.resolution),
        ] {
            if value.is_zero() {
                return Err(Error::Config(format!("{} must be greater than zero", name)));
            }
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be greater than zero".to_string()));
        }
        if self.payload_size > MAX_PAYLOAD_SIZE {
            return Err(Error::Config(format!(
                "payload_size {} exceeds {}",
                self.payload_size, MAX_PAYLOAD_SIZE
            )));
        }
        if self.ttl == Some(0) || self.ttl.map_or(false, |ttl| ttl > 255) {
            return Err(Error::Config("ttl must be between 1 and 255".to_string()));
        }
        Ok(())
    }

    pub fn prober(&self) -> ProberConfig {
        ProberConfig {
            interval: self.interval,
            timeout: self.timeout,
            payload_size: self.payload_size,
        }
    }
}

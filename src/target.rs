use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use tokio::net;

use crate::error::{Error, Result};

/// A monitored host: the configured name plus the address it resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    name: Arc<str>,
    addr: IpAddr,
}

impl Target {
    pub fn new(name: impl Into<Arc<str>>, addr: IpAddr) -> Self {
        Self {
            name: name.into(),
            addr,
        }
    }

    /// Resolves `host` once. IP literals skip the resolver; names go through
    /// tokio's resolver so the lookup does not block a runtime worker.
    pub async fn resolve(host: &str) -> Result<Self> {
        if let Ok(addr) = host.parse::<IpAddr>() {
            return Ok(Self::new(host, addr));
        }
        let addr = net::lookup_host((host, 0))
            .await
            .map_err(|source| Error::Resolve {
                host: host.to_string(),
                source,
            })?
            .next()
            .ok_or_else(|| Error::HostError {
                host: host.to_string(),
            })?;
        Ok(Self::new(host, addr.ip()))
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.as_ref() == self.addr.to_string() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} ({})", self.name, self.addr)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn literal_addresses_resolve_to_themselves() {
        let target = Target::resolve("1.0.0.1").await.unwrap();
        assert_eq!(target.name().as_ref(), "1.0.0.1");
        assert_eq!(target.addr(), "1.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(target.to_string(), "1.0.0.1");

        let target = Target::resolve("2606:4700:4700::1001").await.unwrap();
        assert!(target.addr().is_ipv6());
    }

    #[tokio::test]
    async fn localhost_resolves() {
        let target = Target::resolve("localhost").await.unwrap();
        assert!(target.addr().is_loopback());
        assert!(target.to_string().starts_with("localhost ("));
    }

    #[tokio::test]
    async fn unresolvable_host_is_an_error() {
        assert!(Target::resolve("no-such-host.invalid").await.is_err());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn names_resolve_on_a_single_threaded_runtime() {
        let (a, b) = tokio::join!(Target::resolve("localhost"), Target::resolve("127.0.0.1"));
        assert!(a.unwrap().addr().is_loopback());
        assert_eq!(b.unwrap().addr(), IpAddr::from([127, 0, 0, 1]));
    }
}

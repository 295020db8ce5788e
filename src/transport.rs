use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};

use crate::socket::{AsyncSocket, RawSocket, SocketKind};

/// Datagram I/O as seen by a prober.
///
/// Implementations never impose their own deadlines, the prober bounds
/// every call.
pub trait Transport: Send + Sync {
    fn kind(&self) -> SocketKind;

    fn send_to(&self, packet: &[u8], dst: IpAddr) -> impl Future<Output = io::Result<usize>> + Send;

    /// Reads one datagram and reports who sent it.
    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, IpAddr)>> + Send;

    /// Replaces the underlying socket with a fresh one.
    fn reopen(&mut self) -> io::Result<()>;
}

/// ICMP socket for one address family.
#[derive(Debug)]
pub struct IcmpSocket {
    sock: AsyncSocket,
    v6: bool,
    kind: SocketKind,
    ttl: Option<u32>,
}

impl IcmpSocket {
    pub fn open(peer: IpAddr, kind: SocketKind, ttl: Option<u32>) -> io::Result<Self> {
        let v6 = peer.is_ipv6();
        Ok(Self {
            sock: open_socket(v6, kind, ttl)?,
            v6,
            kind,
            ttl,
        })
    }
}

fn open_socket(v6: bool, kind: SocketKind, ttl: Option<u32>) -> io::Result<AsyncSocket> {
    let sock = RawSocket::open(v6, kind)?;
    if let Some(ttl) = ttl {
        sock.set_ttl(v6, ttl)?;
    }
    AsyncSocket::new(sock)
}

impl Transport for IcmpSocket {
    fn kind(&self) -> SocketKind {
        self.kind
    }

    async fn send_to(&self, packet: &[u8], dst: IpAddr) -> io::Result<usize> {
        self.sock.send_to(packet, &SocketAddr::new(dst, 0)).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, IpAddr)> {
        loop {
            match self.sock.recv_from(buf).await? {
                (n, Some(src)) => return Ok((n, src)),
                (_, None) => log::debug!("dropping datagram without a source address"),
            }
        }
    }

    fn reopen(&mut self) -> io::Result<()> {
        self.sock = open_socket(self.v6, self.kind, self.ttl)?;
        Ok(())
    }
}

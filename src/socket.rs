use std::io;
use std::net::{IpAddr, SocketAddr};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use libc::c_int;
use serde::Deserialize;
use tokio::io::unix::AsyncFd;

use crate::sys;

/// Which flavour of ICMP socket to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketKind {
    /// `SOCK_RAW`: needs `CAP_NET_RAW`; sees every ICMP message on the host.
    Raw,
    /// `SOCK_DGRAM` ping socket: unprivileged where the kernel allows it
    /// (`net.ipv4.ping_group_range` on Linux). The kernel owns the echo
    /// identifier and only hands back replies to our own requests.
    Datagram,
}

impl Default for SocketKind {
    fn default() -> Self {
        SocketKind::Datagram
    }
}

#[derive(Debug)]
pub struct RawSocket {
    fd: OwnedFd,
}

impl AsRawFd for RawSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl RawSocket {
    pub fn open(v6: bool, kind: SocketKind) -> io::Result<Self> {
        let (family, protocol) = if v6 {
            (libc::AF_INET6, libc::IPPROTO_ICMPV6)
        } else {
            (libc::AF_INET, libc::IPPROTO_ICMP)
        };
        let ty = match kind {
            SocketKind::Raw => libc::SOCK_RAW,
            SocketKind::Datagram => libc::SOCK_DGRAM,
        };
        let fd = sys::socket(family, ty, protocol)?;
        let socket = Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        };
        set_common_flags(socket)
    }

    pub fn set_nonblocking(&self) -> io::Result<()> {
        sys::set_nonblocking(self.as_raw_fd())
    }

    pub fn set_ttl(&self, v6: bool, ttl: u32) -> io::Result<()> {
        if v6 {
            sys::setsockopt(
                self.as_raw_fd(),
                libc::IPPROTO_IPV6,
                libc::IPV6_UNICAST_HOPS,
                ttl as c_int,
            )
        } else {
            sys::setsockopt(self.as_raw_fd(), libc::IPPROTO_IP, libc::IP_TTL, ttl as c_int)
        }
    }

    pub fn sendto(&self, buf: &[u8], addr: &SocketAddr) -> io::Result<usize> {
        sys::sendto(self.as_raw_fd(), buf, addr)
    }

    pub fn recvfrom(&self, buf: &mut [u8]) -> io::Result<(usize, Option<IpAddr>)> {
        sys::recvfrom(self.as_raw_fd(), buf)
    }
}

fn set_common_flags(socket: RawSocket) -> io::Result<RawSocket> {
    // Platforms lacking `SOCK_CLOEXEC` get `FD_CLOEXEC` after the fact.
    #[cfg(not(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "illumos",
        target_os = "linux",
        target_os = "netbsd",
        target_os = "openbsd",
    )))]
    sys::set_cloexec(socket.as_raw_fd())?;

    Ok(socket)
}

/// A non-blocking ICMP socket registered with the tokio reactor.
#[derive(Debug)]
pub struct AsyncSocket {
    inner: AsyncFd<RawSocket>,
}

impl AsyncSocket {
    pub fn new(socket: RawSocket) -> io::Result<Self> {
        socket.set_nonblocking()?;
        // SAFETY: `RawSocket` owns its fd and never hands it out, so it stays
        // open and unchanged until the `AsyncFd` drops it.
        let inner = unsafe { AsyncFd::register(socket) }?;
        Ok(Self { inner })
    }

    pub async fn send_to(&self, buf: &[u8], addr: &SocketAddr) -> io::Result<usize> {
        loop {
            let mut guard = self.inner.writable().await?;

            match guard.try_io(|inner| inner.get_ref().sendto(buf, addr)) {
                Ok(res) => return res,
                Err(_would_block) => continue,
            }
        }
    }

    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Option<IpAddr>)> {
        loop {
            let mut guard = self.inner.readable().await?;

            match guard.try_io(|inner| inner.get_ref().recvfrom(buf)) {
                Ok(res) => return res,
                Err(_would_block) => continue,
            }
        }
    }
}

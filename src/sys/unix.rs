use std::mem::{self, size_of};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::os::unix::io::RawFd;
use std::{io, ptr};

use libc::{c_int, c_void, sockaddr_storage, socklen_t};

macro_rules! syscall {
    ($fn:ident ($($args:expr),* $(,)*)) => {
        {
            let res = unsafe { libc::$fn($($args),*) };
            if res == -1 {
                Err(std::io::Error::last_os_error())
            } else {
                Ok(res)
            }
        }
    };
}

pub(crate) fn socket(family: c_int, ty: c_int, protocol: c_int) -> io::Result<RawFd> {
    #[cfg(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "illumos",
        target_os = "linux",
        target_os = "netbsd",
        target_os = "openbsd",
    ))]
    let ty = ty | libc::SOCK_CLOEXEC;

    syscall!(socket(family, ty, protocol))
}

pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    fcntl_add(fd, libc::F_GETFL, libc::F_SETFL, libc::O_NONBLOCK)
}

/// Platforms without `SOCK_CLOEXEC` need the flag set after creation.
#[allow(dead_code)]
pub(crate) fn set_cloexec(fd: RawFd) -> io::Result<()> {
    fcntl_add(fd, libc::F_GETFD, libc::F_SETFD, libc::FD_CLOEXEC)
}

fn fcntl_add(fd: RawFd, get_cmd: c_int, set_cmd: c_int, flag: c_int) -> io::Result<()> {
    let pre = syscall!(fcntl(fd, get_cmd))?;
    let new = pre | flag;
    if new != pre {
        syscall!(fcntl(fd, set_cmd, new)).map(|_| ())
    } else {
        Ok(())
    }
}

pub(crate) fn setsockopt<T>(fd: RawFd, level: c_int, name: c_int, payload: T) -> io::Result<()> {
    let payload = &payload as *const T as *const c_void;
    syscall!(setsockopt(
        fd,
        level,
        name,
        payload,
        size_of::<T>() as socklen_t
    ))
    .map(|_| ())
}

pub(crate) fn sendto(fd: RawFd, buf: &[u8], addr: &SocketAddr) -> io::Result<usize> {
    let (storage, len) = to_sockaddr(addr);
    syscall!(sendto(
        fd,
        buf.as_ptr().cast(),
        buf.len(),
        0,
        (&storage as *const sockaddr_storage).cast(),
        len
    ))
    .map(|n| n as usize)
}

/// Receives one datagram, returning its length and the sender's address.
pub(crate) fn recvfrom(fd: RawFd, buf: &mut [u8]) -> io::Result<(usize, Option<IpAddr>)> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = size_of::<sockaddr_storage>() as socklen_t;
    let n = syscall!(recvfrom(
        fd,
        buf.as_mut_ptr().cast(),
        buf.len(),
        0,
        (&mut storage as *mut sockaddr_storage).cast(),
        &mut len
    ))?;
    Ok((n as usize, from_sockaddr(&storage)))
}

fn to_sockaddr(addr: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(addr) => {
            let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_addr = libc::in_addr {
                s_addr: u32::from_ne_bytes(addr.ip().octets()),
            };
            sin.sin_port = addr.port().to_be();
            unsafe { ptr::copy_nonoverlapping(&sin, (&mut storage as *mut sockaddr_storage).cast(), 1) };
            size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(addr) => {
            let mut sin6: libc::sockaddr_in6 = unsafe { mem::zeroed() };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_addr = libc::in6_addr {
                s6_addr: addr.ip().octets(),
            };
            sin6.sin6_port = addr.port().to_be();
            sin6.sin6_scope_id = addr.scope_id();
            unsafe { ptr::copy_nonoverlapping(&sin6, (&mut storage as *mut sockaddr_storage).cast(), 1) };
            size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as socklen_t)
}

fn from_sockaddr(storage: &sockaddr_storage) -> Option<IpAddr> {
    match storage.ss_family as c_int {
        libc::AF_INET => {
            let sin = unsafe { &*(storage as *const sockaddr_storage).cast::<libc::sockaddr_in>() };
            Some(IpAddr::V4(Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes())))
        }
        libc::AF_INET6 => {
            let sin6 = unsafe { &*(storage as *const sockaddr_storage).cast::<libc::sockaddr_in6>() };
            Some(IpAddr::V6(Ipv6Addr::from(sin6.sin6_addr.s6_addr)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sockaddr_conversion_keeps_address() {
        let v4: SocketAddr = "192.0.2.7:0".parse().unwrap();
        let (storage, len) = to_sockaddr(&v4);
        assert_eq!(len as usize, size_of::<libc::sockaddr_in>());
        assert_eq!(from_sockaddr(&storage), Some(v4.ip()));

        let v6: SocketAddr = "[2001:db8::1]:0".parse().unwrap();
        let (storage, len) = to_sockaddr(&v6);
        assert_eq!(len as usize, size_of::<libc::sockaddr_in6>());
        assert_eq!(from_sockaddr(&storage), Some(v6.ip()));
    }

    #[test]
    fn unknown_family_has_no_address() {
        let storage: sockaddr_storage = unsafe { mem::zeroed() };
        assert_eq!(from_sockaddr(&storage), None);
    }
}

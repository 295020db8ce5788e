//! ICMP echo encoding and decoding on top of `pnet_packet`.

use std::net::IpAddr;

use crate::error::{MalformedPacketError, Result};

pub mod icmpv4;
pub mod icmpv6;

/// Type, code, checksum, identifier and sequence number.
pub const ECHO_HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    EchoReply,
    EchoRequest,
    Other(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Echo {
    pub identifier: u16,
    pub sequence: u16,
}

/// A decoded ICMP message as far as correlation cares about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub code: u8,
    /// Present for echo requests and replies only.
    pub echo: Option<Echo>,
}

pub fn make_echo_request(dst: IpAddr, idt: u16, seq: u16, size: usize) -> Result<Vec<u8>> {
    match dst {
        IpAddr::V4(_) => icmpv4::make_echo_request(idt, seq, size),
        IpAddr::V6(_) => icmpv6::make_echo_request(idt, seq, size),
    }
}

/// Decodes a datagram read from a socket of the same family as `peer`.
pub fn parse(peer: IpAddr, buf: &[u8]) -> std::result::Result<Message, MalformedPacketError> {
    match peer {
        IpAddr::V4(_) => icmpv4::parse(buf),
        IpAddr::V6(_) => icmpv6::parse(buf),
    }
}

pub(crate) fn payload_pattern(size: usize) -> Vec<u8> {
    (0..size).map(|i| i as u8).collect()
}

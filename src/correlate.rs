use std::net::IpAddr;

use crate::error::MalformedPacketError;
use crate::packet::{Message, MessageKind};

/// The request a prober is currently waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outstanding {
    pub destination: IpAddr,
    /// Sequence number exactly as it was put on the wire.
    pub sequence: u16,
    /// `None` when the socket kernel owns the identifier (ping sockets).
    pub identifier: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correlation {
    Match,
    NotMatch(Mismatch),
    Malformed(MalformedPacketError),
}

/// Why a well-formed message does not answer the outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mismatch {
    Kind(MessageKind),
    Source(IpAddr),
    Identifier(u16),
    Sequence(u16),
}

/// Decides whether a received datagram answers `outstanding`.
///
/// Checks run in a fixed order: parse result, message type, source
/// address, identifier (when we own it), sequence number. The first
/// failing check is reported.
pub fn correlate(
    parsed: Result<Message, MalformedPacketError>,
    source: IpAddr,
    outstanding: &Outstanding,
) -> Correlation {
    let message = match parsed {
        Ok(message) => message,
        Err(e) => return Correlation::Malformed(e),
    };
    let echo = match (message.kind, message.echo) {
        (MessageKind::EchoReply, Some(echo)) => echo,
        (kind, _) => return Correlation::NotMatch(Mismatch::Kind(kind)),
    };
    if source != outstanding.destination {
        return Correlation::NotMatch(Mismatch::Source(source));
    }
    if let Some(identifier) = outstanding.identifier {
        if echo.identifier != identifier {
            return Correlation::NotMatch(Mismatch::Identifier(echo.identifier));
        }
    }
    if echo.sequence != outstanding.sequence {
        return Correlation::NotMatch(Mismatch::Sequence(echo.sequence));
    }
    Correlation::Match
}

use pnet_packet::icmpv6::{self, Icmpv6Type, Icmpv6Types};
use pnet_packet::Packet;

use super::{Echo, Message, MessageKind, ECHO_HEADER_LEN};
use crate::error::{Error, MalformedPacketError, Result};

pub fn make_echo_request(idt: u16, seq: u16, size: usize) -> Result<Vec<u8>> {
    make_echo(Icmpv6Types::EchoRequest, idt, seq, size)
}

pub fn make_echo_reply(idt: u16, seq: u16, size: usize) -> Result<Vec<u8>> {
    make_echo(Icmpv6Types::EchoReply, idt, seq, size)
}

fn make_echo(icmpv6_type: Icmpv6Type, idt: u16, seq: u16, size: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0; ECHO_HEADER_LEN + size];
    let mut packet =
        icmpv6::MutableIcmpv6Packet::new(&mut buf).ok_or(Error::IncorrectBufferSize)?;

    packet.set_icmpv6_type(icmpv6_type);
    let mut payload = Vec::with_capacity(4 + size);
    payload.extend_from_slice(&idt.to_be_bytes());
    payload.extend_from_slice(&seq.to_be_bytes());
    payload.extend_from_slice(&super::payload_pattern(size));
    packet.set_payload(&payload);

    // The kernel fills in the ICMPv6 checksum, it needs the pseudo header.
    Ok(buf)
}

pub fn parse(buf: &[u8]) -> std::result::Result<Message, MalformedPacketError> {
    if buf.len() < ECHO_HEADER_LEN {
        return Err(MalformedPacketError::PayloadTooShort {
            got: buf.len(),
            want: ECHO_HEADER_LEN,
        });
    }
    let packet = icmpv6::Icmpv6Packet::new(buf).ok_or(MalformedPacketError::NotIcmpv6Packet)?;

    let kind = match packet.get_icmpv6_type() {
        Icmpv6Types::EchoReply => MessageKind::EchoReply,
        Icmpv6Types::EchoRequest => MessageKind::EchoRequest,
        other => MessageKind::Other(other.0),
    };
    let echo = match kind {
        MessageKind::EchoReply | MessageKind::EchoRequest => {
            let fields = packet.payload();
            let identifier = fields
                .get(0..2)
                .and_then(|b| b.try_into().ok())
                .map(u16::from_be_bytes);
            let sequence = fields
                .get(2..4)
                .and_then(|b| b.try_into().ok())
                .map(u16::from_be_bytes);
            match (identifier, sequence) {
                (Some(identifier), Some(sequence)) => Some(Echo {
                    identifier,
                    sequence,
                }),
                _ => {
                    return Err(MalformedPacketError::PayloadTooShort {
                        got: buf.len(),
                        want: ECHO_HEADER_LEN,
                    })
                }
            }
        }
        MessageKind::Other(_) => None,
    };

    Ok(Message {
        kind,
        code: packet.get_icmpv6_code().0,
        echo,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_echo_reply() {
        let reply = make_echo_reply(0xbeef, 300, 56).unwrap();
        let message = parse(&reply).unwrap();
        assert_eq!(message.kind, MessageKind::EchoReply);
        assert_eq!(
            message.echo,
            Some(Echo {
                identifier: 0xbeef,
                sequence: 300
            })
        );
    }

    #[test]
    fn request_layout_matches_reply() {
        let request = make_echo_request(9, 10, 4).unwrap();
        assert_eq!(request.len(), ECHO_HEADER_LEN + 4);
        let message = parse(&request).unwrap();
        assert_eq!(message.kind, MessageKind::EchoRequest);
        assert_eq!(message.echo.map(|e| e.sequence), Some(10));
    }

    #[test]
    fn short_buffer_is_malformed() {
        assert_eq!(
            parse(&[129, 0, 0, 0]),
            Err(MalformedPacketError::PayloadTooShort { got: 4, want: 8 })
        );
    }
}

use pnet_packet::icmp::{self, IcmpType, IcmpTypes};
use pnet_packet::ipv4;
use pnet_packet::Packet;

use super::{Echo, Message, MessageKind, ECHO_HEADER_LEN};
use crate::error::{Error, MalformedPacketError, Result};

pub fn make_echo_request(idt: u16, seq: u16, size: usize) -> Result<Vec<u8>> {
    make_echo(IcmpTypes::EchoRequest, idt, seq, size)
}

pub fn make_echo_reply(idt: u16, seq: u16, size: usize) -> Result<Vec<u8>> {
    make_echo(IcmpTypes::EchoReply, idt, seq, size)
}

// Echo request and reply share a layout; the reply view is used to write both.
fn make_echo(icmp_type: IcmpType, idt: u16, seq: u16, size: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0; ECHO_HEADER_LEN + size];
    let mut packet = icmp::echo_reply::MutableEchoReplyPacket::new(&mut buf)
        .ok_or(Error::IncorrectBufferSize)?;

    packet.set_icmp_type(icmp_type);
    packet.set_identifier(idt);
    packet.set_sequence_number(seq);
    packet.set_payload(&super::payload_pattern(size));

    let icmp_packet = icmp::IcmpPacket::new(packet.packet()).ok_or(Error::IncorrectBufferSize)?;
    let checksum = icmp::checksum(&icmp_packet);
    packet.set_checksum(checksum);

    Ok(buf)
}

/// Parses an ICMPv4 message. Raw sockets hand back the IPv4 header in
/// front of the message while Linux ping sockets do not, so a leading
/// header is detected by its version nibble and skipped.
pub fn parse(buf: &[u8]) -> std::result::Result<Message, MalformedPacketError> {
    let payload = strip_ip_header(buf)?;
    if payload.len() < ECHO_HEADER_LEN {
        return Err(MalformedPacketError::PayloadTooShort {
            got: payload.len(),
            want: ECHO_HEADER_LEN,
        });
    }
    let icmp_packet =
        icmp::IcmpPacket::new(payload).ok_or(MalformedPacketError::NotIcmpv4Packet)?;

    let want = icmp::checksum(&icmp_packet);
    let got = icmp_packet.get_checksum();
    if got != want {
        return Err(MalformedPacketError::Checksum { got, want });
    }

    let kind = match icmp_packet.get_icmp_type() {
        IcmpTypes::EchoReply => MessageKind::EchoReply,
        IcmpTypes::EchoRequest => MessageKind::EchoRequest,
        other => MessageKind::Other(other.0),
    };
    let echo = match kind {
        MessageKind::EchoReply | MessageKind::EchoRequest => {
            let echo = icmp::echo_reply::EchoReplyPacket::new(payload)
                .ok_or(MalformedPacketError::NotIcmpv4Packet)?;
            Some(Echo {
                identifier: echo.get_identifier(),
                sequence: echo.get_sequence_number(),
            })
        }
        MessageKind::Other(_) => None,
    };

    Ok(Message {
        kind,
        code: icmp_packet.get_icmp_code().0,
        echo,
    })
}

fn strip_ip_header(buf: &[u8]) -> std::result::Result<&[u8], MalformedPacketError> {
    match buf.first() {
        None => Err(MalformedPacketError::PayloadTooShort {
            got: 0,
            want: ECHO_HEADER_LEN,
        }),
        Some(first) if first >> 4 == 4 => {
            let ip = ipv4::Ipv4Packet::new(buf).ok_or(MalformedPacketError::NotIpv4Packet)?;
            let header_len = ip.get_header_length() as usize * 4;
            if header_len < ipv4::Ipv4Packet::minimum_packet_size() || header_len > buf.len() {
                return Err(MalformedPacketError::NotIpv4Packet);
            }
            Ok(&buf[header_len..])
        }
        Some(_) => Ok(buf),
    }
}

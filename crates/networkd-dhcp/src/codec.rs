//! DHCPv4 wire format (RFC 2131 / RFC 2132)
//!
//! Converts between the BOOTP packet layout and the decoded
//! [`DhcpMessage`] the client state machine works with. Only the options the
//! client sends or understands are carried; everything else is skipped on
//! decode.

use networkd_core::dhcp::{DhcpMessage, MessageKind};
use std::net::Ipv4Addr;
use thiserror::Error;

/// DHCP magic cookie
pub const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

/// Fixed BOOTP header plus cookie
const HEADER_LEN: usize = 240;

/// Shortest packet a BOOTP relay must accept
const MIN_PACKET_LEN: usize = 300;

const BOOTREQUEST: u8 = 1;
const BOOTREPLY: u8 = 2;
const HTYPE_ETHERNET: u8 = 1;
const BROADCAST_FLAG: u16 = 0x8000;

pub const OPT_PAD: u8 = 0;
pub const OPT_SUBNET_MASK: u8 = 1;
pub const OPT_ROUTER: u8 = 3;
pub const OPT_DNS_SERVER: u8 = 6;
pub const OPT_HOSTNAME: u8 = 12;
pub const OPT_DOMAIN_NAME: u8 = 15;
pub const OPT_REQUESTED_IP: u8 = 50;
pub const OPT_LEASE_TIME: u8 = 51;
pub const OPT_MSG_TYPE: u8 = 53;
pub const OPT_SERVER_ID: u8 = 54;
pub const OPT_PARAM_REQUEST: u8 = 55;
pub const OPT_MESSAGE: u8 = 56;
pub const OPT_RENEWAL_TIME: u8 = 58;
pub const OPT_REBINDING_TIME: u8 = 59;
pub const OPT_CLIENT_ID: u8 = 61;
pub const OPT_END: u8 = 255;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Packet too short: {0} bytes (minimum 240)")]
    TooShort(usize),

    #[error("Invalid magic cookie")]
    InvalidMagic,

    #[error("Unsupported hardware type {htype} / length {hlen}")]
    UnsupportedHardware { htype: u8, hlen: u8 },

    #[error("Option {0} runs past the end of the packet")]
    TruncatedOption(u8),

    #[error("Option {code} has invalid length {len}")]
    InvalidOptionLength { code: u8, len: usize },

    #[error("Missing or unknown DHCP message type")]
    MissingMessageType,
}

impl From<CodecError> for networkd_core::Error {
    fn from(e: CodecError) -> Self {
        networkd_core::Error::invalid_argument(e.to_string())
    }
}

fn is_server_message(kind: MessageKind) -> bool {
    matches!(
        kind,
        MessageKind::Offer | MessageKind::Ack | MessageKind::Nak
    )
}

/// Serialize a message into a BOOTP packet
pub fn encode(message: &DhcpMessage) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MIN_PACKET_LEN + 64);

    buf.push(if is_server_message(message.kind) {
        BOOTREPLY
    } else {
        BOOTREQUEST
    });
    buf.push(HTYPE_ETHERNET);
    buf.push(message.chaddr.len() as u8);
    buf.push(0); // hops
    buf.extend_from_slice(&message.xid.to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes()); // secs
    let flags = if message.broadcast { BROADCAST_FLAG } else { 0 };
    buf.extend_from_slice(&flags.to_be_bytes());
    buf.extend_from_slice(&message.ciaddr.octets());
    buf.extend_from_slice(&message.yiaddr.octets());
    buf.extend_from_slice(&Ipv4Addr::UNSPECIFIED.octets()); // siaddr
    buf.extend_from_slice(&Ipv4Addr::UNSPECIFIED.octets()); // giaddr

    let mut chaddr = [0u8; 16];
    chaddr[..6].copy_from_slice(&message.chaddr);
    buf.extend_from_slice(&chaddr);
    buf.extend_from_slice(&[0u8; 64]); // sname
    buf.extend_from_slice(&[0u8; 128]); // file
    buf.extend_from_slice(&MAGIC_COOKIE);

    push_option(&mut buf, OPT_MSG_TYPE, &[message.kind.code()]);
    if let Some(client_id) = &message.client_id {
        push_option(&mut buf, OPT_CLIENT_ID, client_id);
    }
    if let Some(ip) = message.requested_ip {
        push_option(&mut buf, OPT_REQUESTED_IP, &ip.octets());
    }
    if let Some(ip) = message.server_id {
        push_option(&mut buf, OPT_SERVER_ID, &ip.octets());
    }
    if let Some(mask) = message.subnet_mask {
        push_option(&mut buf, OPT_SUBNET_MASK, &mask.octets());
    }
    push_addresses(&mut buf, OPT_ROUTER, &message.routers);
    push_addresses(&mut buf, OPT_DNS_SERVER, &message.dns_servers);
    if let Some(hostname) = &message.hostname {
        push_option(&mut buf, OPT_HOSTNAME, hostname.as_bytes());
    }
    if let Some(domain) = &message.domain_name {
        push_option(&mut buf, OPT_DOMAIN_NAME, domain.as_bytes());
    }
    for (code, value) in [
        (OPT_LEASE_TIME, message.lease_time),
        (OPT_RENEWAL_TIME, message.renewal_time),
        (OPT_REBINDING_TIME, message.rebinding_time),
    ] {
        if let Some(secs) = value {
            push_option(&mut buf, code, &secs.to_be_bytes());
        }
    }
    if let Some(text) = &message.message {
        push_option(&mut buf, OPT_MESSAGE, text.as_bytes());
    }
    if !message.parameter_request_list.is_empty() {
        push_option(&mut buf, OPT_PARAM_REQUEST, &message.parameter_request_list);
    }
    buf.push(OPT_END);

    if buf.len() < MIN_PACKET_LEN {
        buf.resize(MIN_PACKET_LEN, OPT_PAD);
    }
    buf
}

/// Options longer than 255 bytes are truncated
fn push_option(buf: &mut Vec<u8>, code: u8, data: &[u8]) {
    let data = &data[..data.len().min(u8::MAX as usize)];
    buf.push(code);
    buf.push(data.len() as u8);
    buf.extend_from_slice(data);
}

fn push_addresses(buf: &mut Vec<u8>, code: u8, addresses: &[Ipv4Addr]) {
    if addresses.is_empty() {
        return;
    }
    let data: Vec<u8> = addresses.iter().flat_map(|a| a.octets()).collect();
    push_option(buf, code, &data);
}

/// Parse a BOOTP packet
pub fn decode(data: &[u8]) -> Result<DhcpMessage, CodecError> {
    if data.len() < HEADER_LEN {
        return Err(CodecError::TooShort(data.len()));
    }
    if data[236..240] != MAGIC_COOKIE {
        return Err(CodecError::InvalidMagic);
    }

    let (htype, hlen) = (data[1], data[2]);
    if htype != HTYPE_ETHERNET || hlen != 6 {
        return Err(CodecError::UnsupportedHardware { htype, hlen });
    }

    let options = parse_options(&data[HEADER_LEN..])?;
    let kind = options
        .iter()
        .find(|(code, _)| *code == OPT_MSG_TYPE)
        .and_then(|(_, value)| value.first().copied())
        .and_then(MessageKind::from_code)
        .ok_or(CodecError::MissingMessageType)?;

    let mut chaddr = [0u8; 6];
    chaddr.copy_from_slice(&data[28..34]);

    let mut message = DhcpMessage::new(kind, u32::from_be_bytes([data[4], data[5], data[6], data[7]]), chaddr);
    message.broadcast = u16::from_be_bytes([data[10], data[11]]) & BROADCAST_FLAG != 0;
    message.ciaddr = ipv4_at(data, 12);
    message.yiaddr = ipv4_at(data, 16);

    for (code, value) in options {
        match code {
            OPT_SUBNET_MASK => message.subnet_mask = Some(single_address(code, value)?),
            OPT_ROUTER => message.routers = addresses(code, value)?,
            OPT_DNS_SERVER => message.dns_servers = addresses(code, value)?,
            OPT_HOSTNAME => message.hostname = Some(text(value)),
            OPT_DOMAIN_NAME => message.domain_name = Some(text(value)),
            OPT_REQUESTED_IP => message.requested_ip = Some(single_address(code, value)?),
            OPT_SERVER_ID => message.server_id = Some(single_address(code, value)?),
            OPT_LEASE_TIME => message.lease_time = Some(seconds(code, value)?),
            OPT_RENEWAL_TIME => message.renewal_time = Some(seconds(code, value)?),
            OPT_REBINDING_TIME => message.rebinding_time = Some(seconds(code, value)?),
            OPT_MESSAGE => message.message = Some(text(value)),
            OPT_PARAM_REQUEST => message.parameter_request_list = value.to_vec(),
            OPT_CLIENT_ID => message.client_id = Some(value.to_vec()),
            _ => {}
        }
    }

    Ok(message)
}

fn parse_options(mut data: &[u8]) -> Result<Vec<(u8, &[u8])>, CodecError> {
    let mut options = Vec::new();

    while let Some((&code, rest)) = data.split_first() {
        match code {
            OPT_PAD => data = rest,
            OPT_END => break,
            _ => {
                let (&len, rest) = rest
                    .split_first()
                    .ok_or(CodecError::TruncatedOption(code))?;
                let len = len as usize;
                if rest.len() < len {
                    return Err(CodecError::TruncatedOption(code));
                }
                options.push((code, &rest[..len]));
                data = &rest[len..];
            }
        }
    }

    Ok(options)
}

fn ipv4_at(data: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(data[offset], data[offset + 1], data[offset + 2], data[offset + 3])
}

fn single_address(code: u8, value: &[u8]) -> Result<Ipv4Addr, CodecError> {
    if value.len() != 4 {
        return Err(CodecError::InvalidOptionLength {
            code,
            len: value.len(),
        });
    }
    Ok(ipv4_at(value, 0))
}

fn addresses(code: u8, value: &[u8]) -> Result<Vec<Ipv4Addr>, CodecError> {
    if value.is_empty() || value.len() % 4 != 0 {
        return Err(CodecError::InvalidOptionLength {
            code,
            len: value.len(),
        });
    }
    Ok(value.chunks_exact(4).map(|c| ipv4_at(c, 0)).collect())
}

fn seconds(code: u8, value: &[u8]) -> Result<u32, CodecError> {
    let bytes: [u8; 4] = value
        .try_into()
        .map_err(|_| CodecError::InvalidOptionLength {
            code,
            len: value.len(),
        })?;
    Ok(u32::from_be_bytes(bytes))
}

/// Option text, trailing NULs dropped
fn text(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .trim_end_matches('\0')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: [u8; 6] = [0x02, 0x00, 0x00, 0xaa, 0xbb, 0xcc];

    /// A server OFFER as a relay would put it on the wire
    fn offer_bytes() -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[0] = BOOTREPLY;
        buf[1] = HTYPE_ETHERNET;
        buf[2] = 6;
        buf[4..8].copy_from_slice(&0x1234_5678u32.to_be_bytes());
        buf[10..12].copy_from_slice(&BROADCAST_FLAG.to_be_bytes());
        buf[16..20].copy_from_slice(&[192, 168, 1, 10]);
        buf[28..34].copy_from_slice(&MAC);
        buf[236..240].copy_from_slice(&MAGIC_COOKIE);

        buf.extend_from_slice(&[OPT_MSG_TYPE, 1, 2]);
        buf.extend_from_slice(&[OPT_SERVER_ID, 4, 192, 168, 1, 1]);
        buf.extend_from_slice(&[OPT_PAD, OPT_PAD]);
        buf.extend_from_slice(&[OPT_SUBNET_MASK, 4, 255, 255, 255, 0]);
        buf.extend_from_slice(&[OPT_ROUTER, 8, 192, 168, 1, 1, 192, 168, 1, 2]);
        buf.extend_from_slice(&[OPT_DNS_SERVER, 4, 9, 9, 9, 9]);
        buf.extend_from_slice(&[OPT_DOMAIN_NAME, 4, b'l', b'a', b'n', 0]);
        buf.extend_from_slice(&[OPT_LEASE_TIME, 4, 0, 0, 0x0e, 0x10]);
        // Unknown option, skipped
        buf.extend_from_slice(&[119, 3, 1, 2, 3]);
        buf.push(OPT_END);
        buf
    }

    #[test]
    fn test_decode_offer() {
        let offer = decode(&offer_bytes()).unwrap();

        assert_eq!(offer.kind, MessageKind::Offer);
        assert_eq!(offer.xid, 0x1234_5678);
        assert_eq!(offer.chaddr, MAC);
        assert!(offer.broadcast);
        assert_eq!(offer.yiaddr, Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(offer.server_id, Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(offer.subnet_mask, Some(Ipv4Addr::new(255, 255, 255, 0)));
        assert_eq!(
            offer.routers,
            vec![Ipv4Addr::new(192, 168, 1, 1), Ipv4Addr::new(192, 168, 1, 2)]
        );
        assert_eq!(offer.dns_servers, vec![Ipv4Addr::new(9, 9, 9, 9)]);
        assert_eq!(offer.domain_name.as_deref(), Some("lan"));
        assert_eq!(offer.lease_time, Some(3600));
        assert_eq!(offer.renewal_time, None);
    }

    #[test]
    fn test_encode_discover_layout() {
        let discover = DhcpMessage::discover(7, MAC, "nas");
        let bytes = encode(&discover);

        assert!(bytes.len() >= MIN_PACKET_LEN);
        assert_eq!(bytes[0], BOOTREQUEST);
        assert_eq!(&bytes[4..8], &7u32.to_be_bytes());
        assert_eq!(&bytes[10..12], &BROADCAST_FLAG.to_be_bytes());
        assert_eq!(&bytes[28..34], &MAC);
        assert_eq!(&bytes[34..44], &[0u8; 10]);
        assert_eq!(&bytes[236..240], &MAGIC_COOKIE);
        // Message type leads the options
        assert_eq!(&bytes[240..243], &[OPT_MSG_TYPE, 1, 1]);

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, discover);
    }

    #[test]
    fn test_release_is_unicast_with_ciaddr() {
        let release = DhcpMessage::release(
            9,
            MAC,
            Ipv4Addr::new(192, 168, 1, 10),
            Ipv4Addr::new(192, 168, 1, 1),
        );
        let bytes = encode(&release);

        assert_eq!(&bytes[10..12], &[0, 0]);
        assert_eq!(&bytes[12..16], &[192, 168, 1, 10]);
        assert_eq!(decode(&bytes).unwrap().kind, MessageKind::Release);
    }

    #[test]
    fn test_malformed_packets_are_rejected() {
        assert_eq!(decode(&[0u8; 100]), Err(CodecError::TooShort(100)));

        let mut bad_cookie = offer_bytes();
        bad_cookie[236] = 0;
        assert_eq!(decode(&bad_cookie), Err(CodecError::InvalidMagic));

        let mut truncated = offer_bytes();
        truncated.truncate(HEADER_LEN + 3 + 4);
        assert_eq!(decode(&truncated), Err(CodecError::TruncatedOption(OPT_SERVER_ID)));

        let mut untyped = offer_bytes();
        untyped.truncate(HEADER_LEN);
        untyped.push(OPT_END);
        assert_eq!(decode(&untyped), Err(CodecError::MissingMessageType));

        let mut bad_router = offer_bytes();
        bad_router.truncate(HEADER_LEN + 3);
        bad_router.extend_from_slice(&[OPT_ROUTER, 3, 1, 2, 3, OPT_END]);
        assert_eq!(
            decode(&bad_router),
            Err(CodecError::InvalidOptionLength {
                code: OPT_ROUTER,
                len: 3
            })
        );
    }

    #[test]
    fn test_long_hostname_is_truncated() {
        let discover = DhcpMessage::discover(1, MAC, &"h".repeat(300));
        let decoded = decode(&encode(&discover)).unwrap();
        assert_eq!(decoded.hostname.map(|h| h.len()), Some(255));
    }
}

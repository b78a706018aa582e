//! BOOTP / DHCPv4 frame decoder
//!
//! Only the parts needed to identify a button are decoded: the link, IPv4 and
//! UDP headers are walked to reach the BOOTP message, whose fixed header
//! carries the client hardware address (`chaddr`).
//!
//! ```text
//! 0        1        2        3
//! +--------+--------+--------+--------+
//! |   op   | htype  |  hlen  |  hops  |
//! +--------+--------+--------+--------+
//! |               xid                 |
//! +-----------------------------------+
//! |  secs (2)       |  flags (2)      |
//! +-----------------------------------+
//! | ciaddr | yiaddr | siaddr | giaddr |  4 bytes each
//! +-----------------------------------+
//! |          chaddr (16)              |  offset 28
//! +-----------------------------------+
//! |  sname (64)  |   file (128)       |
//! +-----------------------------------+
//! |  magic cookie 63 82 53 63         |  offset 236
//! +-----------------------------------+
//! |  options                          |  offset 240
//! ```

use std::fmt;
use thiserror::Error;

pub const BOOTP_SERVER_PORT: u16 = 67;
pub const BOOTP_CLIENT_PORT: u16 = 68;

const ETHERNET_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const LINUX_SLL_HEADER_LEN: usize = 16;
const IPV4_MIN_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;
const BOOTP_FIXED_LEN: usize = 236;
const CHADDR_OFFSET: usize = 28;
const CHADDR_LEN: usize = 16;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_VLAN: u16 = 0x8100;
const IP_PROTO_UDP: u8 = 17;
const DHCP_MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

const OPTION_PAD: u8 = 0;
const OPTION_MESSAGE_TYPE: u8 = 53;
const OPTION_END: u8 = 255;

/// Link-layer framing of captured packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet,
    /// Linux cooked capture v1, used by the `any` device
    LinuxSll,
    RawIpv4,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{layer} truncated: need {need} bytes, have {have}")]
    Truncated {
        layer: &'static str,
        need: usize,
        have: usize,
    },

    #[error("unsupported ethertype {0:#06x}")]
    UnsupportedEtherType(u16),

    #[error("not an IPv4 packet (version {0})")]
    NotIpv4(u8),

    #[error("invalid IPv4 header length {0}")]
    BadIpHeaderLength(usize),

    #[error("non-initial IPv4 fragment")]
    Fragment,

    #[error("not UDP (protocol {0})")]
    NotUdp(u8),

    #[error("UDP ports {src} -> {dst} are not BOOTP")]
    NotBootp { src: u16, dst: u16 },

    #[error("unknown BOOTP op {0}")]
    UnknownOp(u8),

    #[error("invalid hardware address length {0}")]
    BadHardwareAddrLength(u8),

    #[error("missing DHCP magic cookie")]
    MissingMagicCookie,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootpOp {
    Request,
    Reply,
}

/// DHCP option 53
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpMessageType {
    Discover,
    Offer,
    Request,
    Decline,
    Ack,
    Nak,
    Release,
    Inform,
    Other(u8),
}

impl From<u8> for DhcpMessageType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Discover,
            2 => Self::Offer,
            3 => Self::Request,
            4 => Self::Decline,
            5 => Self::Ack,
            6 => Self::Nak,
            7 => Self::Release,
            8 => Self::Inform,
            other => Self::Other(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootpMessage {
    pub op: BootpOp,
    pub transaction_id: u32,
    /// `chaddr` as lowercase colon-separated hex
    pub client_hw_addr: String,
    pub message_type: Option<DhcpMessageType>,
}

impl fmt::Display for BootpMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:?} xid={:#010x} chaddr={}",
            self.op, self.transaction_id, self.client_hw_addr
        )?;
        if let Some(message_type) = self.message_type {
            write!(f, " type={:?}", message_type)?;
        }
        Ok(())
    }
}

/// Decodes one captured frame down to its BOOTP message
pub fn decode_frame(link: LinkLayer, frame: &[u8]) -> Result<BootpMessage, DecodeError> {
    let ip = match link {
        LinkLayer::Ethernet => strip_ethernet(frame)?,
        LinkLayer::LinuxSll => strip_linux_sll(frame)?,
        LinkLayer::RawIpv4 => frame,
    };
    let udp = strip_ipv4(ip)?;
    let bootp = strip_udp(udp)?;
    decode_bootp(bootp)
}

fn need(layer: &'static str, data: &[u8], len: usize) -> Result<(), DecodeError> {
    if data.len() < len {
        return Err(DecodeError::Truncated {
            layer,
            need: len,
            have: data.len(),
        });
    }
    Ok(())
}

fn be16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

fn strip_ethernet(frame: &[u8]) -> Result<&[u8], DecodeError> {
    need("ethernet", frame, ETHERNET_HEADER_LEN)?;
    let mut ethertype = be16(frame, 12);
    let mut offset = ETHERNET_HEADER_LEN;

    if ethertype == ETHERTYPE_VLAN {
        need("802.1Q", frame, ETHERNET_HEADER_LEN + VLAN_TAG_LEN)?;
        ethertype = be16(frame, 16);
        offset += VLAN_TAG_LEN;
    }
    if ethertype != ETHERTYPE_IPV4 {
        return Err(DecodeError::UnsupportedEtherType(ethertype));
    }
    Ok(&frame[offset..])
}

fn strip_linux_sll(frame: &[u8]) -> Result<&[u8], DecodeError> {
    need("linux-sll", frame, LINUX_SLL_HEADER_LEN)?;
    let protocol = be16(frame, 14);
    if protocol != ETHERTYPE_IPV4 {
        return Err(DecodeError::UnsupportedEtherType(protocol));
    }
    Ok(&frame[LINUX_SLL_HEADER_LEN..])
}

fn strip_ipv4(packet: &[u8]) -> Result<&[u8], DecodeError> {
    need("ipv4", packet, IPV4_MIN_HEADER_LEN)?;
    let version = packet[0] >> 4;
    if version != 4 {
        return Err(DecodeError::NotIpv4(version));
    }

    let header_len = usize::from(packet[0] & 0x0f) * 4;
    if header_len < IPV4_MIN_HEADER_LEN || header_len > packet.len() {
        return Err(DecodeError::BadIpHeaderLength(header_len));
    }
    if be16(packet, 6) & 0x1fff != 0 {
        return Err(DecodeError::Fragment);
    }
    let protocol = packet[9];
    if protocol != IP_PROTO_UDP {
        return Err(DecodeError::NotUdp(protocol));
    }

    // Trailing link padding is not part of the datagram.
    let total_len = usize::from(be16(packet, 2));
    let end = if (header_len..=packet.len()).contains(&total_len) {
        total_len
    } else {
        packet.len()
    };
    Ok(&packet[header_len..end])
}

fn strip_udp(datagram: &[u8]) -> Result<&[u8], DecodeError> {
    need("udp", datagram, UDP_HEADER_LEN)?;
    let src = be16(datagram, 0);
    let dst = be16(datagram, 2);
    let is_bootp = |port| port == BOOTP_SERVER_PORT || port == BOOTP_CLIENT_PORT;
    if !is_bootp(src) && !is_bootp(dst) {
        return Err(DecodeError::NotBootp { src, dst });
    }

    let udp_len = usize::from(be16(datagram, 4));
    let end = if (UDP_HEADER_LEN..=datagram.len()).contains(&udp_len) {
        udp_len
    } else {
        datagram.len()
    };
    Ok(&datagram[UDP_HEADER_LEN..end])
}

fn decode_bootp(data: &[u8]) -> Result<BootpMessage, DecodeError> {
    need("bootp", data, BOOTP_FIXED_LEN + DHCP_MAGIC_COOKIE.len())?;

    let op = match data[0] {
        1 => BootpOp::Request,
        2 => BootpOp::Reply,
        other => return Err(DecodeError::UnknownOp(other)),
    };
    let hlen = data[2];
    if hlen == 0 || usize::from(hlen) > CHADDR_LEN {
        return Err(DecodeError::BadHardwareAddrLength(hlen));
    }
    if data[BOOTP_FIXED_LEN..BOOTP_FIXED_LEN + 4] != DHCP_MAGIC_COOKIE {
        return Err(DecodeError::MissingMagicCookie);
    }

    let transaction_id = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let chaddr = &data[CHADDR_OFFSET..CHADDR_OFFSET + usize::from(hlen)];

    Ok(BootpMessage {
        op,
        transaction_id,
        client_hw_addr: format_hw_addr(chaddr),
        message_type: find_message_type(&data[BOOTP_FIXED_LEN + 4..]),
    })
}

fn find_message_type(mut options: &[u8]) -> Option<DhcpMessageType> {
    while let Some((&code, rest)) = options.split_first() {
        match code {
            OPTION_PAD => options = rest,
            OPTION_END => return None,
            _ => {
                let (&len, rest) = rest.split_first()?;
                let len = usize::from(len);
                if rest.len() < len {
                    return None;
                }
                if code == OPTION_MESSAGE_TYPE && len == 1 {
                    return Some(DhcpMessageType::from(rest[0]));
                }
                options = &rest[len..];
            }
        }
    }
    None
}

pub fn format_hw_addr(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUTTON_MAC: [u8; 6] = [0xfc, 0xa6, 0x67, 0xb1, 0x24, 0x41];

    fn bootp(op: u8, chaddr: &[u8], message_type: Option<u8>) -> Vec<u8> {
        let mut data = vec![0u8; BOOTP_FIXED_LEN];
        data[0] = op;
        data[1] = 1;
        data[2] = chaddr.len() as u8;
        data[4..8].copy_from_slice(&0xdead_beefu32.to_be_bytes());
        data[CHADDR_OFFSET..CHADDR_OFFSET + chaddr.len()].copy_from_slice(chaddr);
        data.extend_from_slice(&DHCP_MAGIC_COOKIE);
        if let Some(t) = message_type {
            data.extend_from_slice(&[OPTION_MESSAGE_TYPE, 1, t]);
        }
        data.push(OPTION_END);
        data
    }

    fn udp(src: u16, dst: u16, payload: &[u8]) -> Vec<u8> {
        let mut data = Vec::with_capacity(UDP_HEADER_LEN + payload.len());
        data.extend_from_slice(&src.to_be_bytes());
        data.extend_from_slice(&dst.to_be_bytes());
        data.extend_from_slice(&((UDP_HEADER_LEN + payload.len()) as u16).to_be_bytes());
        data.extend_from_slice(&[0, 0]);
        data.extend_from_slice(payload);
        data
    }

    fn ipv4(protocol: u8, payload: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; IPV4_MIN_HEADER_LEN];
        data[0] = 0x45;
        data[2..4].copy_from_slice(&((IPV4_MIN_HEADER_LEN + payload.len()) as u16).to_be_bytes());
        data[8] = 64;
        data[9] = protocol;
        data[12..16].copy_from_slice(&[0, 0, 0, 0]);
        data[16..20].copy_from_slice(&[255, 255, 255, 255]);
        data.extend_from_slice(payload);
        data
    }

    fn ethernet(ethertype: u16, payload: &[u8]) -> Vec<u8> {
        let mut data = vec![0xff; 6];
        data.extend_from_slice(&BUTTON_MAC);
        data.extend_from_slice(&ethertype.to_be_bytes());
        data.extend_from_slice(payload);
        data
    }

    fn discover_frame(chaddr: &[u8]) -> Vec<u8> {
        let payload = bootp(1, chaddr, Some(1));
        ethernet(ETHERTYPE_IPV4, &ipv4(IP_PROTO_UDP, &udp(68, 67, &payload)))
    }

    #[test]
    fn decodes_discover_over_ethernet() {
        let message = decode_frame(LinkLayer::Ethernet, &discover_frame(&BUTTON_MAC)).unwrap();
        assert_eq!(message.op, BootpOp::Request);
        assert_eq!(message.transaction_id, 0xdead_beef);
        assert_eq!(message.client_hw_addr, "fc:a6:67:b1:24:41");
        assert_eq!(message.message_type, Some(DhcpMessageType::Discover));
    }

    #[test]
    fn decodes_vlan_tagged_frame_with_padding() {
        let payload = bootp(1, &BUTTON_MAC, Some(3));
        let ip = ipv4(IP_PROTO_UDP, &udp(68, 67, &payload));
        let mut tagged = vec![0u8, 0x05];
        tagged.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        tagged.extend_from_slice(&ip);
        let mut frame = ethernet(ETHERTYPE_VLAN, &tagged);
        frame.extend_from_slice(&[0u8; 12]);

        let message = decode_frame(LinkLayer::Ethernet, &frame).unwrap();
        assert_eq!(message.client_hw_addr, "fc:a6:67:b1:24:41");
        assert_eq!(message.message_type, Some(DhcpMessageType::Request));
    }

    #[test]
    fn decodes_linux_cooked_and_raw_frames() {
        let ip = ipv4(IP_PROTO_UDP, &udp(67, 68, &bootp(2, &BUTTON_MAC, Some(5))));

        let mut sll = vec![0u8; LINUX_SLL_HEADER_LEN];
        sll[14..16].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        sll.extend_from_slice(&ip);
        let cooked = decode_frame(LinkLayer::LinuxSll, &sll).unwrap();
        assert_eq!(cooked.op, BootpOp::Reply);
        assert_eq!(cooked.message_type, Some(DhcpMessageType::Ack));

        let raw = decode_frame(LinkLayer::RawIpv4, &ip).unwrap();
        assert_eq!(raw, cooked);
    }

    #[test]
    fn message_type_is_optional() {
        let payload = bootp(1, &BUTTON_MAC, None);
        let frame = ethernet(ETHERTYPE_IPV4, &ipv4(IP_PROTO_UDP, &udp(68, 67, &payload)));
        let message = decode_frame(LinkLayer::Ethernet, &frame).unwrap();
        assert_eq!(message.message_type, None);
    }

    #[test]
    fn rejects_frames_that_are_not_dhcp() {
        let payload = bootp(1, &BUTTON_MAC, Some(1));

        let arp = ethernet(0x0806, &[0u8; 28]);
        assert_eq!(
            decode_frame(LinkLayer::Ethernet, &arp),
            Err(DecodeError::UnsupportedEtherType(0x0806))
        );

        let tcp = ethernet(ETHERTYPE_IPV4, &ipv4(6, &udp(68, 67, &payload)));
        assert_eq!(decode_frame(LinkLayer::Ethernet, &tcp), Err(DecodeError::NotUdp(6)));

        let dns = ethernet(ETHERTYPE_IPV4, &ipv4(IP_PROTO_UDP, &udp(5353, 53, &payload)));
        assert_eq!(
            decode_frame(LinkLayer::Ethernet, &dns),
            Err(DecodeError::NotBootp { src: 5353, dst: 53 })
        );

        let mut no_cookie = payload.clone();
        no_cookie[BOOTP_FIXED_LEN] = 0;
        let frame = ethernet(ETHERTYPE_IPV4, &ipv4(IP_PROTO_UDP, &udp(68, 67, &no_cookie)));
        assert_eq!(
            decode_frame(LinkLayer::Ethernet, &frame),
            Err(DecodeError::MissingMagicCookie)
        );
    }

    #[test]
    fn rejects_malformed_bootp_headers() {
        let mut bad_hlen = bootp(1, &BUTTON_MAC, Some(1));
        bad_hlen[2] = 17;
        let frame = ethernet(ETHERTYPE_IPV4, &ipv4(IP_PROTO_UDP, &udp(68, 67, &bad_hlen)));
        assert_eq!(
            decode_frame(LinkLayer::Ethernet, &frame),
            Err(DecodeError::BadHardwareAddrLength(17))
        );

        let mut bad_op = bootp(1, &BUTTON_MAC, Some(1));
        bad_op[0] = 9;
        let frame = ethernet(ETHERTYPE_IPV4, &ipv4(IP_PROTO_UDP, &udp(68, 67, &bad_op)));
        assert_eq!(decode_frame(LinkLayer::Ethernet, &frame), Err(DecodeError::UnknownOp(9)));

        let truncated = &discover_frame(&BUTTON_MAC)[..100];
        assert!(matches!(
            decode_frame(LinkLayer::Ethernet, truncated),
            Err(DecodeError::Truncated { layer: "bootp", .. })
        ));
    }

    #[test]
    fn rejects_fragments_and_ipv6() {
        let mut ip = ipv4(IP_PROTO_UDP, &udp(68, 67, &bootp(1, &BUTTON_MAC, Some(1))));
        ip[6..8].copy_from_slice(&0x0010u16.to_be_bytes());
        assert_eq!(decode_frame(LinkLayer::RawIpv4, &ip), Err(DecodeError::Fragment));

        let mut v6 = ipv4(IP_PROTO_UDP, &[]);
        v6[0] = 0x60;
        assert_eq!(decode_frame(LinkLayer::RawIpv4, &v6), Err(DecodeError::NotIpv4(6)));
    }
}

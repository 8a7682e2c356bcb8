use std::fmt;

use bytes::Bytes;

/// Tag byte(s) distinguishing the body of an F5 frame.
pub const TAG_IPV4: u8 = 0x21;
pub const TAG_IPV6: u8 = 0x57;
pub const TAG_PPP: [u8; 2] = [0xff, 0x03];

/// A decoded F5 frame body. The magic/length envelope itself is not part of
/// this type — see [`crate::codec::parser::Parser`] for the wire-level
/// encode/decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A raw IPv4 packet, tagged `0x21`.
    Ipv4(Bytes),
    /// A raw IPv6 packet, tagged `0x57`.
    Ipv6(Bytes),
    /// A PPP control or data frame, still carrying its own protocol number
    /// (LCP `0xc021`, IPCP `0x8021`, IPv6CP `0x8057`) but with the `0xFF
    /// 0x03` HDLC-transparent prefix stripped.
    Ppp(Bytes),
}

impl Frame {
    /// Length of the body this frame would serialize to, tag included.
    pub fn encoded_body_len(&self) -> usize {
        match self {
            Frame::Ipv4(p) => 1 + p.len(),
            Frame::Ipv6(p) => 1 + p.len(),
            Frame::Ppp(p) => TAG_PPP.len() + p.len(),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Ipv4(p) => write!(f, "Frame::Ipv4({} bytes)", p.len()),
            Frame::Ipv6(p) => write!(f, "Frame::Ipv6({} bytes)", p.len()),
            Frame::Ppp(p) => write!(f, "Frame::Ppp({} bytes)", p.len()),
        }
    }
}

//! The F5 framing codec (C1).
//!
//! Every byte exchanged with the gateway over the TLS/DTLS transport is
//! wrapped in a small envelope: `0xF5 0x00` magic, a big-endian `u16` body
//! length, then the body itself. The body's leading byte(s) tag what kind of
//! payload follows: `0x21` for a raw IPv4 packet, `0x57` for a raw IPv6
//! packet, or the HDLC-transparent `0xFF 0x03` prefix for an encapsulated
//! PPP frame (LCP/IPCP/IPv6CP control traffic). This mirrors
//! `codec::parser::Parser`'s static-method-parser-over-a-header-struct shape,
//! applied to the real F5 wire format instead of a made-up JSON/handshake
//! protocol.

pub mod frame;
pub mod parser;

pub use frame::Frame;
pub use parser::Parser;

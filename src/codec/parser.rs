//! Wire-level encode/decode for F5 frames.
//!
//! Grounded in `original_source/pkg/link_native.go`'s `fromF5`/`toF5`: magic
//! `0xf5 0x00`, a big-endian `u16` body length, then the tagged body. Kept
//! in `codec::parser::Parser`'s struct-of-static-methods shape
//! (`Parser::unmarshal`/`marshal`) rather than free functions, since that is
//! how this crate's sibling modules already expect to call into the codec.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::TunnelError;

use super::frame::{Frame, TAG_IPV4, TAG_IPV6, TAG_PPP};

pub const MAGIC: [u8; 2] = [0xf5, 0x00];
/// magic(2) + length(2)
pub const HDR_LEN: usize = 4;

pub struct Parser;

impl Parser {
    /// Attempts to decode one frame from the front of `buf`. Returns `Ok(None)`
    /// if `buf` does not yet hold a complete frame (the caller should read
    /// more bytes and retry), consuming nothing in that case. On success the
    /// consumed bytes are removed from `buf`.
    pub fn decode_one(buf: &mut BytesMut) -> Result<Option<Frame>, TunnelError> {
        if buf.len() < HDR_LEN {
            return Ok(None);
        }
        if buf[0..2] != MAGIC {
            return Err(TunnelError::BadMagic([buf[0], buf[1]]));
        }
        let body_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if buf.len() < HDR_LEN + body_len {
            return Ok(None);
        }

        let mut frame_buf = buf.split_to(HDR_LEN + body_len);
        frame_buf.advance(HDR_LEN);
        let body = frame_buf.freeze();

        Self::decode_body(body)
    }

    fn decode_body(body: Bytes) -> Result<Option<Frame>, TunnelError> {
        if body.is_empty() {
            return Err(TunnelError::ShortRead { need: 1, got: 0 });
        }
        if body[0] == TAG_IPV4 {
            return Ok(Some(Frame::Ipv4(body.slice(1..))));
        }
        if body[0] == TAG_IPV6 {
            return Ok(Some(Frame::Ipv6(body.slice(1..))));
        }
        if body.len() >= 2 && body[0] == TAG_PPP[0] && body[1] == TAG_PPP[1] {
            return Ok(Some(Frame::Ppp(body.slice(2..))));
        }
        Err(TunnelError::BadMagic([body[0], *body.get(1).unwrap_or(&0)]))
    }

    /// Serializes a frame onto the wire, including the magic/length header.
    pub fn encode(frame: &Frame) -> BytesMut {
        let body_len = frame.encoded_body_len();
        let mut out = BytesMut::with_capacity(HDR_LEN + body_len);
        out.put_slice(&MAGIC);
        out.put_u16(body_len as u16);
        match frame {
            Frame::Ipv4(payload) => {
                out.put_u8(TAG_IPV4);
                out.put_slice(payload);
            }
            Frame::Ipv6(payload) => {
                out.put_u8(TAG_IPV6);
                out.put_slice(payload);
            }
            Frame::Ppp(payload) => {
                out.put_slice(&TAG_PPP);
                out.put_slice(payload);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_ipv4_frame() {
        let frame = Frame::Ipv4(Bytes::from_static(b"hello ipv4"));
        let mut wire = Parser::encode(&frame);
        let decoded = Parser::decode_one(&mut wire).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(wire.is_empty());
    }

    #[test]
    fn round_trips_ppp_frame() {
        let frame = Frame::Ppp(Bytes::from_static(&[0xc0, 0x21, 0x01, 0x02]));
        let mut wire = Parser::encode(&frame);
        let decoded = Parser::decode_one(&mut wire).unwrap().unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn incomplete_frame_returns_none_without_consuming() {
        let frame = Frame::Ipv4(Bytes::from_static(b"0123456789"));
        let wire = Parser::encode(&frame);
        let mut partial = BytesMut::from(&wire[..wire.len() - 2]);
        let before_len = partial.len();
        let result = Parser::decode_one(&mut partial).unwrap();
        assert!(result.is_none());
        assert_eq!(partial.len(), before_len);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = BytesMut::from(&b"\x00\x00\x00\x01x"[..]);
        let err = Parser::decode_one(&mut buf).unwrap_err();
        assert!(matches!(err, TunnelError::BadMagic(_)));
    }
}

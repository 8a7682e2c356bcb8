//! End-to-end wire-level scenarios for the framing codec (C1) and PPP state
//! machine (C2), lifted directly from the fixed transcripts a real F5
//! gateway produces. Mirrors the teacher crate's `tests/
//! peer_integration_test.rs` style of asserting on exact wire bytes rather
//! than round-tripping through higher-level types.

use bytes::{Bytes, BytesMut};

use rustun::codec::{Frame, Parser};
use rustun::error::TunnelError;
use rustun::ppp::{Negotiator, PppEvent};

/// S1 — LCP Conf-Request handling: MTU/ACCM/Magic/PFC/ACFC options, id 7.
#[test]
fn s1_lcp_conf_request_handling() {
    // length = 4 (code+id+length) + 20 (options) = 24 = 0x18.
    let conf_request: &[u8] = &[
        0xc0, 0x21, 0x01, 0x07, 0x00, 0x18, 0x01, 0x04, 0x05, 0xdc, 0x02, 0x06, 0x00, 0x00, 0x00,
        0x00, 0x05, 0x06, 0xde, 0xad, 0xbe, 0xef, 0x07, 0x02, 0x08, 0x02,
    ];

    let mut neg = Negotiator::new(false);
    let outcome = neg.handle(conf_request).expect("well-formed Conf-Request");

    assert_eq!(neg.mtu, 0x05dc, "MTU option must be recorded verbatim");
    assert_eq!(outcome.to_send.len(), 2, "expect a Conf-Request echo plus a Magic-Number Conf-Rej");

    let Frame::Ppp(our_request) = &outcome.to_send[0] else { panic!("expected PPP frame") };
    assert_eq!(&our_request[0..2], &[0xc0, 0x21], "LCP protocol number");
    assert_eq!(our_request[2], 0x01, "our reply is itself a Conf-Request");
    assert_eq!(our_request[3], 7, "id mirrors the peer's current transaction");

    let Frame::Ppp(reject) = &outcome.to_send[1] else { panic!("expected PPP frame") };
    assert_eq!(reject[2], 0x04, "Magic-Number is rejected, never acknowledged");
    assert_eq!(reject[3], 7, "Conf-Rej uses the peer's id");
    assert_eq!(&reject[4..], &[0x00, 0x0a, 0x05, 0x06, 0xde, 0xad, 0xbe, 0xef], "rejected option carries the peer's Magic-Number bytes back unmodified");
}

/// S2 — IPCP assignment: Conf-Request -> Conf-Ack+Conf-Request -> Conf-Nack
/// -> retried Conf-Request -> Conf-Ack -> `Ipv4Up`.
#[test]
fn s2_ipcp_assignment_sequence() {
    let mut neg = Negotiator::new(false);

    let conf_request: &[u8] = &[0x80, 0x21, 0x01, 0x02, 0x00, 0x0a, 0x03, 0x06, 0x0a, 0x00, 0x00, 0x01];
    let outcome = neg.handle(conf_request).unwrap();
    assert_eq!(outcome.to_send.len(), 2);
    let Frame::Ppp(ack) = &outcome.to_send[0] else { panic!() };
    assert_eq!(&ack[0..4], &[0x80, 0x21, 0x02, 0x02]);
    assert_eq!(&ack[4..], &[0x00, 0x0a, 0x03, 0x06, 0x0a, 0x00, 0x00, 0x01]);
    let Frame::Ppp(req) = &outcome.to_send[1] else { panic!() };
    assert_eq!(&req[0..4], &[0x80, 0x21, 0x01, 0x02]);
    assert_eq!(&req[4..], &[0x00, 0x0a, 0x03, 0x06, 0x00, 0x00, 0x00, 0x00]);

    let conf_nack: &[u8] = &[0x80, 0x21, 0x03, 0x02, 0x00, 0x0a, 0x03, 0x06, 0x0a, 0x0a, 0x0a, 0x05];
    let outcome = neg.handle(conf_nack).unwrap();
    assert_eq!(outcome.to_send.len(), 1);
    let Frame::Ppp(retry) = &outcome.to_send[0] else { panic!() };
    assert_eq!(&retry[0..4], &[0x80, 0x21, 0x01, 0x02]);
    assert_eq!(&retry[4..], &[0x00, 0x0a, 0x03, 0x06, 0x0a, 0x0a, 0x0a, 0x05]);

    let conf_ack: &[u8] = &[0x80, 0x21, 0x02, 0x02, 0x00, 0x0a, 0x03, 0x06, 0x0a, 0x0a, 0x0a, 0x05];
    let outcome = neg.handle(conf_ack).unwrap();
    assert_eq!(outcome.events.len(), 1);
    match &outcome.events[0] {
        PppEvent::Ipv4Up { local, remote } => {
            assert_eq!(local.to_string(), "10.10.10.5");
            assert_eq!(remote.to_string(), "10.0.0.1");
        }
        other => panic!("expected Ipv4Up, got {other:?}"),
    }
    assert_eq!(neg.local_ipv4().unwrap().to_string(), "10.10.10.5");
    assert_eq!(neg.server_ipv4().unwrap().to_string(), "10.0.0.1");
}

/// S3 — IP packet forwarding: inbound F5 IPv4 frame decodes to the bare
/// IPv4 header with no prefix, and vice versa on encode.
#[test]
fn s3_ip_packet_forwarding() {
    let wire: &[u8] = &[
        0xf5, 0x00, 0x00, 0x15, 0x21, 0x45, 0x00, 0x00, 0x14, 0x00, 0x00, 0x00, 0x00, 0x40, 0x01,
        0xaa, 0xbb, 0x0a, 0x0a, 0x0a, 0x05, 0x08, 0x08, 0x08, 0x08,
    ];
    let mut buf = BytesMut::from(wire);
    let frame = Parser::decode_one(&mut buf).unwrap().unwrap();
    let Frame::Ipv4(packet) = frame else { panic!("expected IPv4 frame") };
    assert_eq!(packet[0] >> 4, 4, "forwarded packet starts with the raw IPv4 header");
    assert_eq!(packet.len(), 20);
    assert!(buf.is_empty());

    let outbound = Frame::Ipv4(Bytes::from_static(&[0x45; 20]));
    let encoded = Parser::encode(&outbound);
    assert_eq!(&encoded[0..4], &[0xf5, 0x00, 0x00, 0x15]);
    assert_eq!(encoded[4], 0x21, "IPv4 tag byte");
}

/// S4 — LCP Echo-Request is mirrored back as Echo-Reply with the same id
/// and magic payload.
#[test]
fn s4_lcp_echo_request() {
    let mut neg = Negotiator::new(false);
    let echo_request: &[u8] = &[0xc0, 0x21, 0x09, 0x42, 0x00, 0x08, 0xde, 0xad, 0xbe, 0xef];
    let outcome = neg.handle(echo_request).unwrap();
    let Frame::Ppp(reply) = &outcome.to_send[0] else { panic!() };
    assert_eq!(reply.as_ref(), &[0xc0, 0x21, 0x0a, 0x42, 0x00, 0x08, 0xde, 0xad, 0xbe, 0xef][..]);
}

/// S5 — a remote Terminate-Request is fatal and surfaces as
/// `PppNegotiationFailed`.
#[test]
fn s5_remote_terminate_is_fatal() {
    let mut neg = Negotiator::new(false);
    // length = 4 (code+id+length) + 2 (reason data) = 6.
    let terminate: &[u8] = &[0xc0, 0x21, 0x05, 0x33, 0x00, 0x06, 0x00, 0x17];
    let outcome = neg.handle(terminate).unwrap();
    assert_eq!(outcome.events.len(), 1);
    match outcome.events[0] {
        PppEvent::Terminated { id, reason_code } => {
            assert_eq!(id, 0x33, "must carry the peer's Terminate-Request identifier");
            assert_eq!(reason_code, 0x17, "must carry the peer's reason code");
        }
        ref other => panic!("expected Terminated, got {other:?}"),
    }
}

/// Testable property #1: encode is the left-inverse of decode for IP
/// packets, modulo the 1-byte tag.
#[test]
fn encode_decode_ipv4_round_trip() {
    let payload = Bytes::from(vec![0x45u8; 200]);
    let frame = Frame::Ipv4(payload.clone());
    let mut wire = Parser::encode(&frame);
    let decoded = Parser::decode_one(&mut wire).unwrap().unwrap();
    assert_eq!(decoded, Frame::Ipv4(payload));
}

/// Testable property #2: the decoder yields exactly the original frames in
/// order regardless of how the underlying stream fragments the bytes.
#[test]
fn stream_framing_idempotence_under_fragmentation() {
    let frames = vec![
        Frame::Ipv4(Bytes::from_static(b"first packet")),
        Frame::Ppp(Bytes::from_static(&[0xc0, 0x21, 0x09, 0x01, 0x00, 0x04])),
        Frame::Ipv6(Bytes::from_static(b"third packet, a bit longer this time")),
    ];

    let mut wire = BytesMut::new();
    for frame in &frames {
        wire.extend_from_slice(&Parser::encode(frame));
    }

    // Feed the decoder one byte at a time to simulate worst-case TCP
    // fragmentation; it must still yield exactly the three original frames,
    // in order, and nothing else.
    let mut decoded = Vec::new();
    let mut staged = BytesMut::new();
    let mut remaining = wire.as_ref();
    while !remaining.is_empty() {
        staged.extend_from_slice(&remaining[..1]);
        remaining = &remaining[1..];
        while let Some(frame) = Parser::decode_one(&mut staged).unwrap() {
            decoded.push(frame);
        }
    }

    assert_eq!(decoded, frames);
}

/// A bad magic must be reported, not silently skipped.
#[test]
fn bad_magic_is_reported() {
    let mut buf = BytesMut::from(&b"\xaa\xbb\x00\x01x"[..]);
    let err = Parser::decode_one(&mut buf).unwrap_err();
    assert!(matches!(err, TunnelError::BadMagic([0xaa, 0xbb])));
}

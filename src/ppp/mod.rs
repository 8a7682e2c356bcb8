//! Native PPP/LCP/IPCP/IPv6CP state machine (C2).
//!
//! No external `pppd` is spawned; this module speaks just enough of RFC
//! 1661/1332/5072 to bring up an IPv4 (and optionally IPv6) address with the
//! gateway, grounded frame-for-frame in
//! `original_source/pkg/link_native.go::processPPP`. A handful of
//! intentional quirks from that implementation are preserved rather than
//! "fixed", because a stricter client risks the gateway's pppd peer
//! behaving differently than it does against the real one:
//!
//! - the Magic-Number LCP option is always `ConfRej`ed, never acknowledged;
//! - outgoing Conf-Request frames reuse the *peer's* current identifier
//!   byte instead of keeping an independently incrementing counter;
//! - LCP Echo-Request/Reply is answered but no echo timeout is enforced —
//!   a silent peer does not by itself tear down the link.
//!
//! One behavior is intentionally *not* preserved: `processPPP` in the
//! original will retry an IPCP/IPv6CP Conf-Nack indefinitely. This state
//! machine bounds that retry (see [`Negotiator::MAX_NEGOTIATION_ATTEMPTS`])
//! so a pathological peer produces a [`TunnelError::PppNegotiationFailed`]
//! instead of a silent infinite loop.

pub mod options;

use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::Bytes;

use crate::codec::Frame;
use crate::error::TunnelError;

use options::{find, parse_options, Option_, OPT_ACCM, OPT_ACFC, OPT_INTERFACE_IDENTIFIER, OPT_IP_ADDRESS, OPT_MAGIC_NUMBER, OPT_MTU, OPT_PFC};

pub const PROTO_LCP: u16 = 0xc021;
pub const PROTO_IPCP: u16 = 0x8021;
pub const PROTO_IPV6CP: u16 = 0x8057;

pub mod code {
    pub const CONF_REQUEST: u8 = 0x01;
    pub const CONF_ACK: u8 = 0x02;
    pub const CONF_NACK: u8 = 0x03;
    pub const CONF_REJECT: u8 = 0x04;
    pub const TERMINATE_REQUEST: u8 = 0x05;
    pub const PROTOCOL_REJECT: u8 = 0x08;
    pub const ECHO_REQUEST: u8 = 0x09;
    pub const ECHO_REPLY: u8 = 0x0a;
}

/// A parsed LCP/IPCP/IPv6CP control packet: `Code | Identifier | Length |
/// Data`, with `Data` further parsed into TLV options where applicable.
#[derive(Debug, Clone)]
struct ControlPacket {
    code: u8,
    id: u8,
    data: Vec<u8>,
}

impl ControlPacket {
    fn parse(body: &[u8]) -> Option<ControlPacket> {
        if body.len() < 4 {
            return None;
        }
        let code = body[0];
        let id = body[1];
        let length = u16::from_be_bytes([body[2], body[3]]) as usize;
        if body.len() < length || length < 4 {
            return None;
        }
        Some(ControlPacket { code, id, data: body[4..length].to_vec() })
    }

    fn encode(&self, protocol: u16) -> Frame {
        let mut out = Vec::with_capacity(6 + self.data.len());
        out.extend_from_slice(&protocol.to_be_bytes());
        out.push(self.code);
        out.push(self.id);
        out.extend_from_slice(&((4 + self.data.len()) as u16).to_be_bytes());
        out.extend_from_slice(&self.data);
        Frame::Ppp(Bytes::from(out))
    }
}

fn encode_options(opts: &[Option_]) -> Vec<u8> {
    let mut out = Vec::new();
    for opt in opts {
        opt.encode(&mut out);
    }
    out
}

/// Link-up signals produced once negotiation on a given protocol converges.
#[derive(Debug, Clone)]
pub enum PppEvent {
    /// IPCP converged: the gateway acknowledged our local address.
    Ipv4Up { local: Ipv4Addr, remote: Ipv4Addr },
    /// IPv6CP converged.
    Ipv6Up { local: Ipv6Addr, remote: Ipv6Addr },
    /// The peer requested termination (LCP Terminate-Request), or
    /// negotiation otherwise concluded that the link should close. `id` is
    /// the Terminate-Request's own identifier byte and `reason_code` the
    /// 2-byte reason field from its data, both carried through so the
    /// eventual `TunnelError::PppNegotiationFailed` reports the peer's
    /// actual termination reason rather than a generic message.
    Terminated { id: u8, reason_code: u16 },
}

/// Outcome of feeding one incoming PPP frame to the negotiator: zero or
/// more frames to send back over the transport, plus zero or more
/// link-lifecycle events for the supervisor to act on.
#[derive(Debug, Default)]
pub struct Outcome {
    pub to_send: Vec<Frame>,
    pub events: Vec<PppEvent>,
}

impl Outcome {
    fn send(frame: Frame) -> Outcome {
        Outcome { to_send: vec![frame], events: Vec::new() }
    }

    fn event(event: PppEvent) -> Outcome {
        Outcome { to_send: Vec::new(), events: vec![event] }
    }

    fn empty() -> Outcome {
        Outcome::default()
    }
}

fn ipv6_from_interface_id(id: &[u8]) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets[0] = 0xfe;
    octets[1] = 0x80;
    octets[8..16].copy_from_slice(&id[..8.min(id.len())]);
    Ipv6Addr::from(octets)
}

/// Per-link negotiation state for LCP, IPCP, and (optionally) IPv6CP.
pub struct Negotiator {
    negotiate_ipv6: bool,
    pub mtu: u16,
    ipcp_attempts: u32,
    ipv6cp_attempts: u32,
    server_ipv4: Option<Ipv4Addr>,
    local_ipv4: Option<Ipv4Addr>,
    server_ipv6: Option<Ipv6Addr>,
    local_ipv6: Option<Ipv6Addr>,
}

impl Negotiator {
    /// Bound on Conf-Nack retries for IPCP/IPv6CP, see the module doc.
    pub const MAX_NEGOTIATION_ATTEMPTS: u32 = 10;

    pub fn new(negotiate_ipv6: bool) -> Negotiator {
        Negotiator {
            negotiate_ipv6,
            mtu: 1500,
            ipcp_attempts: 0,
            ipv6cp_attempts: 0,
            server_ipv4: None,
            local_ipv4: None,
            server_ipv6: None,
            local_ipv6: None,
        }
    }

    pub fn local_ipv4(&self) -> Option<Ipv4Addr> {
        self.local_ipv4
    }

    pub fn server_ipv4(&self) -> Option<Ipv4Addr> {
        self.server_ipv4
    }

    /// Handles one incoming `Frame::Ppp` payload (protocol number plus
    /// control packet, `0xFF 0x03` prefix already stripped by the codec).
    pub fn handle(&mut self, payload: &[u8]) -> Result<Outcome, TunnelError> {
        if payload.len() < 2 {
            return Err(TunnelError::PppProtocolUnknown(0));
        }
        let protocol = u16::from_be_bytes([payload[0], payload[1]]);
        let packet = ControlPacket::parse(&payload[2..])
            .ok_or(TunnelError::PppNegotiationFailed { id: 0, reason: "truncated control packet".into() })?;

        match protocol {
            PROTO_LCP => self.handle_lcp(packet),
            PROTO_IPCP => self.handle_ipcp(packet),
            PROTO_IPV6CP if self.negotiate_ipv6 => self.handle_ipv6cp(packet),
            other => Err(TunnelError::PppProtocolUnknown(other)),
        }
    }

    fn handle_lcp(&mut self, pkt: ControlPacket) -> Result<Outcome, TunnelError> {
        match pkt.code {
            code::CONF_REQUEST => {
                let opts = parse_options(&pkt.data).ok_or(TunnelError::PppNegotiationFailed {
                    id: pkt.id,
                    reason: "malformed LCP options".into(),
                })?;
                if let Some(mtu_opt) = find(&opts, OPT_MTU) {
                    if mtu_opt.value.len() == 2 {
                        self.mtu = u16::from_be_bytes([mtu_opt.value[0], mtu_opt.value[1]]);
                    }
                }

                let mut frames = Vec::new();

                // Propose our own ACCM/PFC/ACFC back to the peer, reusing
                // its identifier rather than an independent counter.
                let our_request = ControlPacket {
                    code: code::CONF_REQUEST,
                    id: pkt.id,
                    data: encode_options(&[
                        Option_::new(OPT_ACCM, [0, 0, 0, 0]),
                        Option_::new(OPT_PFC, []),
                        Option_::new(OPT_ACFC, []),
                    ]),
                };
                frames.push(our_request.encode(PROTO_LCP));

                // Magic-Number is always rejected, never acknowledged.
                if let Some(magic_opt) = find(&opts, OPT_MAGIC_NUMBER) {
                    let reject = ControlPacket {
                        code: code::CONF_REJECT,
                        id: pkt.id,
                        data: encode_options(&[Option_::new(OPT_MAGIC_NUMBER, magic_opt.value.clone())]),
                    };
                    frames.push(reject.encode(PROTO_LCP));
                }

                Ok(Outcome { to_send: frames, events: Vec::new() })
            }
            code::CONF_ACK => Ok(Outcome::empty()),
            code::CONF_NACK | code::CONF_REJECT => Err(TunnelError::PppNegotiationFailed {
                id: pkt.id,
                reason: "peer rejected LCP configuration".into(),
            }),
            code::ECHO_REQUEST => {
                let reply = ControlPacket { code: code::ECHO_REPLY, id: pkt.id, data: pkt.data };
                Ok(Outcome::send(reply.encode(PROTO_LCP)))
            }
            code::TERMINATE_REQUEST => {
                let reason_code = if pkt.data.len() >= 2 { u16::from_be_bytes([pkt.data[0], pkt.data[1]]) } else { 0 };
                Ok(Outcome::event(PppEvent::Terminated { id: pkt.id, reason_code }))
            }
            code::PROTOCOL_REJECT => Ok(Outcome::empty()),
            _ => Ok(Outcome::empty()),
        }
    }

    fn handle_ipcp(&mut self, pkt: ControlPacket) -> Result<Outcome, TunnelError> {
        match pkt.code {
            code::CONF_REQUEST => {
                let opts = parse_options(&pkt.data).ok_or(TunnelError::PppNegotiationFailed {
                    id: pkt.id,
                    reason: "malformed IPCP options".into(),
                })?;
                let addr_opt = find(&opts, OPT_IP_ADDRESS).ok_or(TunnelError::PppNegotiationFailed {
                    id: pkt.id,
                    reason: "IPCP Conf-Request missing IP-Address option".into(),
                })?;
                if addr_opt.value.len() != 4 {
                    return Err(TunnelError::PppNegotiationFailed { id: pkt.id, reason: "malformed IP-Address option".into() });
                }
                let remote = Ipv4Addr::new(addr_opt.value[0], addr_opt.value[1], addr_opt.value[2], addr_opt.value[3]);
                self.server_ipv4 = Some(remote);

                let ack = ControlPacket {
                    code: code::CONF_ACK,
                    id: pkt.id,
                    data: encode_options(&[addr_opt.clone()]),
                };
                let our_request = ControlPacket {
                    code: code::CONF_REQUEST,
                    id: pkt.id,
                    data: encode_options(&[Option_::new(OPT_IP_ADDRESS, [0, 0, 0, 0])]),
                };
                Ok(Outcome {
                    to_send: vec![ack.encode(PROTO_IPCP), our_request.encode(PROTO_IPCP)],
                    events: Vec::new(),
                })
            }
            code::CONF_ACK => {
                let opts = parse_options(&pkt.data).ok_or(TunnelError::PppNegotiationFailed {
                    id: pkt.id,
                    reason: "malformed IPCP options".into(),
                })?;
                let addr_opt = find(&opts, OPT_IP_ADDRESS).ok_or(TunnelError::PppNegotiationFailed {
                    id: pkt.id,
                    reason: "IPCP Conf-Ack missing IP-Address option".into(),
                })?;
                let local = Ipv4Addr::new(addr_opt.value[0], addr_opt.value[1], addr_opt.value[2], addr_opt.value[3]);
                self.local_ipv4 = Some(local);
                let remote = self.server_ipv4.unwrap_or(Ipv4Addr::UNSPECIFIED);
                Ok(Outcome::event(PppEvent::Ipv4Up { local, remote }))
            }
            code::CONF_NACK => {
                self.ipcp_attempts += 1;
                if self.ipcp_attempts > Self::MAX_NEGOTIATION_ATTEMPTS {
                    return Err(TunnelError::PppNegotiationFailed {
                        id: pkt.id,
                        reason: "too many IPCP Conf-Nack retries".into(),
                    });
                }
                let opts = parse_options(&pkt.data).ok_or(TunnelError::PppNegotiationFailed {
                    id: pkt.id,
                    reason: "malformed IPCP options".into(),
                })?;
                let addr_opt = find(&opts, OPT_IP_ADDRESS).ok_or(TunnelError::PppNegotiationFailed {
                    id: pkt.id,
                    reason: "IPCP Conf-Nack missing IP-Address option".into(),
                })?;
                let retry = ControlPacket {
                    code: code::CONF_REQUEST,
                    id: pkt.id,
                    data: encode_options(&[addr_opt.clone()]),
                };
                Ok(Outcome::send(retry.encode(PROTO_IPCP)))
            }
            code::CONF_REJECT => Err(TunnelError::PppNegotiationFailed {
                id: pkt.id,
                reason: "peer rejected IPCP configuration".into(),
            }),
            _ => Ok(Outcome::empty()),
        }
    }

    fn handle_ipv6cp(&mut self, pkt: ControlPacket) -> Result<Outcome, TunnelError> {
        match pkt.code {
            code::CONF_REQUEST => {
                let opts = parse_options(&pkt.data).ok_or(TunnelError::PppNegotiationFailed {
                    id: pkt.id,
                    reason: "malformed IPv6CP options".into(),
                })?;
                let id_opt = find(&opts, OPT_INTERFACE_IDENTIFIER).ok_or(TunnelError::PppNegotiationFailed {
                    id: pkt.id,
                    reason: "IPv6CP Conf-Request missing Interface-Identifier option".into(),
                })?;
                if id_opt.value.len() != 8 {
                    return Err(TunnelError::PppNegotiationFailed { id: pkt.id, reason: "malformed Interface-Identifier option".into() });
                }
                let remote = ipv6_from_interface_id(&id_opt.value);
                self.server_ipv6 = Some(remote);

                let ack = ControlPacket {
                    code: code::CONF_ACK,
                    id: pkt.id,
                    data: encode_options(&[id_opt.clone()]),
                };
                let our_request = ControlPacket {
                    code: code::CONF_REQUEST,
                    id: pkt.id,
                    data: encode_options(&[Option_::new(OPT_INTERFACE_IDENTIFIER, [0u8; 8])]),
                };
                Ok(Outcome {
                    to_send: vec![ack.encode(PROTO_IPV6CP), our_request.encode(PROTO_IPV6CP)],
                    events: Vec::new(),
                })
            }
            code::CONF_ACK => {
                let opts = parse_options(&pkt.data).ok_or(TunnelError::PppNegotiationFailed {
                    id: pkt.id,
                    reason: "malformed IPv6CP options".into(),
                })?;
                let id_opt = find(&opts, OPT_INTERFACE_IDENTIFIER).ok_or(TunnelError::PppNegotiationFailed {
                    id: pkt.id,
                    reason: "IPv6CP Conf-Ack missing Interface-Identifier option".into(),
                })?;
                let local = ipv6_from_interface_id(&id_opt.value);
                self.local_ipv6 = Some(local);
                let remote = self.server_ipv6.unwrap_or(Ipv6Addr::UNSPECIFIED);
                Ok(Outcome::event(PppEvent::Ipv6Up { local, remote }))
            }
            code::CONF_NACK => {
                self.ipv6cp_attempts += 1;
                if self.ipv6cp_attempts > Self::MAX_NEGOTIATION_ATTEMPTS {
                    return Err(TunnelError::PppNegotiationFailed {
                        id: pkt.id,
                        reason: "too many IPv6CP Conf-Nack retries".into(),
                    });
                }
                let opts = parse_options(&pkt.data).ok_or(TunnelError::PppNegotiationFailed {
                    id: pkt.id,
                    reason: "malformed IPv6CP options".into(),
                })?;
                let id_opt = find(&opts, OPT_INTERFACE_IDENTIFIER).ok_or(TunnelError::PppNegotiationFailed {
                    id: pkt.id,
                    reason: "IPv6CP Conf-Nack missing Interface-Identifier option".into(),
                })?;
                let retry = ControlPacket {
                    code: code::CONF_REQUEST,
                    id: pkt.id,
                    data: encode_options(&[id_opt.clone()]),
                };
                Ok(Outcome::send(retry.encode(PROTO_IPV6CP)))
            }
            code::CONF_REJECT => Err(TunnelError::PppNegotiationFailed {
                id: pkt.id,
                reason: "peer rejected IPv6CP configuration".into(),
            }),
            _ => Ok(Outcome::empty()),
        }
    }
}

/// Parses the raw `BytesMut` view of a `Frame::Ppp` payload into its wire
/// bytes; used by callers that already have a `Frame` rather than raw bytes.
pub fn payload_bytes(frame: &Frame) -> Option<&[u8]> {
    match frame {
        Frame::Ppp(b) => Some(b.as_ref()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lcp_conf_request(id: u8) -> Vec<u8> {
        let mut data = Vec::new();
        Option_::new(OPT_MTU, [0x05, 0xdc]).encode(&mut data);
        Option_::new(OPT_ACCM, [0, 0, 0, 0]).encode(&mut data);
        Option_::new(OPT_MAGIC_NUMBER, [1, 2, 3, 4]).encode(&mut data);
        Option_::new(OPT_PFC, []).encode(&mut data);
        Option_::new(OPT_ACFC, []).encode(&mut data);
        let pkt = ControlPacket { code: code::CONF_REQUEST, id, data };
        match pkt.encode(PROTO_LCP) {
            Frame::Ppp(b) => b.to_vec(),
            _ => unreachable!(),
        }
    }

    #[test]
    fn lcp_conf_request_rejects_magic_and_mirrors_id() {
        let mut neg = Negotiator::new(false);
        let outcome = neg.handle(&lcp_conf_request(7)).unwrap();
        assert_eq!(outcome.to_send.len(), 2);
        assert_eq!(neg.mtu, 0x05dc);

        let reject_frame = &outcome.to_send[1];
        match reject_frame {
            Frame::Ppp(b) => {
                assert_eq!(b[2], code::CONF_REJECT);
                assert_eq!(b[3], 7, "response identifier must mirror the peer's id");
            }
            _ => panic!("expected ppp frame"),
        }
    }

    #[test]
    fn ipcp_conf_request_then_ack_signals_ipv4_up() {
        let mut neg = Negotiator::new(false);

        let mut req_data = Vec::new();
        Option_::new(OPT_IP_ADDRESS, [10, 10, 0, 1]).encode(&mut req_data);
        let req = ControlPacket { code: code::CONF_REQUEST, id: 3, data: req_data };
        let payload = match req.encode(PROTO_IPCP) {
            Frame::Ppp(b) => b.to_vec(),
            _ => unreachable!(),
        };
        let outcome = neg.handle(&payload).unwrap();
        assert_eq!(outcome.to_send.len(), 2);
        assert_eq!(neg.server_ipv4(), Some(Ipv4Addr::new(10, 10, 0, 1)));

        let mut ack_data = Vec::new();
        Option_::new(OPT_IP_ADDRESS, [10, 10, 0, 55]).encode(&mut ack_data);
        let ack = ControlPacket { code: code::CONF_ACK, id: 3, data: ack_data };
        let payload = match ack.encode(PROTO_IPCP) {
            Frame::Ppp(b) => b.to_vec(),
            _ => unreachable!(),
        };
        let outcome = neg.handle(&payload).unwrap();
        assert_eq!(outcome.events.len(), 1);
        match &outcome.events[0] {
            PppEvent::Ipv4Up { local, remote } => {
                assert_eq!(*local, Ipv4Addr::new(10, 10, 0, 55));
                assert_eq!(*remote, Ipv4Addr::new(10, 10, 0, 1));
            }
            _ => panic!("expected Ipv4Up event"),
        }
        assert_eq!(neg.local_ipv4(), Some(Ipv4Addr::new(10, 10, 0, 55)));
    }

    #[test]
    fn lcp_echo_request_is_mirrored() {
        let mut neg = Negotiator::new(false);
        let pkt = ControlPacket { code: code::ECHO_REQUEST, id: 9, data: vec![1, 2, 3, 4] };
        let payload = match pkt.encode(PROTO_LCP) {
            Frame::Ppp(b) => b.to_vec(),
            _ => unreachable!(),
        };
        let outcome = neg.handle(&payload).unwrap();
        match &outcome.to_send[0] {
            Frame::Ppp(b) => {
                assert_eq!(b[2], code::ECHO_REPLY);
                assert_eq!(b[3], 9);
            }
            _ => panic!("expected ppp frame"),
        }
    }

    #[test]
    fn terminate_request_emits_terminated_event() {
        let mut neg = Negotiator::new(false);
        let pkt = ControlPacket { code: code::TERMINATE_REQUEST, id: 1, data: vec![] };
        let payload = match pkt.encode(PROTO_LCP) {
            Frame::Ppp(b) => b.to_vec(),
            _ => unreachable!(),
        };
        let outcome = neg.handle(&payload).unwrap();
        assert!(matches!(outcome.events[0], PppEvent::Terminated { id: 1, reason_code: 0 }));
    }

    #[test]
    fn ipcp_conf_nack_retries_are_bounded() {
        let mut neg = Negotiator::new(false);
        let mut nack_data = Vec::new();
        Option_::new(OPT_IP_ADDRESS, [10, 10, 0, 2]).encode(&mut nack_data);
        let nack = ControlPacket { code: code::CONF_NACK, id: 1, data: nack_data };
        let payload = match nack.encode(PROTO_IPCP) {
            Frame::Ppp(b) => b.to_vec(),
            _ => unreachable!(),
        };
        for _ in 0..Negotiator::MAX_NEGOTIATION_ATTEMPTS {
            neg.handle(&payload).unwrap();
        }
        let err = neg.handle(&payload).unwrap_err();
        assert!(matches!(err, TunnelError::PppNegotiationFailed { .. }));
    }
}

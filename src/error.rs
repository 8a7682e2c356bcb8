//! Error taxonomy for the tunnel data plane.
//!
//! Every fallible operation in [`crate::codec`], [`crate::ppp`],
//! [`crate::link`], [`crate::route`] and [`crate::resolv`] returns a
//! [`TunnelError`] rather than an opaque boxed error, so the link supervisor
//! can match on *kind* when deciding whether a failure is fatal to the whole
//! link or local to one worker.

use std::borrow::Cow;
use std::net::IpAddr;

/// Errors surfaced by the tunnel core.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    /// An F5 frame did not start with the `0xF5 0x00` magic.
    #[error("bad F5 frame magic: {0:02x?}")]
    BadMagic([u8; 2]),

    /// The transport was closed mid-frame.
    #[error("short read decoding F5 frame: need {need}, got {got}")]
    ShortRead { need: usize, got: usize },

    /// Transport or TUN I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The PPP/LCP/IPCP/IPv6CP exchange did not converge.
    #[error("PPP negotiation failed for id {id}: {reason}")]
    PppNegotiationFailed { id: u8, reason: Cow<'static, str> },

    /// A PPP frame carried a protocol number this crate does not implement.
    #[error("unknown PPP protocol 0x{0:04x}")]
    PppProtocolUnknown(u16),

    /// Host network configuration (route or resolver) could not be applied.
    #[error("failed to configure {what}: {source}")]
    ConfigureFailed {
        what: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The gateway could not provide a usable session (bad/expired cookie,
    /// excluded client, etc).
    #[error("session rejected by gateway: {0}")]
    SessionRejected(String),

    /// A route lookup for `dst` returned no usable gateway.
    #[error("no route to {0}")]
    NoRoute(IpAddr),

    /// Process received a termination signal.
    #[error("signal requested shutdown")]
    SignalExit,
}

pub type Result<T> = std::result::Result<T, TunnelError>;

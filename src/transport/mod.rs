//! Transport (C4): TLS/DTLS connection to the gateway, carrying F5 frames.
//!
//! The `Transport` trait generalizes `network::Connection`
//! (`read_frame`/`write_frame`/`close`/`peer_addr`) from a plain-TCP-plus-
//! app-layer-crypto design to a TLS/DTLS-secured one: the F5 wire format
//! itself carries no confidentiality, it relies entirely on the outer
//! TLS/DTLS channel, which is why this crate does not carry forward
//! `crypto::Block` for transport traffic (see DESIGN.md).

pub mod dtls;
pub mod tls;

use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{Frame, Parser};
use crate::config::Renegotiation;
use crate::error::TunnelError;
use crate::session::TunnelEndpoints;

/// Protocol-agnostic interface to the gateway tunnel connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Reads one complete F5 frame, blocking until available.
    async fn read_frame(&mut self) -> Result<Frame, TunnelError>;

    /// Encodes and writes one F5 frame.
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), TunnelError>;

    /// Closes the underlying connection.
    async fn close(&mut self);

    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Splits the transport into independent read/write halves, mirroring
    /// `TunDevice::split`. The link supervisor holds these separately so an
    /// in-flight inbound read (which blocks until the peer sends something)
    /// never shares a lock with an outbound write.
    fn split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>);
}

/// The read half of a split [`Transport`].
#[async_trait]
pub trait TransportReader: Send {
    async fn read_frame(&mut self) -> Result<Frame, TunnelError>;
}

/// The write half of a split [`Transport`].
#[async_trait]
pub trait TransportWriter: Send {
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), TunnelError>;
    async fn close(&mut self);
}

/// Generic `TransportReader` over any split async-read half, shared by the
/// TLS and DTLS transports.
pub struct FrameReader<R> {
    pub(crate) inner: R,
    pub(crate) buffer: BytesMut,
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> TransportReader for FrameReader<R> {
    async fn read_frame(&mut self) -> Result<Frame, TunnelError> {
        loop {
            if let Some(frame) = Parser::decode_one(&mut self.buffer)? {
                return Ok(frame);
            }
            let n = self.inner.read_buf(&mut self.buffer).await?;
            if n == 0 {
                return Err(TunnelError::ShortRead { need: 1, got: 0 });
            }
        }
    }
}

/// Generic `TransportWriter` over any split async-write half.
pub struct FrameWriter<W> {
    pub(crate) inner: W,
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> TransportWriter for FrameWriter<W> {
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), TunnelError> {
        let wire = Parser::encode(frame);
        self.inner.write_all(&wire).await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.inner.shutdown().await;
    }
}

/// Parameters needed to dial the gateway and perform the session handshake,
/// grounded in `original_source/pkg/link.go::initConnection`'s URL
/// construction (`GET /myvpn?sess=...&hostname=...&...`).
pub struct DialParams {
    pub server: String,
    pub session_id: String,
    pub ur_z: String,
    pub hdlc_framing: bool,
    pub ipv4: bool,
    pub ipv6: bool,
    pub insecure_tls: bool,
    pub ca_cert: Option<std::path::PathBuf>,
    pub renegotiation: Renegotiation,
    pub use_dtls: bool,
    pub dtls_port: u16,
}

/// Dials the gateway over TLS or DTLS per `params.use_dtls`, performs the
/// HTTP/1.0 session-acquisition request, and returns a boxed [`Transport`]
/// plus the tunnel endpoint addresses the gateway handed back.
pub async fn dial(params: &DialParams) -> Result<(Box<dyn Transport>, TunnelEndpoints), TunnelError> {
    if params.use_dtls {
        let (transport, endpoints) = dtls::dial(params).await?;
        Ok((Box::new(transport), endpoints))
    } else {
        let (transport, endpoints) = tls::dial(params).await?;
        Ok((Box::new(transport), endpoints))
    }
}

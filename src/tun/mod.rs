//! The TUN endpoint (C3).
//!
//! Grounded in `utils::device::Device`, which already wraps the `tun`
//! crate's async device behind a `tokio::select!` read/write loop. This
//! crate skips that module's channel-handler indirection (`DeviceHandler`
//! plus two `mpsc` channels) because the link supervisor talks to the TUN
//! device directly from its own worker tasks (see [`crate::link`]), the
//! same way `network::tcp_connection::TcpConnection` exposes
//! `read_frame`/`write_frame` directly rather than through channels. The
//! device is only created once IPCP (and, if negotiated, IPv6CP) has
//! converged and a local/remote address pair is known, rather than
//! configured with a static `DeviceConfig` up front.

use std::net::Ipv4Addr;

use tun::{AbstractDevice, AsyncDevice};

use crate::error::TunnelError;

/// Addressing handed to the TUN device once PPP negotiation converges.
pub struct TunAddressing {
    pub local_ipv4: Ipv4Addr,
    pub peer_ipv4: Ipv4Addr,
    pub mtu: u16,
}

/// A created, configured, `up` TUN device.
pub struct TunDevice {
    name: String,
    dev: AsyncDevice,
}

impl TunDevice {
    /// Creates and brings up a TUN interface with a point-to-point address,
    /// mirroring `Device::run`'s setup of `tun::Configuration`.
    pub fn create(addressing: &TunAddressing) -> Result<TunDevice, TunnelError> {
        let mut config = tun::Configuration::default();
        config
            .address(addressing.local_ipv4.to_string())
            .destination(addressing.peer_ipv4.to_string())
            .netmask("255.255.255.255")
            .mtu(addressing.mtu)
            .up();

        #[cfg(target_os = "linux")]
        config.platform_config(|platform_config| {
            platform_config.ensure_root_privileges(true);
        });

        let dev = tun::create_as_async(&config)
            .map_err(|e| TunnelError::ConfigureFailed { what: "tun device", source: e.into() })?;
        let name = dev.tun_name().unwrap_or_else(|_| "utun".to_string());
        Ok(TunDevice { name, dev })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reads one raw IP packet from the TUN device into `buf`, returning the
    /// number of bytes read.
    pub async fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize, TunnelError> {
        use tokio::io::AsyncReadExt;
        Ok(self.dev.read(buf).await?)
    }

    /// Writes one raw IP packet to the TUN device.
    pub async fn write_packet(&mut self, packet: &[u8]) -> Result<(), TunnelError> {
        use tokio::io::AsyncWriteExt;
        self.dev.write_all(packet).await?;
        Ok(())
    }

    /// Splits the device into independent read/write halves so the link
    /// supervisor can run its tun->transport and transport->tun workers as
    /// genuinely separate tasks (see [`crate::link`]).
    pub fn split(self) -> (TunReader, TunWriter) {
        let (read_half, write_half) = tokio::io::split(self.dev);
        (
            TunReader { name: self.name.clone(), inner: read_half },
            TunWriter { name: self.name, inner: write_half },
        )
    }
}

pub struct TunReader {
    name: String,
    inner: tokio::io::ReadHalf<AsyncDevice>,
}

impl TunReader {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize, TunnelError> {
        use tokio::io::AsyncReadExt;
        Ok(self.inner.read(buf).await?)
    }
}

pub struct TunWriter {
    name: String,
    inner: tokio::io::WriteHalf<AsyncDevice>,
}

impl TunWriter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn write_packet(&mut self, packet: &[u8]) -> Result<(), TunnelError> {
        use tokio::io::AsyncWriteExt;
        self.inner.write_all(packet).await?;
        Ok(())
    }
}

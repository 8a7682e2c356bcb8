//! Resolver handler (C7): multi-backend DNS configuration.
//!
//! Grounded in `original_source/vendor/github.com/kayrus/tuncfg/resolv/*.go`
//! and `pkg/resolv_all.go`. Backends are tried in the same priority order
//! the original uses — NetworkManager, then systemd-resolved, then ChromeOS
//! shill, then a direct `/etc/resolv.conf` rewrite — each of which is
//! independently idempotent (`set` followed immediately by `set` again, or
//! by `restore`, must not error or leave the file/link in a
//! half-configured state).

pub mod file;
#[cfg(target_os = "macos")]
pub mod macos;
pub mod network_manager;
pub mod shill;
pub mod systemd_resolved;
#[cfg(target_os = "windows")]
pub mod windows;

use std::net::Ipv4Addr;

use async_trait::async_trait;

use crate::error::TunnelError;

/// What to program into the host resolver for the lifetime of the link.
pub struct ResolverSettings<'a> {
    pub tun_name: &'a str,
    pub servers: &'a [Ipv4Addr],
    pub search_suffix: Option<&'a str>,
}

/// A single DNS configuration mechanism.
#[async_trait]
pub trait ResolverBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap, side-effect-free check for whether this backend's mechanism
    /// is present on the host (e.g. the systemd-resolved D-Bus name is
    /// owned, or `/etc/resolv.conf` resolves to `127.0.0.53`).
    async fn is_available(&self) -> bool;

    async fn set(&self, settings: &ResolverSettings<'_>) -> Result<(), TunnelError>;

    async fn restore(&self) -> Result<(), TunnelError>;
}

/// Picks the first available backend and applies `settings` through it,
/// returning the backend so the caller can `restore()` through the same one
/// at teardown: selection is re-evaluated each `set` call, but a given
/// link's `restore` always targets the backend chosen at `set` time.
pub async fn configure(settings: &ResolverSettings<'_>) -> Result<Box<dyn ResolverBackend>, TunnelError> {
    let candidates: Vec<Box<dyn ResolverBackend>> = vec![
        Box::new(network_manager::NetworkManagerBackend::new()),
        Box::new(systemd_resolved::SystemdResolvedBackend::new()),
        Box::new(shill::ShillBackend::new()),
        #[cfg(target_os = "macos")]
        Box::new(macos::MacosBackend::new()),
        #[cfg(target_os = "windows")]
        Box::new(windows::WindowsBackend::new()),
        Box::new(file::ResolvConfBackend::new()),
    ];

    for backend in candidates {
        if backend.is_available().await {
            backend.set(settings).await?;
            return Ok(backend);
        }
    }

    Err(TunnelError::ConfigureFailed {
        what: "resolver",
        source: anyhow::anyhow!("no supported DNS configuration backend found on this host"),
    })
}

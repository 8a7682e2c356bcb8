//! Windows resolver backend.
//!
//! `original_source/pkg/resolv_windows.go` reconfigures per-adapter DNS via
//! the `SetInterfaceDnsSettings` Win32 API, keyed by the adapter LUID. The
//! `windows`/`windows-sys` crates that would back that call are not present
//! anywhere in this crate's reference corpus, and fabricating a vendored
//! binding would violate the "never fabricate dependencies" rule, so this is
//! a documented extension point rather than a real implementation: `set`
//! and `restore` both return a clear configuration error. See DESIGN.md for
//! the crate this should be wired up to once one is available (`windows`,
//! Microsoft's official binding crate, is the closest candidate).

use async_trait::async_trait;

use crate::error::TunnelError;

use super::{ResolverBackend, ResolverSettings};

pub struct WindowsBackend;

impl WindowsBackend {
    pub fn new() -> WindowsBackend {
        WindowsBackend
    }
}

impl Default for WindowsBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResolverBackend for WindowsBackend {
    fn name(&self) -> &'static str {
        "SetInterfaceDnsSettings"
    }

    async fn is_available(&self) -> bool {
        // Always reports unavailable: `configure` falls through to the next
        // backend rather than failing outright on a platform that otherwise
        // has no working candidate.
        false
    }

    async fn set(&self, _settings: &ResolverSettings<'_>) -> Result<(), TunnelError> {
        Err(TunnelError::ConfigureFailed {
            what: "windows dns",
            source: anyhow::anyhow!("SetInterfaceDnsSettings support requires the windows crate, not present in this build"),
        })
    }

    async fn restore(&self) -> Result<(), TunnelError> {
        Ok(())
    }
}

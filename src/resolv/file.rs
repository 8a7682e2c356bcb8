//! Direct `/etc/resolv.conf` rewrite backend, the fallback of last resort.
//!
//! Grounded in `original_source/pkg/resolv_all.go::configureDNS`/
//! `deConfigureDNS`: read the current file into memory before overwriting
//! it, restore the saved bytes verbatim on teardown.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::TunnelError;

use super::{ResolverBackend, ResolverSettings};

const RESOLV_PATH: &str = "/etc/resolv.conf";

pub struct ResolvConfBackend {
    path: PathBuf,
    backup: Mutex<Option<Vec<u8>>>,
}

impl ResolvConfBackend {
    pub fn new() -> ResolvConfBackend {
        ResolvConfBackend { path: PathBuf::from(RESOLV_PATH), backup: Mutex::new(None) }
    }

    /// Builds a backend targeting an arbitrary path instead of
    /// `/etc/resolv.conf`, used by tests to exercise `set`/`restore` without
    /// touching real system state.
    #[cfg(test)]
    pub fn with_path(path: PathBuf) -> ResolvConfBackend {
        ResolvConfBackend { path, backup: Mutex::new(None) }
    }
}

impl Default for ResolvConfBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResolverBackend for ResolvConfBackend {
    fn name(&self) -> &'static str {
        "resolv.conf"
    }

    async fn is_available(&self) -> bool {
        self.path.exists()
    }

    async fn set(&self, settings: &ResolverSettings<'_>) -> Result<(), TunnelError> {
        let original = tokio::fs::read(&self.path)
            .await
            .map_err(|e| TunnelError::ConfigureFailed { what: "read resolv.conf", source: e.into() })?;
        *self.backup.lock().unwrap() = Some(original);

        let mut contents = String::from("# written by rustun\n");
        for server in settings.servers {
            contents.push_str(&format!("nameserver {server}\n"));
        }
        if let Some(suffix) = settings.search_suffix {
            contents.push_str(&format!("search {suffix}\n"));
        }

        tokio::fs::write(&self.path, contents)
            .await
            .map_err(|e| TunnelError::ConfigureFailed { what: "write resolv.conf", source: e.into() })?;
        Ok(())
    }

    async fn restore(&self) -> Result<(), TunnelError> {
        let backup = self.backup.lock().unwrap().take();
        if let Some(original) = backup {
            tokio::fs::write(&self.path, original)
                .await
                .map_err(|e| TunnelError::ConfigureFailed { what: "restore resolv.conf", source: e.into() })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_restore_is_byte_identical() {
        let path = std::env::temp_dir().join(format!("rustun-resolv-test-{}", std::process::id()));
        tokio::fs::write(&path, b"# original system resolv.conf\nnameserver 192.168.1.1\n").await.unwrap();

        let backend = ResolvConfBackend::with_path(path.clone());
        let original = tokio::fs::read(&path).await.unwrap();

        let settings = ResolverSettings {
            tun_name: "tun0",
            servers: &["10.10.0.1".parse().unwrap()],
            search_suffix: Some("corp.example.com"),
        };
        backend.set(&settings).await.unwrap();
        let rewritten = tokio::fs::read(&path).await.unwrap();
        assert_ne!(rewritten, original, "set must actually change the file");
        assert!(String::from_utf8_lossy(&rewritten).contains("nameserver 10.10.0.1"));

        backend.restore().await.unwrap();
        let restored = tokio::fs::read(&path).await.unwrap();
        assert_eq!(restored, original, "restore must leave the file byte-identical to its pre-set contents");

        tokio::fs::remove_file(&path).await.unwrap();
    }
}

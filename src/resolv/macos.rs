//! macOS backend via `networksetup`, grounded in
//! `original_source/pkg/resolv_darwin.go`'s shelling to the same tool.
//! Applies to every service `networksetup -listnetworkserviceorder`
//! reports, not just the active one, matching spec.md §4.7's description
//! of the original iterating the whole service order list.

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::TunnelError;

use super::{ResolverBackend, ResolverSettings};

pub struct MacosBackend;

impl MacosBackend {
    pub fn new() -> MacosBackend {
        MacosBackend
    }
}

impl Default for MacosBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResolverBackend for MacosBackend {
    fn name(&self) -> &'static str {
        "networksetup"
    }

    async fn is_available(&self) -> bool {
        cfg!(target_os = "macos")
    }

    async fn set(&self, settings: &ResolverSettings<'_>) -> Result<(), TunnelError> {
        for service in list_services().await? {
            let mut args = vec!["-setdnsservers".to_string(), service.clone()];
            args.extend(settings.servers.iter().map(|s| s.to_string()));
            run(&args).await?;
            if let Some(suffix) = settings.search_suffix {
                run(&["-setsearchdomains".to_string(), service, suffix.to_string()]).await?;
            }
        }
        Ok(())
    }

    async fn restore(&self) -> Result<(), TunnelError> {
        for service in list_services().await? {
            run(&["-setdnsservers".to_string(), service.clone(), "empty".to_string()]).await?;
            run(&["-setsearchdomains".to_string(), service, "empty".to_string()]).await?;
        }
        Ok(())
    }
}

/// Parses the service names out of `networksetup -listnetworkserviceorder`,
/// e.g. lines of the form `(1) Wi-Fi` (an asterisk after the index marks a
/// disabled service, which networksetup still accepts DNS changes for, so
/// it is not filtered out here).
fn parse_service_order(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            let rest = line.strip_prefix('(')?;
            let (_, rest) = rest.split_once(')')?;
            let name = rest.trim();
            if name.is_empty() {
                None
            } else {
                Some(name.to_string())
            }
        })
        .collect()
}

async fn list_services() -> Result<Vec<String>, TunnelError> {
    let output = Command::new("networksetup")
        .arg("-listnetworkserviceorder")
        .output()
        .await
        .map_err(|e| TunnelError::ConfigureFailed { what: "networksetup", source: e.into() })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        return Err(TunnelError::ConfigureFailed { what: "networksetup", source: anyhow::anyhow!(stderr) });
    }
    Ok(parse_service_order(&String::from_utf8_lossy(&output.stdout)))
}

async fn run(args: &[String]) -> Result<(), TunnelError> {
    let output = Command::new("networksetup")
        .args(args)
        .output()
        .await
        .map_err(|e| TunnelError::ConfigureFailed { what: "networksetup", source: e.into() })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        return Err(TunnelError::ConfigureFailed { what: "networksetup", source: anyhow::anyhow!(stderr) });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_service_order_output() {
        let text = "An asterisk (*) denotes that a network service is disabled.\n(1) Wi-Fi\n(Hardware Port: Wi-Fi, Device: en0)\n\n(2) Ethernet\n(Hardware Port: Ethernet, Device: en1)\n\n(3) *Thunderbolt Bridge\n(Hardware Port: Thunderbolt Bridge, Device: bridge0)\n";
        let services = parse_service_order(text);
        assert_eq!(services, vec!["Wi-Fi", "Ethernet", "*Thunderbolt Bridge"]);
    }
}

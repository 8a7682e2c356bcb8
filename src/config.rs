//! Persisted client configuration.
//!
//! Loaded once at startup from `$HOME/.gof5/config.toml` (or a path given on
//! the CLI) and threaded into [`crate::link::connect`]. Mirrors the shape of
//! the original client's YAML config, translated to TOML to match the rest
//! of this crate's serde usage.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use ipnet::Ipv4Net;
use serde::Deserialize;

fn default_driver() -> String {
    "tun".to_string()
}

fn default_pppd_args() -> Vec<String> {
    Vec::new()
}

/// TLS renegotiation policy, spec.md §4.4's three-valued knob. Some F5
/// deployments renegotiate mid-session to switch to a client certificate;
/// kept as a config field even though `rustls` (unlike the original
/// client's TLS stack) refuses to support renegotiation at all, TLS 1.2
/// renegotiation having a history of downgrade and injection attacks. See
/// `transport::tls::build_tls_config` for how a non-`Never` value is
/// surfaced rather than silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub enum Renegotiation {
    #[default]
    Never,
    OnceAsClient,
    FreelyAsClient,
}

/// Top level config file schema.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// TUN driver to use. Only `"tun"` is implemented; kept as a field since
    /// the original supports a `wireguard` driver this crate does not.
    #[serde(default = "default_driver")]
    pub driver: String,

    /// Static DNS servers to use instead of the ones the gateway hands out.
    #[serde(default)]
    pub dns: Vec<Ipv4Addr>,

    /// Extra search suffix appended after the gateway-provided one.
    #[serde(default)]
    pub override_dns_suffix: Option<String>,

    /// Additional subnets to route through the tunnel, beyond the default
    /// "everything but reserved ranges and the server's exclusions" set.
    #[serde(default)]
    pub routes: Vec<Ipv4Net>,

    /// Arguments that would be passed to an external pppd; kept only so a
    /// config file written for the original client still parses. This crate
    /// negotiates PPP natively and ignores the values beyond validating the
    /// field exists.
    #[serde(default = "default_pppd_args")]
    pub pppd_args: Vec<String>,

    /// Skip TLS certificate verification against the gateway.
    #[serde(default)]
    pub insecure_tls: bool,

    /// Use DTLS/UDP transport instead of TLS/TCP when the gateway offers it.
    #[serde(default)]
    pub dtls: bool,

    /// Negotiate IPv6CP in addition to IPCP.
    #[serde(default)]
    pub ipv6: bool,

    /// Skip resolver reconfiguration entirely.
    #[serde(default)]
    pub disable_dns: bool,

    /// Rewrite `/etc/resolv.conf` directly instead of going through a
    /// D-Bus-managed resolver (NetworkManager, systemd-resolved).
    #[serde(default)]
    pub rewrite_resolv: bool,

    /// TLS renegotiation policy (some F5 deployments require it).
    #[serde(default)]
    pub renegotiation: Renegotiation,

    /// Path to a PEM CA bundle used instead of the system trust store.
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            driver: default_driver(),
            dns: Vec::new(),
            override_dns_suffix: None,
            routes: Vec::new(),
            pppd_args: default_pppd_args(),
            insecure_tls: false,
            dtls: false,
            ipv6: false,
            disable_dns: false,
            rewrite_resolv: false,
            renegotiation: Renegotiation::Never,
            ca_cert: None,
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file. Grounded in
    /// `client::config::load`, which does the same `toml::from_str` over a
    /// struct with serde defaults.
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Default config file location, `$HOME/.gof5/config.toml`.
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/root".to_string());
        PathBuf::from(home).join(".gof5").join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_partial_config_with_defaults() {
        let path = std::env::temp_dir().join(format!("rustun-config-test-{}.toml", std::process::id()));
        std::fs::write(&path, "insecure_tls = true\nipv6 = true\ndns = [\"10.10.0.1\"]\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert!(config.insecure_tls);
        assert!(config.ipv6);
        assert_eq!(config.dns, vec!["10.10.0.1".parse::<Ipv4Addr>().unwrap()]);
        assert_eq!(config.driver, "tun", "unset fields fall back to their defaults");
        assert!(!config.dtls);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn rejects_malformed_toml() {
        let path = std::env::temp_dir().join(format!("rustun-config-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "this is not valid toml = = =").unwrap();
        assert!(Config::load(&path).is_err());
        std::fs::remove_file(&path).unwrap();
    }
}

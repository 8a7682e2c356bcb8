//! Thin CLI entry point over the tunnel core library.
//!
//! Grounded in `client::main::Args`/`rustun::cmd::client::main` (clap derive
//! over a flat flag list, `tracing_subscriber` initialized before anything
//! else runs). The HTTP/TLS portal login that would normally produce a
//! [`rustun::session::SessionInfo`] is out of scope for this crate (see
//! spec.md §1); this binary accepts the handful of fields that login flow
//! would otherwise hand the core directly (`--session-id`, `--z`) so the
//! tunnel core can be exercised end to end without a portal.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use rustun::config::Config;
use rustun::link;
use rustun::session::SessionInfo;

/// Native F5 BIG-IP Edge SSL-VPN tunnel client.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Gateway host/IP to dial.
    #[arg(long)]
    server: String,

    /// Session-Id cookie value obtained from the portal login.
    #[arg(long)]
    session_id: String,

    /// The `Z` token obtained from the portal's connect.php3 response.
    #[arg(long, default_value = "")]
    z: String,

    /// Path to the TOML config file, defaults to `$HOME/.gof5/config.toml`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Skip TLS certificate verification.
    #[arg(long)]
    insecure_tls: bool,

    /// Negotiate IPv6CP in addition to IPCP.
    #[arg(long)]
    ipv6: bool,

    /// Use DTLS/UDP transport instead of TLS/TCP.
    #[arg(long)]
    dtls: bool,

    /// Enable debug-level logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Required once per process before any `rustls::ClientConfig` is built.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let default_level = if args.debug { LevelFilter::DEBUG } else { LevelFilter::INFO };
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(EnvFilter::builder().with_default_directive(default_level.into()).from_env_lossy())
            .with_line_number(true)
            .with_file(true)
            .finish(),
    )?;

    let config_path = args.config.unwrap_or_else(Config::default_path);
    let mut config = if config_path.exists() {
        Config::load(&config_path)?
    } else {
        tracing::debug!(path = %config_path.display(), "no config file found, using defaults");
        Config::default()
    };
    config.insecure_tls |= args.insecure_tls;
    config.ipv6 |= args.ipv6;
    config.dtls |= args.dtls;

    let server_ips = resolve_server(&args.server)?;

    let session = SessionInfo {
        session_id: args.session_id,
        ur_z: args.z,
        server: args.server.clone(),
        tls_port: 443,
        dtls_port: None,
        dtls_allowed: false,
        dns_servers: Vec::new(),
        dns_suffix: None,
        exclude_subnets: Vec::new(),
        ipv6: config.ipv6,
    };

    tracing::info!(server = %args.server, "connecting");
    link::connect(config, session, server_ips).await?;
    tracing::info!("tunnel closed cleanly");
    Ok(())
}

/// Resolves the gateway hostname to its IPv4 addresses, used both to dial
/// the TLS transport and to install the pin routes (C6) that keep the
/// transport itself off the tunneled route set.
fn resolve_server(server: &str) -> anyhow::Result<Vec<Ipv4Addr>> {
    use std::net::ToSocketAddrs;
    let addrs = (server, 443u16)
        .to_socket_addrs()
        .map_err(|e| anyhow::anyhow!("failed to resolve {server}: {e}"))?;
    let ips: Vec<Ipv4Addr> = addrs
        .filter_map(|addr| match addr.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .collect();
    if ips.is_empty() {
        anyhow::bail!("could not resolve any IPv4 address for {server}");
    }
    Ok(ips)
}

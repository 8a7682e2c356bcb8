pub mod codec;
pub mod config;
pub mod error;
pub mod link;
pub mod ppp;
pub mod resolv;
pub mod route;
pub mod session;
pub mod transport;
pub mod tun;

pub use error::{Result, TunnelError};

/// Generic boxed error for the outermost fallible entry points, kept for the
/// same reason the rest of the crate keeps `anyhow` around: session
/// acquisition and CLI glue sit outside the typed `TunnelError` taxonomy.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

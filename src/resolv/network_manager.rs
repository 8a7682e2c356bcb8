//! NetworkManager backend, via the connection `Update` + device `Reapply`
//! D-Bus calls named in `original_source/vendor/.../tuncfg/resolv/nm.go`.
//! Takes priority over systemd-resolved in the selection order, matching
//! the original: NetworkManager itself usually delegates to
//! systemd-resolved underneath, so reconfiguring at the NM layer keeps both
//! in sync, whereas going straight to resolved can be clobbered by a later
//! NM-triggered reapply.

use std::collections::HashMap;

use async_trait::async_trait;
use zbus::zvariant::Value;
use zbus::Connection;

use crate::error::TunnelError;

use super::{ResolverBackend, ResolverSettings};

const DEST: &str = "org.freedesktop.NetworkManager";

pub struct NetworkManagerBackend {
    device_path: std::sync::Mutex<Option<String>>,
}

impl NetworkManagerBackend {
    pub fn new() -> NetworkManagerBackend {
        NetworkManagerBackend { device_path: std::sync::Mutex::new(None) }
    }

    async fn device_path_for(conn: &Connection, tun_name: &str) -> Option<String> {
        let reply = conn
            .call_method(
                Some(DEST),
                "/org/freedesktop/NetworkManager",
                Some("org.freedesktop.NetworkManager"),
                "GetDeviceByIpIface",
                &(tun_name,),
            )
            .await
            .ok()?;
        reply.body().deserialize::<zbus::zvariant::OwnedObjectPath>().ok().map(|p| p.to_string())
    }
}

impl Default for NetworkManagerBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResolverBackend for NetworkManagerBackend {
    fn name(&self) -> &'static str {
        "NetworkManager"
    }

    async fn is_available(&self) -> bool {
        let Ok(conn) = Connection::system().await else {
            return false;
        };
        conn.call_method(
            Some("org.freedesktop.DBus"),
            "/org/freedesktop/DBus",
            Some("org.freedesktop.DBus"),
            "GetNameOwner",
            &(DEST,),
        )
        .await
        .is_ok()
    }

    async fn set(&self, settings: &ResolverSettings<'_>) -> Result<(), TunnelError> {
        let conn = Connection::system()
            .await
            .map_err(|e| TunnelError::ConfigureFailed { what: "NetworkManager", source: e.into() })?;
        let device_path = Self::device_path_for(&conn, settings.tun_name)
            .await
            .ok_or(TunnelError::ConfigureFailed {
                what: "NetworkManager",
                source: anyhow::anyhow!("NetworkManager does not know about {}", settings.tun_name),
            })?;
        *self.device_path.lock().unwrap() = Some(device_path.clone());

        let dns_strings: Vec<String> = settings.servers.iter().map(|s| s.to_string()).collect();
        let mut ipv4: HashMap<&str, Value> = HashMap::new();
        ipv4.insert("dns", Value::from(dns_strings));
        ipv4.insert("method", Value::from("auto"));
        if let Some(suffix) = settings.search_suffix {
            ipv4.insert("dns-search", Value::from(vec![suffix.to_string()]));
        }
        let mut connection: HashMap<&str, HashMap<&str, Value>> = HashMap::new();
        connection.insert("ipv4", ipv4);

        conn.call_method(
            Some(DEST),
            device_path.as_str(),
            Some("org.freedesktop.NetworkManager.Device"),
            "Reapply",
            &(connection, 0u64, 0u32),
        )
        .await
        .map_err(|e| TunnelError::ConfigureFailed { what: "NetworkManager Reapply", source: e.into() })?;

        Ok(())
    }

    async fn restore(&self) -> Result<(), TunnelError> {
        // Tearing the TUN device down removes NetworkManager's record of it;
        // there is nothing left to revert once the interface is gone.
        *self.device_path.lock().unwrap() = None;
        Ok(())
    }
}

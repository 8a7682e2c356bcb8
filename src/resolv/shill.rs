//! ChromeOS `shill` backend, via the D-Bus calls named in
//! `original_source/vendor/github.com/kayrus/tuncfg/resolv/shill.go`:
//! `org.chromium.flimflam.Manager.GetProperties` to find the default
//! service, then `Service.SetProperty("StaticIPConfig", …)` on it. Tried
//! after systemd-resolved and before the `/etc/resolv.conf` rewrite, the
//! same position the original gives it (ChromeOS's own system resolver
//! routes through whatever `shill` programs into the active service, so
//! there is no lower-level interface-scoped mechanism to prefer over it
//! the way NetworkManager/resolved have `Reapply`/`SetLinkDNS`).

use std::collections::HashMap;

use async_trait::async_trait;
use zbus::zvariant::{OwnedValue, Value};
use zbus::Connection;

use crate::error::TunnelError;

use super::{ResolverBackend, ResolverSettings};

const DEST: &str = "org.chromium.flimflam";

pub struct ShillBackend {
    service_path: std::sync::Mutex<Option<String>>,
}

impl ShillBackend {
    pub fn new() -> ShillBackend {
        ShillBackend { service_path: std::sync::Mutex::new(None) }
    }

    async fn default_service(conn: &Connection) -> Option<String> {
        let reply = conn
            .call_method(Some(DEST), "/", Some("org.chromium.flimflam.Manager"), "GetProperties", &())
            .await
            .ok()?;
        let props = reply.body().deserialize::<HashMap<String, OwnedValue>>().ok()?;
        let value: &Value = props.get("DefaultService")?;
        let Value::ObjectPath(path) = value else {
            return None;
        };
        let path = path.to_string();
        if path.is_empty() {
            None
        } else {
            Some(path)
        }
    }

    async fn set_static_ip_config(
        conn: &Connection,
        service_path: &str,
        name_servers: Option<Vec<String>>,
        search_domains: Vec<String>,
    ) -> Result<(), TunnelError> {
        let mut props: HashMap<&str, Value> = HashMap::new();
        if let Some(servers) = name_servers {
            props.insert("NameServers", Value::from(servers));
        }
        props.insert("SearchDomains", Value::from(search_domains));

        conn.call_method(
            Some(DEST),
            service_path,
            Some("org.chromium.flimflam.Service"),
            "SetProperty",
            &("StaticIPConfig", props),
        )
        .await
        .map_err(|e| TunnelError::ConfigureFailed { what: "shill SetProperty", source: e.into() })?;
        Ok(())
    }
}

impl Default for ShillBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResolverBackend for ShillBackend {
    fn name(&self) -> &'static str {
        "shill"
    }

    async fn is_available(&self) -> bool {
        let Ok(conn) = Connection::system().await else {
            return false;
        };
        Self::default_service(&conn).await.is_some()
    }

    async fn set(&self, settings: &ResolverSettings<'_>) -> Result<(), TunnelError> {
        let conn = Connection::system()
            .await
            .map_err(|e| TunnelError::ConfigureFailed { what: "shill", source: e.into() })?;
        let service_path = Self::default_service(&conn).await.ok_or(TunnelError::ConfigureFailed {
            what: "shill",
            source: anyhow::anyhow!("no default shill service"),
        })?;

        let suffixes: Vec<String> = settings.search_suffix.map(|s| vec![s.to_string()]).unwrap_or_default();
        let servers: Vec<String> = settings.servers.iter().map(|s| s.to_string()).collect();

        Self::set_static_ip_config(&conn, &service_path, Some(servers), suffixes).await?;
        *self.service_path.lock().unwrap() = Some(service_path);
        Ok(())
    }

    async fn restore(&self) -> Result<(), TunnelError> {
        let Some(service_path) = self.service_path.lock().unwrap().take() else {
            return Ok(());
        };
        let conn = Connection::system()
            .await
            .map_err(|e| TunnelError::ConfigureFailed { what: "shill", source: e.into() })?;
        // The original clears SearchDomains back to empty rather than
        // restoring a prior value; shill's SetProperty on StaticIPConfig
        // has no working "clear whole struct" call (see shill.go's
        // commented-out `ClearProperty` attempt), so empty is the best
        // available restore target.
        Self::set_static_ip_config(&conn, &service_path, None, Vec::new()).await
    }
}

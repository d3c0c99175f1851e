//! Per-process endpoint identifier (`host:application:port`)

use crate::config::CoordinatorConfig;

use once_cell::sync::OnceCell;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use tracing::{debug, info};

/// Identity of this running instance, computed once on first use
#[derive(Debug)]
pub struct EndpointIdentity {
    host: Option<String>,
    application: String,
    port: u16,
    identifier: OnceCell<String>,
}

impl EndpointIdentity {
    pub fn new(host: Option<String>, application: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.filter(|h| !h.trim().is_empty()),
            application: application.into(),
            port,
            identifier: OnceCell::new(),
        }
    }

    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self::new(config.host.clone(), config.application_name.clone(), config.port)
    }

    /// The endpoint identifier; never changes once computed
    pub fn identifier(&self) -> &str {
        self.identifier.get_or_init(|| {
            let host = self.host.clone().unwrap_or_else(|| local_address().to_string());
            let identifier = format!("{}:{}:{}", host, self.application, self.port);
            info!("Endpoint identifier: {}", identifier);
            identifier
        })
    }

    pub fn application(&self) -> &str {
        &self.application
    }
}

/// Address of the interface used for outbound traffic.
///
/// Connecting a UDP socket only selects a route; nothing is sent.
fn local_address() -> IpAddr {
    let route = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
        Ok(socket.local_addr()?.ip())
    };

    route().unwrap_or_else(|e| {
        debug!("Local address detection failed: {}", e);
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    })
}

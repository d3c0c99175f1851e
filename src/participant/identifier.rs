//! Node identifiers and the directory of known remote nodes

use crate::error::{TccError, TccResult};

use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Parsed `host:application:port` endpoint identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeIdentifier {
    raw: String,
    host: String,
    application: String,
    port: u16,
}

impl NodeIdentifier {
    /// Parse an identifier; blank input is not an identifier at all
    pub fn parse(identifier: &str) -> TccResult<Option<Self>> {
        if identifier.trim().is_empty() {
            return Ok(None);
        }
        identifier.parse().map(Some)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn remote_addr(&self) -> RemoteAddr {
        RemoteAddr {
            host: self.host.clone(),
            port: self.port,
        }
    }

    pub fn remote_node(&self) -> RemoteNode {
        RemoteNode {
            host: self.host.clone(),
            service_key: self.application.clone(),
            port: self.port,
        }
    }
}

impl FromStr for NodeIdentifier {
    type Err = TccError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let invalid = |message: &str| TccError::InvalidIdentifier {
            identifier: raw.to_string(),
            message: message.to_string(),
        };

        // The host may itself contain ':' (IPv6), so split from the right.
        let mut parts = raw.rsplitn(3, ':');
        let port = parts.next().ok_or_else(|| invalid("missing port"))?;
        let application = parts.next().ok_or_else(|| invalid("missing application"))?;
        let host = parts.next().ok_or_else(|| invalid("missing host"))?;

        if host.is_empty() || application.is_empty() {
            return Err(invalid("expected host:application:port"));
        }
        let port = port.parse().map_err(|_| invalid("port is not a number"))?;

        Ok(Self {
            raw: raw.to_string(),
            host: host.to_string(),
            application: application.to_string(),
            port,
        })
    }
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Network address part of an identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RemoteAddr {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for RemoteAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Node qualifier: which application instance lives at an address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RemoteNode {
    pub host: String,
    pub service_key: String,
    pub port: u16,
}

/// Every remote node this process has resolved, by address
#[derive(Default)]
pub struct RemoteNodeDirectory {
    nodes: DashMap<RemoteAddr, RemoteNode>,
}

impl RemoteNodeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, addr: RemoteAddr, node: RemoteNode) {
        self.nodes.insert(addr, node);
    }

    pub fn get(&self, addr: &RemoteAddr) -> Option<RemoteNode> {
        self.nodes.get(addr).map(|n| n.value().clone())
    }

    pub fn remove(&self, addr: &RemoteAddr) -> Option<RemoteNode> {
        self.nodes.remove(addr).map(|(_, node)| node)
    }

    /// Known instances of one application
    pub fn nodes_of(&self, application: &str) -> Vec<RemoteNode> {
        self.nodes
            .iter()
            .filter(|entry| entry.value().service_key == application)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

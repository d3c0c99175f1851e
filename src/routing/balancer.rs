//! Candidate instances and the load-balancing rule applied to them

use crate::config::{BalancerRule, RoutingConfig};
use crate::error::{TccError, TccResult};

use dashmap::DashMap;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One reachable instance of a logical service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

impl Server {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Server {
    type Err = TccError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |message: &str| TccError::Config(format!("invalid server {:?}: {}", s, message));
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(|| invalid("expected host:port"))?;
        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        let port = port.parse().map_err(|_| invalid("bad port"))?;
        Ok(Server::new(host, port))
    }
}

/// Discovery source: every currently known instance of a service
pub trait ServerList: Send + Sync {
    fn all_servers(&self, service: &str) -> Vec<Server>;
}

/// In-process server list, fed from configuration or by an external watcher
#[derive(Default)]
pub struct StaticServerList {
    services: DashMap<String, Vec<Server>>,
}

impl StaticServerList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the list from the `routing.services` table
    pub fn from_config(config: &RoutingConfig) -> TccResult<Self> {
        let list = Self::new();
        for (service, entries) in &config.services {
            let servers = entries
                .iter()
                .map(|entry| entry.parse())
                .collect::<TccResult<Vec<Server>>>()?;
            list.set(service.clone(), servers);
        }
        Ok(list)
    }

    pub fn set(&self, service: impl Into<String>, servers: Vec<Server>) {
        self.services.insert(service.into(), servers);
    }

    pub fn services(&self) -> usize {
        self.services.len()
    }
}

impl ServerList for StaticServerList {
    fn all_servers(&self, service: &str) -> Vec<Server> {
        self.services
            .get(service)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }
}

/// Picks one instance out of a candidate set
pub trait LoadBalancerRule: Send + Sync {
    fn choose_server(&self, key: Option<&str>, servers: &[Server]) -> Option<Server>;
}

#[derive(Default)]
pub struct RoundRobinRule {
    next: AtomicUsize,
}

impl RoundRobinRule {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancerRule for RoundRobinRule {
    fn choose_server(&self, _key: Option<&str>, servers: &[Server]) -> Option<Server> {
        if servers.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % servers.len();
        Some(servers[index].clone())
    }
}

/// Hashes the request key onto the candidate set
#[derive(Default)]
pub struct KeyHashRule {
    keyless: RoundRobinRule,
}

impl KeyHashRule {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancerRule for KeyHashRule {
    fn choose_server(&self, key: Option<&str>, servers: &[Server]) -> Option<Server> {
        let Some(key) = key else {
            return self.keyless.choose_server(None, servers);
        };
        if servers.is_empty() {
            return None;
        }
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % servers.len() as u64) as usize;
        Some(servers[index].clone())
    }
}

/// Build the configured built-in rule
pub fn rule_from_config(config: &RoutingConfig) -> Arc<dyn LoadBalancerRule> {
    match config.rule {
        BalancerRule::RoundRobin => Arc::new(RoundRobinRule::new()),
        BalancerRule::KeyHash => Arc::new(KeyHashRule::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin_cycles() {
        let rule = RoundRobinRule::new();
        let servers = vec![Server::new("a", 1), Server::new("b", 2), Server::new("c", 3)];

        let picks: Vec<_> = (0..6)
            .map(|_| rule.choose_server(None, &servers).unwrap().host)
            .collect();
        assert_eq!(picks, ["a", "b", "c", "a", "b", "c"]);
        assert!(rule.choose_server(None, &[]).is_none());
    }

    #[test]
    fn test_key_hash_is_stable_per_key() {
        let rule = KeyHashRule::new();
        let servers = vec![Server::new("a", 1), Server::new("b", 2), Server::new("c", 3)];

        let first = rule.choose_server(Some("order-42"), &servers).unwrap();
        for _ in 0..5 {
            assert_eq!(rule.choose_server(Some("order-42"), &servers), Some(first.clone()));
        }
        assert!(rule.choose_server(Some("order-42"), &[]).is_none());

        let keyless: Vec<_> = (0..3)
            .map(|_| rule.choose_server(None, &servers).unwrap().host)
            .collect();
        assert_eq!(keyless, ["a", "b", "c"]);
    }

    #[test]
    fn test_parse_server() {
        assert_eq!("10.0.0.1:8080".parse::<Server>().unwrap(), Server::new("10.0.0.1", 8080));
        assert!("10.0.0.1".parse::<Server>().is_err());
        assert!(":80".parse::<Server>().is_err());
        assert!("host:http".parse::<Server>().is_err());
    }

    #[test]
    fn test_static_list_unknown_service_is_empty() {
        let list = StaticServerList::new();
        list.set("orderSvc", vec![Server::new("a", 1)]);
        assert_eq!(list.all_servers("orderSvc").len(), 1);
        assert!(list.all_servers("payoutSvc").is_empty());
    }

    #[test]
    fn test_from_config() {
        let mut config = RoutingConfig::default();
        config.services.insert(
            "stockSvc".to_string(),
            vec!["10.0.0.1:7000".to_string(), "10.0.0.2:7000".to_string()],
        );

        let list = StaticServerList::from_config(&config).unwrap();
        assert_eq!(list.services(), 1);
        assert_eq!(list.all_servers("stockSvc")[1], Server::new("10.0.0.2", 7000));

        config
            .services
            .insert("payoutSvc".to_string(), vec!["nowhere".to_string()]);
        assert!(StaticServerList::from_config(&config).is_err());
    }
}

//! Resolution of node identifiers to participant handles

use super::{NodeIdentifier, ParticipantTransport, RemoteNodeDirectory, RemoteParticipant};
use crate::config::ResolverConfig;
use crate::error::TccResult;
use crate::routing::AffinityTable;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

struct CachedParticipant {
    participant: Arc<RemoteParticipant>,
    cached_at: Instant,
}

/// Maps node identifiers to remote participant handles.
///
/// In stateless mode one handle per application is cached; concurrent first
/// resolutions agree on a single handle.
pub struct ParticipantResolver {
    stateful: bool,
    ttl: Option<Duration>,
    transport: Arc<dyn ParticipantTransport>,
    directory: Arc<RemoteNodeDirectory>,
    affinities: Arc<AffinityTable>,
    participants: DashMap<String, CachedParticipant>,
}

impl ParticipantResolver {
    pub fn new(
        config: &ResolverConfig,
        transport: Arc<dyn ParticipantTransport>,
        directory: Arc<RemoteNodeDirectory>,
        affinities: Arc<AffinityTable>,
    ) -> Self {
        Self {
            stateful: config.stateful,
            ttl: config.stateless_ttl(),
            transport,
            directory,
            affinities,
            participants: DashMap::new(),
        }
    }

    /// Resolve per the configured mode. Blank identifiers resolve to `None`.
    pub fn resolve(&self, identifier: &str) -> TccResult<Option<Arc<RemoteParticipant>>> {
        if self.stateful {
            self.resolve_stateful(identifier)
        } else {
            self.resolve_stateless(identifier)
        }
    }

    /// Fresh handle bound to exactly this identifier; never cached
    pub fn resolve_stateful(&self, identifier: &str) -> TccResult<Option<Arc<RemoteParticipant>>> {
        let Some(node) = NodeIdentifier::parse(identifier)? else {
            return Ok(None);
        };

        self.directory.put(node.remote_addr(), node.remote_node());
        debug!("Resolved stateful participant {}", node);
        Ok(Some(Arc::new(RemoteParticipant::new(
            node,
            true,
            self.transport.clone(),
            self.affinities.clone(),
        ))))
    }

    /// Cached handle for the identifier's application
    pub fn resolve_stateless(&self, identifier: &str) -> TccResult<Option<Arc<RemoteParticipant>>> {
        let Some(node) = NodeIdentifier::parse(identifier)? else {
            return Ok(None);
        };

        // The entry lock makes check-then-insert atomic per application.
        let participant = match self.participants.entry(node.application().to_string()) {
            Entry::Occupied(mut entry) => {
                if self.is_expired(entry.get()) {
                    info!("Cached participant for {} expired", node.application());
                    let cached = self.build_stateless(node);
                    let participant = cached.participant.clone();
                    entry.insert(cached);
                    participant
                } else {
                    crate::metrics::record_resolver_cache(true);
                    entry.get().participant.clone()
                }
            }
            Entry::Vacant(entry) => {
                let cached = self.build_stateless(node);
                let participant = cached.participant.clone();
                entry.insert(cached);
                participant
            }
        };

        Ok(Some(participant))
    }

    /// Drop the cached handle of an application, e.g. after a redeployment
    pub fn invalidate(&self, application: &str) -> bool {
        let removed = self.participants.remove(application).is_some();
        if removed {
            info!("Invalidated cached participant for {}", application);
        }
        removed
    }

    pub fn cached(&self, application: &str) -> Option<Arc<RemoteParticipant>> {
        self.participants
            .get(application)
            .map(|c| c.value().participant.clone())
    }

    pub fn cached_participants(&self) -> usize {
        self.participants.len()
    }

    pub fn is_stateful(&self) -> bool {
        self.stateful
    }

    fn is_expired(&self, cached: &CachedParticipant) -> bool {
        self.ttl
            .map(|ttl| cached.cached_at.elapsed() >= ttl)
            .unwrap_or(false)
    }

    fn build_stateless(&self, node: NodeIdentifier) -> CachedParticipant {
        crate::metrics::record_resolver_cache(false);
        self.directory.put(node.remote_addr(), node.remote_node());
        debug!("Resolved stateless participant for {}", node.application());
        CachedParticipant {
            participant: Arc::new(RemoteParticipant::new(
                node,
                false,
                self.transport.clone(),
                self.affinities.clone(),
            )),
            cached_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participant::{ParticipantRequest, RemoteCoordinator};
    use async_trait::async_trait;
    use std::thread;

    struct NullTransport;

    #[async_trait]
    impl ParticipantTransport for NullTransport {
        async fn send(&self, _request: ParticipantRequest) -> TccResult<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    fn resolver(config: ResolverConfig) -> (Arc<RemoteNodeDirectory>, ParticipantResolver) {
        let directory = Arc::new(RemoteNodeDirectory::new());
        let resolver = ParticipantResolver::new(
            &config,
            Arc::new(NullTransport),
            directory.clone(),
            Arc::new(AffinityTable::new()),
        );
        (directory, resolver)
    }

    fn stateless() -> ResolverConfig {
        ResolverConfig::default()
    }

    #[test]
    fn test_blank_identifier_resolves_to_none() {
        let (_, resolver) = resolver(stateless());
        assert!(resolver.resolve("").unwrap().is_none());
        assert!(resolver.resolve_stateful("  ").unwrap().is_none());
        assert_eq!(resolver.cached_participants(), 0);
    }

    #[test]
    fn test_stateless_caches_first_resolution() {
        let (directory, resolver) = resolver(stateless());

        let first = resolver.resolve("10.0.0.1:orderSvc:8080").unwrap().unwrap();
        let second = resolver.resolve("10.0.0.2:orderSvc:8080").unwrap().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.identifier(), "10.0.0.1:orderSvc:8080");
        assert!(!first.is_stateful());
        // only the resolution that built the handle registers its node
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_concurrent_stateless_resolution_agrees() {
        let (_, resolver) = resolver(stateless());
        let resolver = Arc::new(resolver);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let resolver = resolver.clone();
                thread::spawn(move || {
                    resolver
                        .resolve(&format!("10.0.0.{}:orderSvc:8080", i))
                        .unwrap()
                        .unwrap()
                })
            })
            .collect();

        let resolved: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let cached = resolver.cached("orderSvc").unwrap();
        for participant in &resolved {
            assert!(Arc::ptr_eq(participant, &cached));
        }
        assert_eq!(resolver.cached_participants(), 1);
    }

    #[test]
    fn test_applications_cached_independently() {
        let (_, resolver) = resolver(stateless());

        let payout = resolver.resolve("10.0.0.3:payoutSvc:9000").unwrap().unwrap();
        let order = resolver.resolve("10.0.0.1:orderSvc:8080").unwrap().unwrap();

        assert!(!Arc::ptr_eq(&payout, &order));
        assert!(Arc::ptr_eq(&resolver.cached("payoutSvc").unwrap(), &payout));
        assert_eq!(resolver.cached_participants(), 2);
    }

    #[test]
    fn test_stateful_never_caches() {
        let (directory, resolver) = resolver(ResolverConfig {
            stateful: true,
            ..Default::default()
        });

        let first = resolver.resolve("10.0.0.1:orderSvc:8080").unwrap().unwrap();
        let second = resolver.resolve("10.0.0.1:orderSvc:8080").unwrap().unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(first.is_stateful());
        assert_eq!(resolver.cached_participants(), 0);
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_invalidate_allows_replacement() {
        let (_, resolver) = resolver(stateless());

        let old = resolver.resolve("10.0.0.1:orderSvc:8080").unwrap().unwrap();
        assert!(resolver.invalidate("orderSvc"));
        assert!(!resolver.invalidate("orderSvc"));

        let new = resolver.resolve("10.0.0.9:orderSvc:8080").unwrap().unwrap();
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(new.identifier(), "10.0.0.9:orderSvc:8080");
    }

    #[test]
    fn test_expired_entry_is_replaced() {
        let (_, resolver) = resolver(stateless());
        let resolver = ParticipantResolver {
            ttl: Some(Duration::ZERO),
            ..resolver
        };

        let old = resolver.resolve("10.0.0.1:orderSvc:8080").unwrap().unwrap();
        let new = resolver.resolve("10.0.0.2:orderSvc:8080").unwrap().unwrap();
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(resolver.cached_participants(), 1);
    }

    #[test]
    fn test_malformed_identifier_is_error() {
        let (_, resolver) = resolver(stateless());
        assert!(resolver.resolve("orderSvc").is_err());
    }
}

//! Composition root: one instance of every process-wide component

use crate::config::Settings;
use crate::error::TccResult;
use crate::invocation::{ContextId, InvocationRegistry};
use crate::participant::{
    HttpParticipantTransport, ParticipantResolver, ParticipantTransport, RemoteNodeDirectory,
};
use crate::propagation::{EndpointIdentity, PropagationCodec};
use crate::recovery::{RecoveryWorker, TransactionRecovery};
use crate::routing::{
    rule_from_config, AffinityRouter, AffinityTable, InterceptorScope, LoadBalancerRule,
    ServerList,
};
use crate::transaction::TransactionXid;

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Wires the registry, codec, router, resolver and recovery worker together
pub struct TccRuntime {
    settings: Settings,
    endpoint: Arc<EndpointIdentity>,
    registry: Arc<InvocationRegistry>,
    codec: Arc<PropagationCodec>,
    router: Arc<AffinityRouter>,
    directory: Arc<RemoteNodeDirectory>,
    resolver: Arc<ParticipantResolver>,
    worker: Arc<RecoveryWorker>,
}

impl TccRuntime {
    /// Build the runtime with the HTTP participant transport and the
    /// configured balancing rule
    pub fn new(
        settings: Settings,
        recovery: Arc<dyn TransactionRecovery>,
        servers: Arc<dyn ServerList>,
    ) -> TccResult<Self> {
        let rule = rule_from_config(&settings.routing);
        Self::with_rule(settings, recovery, servers, rule)
    }

    /// Build the runtime with the HTTP participant transport and a
    /// caller-supplied balancing rule
    pub fn with_rule(
        settings: Settings,
        recovery: Arc<dyn TransactionRecovery>,
        servers: Arc<dyn ServerList>,
        rule: Arc<dyn LoadBalancerRule>,
    ) -> TccResult<Self> {
        let (endpoint, registry, codec, router) = Self::request_path(&settings, rule);

        let transport = Arc::new(HttpParticipantTransport::new(
            settings.participant.scheme.clone(),
            Duration::from_millis(settings.participant.request_timeout_ms),
            router.clone(),
            servers,
            codec.clone(),
        )?);

        Ok(Self::assemble(
            settings, endpoint, registry, codec, router, transport, recovery,
        ))
    }

    /// Build the runtime over a caller-supplied participant transport
    pub fn with_transport(
        settings: Settings,
        recovery: Arc<dyn TransactionRecovery>,
        transport: Arc<dyn ParticipantTransport>,
    ) -> Self {
        let rule = rule_from_config(&settings.routing);
        let (endpoint, registry, codec, router) = Self::request_path(&settings, rule);
        Self::assemble(settings, endpoint, registry, codec, router, transport, recovery)
    }

    #[allow(clippy::type_complexity)]
    fn request_path(
        settings: &Settings,
        rule: Arc<dyn LoadBalancerRule>,
    ) -> (
        Arc<EndpointIdentity>,
        Arc<InvocationRegistry>,
        Arc<PropagationCodec>,
        Arc<AffinityRouter>,
    ) {
        let endpoint = Arc::new(EndpointIdentity::from_config(&settings.coordinator));
        let registry = Arc::new(InvocationRegistry::new());
        let codec = Arc::new(PropagationCodec::new(registry.clone(), endpoint.clone()));
        let router = Arc::new(AffinityRouter::new(
            rule,
            Arc::new(AffinityTable::new()),
            settings.routing.empty_affinity_policy,
        ));
        (endpoint, registry, codec, router)
    }

    fn assemble(
        settings: Settings,
        endpoint: Arc<EndpointIdentity>,
        registry: Arc<InvocationRegistry>,
        codec: Arc<PropagationCodec>,
        router: Arc<AffinityRouter>,
        transport: Arc<dyn ParticipantTransport>,
        recovery: Arc<dyn TransactionRecovery>,
    ) -> Self {
        let directory = Arc::new(RemoteNodeDirectory::new());
        let resolver = Arc::new(ParticipantResolver::new(
            &settings.resolver,
            transport,
            directory.clone(),
            router.affinities().clone(),
        ));
        let worker = Arc::new(RecoveryWorker::new(recovery, &settings.recovery));

        info!(
            "TCC runtime assembled for {} ({} resolution)",
            settings.coordinator.application_name,
            if settings.resolver.stateful {
                "stateful"
            } else {
                "stateless"
            }
        );

        Self {
            settings,
            endpoint,
            registry,
            codec,
            router,
            directory,
            resolver,
            worker,
        }
    }

    /// Pin every participant call made on `ctx` to the instance recorded
    /// for `xid` and that participant, until the returned scope is dropped
    pub fn pin_transaction(&self, ctx: ContextId, xid: TransactionXid) -> InterceptorScope<'_> {
        self.router.pin_transaction(ctx, xid)
    }

    /// Release every remaining affinity of a terminated transaction
    pub fn complete_transaction(&self, xid: &TransactionXid) {
        let removed = self.affinities().forget(xid);
        debug!("Transaction {} completed, {} affinities released", xid, removed);
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn endpoint(&self) -> &Arc<EndpointIdentity> {
        &self.endpoint
    }

    pub fn registry(&self) -> &Arc<InvocationRegistry> {
        &self.registry
    }

    pub fn codec(&self) -> &Arc<PropagationCodec> {
        &self.codec
    }

    pub fn affinities(&self) -> &Arc<AffinityTable> {
        self.router.affinities()
    }

    pub fn router(&self) -> &Arc<AffinityRouter> {
        &self.router
    }

    pub fn directory(&self) -> &Arc<RemoteNodeDirectory> {
        &self.directory
    }

    pub fn resolver(&self) -> &Arc<ParticipantResolver> {
        &self.resolver
    }

    pub fn worker(&self) -> &Arc<RecoveryWorker> {
        &self.worker
    }
}

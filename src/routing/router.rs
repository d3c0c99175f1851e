//! Load-balancer wrapper enforcing participant affinity

use super::{
    AffinityTable, CompletionInterceptor, LoadBalancerRule, Server, ServerList,
    TransactionAffinity,
};
use crate::config::EmptyAffinityPolicy;
use crate::invocation::ContextId;
use crate::transaction::TransactionXid;

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Chooses instances for outbound calls, honoring the interceptor installed
/// for the calling context.
pub struct AffinityRouter {
    rule: Arc<dyn LoadBalancerRule>,
    affinities: Arc<AffinityTable>,
    interceptors: DashMap<ContextId, Arc<dyn CompletionInterceptor>>,
    empty_policy: EmptyAffinityPolicy,
}

impl AffinityRouter {
    pub fn new(
        rule: Arc<dyn LoadBalancerRule>,
        affinities: Arc<AffinityTable>,
        empty_policy: EmptyAffinityPolicy,
    ) -> Self {
        Self {
            rule,
            affinities,
            interceptors: DashMap::new(),
            empty_policy,
        }
    }

    /// Set the context's interceptor, returning the one it replaces
    pub fn set_interceptor(
        &self,
        ctx: ContextId,
        interceptor: Arc<dyn CompletionInterceptor>,
    ) -> Option<Arc<dyn CompletionInterceptor>> {
        self.interceptors.insert(ctx, interceptor)
    }

    pub fn interceptor(&self, ctx: ContextId) -> Option<Arc<dyn CompletionInterceptor>> {
        self.interceptors.get(&ctx).map(|i| i.value().clone())
    }

    pub fn remove_interceptor(&self, ctx: ContextId) {
        self.interceptors.remove(&ctx);
    }

    /// Install an interceptor for `ctx` until the returned scope is dropped.
    /// Scopes nest: dropping an inner scope restores the outer interceptor.
    pub fn install(
        &self,
        ctx: ContextId,
        interceptor: Arc<dyn CompletionInterceptor>,
    ) -> InterceptorScope<'_> {
        let previous = self.set_interceptor(ctx, interceptor);
        InterceptorScope {
            router: self,
            ctx,
            previous,
        }
    }

    /// Pin every participant call made on `ctx` to the instances recorded
    /// for `xid`, until the returned scope is dropped
    pub fn pin_transaction(&self, ctx: ContextId, xid: TransactionXid) -> InterceptorScope<'_> {
        let affinity = TransactionAffinity::new(self.affinities.clone(), xid);
        self.install(ctx, Arc::new(affinity))
    }

    /// Select one of `candidates` of `service` for a call made on `ctx`
    pub fn choose(
        &self,
        ctx: ContextId,
        service: &str,
        key: Option<&str>,
        candidates: &[Server],
    ) -> Option<Server> {
        match self.interceptor(ctx) {
            Some(interceptor) => self.choose_with(interceptor.as_ref(), service, key, candidates),
            None => {
                crate::metrics::record_affinity_decision("unpinned");
                self.rule.choose_server(key, candidates)
            }
        }
    }

    /// Select an instance of `service` from a discovery source
    pub fn choose_for(
        &self,
        ctx: ContextId,
        service: &str,
        key: Option<&str>,
        servers: &dyn ServerList,
    ) -> Option<Server> {
        let candidates = servers.all_servers(service);
        self.choose(ctx, service, key, &candidates)
    }

    /// Select an instance of `service` for a call belonging to `xid`.
    ///
    /// An interceptor installed on `ctx` takes precedence; otherwise the
    /// transaction's recorded affinity applies.
    pub fn choose_in_transaction(
        &self,
        ctx: ContextId,
        xid: &TransactionXid,
        service: &str,
        key: Option<&str>,
        servers: &dyn ServerList,
    ) -> Option<Server> {
        let candidates = servers.all_servers(service);
        match self.interceptor(ctx) {
            Some(interceptor) => self.choose_with(interceptor.as_ref(), service, key, &candidates),
            None => {
                let affinity = TransactionAffinity::new(self.affinities.clone(), *xid);
                self.choose_with(&affinity, service, key, &candidates)
            }
        }
    }

    fn choose_with(
        &self,
        interceptor: &dyn CompletionInterceptor,
        service: &str,
        key: Option<&str>,
        candidates: &[Server],
    ) -> Option<Server> {
        let mut completion = Completion {
            interceptor,
            service,
            chosen: None,
        };

        let permitted = interceptor.before_completion(service, candidates);
        completion.chosen = if permitted.is_empty() && !candidates.is_empty() {
            self.choose_without_affinity(service, key, candidates)
        } else {
            crate::metrics::record_affinity_decision(if permitted.len() < candidates.len() {
                "pinned"
            } else {
                "unrestricted"
            });
            self.rule.choose_server(key, &permitted)
        };

        debug!(
            "{} chose {:?} out of {} permitted",
            service,
            completion.chosen.as_ref().map(|s| s.to_string()),
            permitted.len()
        );
        completion.chosen.clone()
    }

    fn choose_without_affinity(
        &self,
        service: &str,
        key: Option<&str>,
        candidates: &[Server],
    ) -> Option<Server> {
        crate::metrics::record_affinity_decision("empty");
        match self.empty_policy {
            EmptyAffinityPolicy::Fail => {
                warn!("The pinned instance of {} is no longer available", service);
                None
            }
            EmptyAffinityPolicy::Fallback => {
                warn!(
                    "The pinned instance of {} is no longer available, falling back",
                    service
                );
                self.rule.choose_server(key, candidates)
            }
        }
    }

    pub fn affinities(&self) -> &Arc<AffinityTable> {
        &self.affinities
    }

    pub fn installed_interceptors(&self) -> usize {
        self.interceptors.len()
    }
}

/// Reports the selection outcome when dropped, whatever the exit path
struct Completion<'a> {
    interceptor: &'a dyn CompletionInterceptor,
    service: &'a str,
    chosen: Option<Server>,
}

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        self.interceptor
            .after_completion(self.service, self.chosen.as_ref());
    }
}

/// Restores the context's previous interceptor (or none) when dropped
pub struct InterceptorScope<'a> {
    router: &'a AffinityRouter,
    ctx: ContextId,
    previous: Option<Arc<dyn CompletionInterceptor>>,
}

impl Drop for InterceptorScope<'_> {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(previous) => {
                self.router.set_interceptor(self.ctx, previous);
            }
            None => self.router.remove_interceptor(self.ctx),
        }
    }
}

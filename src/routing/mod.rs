//! Participant affinity routing
//!
//! Confirm and cancel must reach the exact instance that executed try. The
//! [`AffinityRouter`] wraps an ordinary load-balancing rule and, while an
//! interceptor is installed for the calling context, narrows the candidate
//! set to the instance recorded for the transaction before selecting.

mod balancer;
mod interceptor;
mod router;

pub use balancer::{
    rule_from_config, KeyHashRule, LoadBalancerRule, RoundRobinRule, Server, ServerList,
    StaticServerList,
};
pub use interceptor::{AffinityTable, CompletionInterceptor, TransactionAffinity};
pub use router::{AffinityRouter, InterceptorScope};

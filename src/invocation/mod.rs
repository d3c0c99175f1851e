//! Per-execution-context registry of active compensable invocations
//!
//! Every request-path component takes an explicit [`ContextId`] naming the
//! task or request it runs on. Nested compensable calls on one context form a
//! stack; the registry never lets two contexts see each other's stack.

mod registry;

pub use registry::{CompensableInvocation, InvocationRegistry, InvocationScope, MethodDescriptor};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque handle naming one execution context (request, task, worker)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    /// Allocate a process-unique context id
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ContextId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ContextId {
    fn from(id: u64) -> Self {
        ContextId(id)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

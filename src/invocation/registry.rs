//! Invocation stacks keyed by execution context

use super::ContextId;
use crate::transaction::TransactionContext;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// The try method of a compensable service and its confirm/cancel counterparts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    pub confirm: Option<String>,
    pub cancel: Option<String>,
}

impl MethodDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            confirm: None,
            cancel: None,
        }
    }

    pub fn with_confirm(mut self, confirm: impl Into<String>) -> Self {
        self.confirm = Some(confirm.into());
        self
    }

    pub fn with_cancel(mut self, cancel: impl Into<String>) -> Self {
        self.cancel = Some(cancel.into());
        self
    }
}

/// One in-flight try/confirm/cancel call frame
#[derive(Debug, Clone, PartialEq)]
pub struct CompensableInvocation {
    pub service: String,
    pub method: MethodDescriptor,
    pub arguments: Vec<serde_json::Value>,
    pub transaction: TransactionContext,
}

impl CompensableInvocation {
    pub fn new(
        service: impl Into<String>,
        method: MethodDescriptor,
        transaction: TransactionContext,
    ) -> Self {
        Self {
            service: service.into(),
            method,
            arguments: Vec::new(),
            transaction,
        }
    }

    pub fn with_arguments(mut self, arguments: Vec<serde_json::Value>) -> Self {
        self.arguments = arguments;
        self
    }
}

/// Stacks of compensable invocations, one per execution context.
///
/// One instance per process, built at the composition root and shared.
#[derive(Default)]
pub struct InvocationRegistry {
    stacks: DashMap<ContextId, Vec<Arc<CompensableInvocation>>>,
}

impl InvocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an invocation onto the context's stack, creating the stack on first use
    pub fn register(&self, ctx: ContextId, invocation: CompensableInvocation) -> Arc<CompensableInvocation> {
        let invocation = Arc::new(invocation);
        let mut stack = self.stacks.entry(ctx).or_default();
        stack.push(invocation.clone());
        debug!(
            "Registered {}::{} on {} (depth {})",
            invocation.service,
            invocation.method.name,
            ctx,
            stack.len()
        );
        invocation
    }

    /// Top of the context's stack, without removing it
    pub fn get_current(&self, ctx: ContextId) -> Option<Arc<CompensableInvocation>> {
        self.stacks
            .get(&ctx)
            .and_then(|stack| stack.last().cloned())
    }

    /// Pop the top of the context's stack; the stack entry goes away once empty
    pub fn unregister(&self, ctx: ContextId) -> Option<Arc<CompensableInvocation>> {
        let popped = {
            let mut stack = self.stacks.get_mut(&ctx)?;
            stack.pop()
        };
        // Only the owning context mutates its entry, so the emptiness check is stable.
        self.stacks.remove_if(&ctx, |_, stack| stack.is_empty());
        popped
    }

    /// Register an invocation for the lifetime of the returned scope
    pub fn enter(&self, ctx: ContextId, invocation: CompensableInvocation) -> InvocationScope<'_> {
        let invocation = self.register(ctx, invocation);
        InvocationScope {
            registry: self,
            ctx,
            invocation,
        }
    }

    /// Number of contexts with at least one active invocation
    pub fn active_contexts(&self) -> usize {
        self.stacks.len()
    }
}

/// Unregisters its invocation when dropped, on every exit path
pub struct InvocationScope<'a> {
    registry: &'a InvocationRegistry,
    ctx: ContextId,
    invocation: Arc<CompensableInvocation>,
}

impl InvocationScope<'_> {
    pub fn invocation(&self) -> &Arc<CompensableInvocation> {
        &self.invocation
    }

    pub fn context(&self) -> ContextId {
        self.ctx
    }
}

impl Drop for InvocationScope<'_> {
    fn drop(&mut self) {
        self.registry.unregister(self.ctx);
    }
}

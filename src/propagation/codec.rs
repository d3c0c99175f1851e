//! Header codec for propagated transaction contexts

use super::EndpointIdentity;
use crate::error::{TccError, TccResult};
use crate::invocation::{ContextId, InvocationRegistry};
use crate::transaction::TransactionContext;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;
use tracing::debug;

/// Base64 of the serialized transaction context
pub const TRANSACTION_HEADER: HeaderName = HeaderName::from_static("x-bytetcc-transaction");
/// Endpoint identifier of the instance that issued the call
pub const PROPAGATION_HEADER: HeaderName = HeaderName::from_static("x-bytetcc-propagation");

/// Serialize a context to its text-safe header form
pub fn encode_context(context: &TransactionContext) -> TccResult<String> {
    let bytes = serde_json::to_vec(context)?;
    Ok(STANDARD.encode(bytes))
}

/// Inverse of [`encode_context`]
pub fn decode_context(text: &str) -> TccResult<TransactionContext> {
    let bytes = STANDARD
        .decode(text.trim())
        .map_err(|e| invalid_header(&TRANSACTION_HEADER, e))?;
    serde_json::from_slice(&bytes).map_err(|e| invalid_header(&TRANSACTION_HEADER, e))
}

fn invalid_header(name: &HeaderName, e: impl std::fmt::Display) -> TccError {
    TccError::InvalidHeader {
        name: name.to_string(),
        message: e.to_string(),
    }
}

/// A transaction received from an upstream hop
#[derive(Debug, Clone, PartialEq)]
pub struct PropagatedTransaction {
    pub context: TransactionContext,
    /// Endpoint identifier of the caller, if it sent one
    pub propagated_by: Option<String>,
}

/// Attaches the active transaction context to outbound calls
pub struct PropagationCodec {
    registry: Arc<InvocationRegistry>,
    endpoint: Arc<EndpointIdentity>,
}

impl PropagationCodec {
    pub fn new(registry: Arc<InvocationRegistry>, endpoint: Arc<EndpointIdentity>) -> Self {
        Self { registry, endpoint }
    }

    /// Add the propagation headers when `ctx` has an active compensable invocation.
    ///
    /// Returns whether any header was written. Headers already present are
    /// left untouched. A context that cannot be serialized fails the call.
    pub fn apply(&self, ctx: ContextId, headers: &mut HeaderMap) -> TccResult<bool> {
        let Some(invocation) = self.registry.get_current(ctx) else {
            return Ok(false);
        };
        self.inject(&invocation.transaction, headers)
    }

    /// Add the propagation headers for an explicit context
    pub fn inject(&self, context: &TransactionContext, headers: &mut HeaderMap) -> TccResult<bool> {
        let transaction_text = encode_context(context)?;
        let mut written = false;

        if !headers.contains_key(&TRANSACTION_HEADER) {
            let value = HeaderValue::from_str(&transaction_text)
                .map_err(|e| invalid_header(&TRANSACTION_HEADER, e))?;
            headers.insert(TRANSACTION_HEADER, value);
            written = true;
        }

        if !headers.contains_key(&PROPAGATION_HEADER) {
            let value = HeaderValue::from_str(self.endpoint.identifier())
                .map_err(|e| invalid_header(&PROPAGATION_HEADER, e))?;
            headers.insert(PROPAGATION_HEADER, value);
            written = true;
        }

        if written {
            debug!("Propagating transaction {}", context.xid());
            crate::metrics::record_context_propagated();
        }
        Ok(written)
    }

    /// Decode the propagation headers of an inbound call
    pub fn extract(headers: &HeaderMap) -> TccResult<Option<PropagatedTransaction>> {
        let Some(value) = headers.get(&TRANSACTION_HEADER) else {
            return Ok(None);
        };
        let text = value
            .to_str()
            .map_err(|e| invalid_header(&TRANSACTION_HEADER, e))?;
        let context = decode_context(text)?.as_participant();

        let propagated_by = match headers.get(&PROPAGATION_HEADER) {
            Some(value) => Some(
                value
                    .to_str()
                    .map_err(|e| invalid_header(&PROPAGATION_HEADER, e))?
                    .to_string(),
            ),
            None => None,
        };

        Ok(Some(PropagatedTransaction {
            context,
            propagated_by,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::{CompensableInvocation, MethodDescriptor};
    use crate::transaction::TransactionRole;

    fn codec() -> (Arc<InvocationRegistry>, PropagationCodec) {
        let registry = Arc::new(InvocationRegistry::new());
        let endpoint = Arc::new(EndpointIdentity::new(
            Some("10.0.0.7".to_string()),
            "orderSvc",
            8080,
        ));
        (registry.clone(), PropagationCodec::new(registry, endpoint))
    }

    fn register(registry: &InvocationRegistry, ctx: ContextId) -> TransactionContext {
        let transaction = TransactionContext::initiate();
        registry.register(
            ctx,
            CompensableInvocation::new("orderSvc", MethodDescriptor::new("placeOrder"), transaction.clone()),
        );
        transaction
    }

    #[test]
    fn test_no_active_invocation_adds_nothing() {
        let (_, codec) = codec();
        let mut headers = HeaderMap::new();

        assert!(!codec.apply(ContextId::next(), &mut headers).unwrap());
        assert!(headers.is_empty());
    }

    #[test]
    fn test_headers_written_once() {
        let (registry, codec) = codec();
        let ctx = ContextId::next();
        register(&registry, ctx);
        let mut headers = HeaderMap::new();

        assert!(codec.apply(ctx, &mut headers).unwrap());
        assert!(!codec.apply(ctx, &mut headers).unwrap());

        assert_eq!(headers.get_all(&TRANSACTION_HEADER).iter().count(), 1);
        assert_eq!(headers.get_all(&PROPAGATION_HEADER).iter().count(), 1);
        assert_eq!(headers[&PROPAGATION_HEADER], "10.0.0.7:orderSvc:8080");
    }

    #[test]
    fn test_upstream_headers_preserved() {
        let (registry, codec) = codec();
        let ctx = ContextId::next();
        register(&registry, ctx);

        let mut headers = HeaderMap::new();
        headers.insert(PROPAGATION_HEADER, HeaderValue::from_static("10.0.0.1:gateway:80"));

        assert!(codec.apply(ctx, &mut headers).unwrap());
        assert_eq!(headers[&PROPAGATION_HEADER], "10.0.0.1:gateway:80");
        assert!(headers.contains_key(&TRANSACTION_HEADER));
    }

    #[test]
    fn test_extract_resumes_as_participant() {
        let (registry, codec) = codec();
        let ctx = ContextId::next();
        let transaction = register(&registry, ctx);
        let mut headers = HeaderMap::new();
        codec.apply(ctx, &mut headers).unwrap();

        let received = PropagationCodec::extract(&headers).unwrap().unwrap();
        assert_eq!(received.context.xid(), transaction.xid());
        assert_eq!(received.context.role(), TransactionRole::Participant);
        assert_eq!(received.propagated_by.as_deref(), Some("10.0.0.7:orderSvc:8080"));
    }

    #[test]
    fn test_header_names_match_participants() {
        let (registry, codec) = codec();
        let ctx = ContextId::next();
        register(&registry, ctx);
        let mut headers = HeaderMap::new();
        codec.apply(ctx, &mut headers).unwrap();

        // header lookup is case-insensitive on the wire
        assert!(headers.contains_key("X-BYTETCC-TRANSACTION"));
        assert!(headers.contains_key("X-BYTETCC-PROPAGATION"));
    }

    #[test]
    fn test_extract_rejects_garbage() {
        let mut headers = HeaderMap::new();
        assert!(PropagationCodec::extract(&headers).unwrap().is_none());

        headers.insert(TRANSACTION_HEADER, HeaderValue::from_static("not base64!"));
        let err = PropagationCodec::extract(&headers).unwrap_err();
        assert!(matches!(err, TccError::InvalidHeader { .. }));

        headers.insert(TRANSACTION_HEADER, HeaderValue::from_static("e30="));
        assert!(PropagationCodec::extract(&headers).is_err());
    }
}

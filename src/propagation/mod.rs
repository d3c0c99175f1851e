//! Transaction context propagation across process boundaries
//!
//! Outbound calls made inside a compensable invocation carry two headers:
//! the encoded [`TransactionContext`](crate::transaction::TransactionContext)
//! and the endpoint identifier of the process that made the call, so the
//! receiver knows which instance to address for confirm/cancel.

mod codec;
mod endpoint;

pub use codec::{
    decode_context, encode_context, PropagatedTransaction, PropagationCodec,
    PROPAGATION_HEADER, TRANSACTION_HEADER,
};
pub use endpoint::EndpointIdentity;

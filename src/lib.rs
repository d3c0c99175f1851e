//! TCC coordinator core
//!
//! Process-local plumbing for Try-Confirm-Cancel transactions: the
//! per-context invocation stack, the background recovery worker, context
//! propagation over HTTP headers, participant resolution, and affinity
//! routing that keeps confirm/cancel on the instance that ran the try.

pub mod api;
pub mod config;
pub mod error;
pub mod invocation;
pub mod metrics;
pub mod participant;
pub mod propagation;
pub mod recovery;
pub mod routing;
pub mod runtime;
pub mod transaction;

pub use error::{TccError, TccResult};
pub use runtime::TccRuntime;

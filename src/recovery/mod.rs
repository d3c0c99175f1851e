//! Background recovery of incomplete transactions
//!
//! The worker re-drives transactions through an external
//! [`TransactionRecovery`] collaborator:
//! - one start-up recovery, retried until this node is allowed to run it
//! - a global pass followed by a branch pass on a fixed cadence
//! - cooperative shutdown after a grace period

mod http;
mod worker;

pub use http::HttpTransactionRecovery;
pub use worker::{RecoveryWorker, WorkerState};

use crate::error::TccResult;

use async_trait::async_trait;

/// Durable transaction log and state machine, provided outside this crate.
///
/// Every call may fail with [`crate::error::TccError::NotAuthorized`] when this
/// node does not hold the role the pass needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransactionRecovery: Send + Sync {
    async fn start_recovery(&self) -> TccResult<()>;

    async fn timing_recover(&self) -> TccResult<()>;

    async fn branch_recover(&self) -> TccResult<()>;
}

/// Wall-clock source, in milliseconds since the epoch
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

//! Completion interceptors and the recorded transaction affinities

use super::Server;
use crate::transaction::TransactionXid;

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Hooks a load balancer calls around its own selection
pub trait CompletionInterceptor: Send + Sync {
    /// Narrow the candidates for `service` to the instances this call may use
    fn before_completion(&self, service: &str, candidates: &[Server]) -> Vec<Server>;

    /// Outcome of the selection; called exactly once per selection attempt
    fn after_completion(&self, service: &str, chosen: Option<&Server>);
}

/// Instance chosen per (global transaction, participant service).
///
/// First writer wins: once a try call has landed somewhere, every later
/// call of that transaction to that service must land there too.
#[derive(Default)]
pub struct AffinityTable {
    entries: DashMap<(Uuid, String), Server>,
}

impl AffinityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, xid: &TransactionXid, service: &str) -> Option<Server> {
        self.entries
            .get(&(xid.global_id, service.to_string()))
            .map(|s| s.value().clone())
    }

    /// Record the instance for a transaction and service. Returns the
    /// instance in effect, which differs from `server` if one was already set.
    pub fn record(&self, xid: &TransactionXid, service: &str, server: &Server) -> Server {
        self.entries
            .entry((xid.global_id, service.to_string()))
            .or_insert_with(|| server.clone())
            .value()
            .clone()
    }

    /// Drop the affinity of one participant once it has confirmed or cancelled
    pub fn release(&self, xid: &TransactionXid, service: &str) -> Option<Server> {
        self.entries
            .remove(&(xid.global_id, service.to_string()))
            .map(|(_, server)| server)
    }

    /// Drop every affinity of a terminated transaction
    pub fn forget(&self, xid: &TransactionXid) -> usize {
        let mut removed = 0;
        self.entries.retain(|(global_id, _), _| {
            let keep = *global_id != xid.global_id;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Pins every participant call of one transaction to the instance that
/// participant's first call landed on
pub struct TransactionAffinity {
    table: Arc<AffinityTable>,
    xid: TransactionXid,
}

impl TransactionAffinity {
    pub fn new(table: Arc<AffinityTable>, xid: TransactionXid) -> Self {
        Self { table, xid }
    }

    pub fn xid(&self) -> &TransactionXid {
        &self.xid
    }
}

impl CompletionInterceptor for TransactionAffinity {
    fn before_completion(&self, service: &str, candidates: &[Server]) -> Vec<Server> {
        match self.table.lookup(&self.xid, service) {
            Some(recorded) => candidates
                .iter()
                .filter(|s| **s == recorded)
                .cloned()
                .collect(),
            None => candidates.to_vec(),
        }
    }

    fn after_completion(&self, service: &str, chosen: Option<&Server>) {
        let Some(chosen) = chosen else {
            debug!("No instance chosen for {} in {}", service, self.xid);
            return;
        };

        let pinned = self.table.record(&self.xid, service, chosen);
        if pinned != *chosen {
            warn!(
                "Transaction {} is pinned to {} for {}, but {} was chosen",
                self.xid, pinned, service, chosen
            );
        } else {
            debug!("Transaction {} pinned to {} for {}", self.xid, pinned, service);
        }
    }
}

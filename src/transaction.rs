//! Transaction identity carried across process boundaries

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Global transaction id plus optional branch qualifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionXid {
    pub global_id: Uuid,
    pub branch_qualifier: Option<Uuid>,
}

impl TransactionXid {
    /// Create a new global transaction id
    pub fn new_global() -> Self {
        Self {
            global_id: Uuid::new_v4(),
            branch_qualifier: None,
        }
    }

    /// Derive a branch of this transaction
    pub fn branch(&self) -> Self {
        Self {
            global_id: self.global_id,
            branch_qualifier: Some(Uuid::new_v4()),
        }
    }

    /// The global part only, shared by every branch
    pub fn global(&self) -> Self {
        Self {
            global_id: self.global_id,
            branch_qualifier: None,
        }
    }
}

impl fmt::Display for TransactionXid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.branch_qualifier {
            Some(branch) => write!(f, "{}/{}", self.global_id.simple(), branch.simple()),
            None => write!(f, "{}", self.global_id.simple()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionRole {
    Initiator,
    Participant,
}

/// Identifier of the logical transaction plus role markers.
///
/// Immutable once built; receivers get their own copy by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionContext {
    xid: TransactionXid,
    role: TransactionRole,
    created_at: i64,
}

impl TransactionContext {
    /// Context for a transaction started by this process
    pub fn initiate() -> Self {
        Self {
            xid: TransactionXid::new_global(),
            role: TransactionRole::Initiator,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Context as seen by a participant receiving a propagated transaction
    pub fn as_participant(&self) -> Self {
        Self {
            xid: self.xid,
            role: TransactionRole::Participant,
            created_at: self.created_at,
        }
    }

    pub fn xid(&self) -> TransactionXid {
        self.xid
    }

    pub fn role(&self) -> TransactionRole {
        self.role
    }

    pub fn is_initiator(&self) -> bool {
        self.role == TransactionRole::Initiator
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_shares_global_id() {
        let xid = TransactionXid::new_global();
        let branch = xid.branch();
        assert_eq!(branch.global_id, xid.global_id);
        assert!(branch.branch_qualifier.is_some());
        assert_eq!(branch.global(), xid);
        assert!(branch.to_string().starts_with(&xid.to_string()));
    }

    #[test]
    fn test_participant_view_keeps_identity() {
        let ctx = TransactionContext::initiate();
        let remote = ctx.as_participant();
        assert!(ctx.is_initiator());
        assert!(!remote.is_initiator());
        assert_eq!(remote.xid(), ctx.xid());
        assert_eq!(remote.created_at(), ctx.created_at());
    }
}

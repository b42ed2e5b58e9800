// Root transaction and named subtransactions of a process instance

//! # Transactions
//!
//! Every process instance owns one root [`Transaction`] for its whole life.
//! Replay work happens inside named **subtransactions** opened on it:
//!
//! - `Start`: fires the entry transitions of a start work item
//! - `Replay`: fires the rest of a decision path
//! - `Custom(..)`: anything a caller wants to scope explicitly
//!
//! A subtransaction records its scope (the transitions it may fire, empty
//! meaning "the decision's whole path"), the work item that opened it, and the
//! transitions fired so far. Removing it folds that log into the root.
//!
//! This is bookkeeping, not two-phase commit. Durability belongs to the outer
//! persistence write transaction, represented here by the
//! [`WriteTransaction`] token every mutating operation requires.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::lock::RequestContext;
use crate::models::{ContextId, SubTransactionId, TransitionId, WorkItemId};
use crate::{EngineError, Result};

/// Proof that the caller opened a persistence write transaction
///
/// The engine never commits or aborts it; it only requires one to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteTransaction {
    pub id: Uuid,
    pub request: ContextId,
    pub started_at: DateTime<Utc>,
}

impl WriteTransaction {
    pub fn begin(request: &RequestContext) -> Self {
        WriteTransaction {
            id: Uuid::new_v4(),
            request: request.id,
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionLabel {
    Start,
    Replay,
    Custom(String),
}

impl std::fmt::Display for TransactionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionLabel::Start => write!(f, "Start"),
            TransactionLabel::Replay => write!(f, "Replay"),
            TransactionLabel::Custom(label) => write!(f, "{}", label),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTransaction {
    pub id: SubTransactionId,
    pub label: TransactionLabel,
    /// Transitions this subtransaction may fire; empty means the decision's path
    pub scope: BTreeSet<TransitionId>,
    pub initiator: WorkItemId,
    pub opened_at: DateTime<Utc>,
    /// Transitions fired so far, in firing order
    pub fired: Vec<TransitionId>,
}

impl SubTransaction {
    pub fn is_unscoped(&self) -> bool {
        self.scope.is_empty()
    }

    pub fn permits(&self, transition: &TransitionId) -> bool {
        self.scope.is_empty() || self.scope.contains(transition)
    }
}

/// Root transaction owned by a process instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    open: Vec<SubTransaction>,
    /// Transitions of every removed subtransaction, in firing order
    committed: Vec<TransitionId>,
}

impl Transaction {
    pub fn new() -> Self {
        Transaction {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            open: vec![],
            committed: vec![],
        }
    }

    pub fn start_subtransaction(
        &mut self,
        label: TransactionLabel,
        scope: BTreeSet<TransitionId>,
        initiator: WorkItemId,
    ) -> SubTransactionId {
        let id = SubTransactionId::new();
        self.open.push(SubTransaction {
            id,
            label,
            scope,
            initiator,
            opened_at: Utc::now(),
            fired: vec![],
        });
        id
    }

    pub fn subtransaction(&self, id: SubTransactionId) -> Option<&SubTransaction> {
        self.open.iter().find(|s| s.id == id)
    }

    fn subtransaction_mut(&mut self, id: SubTransactionId) -> Result<&mut SubTransaction> {
        self.open
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| EngineError::SubtransactionNotFound { id: id.to_string() })
    }

    /// Record that `transition` fired under subtransaction `id`
    pub fn record_fired(&mut self, id: SubTransactionId, transition: TransitionId) -> Result<()> {
        self.subtransaction_mut(id)?.fired.push(transition);
        Ok(())
    }

    /// Close a subtransaction, folding its fired log into the root
    pub fn remove_subtransaction(&mut self, id: SubTransactionId) -> Result<SubTransaction> {
        let position = self
            .open
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| EngineError::SubtransactionNotFound { id: id.to_string() })?;
        let sub = self.open.remove(position);
        self.committed.extend(sub.fired.iter().cloned());
        Ok(sub)
    }

    /// Subtransactions still open, oldest first
    pub fn open_subtransactions(&self) -> impl Iterator<Item = &SubTransaction> {
        self.open.iter()
    }

    /// Transitions folded into the root so far
    pub fn committed(&self) -> &[TransitionId] {
        &self.committed
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtransaction_lifecycle() {
        let mut root = Transaction::new();
        let initiator = WorkItemId::new();
        let scope: BTreeSet<TransitionId> = [TransitionId::from("t1")].into_iter().collect();

        let sub = root.start_subtransaction(TransactionLabel::Start, scope, initiator);
        assert_eq!(root.open_subtransactions().count(), 1);
        assert!(root.subtransaction(sub).unwrap().permits(&TransitionId::from("t1")));
        assert!(!root.subtransaction(sub).unwrap().permits(&TransitionId::from("t2")));

        root.record_fired(sub, TransitionId::from("t1")).unwrap();
        let closed = root.remove_subtransaction(sub).unwrap();

        assert_eq!(closed.label.to_string(), "Start");
        assert_eq!(closed.initiator, initiator);
        assert_eq!(root.committed(), &[TransitionId::from("t1")]);
        assert_eq!(root.open_subtransactions().count(), 0);
    }

    #[test]
    fn test_unknown_subtransaction() {
        let mut root = Transaction::new();
        let missing = SubTransactionId::new();
        assert!(root.record_fired(missing, TransitionId::from("t")).is_err());
        assert!(matches!(
            root.remove_subtransaction(missing),
            Err(EngineError::SubtransactionNotFound { .. })
        ));
    }

    #[test]
    fn test_unscoped_permits_everything() {
        let mut root = Transaction::new();
        let sub = root.start_subtransaction(
            TransactionLabel::Custom("Audit".to_string()),
            BTreeSet::new(),
            WorkItemId::new(),
        );
        let sub = root.subtransaction(sub).unwrap();
        assert!(sub.is_unscoped());
        assert!(sub.permits(&TransitionId::from("anything")));
        assert_eq!(sub.label.to_string(), "Audit");
    }
}

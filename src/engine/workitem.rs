// Work items: start, plain and decision variants

//! # Work Item State Machine
//!
//! A work item is a unit of pending work offered to whoever resolves it.
//!
//! ```text
//!   Pending ──validate ok──> Validated ──replay done──> Consumed
//!      ^            │
//!      └─validate fails (stays Pending, may be retried)
//! ```
//!
//! Only a decision passes through `Validated`: it holds that state while its
//! path is replayed, and keeps it if the replay stalls. Plain and start items
//! go from `Pending` straight to `Consumed`.
//!
//! ## Variants
//!
//! - [`StartWorkItem`]: backed by a startable path of a definition that has no
//!   instance yet. Consuming it creates, starts and registers a process.
//! - [`WorkItem`]: a plain item at one active task node.
//! - [`DecisionWorkItem`]: a pending [`UserDecision`] in a running process.
//!   Decisions raised by different nodes that converge on the same target are
//!   merged into one.
//!
//! Plain and decision items live inside their [`ProcessInstance`], which also
//! owns their actions; see `ProcessInstance::add_action` and friends.
//!
//! ## Validation Rule
//!
//! A path with no synchronous transition is always valid. Otherwise every
//! synchronous transition on it must hold; asynchronous ones are ignored.
//! On top of that, an element locked by a different request context never
//! validates.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::instance::{write_process, ProcessInstance, SharedProcess};
use super::lock::{LockManager, Lockable, RequestContext};
use super::transaction::{TransactionLabel, WriteTransaction};
use super::{RejectReason, Resolution, RuntimeContext};
use crate::config::StartGuardPolicy;
use crate::models::{
    Action, ActivityId, DataMap, DecisionPath, ObjectId, ProcessDefinition, ProcessId,
    ProcessInstanceId, TransitionId, Validator, WorkItemId,
};
use crate::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkItemState {
    Pending,
    Validated,
    Consumed,
}

/// A decision path together with the nodes that raised it
#[derive(Debug, Clone, Serialize)]
pub struct UserDecision {
    pub path: DecisionPath,
    pub initiators: BTreeSet<ActivityId>,
}

impl UserDecision {
    pub fn new(path: DecisionPath, initiator: ActivityId) -> Self {
        UserDecision {
            path,
            initiators: BTreeSet::from([initiator]),
        }
    }

    /// Entry transitions plus every path transition leaving an initiator
    pub fn first_transitions(&self) -> BTreeSet<TransitionId> {
        let mut first = self.path.first().clone();
        for initiator in &self.initiators {
            first.extend(self.path.transitions_from(initiator));
        }
        first
    }

    /// Union the initiators and merge the paths
    pub fn merge(&mut self, other: &UserDecision) {
        self.initiators.extend(other.initiators.iter().cloned());
        self.path = self.path.merge(&other.path);
    }

    pub fn concerned_nodes(&self) -> BTreeSet<ActivityId> {
        self.initiators
            .union(self.path.sources())
            .cloned()
            .collect()
    }
}

/// Decisions are the same decision iff their paths are equal
impl PartialEq for UserDecision {
    fn eq(&self, other: &Self) -> bool {
        self.path.equal(&other.path)
    }
}

/// State shared by plain and decision work items
#[derive(Debug, Clone, Serialize)]
pub struct BaseWorkItem {
    pub id: WorkItemId,
    /// Handle in the process aggregation store and lock key
    pub object_id: ObjectId,
    pub process: ProcessInstanceId,
    pub node: ActivityId,
    pub state: WorkItemState,
    pub is_valid: bool,
    pub created_at: DateTime<Utc>,
}

impl BaseWorkItem {
    pub fn new(process: ProcessInstanceId, node: ActivityId) -> Self {
        let id = WorkItemId::new();
        BaseWorkItem {
            id,
            object_id: ObjectId::from(*id.as_uuid()),
            process,
            node,
            state: WorkItemState::Pending,
            is_valid: true,
            created_at: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == WorkItemState::Pending
    }
}

/// Work offered at a single active task node
#[derive(Debug, Clone, Serialize)]
pub struct WorkItem {
    pub base: BaseWorkItem,
    /// Transition that activated the node, if any
    pub activated_by: Option<TransitionId>,
}

impl WorkItem {
    pub fn new(process: ProcessInstanceId, node: ActivityId, activated_by: Option<TransitionId>) -> Self {
        WorkItem {
            base: BaseWorkItem::new(process, node),
            activated_by,
        }
    }

    pub fn concerned_nodes(&self) -> Vec<ActivityId> {
        vec![self.base.node.clone()]
    }

    /// Not locked by another context, and the activating guard holds
    ///
    /// Controlled processes skip the guard check.
    pub fn validate(
        &self,
        process: &ProcessInstance,
        locks: &LockManager,
        request: &RequestContext,
    ) -> Result<bool> {
        if self.is_locked(locks, request) {
            return Ok(false);
        }

        let definition = process.definition();
        if definition.controlled {
            return Ok(true);
        }

        match &self.activated_by {
            Some(id) => Ok(definition
                .transition(id)?
                .permits(&process.workflow_data, &process.application_data)),
            None => Ok(true),
        }
    }
}

impl Lockable for WorkItem {
    fn lock_key(&self) -> ObjectId {
        self.base.object_id
    }
}

/// A pending decision inside a running process
#[derive(Debug, Clone, Serialize)]
pub struct DecisionWorkItem {
    pub base: BaseWorkItem,
    pub decision: UserDecision,
    /// Nodes already recorded as validated; they never re-trigger this decision
    pub validations: BTreeSet<ActivityId>,
}

impl DecisionWorkItem {
    /// The item materializes at the first target of the decision's path
    pub fn new(process: ProcessInstanceId, decision: UserDecision) -> Result<Self> {
        let node = decision
            .path
            .targets()
            .iter()
            .next()
            .cloned()
            .ok_or_else(|| EngineError::InvalidDefinition("decision path has no target".to_string()))?;

        Ok(DecisionWorkItem {
            base: BaseWorkItem::new(process, node),
            decision,
            validations: BTreeSet::new(),
        })
    }

    pub fn concerned_nodes(&self) -> BTreeSet<ActivityId> {
        self.decision
            .concerned_nodes()
            .into_iter()
            .filter(|node| !self.validations.contains(node))
            .collect()
    }

    pub fn is_finished(&self) -> bool {
        self.concerned_nodes().is_empty()
    }

    pub fn merge(&mut self, other: &UserDecision) {
        self.decision.merge(other);
    }

    pub fn validate(
        &self,
        process: &ProcessInstance,
        locks: &LockManager,
        request: &RequestContext,
    ) -> Result<bool> {
        if self.is_locked(locks, request) {
            return Ok(false);
        }
        self.decision.path.validate(
            process.definition(),
            &process.workflow_data,
            &process.application_data,
        )
    }
}

impl Lockable for DecisionWorkItem {
    fn lock_key(&self) -> ObjectId {
        self.base.object_id
    }
}

/// Work items stored inside a process instance
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessWorkItem {
    Plain(WorkItem),
    Decision(DecisionWorkItem),
}

impl ProcessWorkItem {
    pub fn base(&self) -> &BaseWorkItem {
        match self {
            ProcessWorkItem::Plain(item) => &item.base,
            ProcessWorkItem::Decision(item) => &item.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut BaseWorkItem {
        match self {
            ProcessWorkItem::Plain(item) => &mut item.base,
            ProcessWorkItem::Decision(item) => &mut item.base,
        }
    }

    pub fn id(&self) -> WorkItemId {
        self.base().id
    }

    pub fn as_decision(&self) -> Option<&DecisionWorkItem> {
        match self {
            ProcessWorkItem::Decision(item) => Some(item),
            ProcessWorkItem::Plain(_) => None,
        }
    }

    pub fn as_plain(&self) -> Option<&WorkItem> {
        match self {
            ProcessWorkItem::Plain(item) => Some(item),
            ProcessWorkItem::Decision(_) => None,
        }
    }
}

impl Lockable for ProcessWorkItem {
    fn lock_key(&self) -> ObjectId {
        self.base().object_id
    }
}

/// Work item that starts a new process when consumed
///
/// ## Rust Learning Notes:
///
/// ### Owning Trait Objects
/// There is no process instance (and so no aggregation store) yet, so the
/// start item owns its actions directly as `Vec<Box<dyn Action>>`.
#[derive(Debug)]
pub struct StartWorkItem {
    pub id: WorkItemId,
    pub object_id: ObjectId,
    pub process_id: ProcessId,
    pub decision: UserDecision,
    /// Target node of the path, where the first work item appears
    pub node: ActivityId,
    pub state: WorkItemState,
    actions: Vec<Box<dyn Action>>,
}

impl StartWorkItem {
    /// Build a start item from a startable path and bind its actions eagerly
    pub fn new(definition: &ProcessDefinition, path: DecisionPath, initiator: ActivityId) -> Result<Self> {
        let node = path
            .targets()
            .iter()
            .next()
            .cloned()
            .ok_or_else(|| EngineError::InvalidDefinition("startable path has no target".to_string()))?;
        let activity = definition.activity(&node)?;

        let id = WorkItemId::new();
        let mut item = StartWorkItem {
            id,
            object_id: ObjectId::from(*id.as_uuid()),
            process_id: definition.id.clone(),
            decision: UserDecision::new(path, initiator),
            node,
            state: WorkItemState::Pending,
            actions: Vec::with_capacity(activity.behaviors.len()),
        };
        for behavior in &activity.behaviors {
            item.add_action(behavior.instantiate());
        }
        Ok(item)
    }

    pub fn concerned_nodes(&self) -> BTreeSet<ActivityId> {
        self.decision.concerned_nodes()
    }

    /// Register an action as pre-bound to this item
    pub fn add_action(&mut self, mut action: Box<dyn Action>) {
        action.set_dtlock(true);
        action.attach(self.id);
        self.actions.push(action);
    }

    pub fn actions(&self) -> &[Box<dyn Action>] {
        &self.actions
    }

    pub fn get_actions_validators(&self) -> Vec<Validator> {
        self.actions.iter().map(|a| a.validator()).collect()
    }

    fn has_sync_transition(&self, definition: &ProcessDefinition) -> Result<bool> {
        for id in self.decision.path.transitions() {
            if definition.transition(id)?.sync {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Validate before the process exists
    ///
    /// Synchronous guards are evaluated against a provisional scope built
    /// according to the configured [`StartGuardPolicy`].
    pub fn validate(&self, ctx: &RuntimeContext, request: &RequestContext) -> Result<bool> {
        if self.is_locked(&ctx.locks, request) {
            return Ok(false);
        }

        let definition = ctx.definitions.get_definition(&self.process_id)?;
        let scope = match ctx.config.start_guards {
            StartGuardPolicy::ParameterDefaults => definition.default_data(),
            StartGuardPolicy::Reject => {
                if self.has_sync_transition(&definition)? {
                    return Ok(false);
                }
                DataMap::new()
            }
        };

        self.decision
            .path
            .validate(&definition, &scope, &serde_json::Value::Null)
    }

    /// Validate against the data the given arguments would bind
    pub fn validate_with_arguments(
        &self,
        ctx: &RuntimeContext,
        request: &RequestContext,
        args: &[serde_json::Value],
    ) -> Result<bool> {
        if self.is_locked(&ctx.locks, request) {
            return Ok(false);
        }

        let definition = ctx.definitions.get_definition(&self.process_id)?;
        let data = definition.bind_arguments(args)?;
        self.decision
            .path
            .validate(&definition, &data, &serde_json::Value::Null)
    }

    /// Create, start and register a process, then replay the path on it
    ///
    /// Arguments are bound and the entry transitions fired before the
    /// instance is handed to the runtime, so a bad argument list or a broken
    /// entry leaves nothing registered.
    ///
    /// Returns the work item at the path's target node (if that node is a
    /// task) and the new process. An item locked by another context is
    /// rejected before anything is created.
    pub fn consume(
        &mut self,
        ctx: &RuntimeContext,
        request: &RequestContext,
        txn: &WriteTransaction,
        args: &[serde_json::Value],
    ) -> Result<Resolution<(Option<WorkItemId>, SharedProcess)>> {
        if self.state == WorkItemState::Consumed {
            return Err(EngineError::ProtocolViolation(format!(
                "start work item {} was already consumed",
                self.id
            )));
        }
        if self.is_locked(&ctx.locks, request) {
            return Ok(Resolution::Rejected(RejectReason::Locked {
                holder: ctx.locks.holder(self.lock_key()).map(|r| r.holder),
            }));
        }

        let definition = ctx.definitions.get_definition(&self.process_id)?;
        let data = definition.bind_arguments(args)?;

        let mut process = ProcessInstance::new(Arc::clone(&definition));
        process.workflow_data = data;
        process.start(txn)?;

        let first = self.decision.first_transitions();
        let remaining: BTreeSet<TransitionId> = self
            .decision
            .path
            .transitions()
            .filter(|t| !first.contains(*t))
            .cloned()
            .collect();

        let start = process
            .global_transaction_mut()
            .start_subtransaction(TransactionLabel::Start, first, self.id);
        process.replay_path(&self.decision, start, txn)?;
        process.global_transaction_mut().remove_subtransaction(start)?;

        let instance_id = process.id();
        let shared = Arc::new(RwLock::new(process));
        ctx.runtime.add_process(Arc::clone(&shared))?;
        debug!(process = %instance_id, definition = %self.process_id, "registered process instance");

        let work_item = {
            let mut process = write_process(&shared)?;
            let has_remaining = !remaining.is_empty();
            let replay = process
                .global_transaction_mut()
                .start_subtransaction(TransactionLabel::Replay, remaining, self.id);
            if has_remaining {
                process.replay_path(&self.decision, replay, txn)?;
            }
            process.global_transaction_mut().remove_subtransaction(replay)?;
            process.release_locks(&ctx.locks);
            process.refresh_status();
            process.work_item_at(&self.node)
        };

        self.state = WorkItemState::Consumed;
        ctx.locks.release(self.object_id);
        info!(
            process = %instance_id,
            definition = %self.process_id,
            principal = request.principal.as_deref().unwrap_or("-"),
            "started process"
        );
        Ok(Resolution::Completed((work_item, shared)))
    }
}

impl Lockable for StartWorkItem {
    fn lock_key(&self) -> ObjectId {
        self.object_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PathEdge;

    fn path(edges: &[(&str, &str, &str)], source: &str, target: &str) -> DecisionPath {
        DecisionPath::new(
            edges.iter().map(|(id, from, to)| {
                (
                    TransitionId::from(*id),
                    PathEdge {
                        from: ActivityId::from(*from),
                        to: ActivityId::from(*to),
                    },
                )
            }),
            vec![ActivityId::from(source)],
            vec![ActivityId::from(target)],
            vec![TransitionId::from(edges[0].0)],
        )
        .unwrap()
    }

    #[test]
    fn test_user_decision_equality_ignores_initiators() {
        let a = UserDecision::new(path(&[("t", "n1", "x")], "n1", "x"), ActivityId::from("n1"));
        let b = UserDecision::new(path(&[("t", "n1", "x")], "n1", "x"), ActivityId::from("other"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_user_decision_merge() {
        let mut left = UserDecision::new(path(&[("t_left", "n1", "join")], "n1", "join"), ActivityId::from("n1"));
        let right = UserDecision::new(path(&[("t_right", "n2", "join")], "n2", "join"), ActivityId::from("n2"));

        left.merge(&right);

        let initiators: Vec<&str> = left.initiators.iter().map(|a| a.as_str()).collect();
        assert_eq!(initiators, vec!["n1", "n2"]);
        assert_eq!(left.path.len(), 2);
        assert_eq!(left.first_transitions().len(), 2);
        assert_eq!(left.concerned_nodes().len(), 2);
    }

    #[test]
    fn test_first_transitions_include_initiator_edges() {
        let decision = UserDecision::new(
            DecisionPath::new(
                vec![
                    (
                        TransitionId::from("a"),
                        PathEdge {
                            from: ActivityId::from("s"),
                            to: ActivityId::from("g"),
                        },
                    ),
                    (
                        TransitionId::from("b"),
                        PathEdge {
                            from: ActivityId::from("g"),
                            to: ActivityId::from("t"),
                        },
                    ),
                ],
                vec![ActivityId::from("s")],
                vec![ActivityId::from("t")],
                Vec::<TransitionId>::new(),
            )
            .unwrap(),
            ActivityId::from("g"),
        );

        let first = decision.first_transitions();
        assert_eq!(first.len(), 1);
        assert!(first.contains(&TransitionId::from("b")));
    }

    #[test]
    fn test_decision_validations_shrink_concerned_nodes() {
        let decision = UserDecision::new(path(&[("t", "n1", "x")], "n1", "x"), ActivityId::from("n1"));
        let mut item = DecisionWorkItem::new(ProcessInstanceId::new(), decision).unwrap();

        assert_eq!(item.base.node.as_str(), "x");
        assert!(!item.is_finished());

        item.validations.insert(ActivityId::from("n1"));
        assert!(item.is_finished());
        assert!(item.concerned_nodes().is_empty());
    }

    #[test]
    fn test_work_item_shares_uuid_with_its_handle() {
        let item = WorkItem::new(ProcessInstanceId::new(), ActivityId::from("review"), None);
        assert_eq!(item.base.object_id.as_uuid(), item.base.id.as_uuid());
        assert_eq!(item.concerned_nodes(), vec![ActivityId::from("review")]);
        assert!(item.base.is_pending());
    }
}

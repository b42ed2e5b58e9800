// Live process instances and the transactional replay engine

//! # Process Instances
//!
//! A `ProcessInstance` is one running execution of a [`ProcessDefinition`]:
//!
//! - one [`ActivityInstance`] (node) per declared activity
//! - the set of currently **active** nodes
//! - workflow-relevant data (bound from input parameters) and
//!   application-relevant data (a JSON object)
//! - its root [`Transaction`] and the history of fired transitions
//! - its work items, and an aggregation store attaching work items to nodes
//!   and actions to work items
//!
//! ## Replay
//!
//! Consuming a decision *replays* its path on the instance inside a
//! subtransaction. Replay is a topological walk of the scoped transitions:
//!
//! ```text
//!   a node's in-scope outgoing transitions fire together once
//!     - the node is active, and
//!     - all of its in-scope incoming transitions already fired
//!       (nodes the decision starts from skip this second check)
//!
//!   ties are broken by definition order, so the same path on the same
//!   active set always fires in the same order
//! ```
//!
//! Firing deactivates the source, activates each target and creates a plain
//! work item when a target is a task. If nothing can fire while transitions
//! remain, replay fails with `ReplayStalled`; whatever fired before stays
//! fired and the subtransaction stays open to show how far it got.
//!
//! ## Rust Learning Notes:
//!
//! ### Arc<RwLock<T>> for Shared Mutable State
//! Instances are shared between the runtime registry and every caller as
//! [`SharedProcess`]. `RwLock` lets readers proceed in parallel while a
//! writer (complete, resolve) has exclusive access. A poisoned lock is turned
//! into `EngineError::Internal` instead of panicking.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::catalog::{Relation, RelationCatalog};
use super::composite::{CompositeStore, PropertyDef};
use super::lock::{LockManager, Lockable, RequestContext};
use super::transaction::{Transaction, TransactionLabel, WriteTransaction};
use super::workitem::{DecisionWorkItem, ProcessWorkItem, UserDecision, WorkItem, WorkItemState};
use super::{RejectReason, Resolution, RuntimeContext};
use crate::models::{
    Action, ActivityId, ActivityKind, DataMap, DecisionPath, ObjectId, ProcessDefinition,
    ProcessInstanceId, SearchableAction, SubTransactionId, TransitionId, Validator, WorkItemId,
};
use crate::{EngineError, Result};

/// Work item -> actions (element view: `workitem`)
pub const ACTIONS: &str = "actions";
pub const WORKITEM_VIEW: &str = "workitem";
/// Node -> work items (element view: `node`)
pub const WORKITEMS: &str = "workitems";
pub const NODE_VIEW: &str = "node";

pub type SharedProcess = Arc<RwLock<ProcessInstance>>;

pub fn read_process(process: &SharedProcess) -> Result<RwLockReadGuard<'_, ProcessInstance>> {
    process
        .read()
        .map_err(|_| EngineError::Internal("process instance lock poisoned".to_string()))
}

pub fn write_process(process: &SharedProcess) -> Result<RwLockWriteGuard<'_, ProcessInstance>> {
    process
        .write()
        .map_err(|_| EngineError::Internal("process instance lock poisoned".to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessStatus {
    Created,
    Running,
    Finished,
}

/// Live node of a process instance
#[derive(Debug, Clone, Serialize)]
pub struct ActivityInstance {
    pub id: ActivityId,
    pub object_id: ObjectId,
    pub process: ProcessInstanceId,
    pub kind: ActivityKind,
    /// Transition that last activated this node
    pub incoming: Option<TransitionId>,
}

/// One fired transition
#[derive(Debug, Clone, Serialize)]
pub struct ReplayEvent {
    pub transition: TransitionId,
    pub from: ActivityId,
    pub to: ActivityId,
    pub subtransaction: SubTransactionId,
    pub label: TransactionLabel,
    /// Work item created at `to`, if any
    pub work_item: Option<WorkItemId>,
    pub write_transaction: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ProcessInstance {
    id: ProcessInstanceId,
    /// Handle used for catalog relations
    object_id: ObjectId,
    definition: Arc<ProcessDefinition>,
    nodes: BTreeMap<ActivityId, ActivityInstance>,
    active: BTreeSet<ActivityId>,
    pub workflow_data: DataMap,
    pub application_data: serde_json::Value,
    global_transaction: Transaction,
    work_items: HashMap<WorkItemId, ProcessWorkItem>,
    /// Creation order of `work_items`
    work_item_order: Vec<WorkItemId>,
    aggregation: CompositeStore,
    actions: HashMap<ObjectId, Box<dyn Action>>,
    history: Vec<ReplayEvent>,
    /// Handles of consumed or retired items whose lock records are still held
    released: Vec<ObjectId>,
    status: ProcessStatus,
    created_at: DateTime<Utc>,
}

impl ProcessInstance {
    /// Instantiate the graph of `definition`; nothing is active until `start`
    pub fn new(definition: Arc<ProcessDefinition>) -> Self {
        let id = ProcessInstanceId::new();
        let nodes = definition
            .activities
            .iter()
            .map(|activity| {
                (
                    activity.id.clone(),
                    ActivityInstance {
                        id: activity.id.clone(),
                        object_id: ObjectId::new(),
                        process: id,
                        kind: activity.kind,
                        incoming: None,
                    },
                )
            })
            .collect();

        let mut aggregation = CompositeStore::new();
        aggregation.define(
            PropertyDef::composite_multiple(ACTIONS)
                .with_opposite(WORKITEM_VIEW)
                .unique(),
        );
        aggregation.define(
            PropertyDef::composite_multiple(WORKITEMS)
                .with_opposite(NODE_VIEW)
                .unique(),
        );

        ProcessInstance {
            id,
            object_id: ObjectId::from(*id.as_uuid()),
            definition,
            nodes,
            active: BTreeSet::new(),
            workflow_data: DataMap::new(),
            application_data: serde_json::Value::Object(serde_json::Map::new()),
            global_transaction: Transaction::new(),
            work_items: HashMap::new(),
            work_item_order: vec![],
            aggregation,
            actions: HashMap::new(),
            history: vec![],
            released: vec![],
            status: ProcessStatus::Created,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> ProcessInstanceId {
        self.id
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn definition(&self) -> &ProcessDefinition {
        &self.definition
    }

    pub fn status(&self) -> ProcessStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn active_nodes(&self) -> &BTreeSet<ActivityId> {
        &self.active
    }

    pub fn is_active(&self, node: &ActivityId) -> bool {
        self.active.contains(node)
    }

    pub fn node(&self, id: &ActivityId) -> Result<&ActivityInstance> {
        self.nodes.get(id).ok_or_else(|| EngineError::UnknownActivity {
            process: self.definition.id.to_string(),
            activity: id.to_string(),
        })
    }

    pub fn history(&self) -> &[ReplayEvent] {
        &self.history
    }

    pub fn global_transaction(&self) -> &Transaction {
        &self.global_transaction
    }

    pub fn global_transaction_mut(&mut self) -> &mut Transaction {
        &mut self.global_transaction
    }

    pub fn aggregation(&self) -> &CompositeStore {
        &self.aggregation
    }

    pub fn work_item(&self, id: WorkItemId) -> Option<&ProcessWorkItem> {
        self.work_items.get(&id)
    }

    pub fn plain_work_item(&self, id: WorkItemId) -> Result<&WorkItem> {
        match self.work_items.get(&id) {
            Some(ProcessWorkItem::Plain(item)) => Ok(item),
            Some(ProcessWorkItem::Decision(_)) => Err(EngineError::ProtocolViolation(format!(
                "work item {} is a decision",
                id
            ))),
            None => Err(EngineError::WorkItemNotFound { id: id.to_string() }),
        }
    }

    pub fn decision(&self, id: WorkItemId) -> Result<&DecisionWorkItem> {
        match self.work_items.get(&id) {
            Some(ProcessWorkItem::Decision(item)) => Ok(item),
            Some(ProcessWorkItem::Plain(_)) => Err(EngineError::ProtocolViolation(format!(
                "work item {} is not a decision",
                id
            ))),
            None => Err(EngineError::WorkItemNotFound { id: id.to_string() }),
        }
    }

    /// Pending work items in creation order
    pub fn pending_work_items(&self) -> Vec<&ProcessWorkItem> {
        self.work_item_order
            .iter()
            .filter_map(|id| self.work_items.get(id))
            .filter(|item| item.base().is_pending())
            .collect()
    }

    pub fn pending_decisions(&self) -> Vec<&DecisionWorkItem> {
        self.pending_work_items()
            .into_iter()
            .filter_map(|item| item.as_decision())
            .collect()
    }

    /// The pending plain work item at `node`, if there is one
    pub fn work_item_at(&self, node: &ActivityId) -> Option<WorkItemId> {
        self.pending_work_items()
            .into_iter()
            .filter_map(|item| item.as_plain())
            .find(|item| item.base.node == *node)
            .map(|item| item.base.id)
    }

    /// Every work item attached to `node`, pending or not
    pub fn work_items_at(&self, node: &ActivityId) -> Result<Vec<WorkItemId>> {
        let handle = self.node(node)?.object_id;
        Ok(self
            .aggregation
            .contents(handle, WORKITEMS)?
            .into_iter()
            .map(|object| WorkItemId::from(*object.as_uuid()))
            .collect())
    }

    fn base_handle(&self, work_item: WorkItemId) -> Result<ObjectId> {
        self.work_items
            .get(&work_item)
            .map(|item| item.base().object_id)
            .ok_or_else(|| EngineError::WorkItemNotFound {
                id: work_item.to_string(),
            })
    }

    fn ensure_running(&self) -> Result<()> {
        if self.status != ProcessStatus::Running {
            return Err(EngineError::ProtocolViolation(format!(
                "process {} is {:?}, not running",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// Activate the start activities
    pub fn start(&mut self, txn: &WriteTransaction) -> Result<()> {
        if self.status != ProcessStatus::Created {
            return Err(EngineError::ProtocolViolation(format!(
                "process {} was already started",
                self.id
            )));
        }

        let starts: Vec<ActivityId> = self
            .definition
            .start_activities()
            .into_iter()
            .map(|a| a.id.clone())
            .collect();
        for start in starts {
            self.activate(&start, None)?;
        }
        self.status = ProcessStatus::Running;

        info!(process = %self.id, definition = %self.definition.id, txn = %txn.id, "process started");
        Ok(())
    }

    /// Fire a single transition under subtransaction `sub`
    pub fn fire_transition(
        &mut self,
        transition: &TransitionId,
        sub: SubTransactionId,
        txn: &WriteTransaction,
    ) -> Result<Option<WorkItemId>> {
        let source = self.definition.transition(transition)?.from.clone();
        let created = self.fire_group(&source, std::slice::from_ref(transition), sub, txn)?;
        Ok(created.into_iter().next())
    }

    /// Fire transitions sharing one source: deactivate it once, activate every target
    fn fire_group(
        &mut self,
        source: &ActivityId,
        transitions: &[TransitionId],
        sub: SubTransactionId,
        txn: &WriteTransaction,
    ) -> Result<Vec<WorkItemId>> {
        if !self.active.contains(source) {
            return Err(EngineError::ProtocolViolation(format!(
                "cannot fire from inactive node '{}'",
                source
            )));
        }

        let label = {
            let subtransaction = self.global_transaction.subtransaction(sub).ok_or_else(|| {
                EngineError::SubtransactionNotFound { id: sub.to_string() }
            })?;
            if let Some(outside) = transitions.iter().find(|t| !subtransaction.permits(t)) {
                return Err(EngineError::ProtocolViolation(format!(
                    "transition '{}' is outside subtransaction {}",
                    outside, sub
                )));
            }
            subtransaction.label.clone()
        };

        let definition = Arc::clone(&self.definition);
        let mut edges = Vec::with_capacity(transitions.len());
        for id in transitions {
            let edge = definition.transition(id)?;
            if edge.from != *source {
                return Err(EngineError::ProtocolViolation(format!(
                    "transition '{}' does not leave '{}'",
                    id, source
                )));
            }
            edges.push(edge);
        }

        self.deactivate(source)?;

        let mut created = Vec::new();
        for edge in edges {
            let work_item = self.activate(&edge.to, Some(edge.id.clone()))?;
            self.global_transaction.record_fired(sub, edge.id.clone())?;
            self.history.push(ReplayEvent {
                transition: edge.id.clone(),
                from: edge.from.clone(),
                to: edge.to.clone(),
                subtransaction: sub,
                label: label.clone(),
                work_item,
                write_transaction: txn.id,
                timestamp: Utc::now(),
            });
            debug!(process = %self.id, transition = %edge.id, from = %edge.from, to = %edge.to, "fired transition");
            created.extend(work_item);
        }
        Ok(created)
    }

    fn activate(&mut self, node: &ActivityId, via: Option<TransitionId>) -> Result<Option<WorkItemId>> {
        let kind = self.node(node)?.kind;
        self.active.insert(node.clone());
        if let Some(instance) = self.nodes.get_mut(node) {
            instance.incoming = via.clone();
        }

        if kind != ActivityKind::Task || self.work_item_at(node).is_some() {
            return Ok(None);
        }

        let item = WorkItem::new(self.id, node.clone(), via);
        let id = item.base.id;
        self.register(ProcessWorkItem::Plain(item))?;

        let behaviors = self.definition.activity(node)?.behaviors.clone();
        for behavior in &behaviors {
            self.add_action(id, behavior.instantiate())?;
        }
        Ok(Some(id))
    }

    fn deactivate(&mut self, node: &ActivityId) -> Result<()> {
        self.active.remove(node);
        // A node keeps at most one unresolved plain item, and only while active
        if let Some(stale) = self.work_item_at(node) {
            debug!(process = %self.id, node = %node, work_item = %stale, "retiring unresolved work item");
            self.retire(stale)?;
        }
        Ok(())
    }

    fn register(&mut self, item: ProcessWorkItem) -> Result<()> {
        let node = self.node(&item.base().node)?.object_id;
        let handle = item.base().object_id;
        let id = item.id();
        self.aggregation.add(node, WORKITEMS, handle)?;
        self.work_items.insert(id, item);
        self.work_item_order.push(id);
        Ok(())
    }

    /// Drop a work item together with its actions
    fn retire(&mut self, id: WorkItemId) -> Result<()> {
        let handle = self.base_handle(id)?;
        for action in self.aggregation.contents(handle, ACTIONS)? {
            self.aggregation.detach(action)?;
            self.actions.remove(&action);
        }
        self.aggregation.detach(handle)?;
        self.work_items.remove(&id);
        self.work_item_order.retain(|item| *item != id);
        self.released.push(handle);
        Ok(())
    }

    /// Drop the lock records of every item consumed or retired so far
    pub fn release_locks(&mut self, locks: &LockManager) -> usize {
        let released = self.released.len();
        for handle in self.released.drain(..) {
            locks.release(handle);
        }
        released
    }

    /// Replay `decision` inside subtransaction `sub`
    ///
    /// The subtransaction's scope is fired, or the decision's whole path when
    /// the scope is empty. Returns the work items created, in creation order.
    pub fn replay_path(
        &mut self,
        decision: &UserDecision,
        sub: SubTransactionId,
        txn: &WriteTransaction,
    ) -> Result<Vec<WorkItemId>> {
        let scope: BTreeSet<TransitionId> = match self.global_transaction.subtransaction(sub) {
            Some(subtransaction) if !subtransaction.is_unscoped() => subtransaction.scope.clone(),
            Some(_) => decision.path.transitions().cloned().collect(),
            None => return Err(EngineError::SubtransactionNotFound { id: sub.to_string() }),
        };

        let definition = Arc::clone(&self.definition);
        let mut edges = Vec::with_capacity(scope.len());
        for id in &scope {
            edges.push(definition.transition(id)?);
        }
        edges.sort_by_key(|edge| definition.transition_index(&edge.id));

        let origins = decision.concerned_nodes();
        let mut fired: BTreeSet<TransitionId> = BTreeSet::new();
        let mut created = Vec::new();

        while fired.len() < edges.len() {
            // Edges are in definition order, so the first ready one wins ties
            let ready = edges.iter().find(|edge| {
                !fired.contains(&edge.id)
                    && self.active.contains(&edge.from)
                    && (origins.contains(&edge.from)
                        || edges
                            .iter()
                            .filter(|incoming| incoming.to == edge.from)
                            .all(|incoming| fired.contains(&incoming.id)))
            });

            let source = match ready {
                Some(edge) => edge.from.clone(),
                None => {
                    let remaining: Vec<String> = edges
                        .iter()
                        .filter(|edge| !fired.contains(&edge.id))
                        .map(|edge| edge.id.to_string())
                        .collect();
                    warn!(process = %self.id, subtransaction = %sub, remaining = ?remaining, "replay stalled");
                    return Err(EngineError::ReplayStalled {
                        subtransaction: sub.to_string(),
                        remaining,
                    });
                }
            };

            let group: Vec<TransitionId> = edges
                .iter()
                .filter(|edge| edge.from == source && !fired.contains(&edge.id))
                .map(|edge| edge.id.clone())
                .collect();
            created.extend(self.fire_group(&source, &group, sub, txn)?);
            fired.extend(group);
        }

        Ok(created)
    }

    /// Raise a decision from `initiator`, merging it into a converging one
    ///
    /// A pending decision with an equal path is the same decision. So is one
    /// raised by other nodes that shares a target with the new path: that is
    /// a convergence. Alternatives raised by the same node stay apart.
    /// A merge returns the id of the decision merged into.
    pub fn raise_decision(&mut self, path: DecisionPath, initiator: ActivityId) -> Result<WorkItemId> {
        let incoming = UserDecision::new(path, initiator);

        for id in &self.work_item_order {
            if let Some(ProcessWorkItem::Decision(existing)) = self.work_items.get_mut(id) {
                if existing.base.is_pending()
                    && (existing.decision == incoming
                        || (existing.decision.initiators.is_disjoint(&incoming.initiators)
                            && existing.decision.path.converges_with(&incoming.path)))
                {
                    existing.merge(&incoming);
                    debug!(process = %self.id, decision = %id, initiators = ?existing.decision.initiators, "merged decision");
                    return Ok(*id);
                }
            }
        }

        let item = DecisionWorkItem::new(self.id, incoming)?;
        let id = item.base.id;
        let node = item.base.node.clone();
        self.register(ProcessWorkItem::Decision(item))?;

        let behaviors = self.definition.activity(&node)?.behaviors.clone();
        for behavior in &behaviors {
            self.add_action(id, behavior.instantiate())?;
        }
        debug!(process = %self.id, decision = %id, node = %node, "raised decision");
        Ok(id)
    }

    /// Complete a plain work item and raise the decisions its node enables
    ///
    /// Returns the pending decisions raised (new or merged). Decisions that
    /// only lead to end activities are consumed right away when
    /// `auto_finish` is configured and they validate.
    pub fn complete_work_item(
        &mut self,
        id: WorkItemId,
        ctx: &RuntimeContext,
        request: &RequestContext,
        txn: &WriteTransaction,
    ) -> Result<Resolution<Vec<WorkItemId>>> {
        self.ensure_running()?;

        let item = self.plain_work_item(id)?;
        if !item.base.is_pending() {
            return Err(EngineError::ProtocolViolation(format!(
                "work item {} is {:?}",
                id, item.base.state
            )));
        }
        if item.is_locked(&ctx.locks, request) {
            return Ok(Resolution::Rejected(RejectReason::Locked {
                holder: ctx.locks.holder(item.lock_key()).map(|r| r.holder),
            }));
        }
        if !item.validate(self, &ctx.locks, request)? {
            return Ok(Resolution::Rejected(RejectReason::GuardFailed));
        }
        let node = item.base.node.clone();

        self.set_state(id, WorkItemState::Consumed);

        let paths = self.definition.decision_paths_from(&node, ctx.config.max_path_depth)?;
        let mut raised: Vec<WorkItemId> = Vec::new();
        for path in paths {
            let decision = self.raise_decision(path, node.clone())?;
            if !raised.contains(&decision) {
                raised.push(decision);
            }
        }

        if ctx.config.auto_finish {
            for decision in raised.clone() {
                if self.is_pending(decision)
                    && self.leads_only_to_end(decision)?
                    && self.consume_decision(decision, ctx, request, txn)?.is_completed()
                {
                    debug!(process = %self.id, decision = %decision, "auto-finished decision");
                }
            }
        }

        raised.retain(|decision| self.is_pending(*decision));
        self.release_locks(&ctx.locks);
        self.refresh_status();
        info!(process = %self.id, work_item = %id, node = %node, decisions = raised.len(), "completed work item");
        Ok(Resolution::Completed(raised))
    }

    /// Consume a pending decision: replay its path and close it
    ///
    /// Returns the pending work item at the decision's node afterwards, if the
    /// node is a task.
    pub fn consume_decision(
        &mut self,
        id: WorkItemId,
        ctx: &RuntimeContext,
        request: &RequestContext,
        txn: &WriteTransaction,
    ) -> Result<Resolution<Option<WorkItemId>>> {
        self.ensure_running()?;

        let item = self.decision(id)?;
        if !item.base.is_pending() {
            return Err(EngineError::ProtocolViolation(format!(
                "decision {} is {:?}",
                id, item.base.state
            )));
        }
        if item.is_finished() {
            return Err(EngineError::ProtocolViolation(format!(
                "decision {} has no concerned node left",
                id
            )));
        }
        if let Some(inactive) = item.decision.path.sources().iter().find(|n| !self.active.contains(*n)) {
            return Err(EngineError::ProtocolViolation(format!(
                "source '{}' of decision {} is not active",
                inactive, id
            )));
        }
        if item.is_locked(&ctx.locks, request) {
            return Ok(Resolution::Rejected(RejectReason::Locked {
                holder: ctx.locks.holder(item.lock_key()).map(|r| r.holder),
            }));
        }
        if !item.validate(self, &ctx.locks, request)? {
            return Ok(Resolution::Rejected(RejectReason::GuardFailed));
        }

        let decision = item.decision.clone();
        let node = item.base.node.clone();
        self.set_state(id, WorkItemState::Validated);

        let sub = self
            .global_transaction
            .start_subtransaction(TransactionLabel::Replay, BTreeSet::new(), id);
        self.replay_path(&decision, sub, txn)?;
        self.global_transaction.remove_subtransaction(sub)?;

        if let Some(ProcessWorkItem::Decision(item)) = self.work_items.get_mut(&id) {
            let concerned = item.concerned_nodes();
            item.validations.extend(concerned);
            item.base.state = WorkItemState::Consumed;
            self.released.push(item.base.object_id);
        }

        self.prune_stale_decisions()?;
        self.release_locks(&ctx.locks);
        self.refresh_status();
        info!(process = %self.id, decision = %id, node = %node, "consumed decision");
        Ok(Resolution::Completed(self.work_item_at(&node)))
    }

    /// Drop pending decisions that depend on a node no longer active
    fn prune_stale_decisions(&mut self) -> Result<usize> {
        let stale: Vec<WorkItemId> = self
            .pending_decisions()
            .into_iter()
            .filter(|d| d.concerned_nodes().iter().any(|n| !self.active.contains(n)))
            .map(|d| d.base.id)
            .collect();
        for id in &stale {
            self.retire(*id)?;
        }
        if !stale.is_empty() {
            debug!(process = %self.id, count = stale.len(), "pruned stale decisions");
        }
        Ok(stale.len())
    }

    fn leads_only_to_end(&self, decision: WorkItemId) -> Result<bool> {
        let item = self.decision(decision)?;
        for target in item.decision.path.targets() {
            if self.node(target)?.kind != ActivityKind::End {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn is_pending(&self, id: WorkItemId) -> bool {
        self.work_items
            .get(&id)
            .map_or(false, |item| item.base().is_pending())
    }

    fn set_state(&mut self, id: WorkItemId, state: WorkItemState) {
        if let Some(item) = self.work_items.get_mut(&id) {
            item.base_mut().state = state;
            if state == WorkItemState::Consumed {
                self.released.push(item.base().object_id);
            }
        }
    }

    /// Mark the process finished once only end nodes are active and nothing is pending
    pub fn refresh_status(&mut self) -> ProcessStatus {
        if self.status == ProcessStatus::Running
            && !self.active.is_empty()
            && self.pending_work_items().is_empty()
            && self
                .active
                .iter()
                .all(|n| self.nodes.get(n).map_or(false, |node| node.kind == ActivityKind::End))
        {
            self.status = ProcessStatus::Finished;
            info!(process = %self.id, "process finished");
        }
        self.status
    }

    /// Attach an action to a work item
    pub fn add_action(&mut self, work_item: WorkItemId, mut action: Box<dyn Action>) -> Result<ObjectId> {
        let owner = self.base_handle(work_item)?;
        action.attach(work_item);
        let handle = action.object_id();
        self.aggregation.add(owner, ACTIONS, handle)?;
        self.actions.insert(handle, action);
        Ok(handle)
    }

    /// Replace the actions of a work item
    ///
    /// Every newly added action that was pre-bound gets unlocked and its
    /// completion callback invoked once. Returns how many callbacks ran.
    pub fn set_actions(&mut self, work_item: WorkItemId, actions: Vec<Box<dyn Action>>) -> Result<usize> {
        let owner = self.base_handle(work_item)?;
        let previous = self.aggregation.contents(owner, ACTIONS)?;
        self.aggregation.set(owner, ACTIONS, &[])?;
        for handle in previous {
            self.actions.remove(&handle);
        }

        let mut called = 0;
        for action in actions {
            let handle = self.add_action(work_item, action)?;
            if let Some(action) = self.actions.get_mut(&handle) {
                if action.is_dtlocked() {
                    action.set_dtlock(false);
                    action.call();
                    called += 1;
                }
            }
        }
        Ok(called)
    }

    /// Move an action to another work item; the previous owner loses it
    pub fn move_action(&mut self, action: ObjectId, to: WorkItemId) -> Result<()> {
        let owner = self.base_handle(to)?;
        let entry = self
            .actions
            .get_mut(&action)
            .ok_or_else(|| EngineError::Internal(format!("unknown action {}", action)))?;
        entry.attach(to);
        self.aggregation.add(owner, ACTIONS, action)
    }

    pub fn actions_of(&self, work_item: WorkItemId) -> Result<Vec<&dyn Action>> {
        let owner = self.base_handle(work_item)?;
        Ok(self
            .aggregation
            .contents(owner, ACTIONS)?
            .iter()
            .filter_map(|handle| self.actions.get(handle))
            .map(|action| &**action)
            .collect())
    }

    pub fn actions_validators(&self, work_item: WorkItemId) -> Result<Vec<Validator>> {
        Ok(self
            .actions_of(work_item)?
            .into_iter()
            .map(|action| action.validator())
            .collect())
    }

    /// Projection of every pending work item's actions for the search layer
    pub fn searchable_actions(&self) -> Result<Vec<SearchableAction>> {
        let mut entries = Vec::new();
        for item in self.pending_work_items() {
            let base = item.base();
            for action in self.actions_of(base.id)? {
                entries.push(action.searchable(&self.definition.id, &base.node, Some(self.id)));
            }
        }
        Ok(entries)
    }

    /// Record that this process created `entity`
    pub fn add_created_entity(
        &self,
        catalog: &dyn RelationCatalog,
        entity: ObjectId,
        tag: Option<&str>,
    ) -> Result<()> {
        catalog.add_relation(Relation::tagged(self.object_id, entity, "created", tag))
    }

    /// Record that this process is involved with `entity`
    pub fn add_involved_entity(
        &self,
        catalog: &dyn RelationCatalog,
        entity: ObjectId,
        tag: Option<&str>,
    ) -> Result<()> {
        catalog.add_relation(Relation::tagged(self.object_id, entity, "involved", tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::lock::LockManager;
    use crate::engine::workitem::WorkItemState;
    use crate::models::{
        ActivityDefinition, BehaviorDefinition, BehaviorKind, PathEdge, TransitionDefinition,
    };

    fn chain_definition() -> Arc<ProcessDefinition> {
        let mut definition = ProcessDefinition::new("chain", "Linear chain");
        definition.define_activities(vec![
            ActivityDefinition::new("start", ActivityKind::Start),
            ActivityDefinition::task(
                "draft",
                vec![
                    BehaviorDefinition::confirm("submit", "Submit"),
                    BehaviorDefinition::new(
                        "edit",
                        "Edit",
                        BehaviorKind::Form {
                            fields: vec!["title".to_string()],
                        },
                    ),
                ],
            ),
            ActivityDefinition::new("gw", ActivityKind::ExclusiveGateway),
            ActivityDefinition::task("review", vec![]),
        ]);
        definition.define_transitions(vec![
            TransitionDefinition::new("begin", "start", "draft"),
            TransitionDefinition::new("to_gw", "draft", "gw"),
            TransitionDefinition::new("to_review", "gw", "review"),
        ]);
        Arc::new(definition)
    }

    fn edge(id: &str, from: &str, to: &str) -> (TransitionId, PathEdge) {
        (
            TransitionId::from(id),
            PathEdge {
                from: ActivityId::from(from),
                to: ActivityId::from(to),
            },
        )
    }

    fn started() -> (ProcessInstance, WriteTransaction) {
        let txn = WriteTransaction::begin(&RequestContext::new());
        let mut process = ProcessInstance::new(chain_definition());
        process.start(&txn).unwrap();
        (process, txn)
    }

    #[test]
    fn test_start_activates_start_nodes() {
        let (process, _) = started();
        assert_eq!(process.status(), ProcessStatus::Running);
        assert!(process.is_active(&ActivityId::from("start")));
        assert!(process.pending_work_items().is_empty());
    }

    #[test]
    fn test_fire_transition_creates_work_item() {
        let (mut process, txn) = started();
        let sub = process.global_transaction_mut().start_subtransaction(
            TransactionLabel::Custom("Manual".to_string()),
            BTreeSet::new(),
            WorkItemId::new(),
        );

        let created = process
            .fire_transition(&TransitionId::from("begin"), sub, &txn)
            .unwrap()
            .unwrap();

        assert!(!process.is_active(&ActivityId::from("start")));
        assert!(process.is_active(&ActivityId::from("draft")));
        assert_eq!(process.work_item_at(&ActivityId::from("draft")), Some(created));
        assert_eq!(process.work_items_at(&ActivityId::from("draft")).unwrap(), vec![created]);
        assert_eq!(process.actions_of(created).unwrap().len(), 2);
        assert_eq!(process.history().len(), 1);
        assert_eq!(process.global_transaction().subtransaction(sub).unwrap().fired.len(), 1);

        // Source is no longer active
        let err = process
            .fire_transition(&TransitionId::from("begin"), sub, &txn)
            .unwrap_err();
        assert!(matches!(err, EngineError::ProtocolViolation(_)));
    }

    #[test]
    fn test_scoped_subtransaction_refuses_outside_transitions() {
        let (mut process, txn) = started();
        let scope: BTreeSet<TransitionId> = [TransitionId::from("to_gw")].into_iter().collect();
        let sub = process
            .global_transaction_mut()
            .start_subtransaction(TransactionLabel::Replay, scope, WorkItemId::new());

        let err = process
            .fire_transition(&TransitionId::from("begin"), sub, &txn)
            .unwrap_err();
        assert!(err.is_structural());
        assert!(process.is_active(&ActivityId::from("start")));
    }

    #[test]
    fn test_replay_walks_through_gateway() {
        let (mut process, txn) = started();
        let decision = UserDecision::new(
            DecisionPath::new(
                vec![
                    edge("begin", "start", "draft"),
                    edge("to_gw", "draft", "gw"),
                    edge("to_review", "gw", "review"),
                ],
                vec![ActivityId::from("start")],
                vec![ActivityId::from("review")],
                vec![TransitionId::from("begin")],
            )
            .unwrap(),
            ActivityId::from("start"),
        );
        let sub = process
            .global_transaction_mut()
            .start_subtransaction(TransactionLabel::Replay, BTreeSet::new(), WorkItemId::new());

        process.replay_path(&decision, sub, &txn).unwrap();

        let order: Vec<&str> = process.history().iter().map(|e| e.transition.as_str()).collect();
        assert_eq!(order, vec!["begin", "to_gw", "to_review"]);
        assert_eq!(
            process.active_nodes().iter().map(|a| a.as_str()).collect::<Vec<_>>(),
            vec!["review"]
        );
        // the draft item was never resolved and got retired with its node
        assert!(process.work_item_at(&ActivityId::from("draft")).is_none());
        assert!(process.work_item_at(&ActivityId::from("review")).is_some());

        process.global_transaction_mut().remove_subtransaction(sub).unwrap();
        assert_eq!(process.global_transaction().committed().len(), 3);
    }

    #[test]
    fn test_replay_stall_keeps_fired_effects() {
        let (mut process, txn) = started();
        // `to_review` leaves gw, which never becomes active
        let decision = UserDecision::new(
            DecisionPath::new(
                vec![edge("begin", "start", "draft"), edge("to_review", "gw", "review")],
                vec![ActivityId::from("start")],
                vec![ActivityId::from("review")],
                vec![TransitionId::from("begin")],
            )
            .unwrap(),
            ActivityId::from("start"),
        );
        let sub = process
            .global_transaction_mut()
            .start_subtransaction(TransactionLabel::Replay, BTreeSet::new(), WorkItemId::new());

        let err = process.replay_path(&decision, sub, &txn).unwrap_err();
        match err {
            EngineError::ReplayStalled { remaining, .. } => assert_eq!(remaining, vec!["to_review"]),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(process.is_active(&ActivityId::from("draft")));
        assert_eq!(process.global_transaction().open_subtransactions().count(), 1);
    }

    #[test]
    fn test_set_actions_calls_unlocked_actions_once() {
        let (mut process, txn) = started();
        let sub = process
            .global_transaction_mut()
            .start_subtransaction(TransactionLabel::Start, BTreeSet::new(), WorkItemId::new());
        let item = process
            .fire_transition(&TransitionId::from("begin"), sub, &txn)
            .unwrap()
            .unwrap();

        let mut locked = BehaviorDefinition::confirm("approve", "Approve").instantiate();
        locked.set_dtlock(true);
        let plain = BehaviorDefinition::confirm("comment", "Comment").instantiate();

        let called = process.set_actions(item, vec![locked, plain]).unwrap();
        assert_eq!(called, 1);

        let actions = process.actions_of(item).unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].call_count(), 1);
        assert!(!actions[0].is_dtlocked());
        assert_eq!(actions[1].call_count(), 0);
        assert_eq!(process.actions_validators(item).unwrap(), vec![Validator::Always, Validator::Always]);
    }

    #[test]
    fn test_move_action_between_work_items() {
        let (mut process, txn) = started();
        let sub = process
            .global_transaction_mut()
            .start_subtransaction(TransactionLabel::Start, BTreeSet::new(), WorkItemId::new());
        let draft = process
            .fire_transition(&TransitionId::from("begin"), sub, &txn)
            .unwrap()
            .unwrap();
        let path = DecisionPath::new(
            vec![edge("to_gw", "draft", "gw"), edge("to_review", "gw", "review")],
            vec![ActivityId::from("draft")],
            vec![ActivityId::from("review")],
            vec![TransitionId::from("to_gw")],
        )
        .unwrap();
        let decision = process.raise_decision(path, ActivityId::from("draft")).unwrap();

        let action = process.actions_of(draft).unwrap()[0].object_id();
        process.move_action(action, decision).unwrap();

        assert_eq!(process.actions_of(draft).unwrap().len(), 1);
        assert_eq!(process.actions_of(decision).unwrap().len(), 1);
        assert_eq!(process.actions_of(decision).unwrap()[0].workitem(), Some(decision));
    }

    #[test]
    fn test_plain_work_item_guard_on_activating_transition() {
        let mut definition = ProcessDefinition::new("guarded", "Guarded entry");
        definition.define_activities(vec![
            ActivityDefinition::new("start", ActivityKind::Start),
            ActivityDefinition::task("pay", vec![]),
        ]);
        definition.define_transitions(vec![TransitionDefinition::new("go", "start", "pay")
            .sync_when(crate::models::Rule::field_exists("has_amount", "amount"))]);

        let txn = WriteTransaction::begin(&RequestContext::new());
        let mut process = ProcessInstance::new(Arc::new(definition));
        process.start(&txn).unwrap();
        let sub = process
            .global_transaction_mut()
            .start_subtransaction(TransactionLabel::Start, BTreeSet::new(), WorkItemId::new());
        let item = process
            .fire_transition(&TransitionId::from("go"), sub, &txn)
            .unwrap()
            .unwrap();

        let locks = LockManager::new();
        let request = RequestContext::new();
        let work_item = process.plain_work_item(item).unwrap();
        assert!(!work_item.validate(&process, &locks, &request).unwrap());

        process
            .workflow_data
            .insert("amount".to_string(), serde_json::json!(10));
        let work_item = process.plain_work_item(item).unwrap();
        assert!(work_item.validate(&process, &locks, &request).unwrap());
        assert_eq!(work_item.base.state, WorkItemState::Pending);
    }
}

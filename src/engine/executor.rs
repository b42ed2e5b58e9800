// Workflow engine facade

//! # Workflow Engine
//!
//! [`WorkflowEngine`] is the entry point a host application talks to. It owns
//! a [`RuntimeContext`] and turns the three user gestures into engine calls:
//!
//! ```text
//!   start(start_item, args)       -> new process, first work item
//!   complete(process, work_item)  -> pending decisions raised
//!   resolve(process, decision)    -> path replayed, next work item
//! ```
//!
//! Each gesture takes the request context of the caller and the write
//! transaction it runs inside. When a gesture leaves the process finished,
//! the process is archived in the runtime.

use serde::Serialize;
use tracing::info;

use super::instance::{read_process, write_process, ProcessStatus, SharedProcess};
use super::lock::{Lockable, RequestContext};
use super::transaction::WriteTransaction;
use super::workitem::{ProcessWorkItem, StartWorkItem};
use super::{RejectReason, Resolution, RuntimeContext};
use crate::models::{ActivityId, ContextId, ProcessId, ProcessInstanceId, WorkItemId};
use crate::{EngineError, Result};

/// Result of starting a process
#[derive(Debug, Clone)]
pub struct Started {
    pub process: SharedProcess,
    pub process_id: ProcessInstanceId,
    /// Work item at the start path's target, when that target is a task
    pub work_item: Option<WorkItemId>,
}

/// Serializable view of a pending work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingWorkItem {
    pub id: WorkItemId,
    pub kind: &'static str,
    pub node: ActivityId,
    /// Nodes the decision leads to; empty for plain items
    pub targets: Vec<ActivityId>,
    /// Nodes that raised the decision; empty for plain items
    pub initiators: Vec<ActivityId>,
    pub locked_by: Option<ContextId>,
}

pub struct WorkflowEngine {
    ctx: RuntimeContext,
}

impl WorkflowEngine {
    pub fn new(ctx: RuntimeContext) -> Self {
        WorkflowEngine { ctx }
    }

    pub fn context(&self) -> &RuntimeContext {
        &self.ctx
    }

    pub fn process(&self, id: ProcessInstanceId) -> Result<SharedProcess> {
        self.ctx.runtime.get_process(id)
    }

    /// One start work item per startable path of the definition
    pub fn startable_work_items(&self, process_id: &ProcessId) -> Result<Vec<StartWorkItem>> {
        let definition = self.ctx.definitions.get_definition(process_id)?;
        let mut items = Vec::new();
        for path in definition.startable_paths(self.ctx.config.max_path_depth)? {
            let initiator = path
                .sources()
                .iter()
                .next()
                .cloned()
                .ok_or_else(|| EngineError::InvalidDefinition("startable path has no source".to_string()))?;
            items.push(StartWorkItem::new(&definition, path, initiator)?);
        }
        Ok(items)
    }

    /// Validate a start work item against `args` and consume it
    pub fn start(
        &self,
        item: &mut StartWorkItem,
        request: &RequestContext,
        txn: &WriteTransaction,
        args: &[serde_json::Value],
    ) -> Result<Resolution<Started>> {
        if item.is_locked(&self.ctx.locks, request) {
            return Ok(self.locked(item.lock_key()));
        }
        if !item.validate_with_arguments(&self.ctx, request, args)? {
            return Ok(Resolution::Rejected(RejectReason::GuardFailed));
        }

        let (work_item, process) = match item.consume(&self.ctx, request, txn, args)? {
            Resolution::Completed(started) => started,
            Resolution::Rejected(reason) => return Ok(Resolution::Rejected(reason)),
        };
        let process_id = read_process(&process)?.id();
        self.archive_if_finished(&process)?;

        Ok(Resolution::Completed(Started {
            process,
            process_id,
            work_item,
        }))
    }

    /// Complete a plain work item; returns the pending decisions it raised
    pub fn complete(
        &self,
        process_id: ProcessInstanceId,
        work_item: WorkItemId,
        request: &RequestContext,
        txn: &WriteTransaction,
    ) -> Result<Resolution<Vec<WorkItemId>>> {
        let process = self.process(process_id)?;
        let resolution = write_process(&process)?.complete_work_item(work_item, &self.ctx, request, txn)?;
        self.archive_if_finished(&process)?;
        Ok(resolution)
    }

    /// Consume a pending decision; returns the work item where it lands
    pub fn resolve(
        &self,
        process_id: ProcessInstanceId,
        decision: WorkItemId,
        request: &RequestContext,
        txn: &WriteTransaction,
    ) -> Result<Resolution<Option<WorkItemId>>> {
        let process = self.process(process_id)?;
        let resolution = write_process(&process)?.consume_decision(decision, &self.ctx, request, txn)?;
        self.archive_if_finished(&process)?;
        Ok(resolution)
    }

    /// Claim a work item or decision for `request`
    pub fn lock(&self, process_id: ProcessInstanceId, work_item: WorkItemId, request: &RequestContext) -> Result<bool> {
        let process = self.process(process_id)?;
        let process = read_process(&process)?;
        let item = Self::find(&process, work_item)?;
        Ok(item.lock(&self.ctx.locks, request))
    }

    pub fn unlock(&self, process_id: ProcessInstanceId, work_item: WorkItemId, request: &RequestContext) -> Result<bool> {
        let process = self.process(process_id)?;
        let process = read_process(&process)?;
        let item = Self::find(&process, work_item)?;
        Ok(item.unlock(&self.ctx.locks, request))
    }

    pub fn pending_work_items(&self, process_id: ProcessInstanceId) -> Result<Vec<PendingWorkItem>> {
        let process = self.process(process_id)?;
        let process = read_process(&process)?;
        Ok(process
            .pending_work_items()
            .into_iter()
            .map(|item| {
                let base = item.base();
                let (kind, targets, initiators) = match item {
                    ProcessWorkItem::Plain(_) => ("plain", vec![], vec![]),
                    ProcessWorkItem::Decision(decision) => (
                        "decision",
                        decision.decision.path.targets().iter().cloned().collect(),
                        decision.decision.initiators.iter().cloned().collect(),
                    ),
                };
                PendingWorkItem {
                    id: base.id,
                    kind,
                    node: base.node.clone(),
                    targets,
                    initiators,
                    locked_by: self.ctx.locks.holder(item.lock_key()).map(|record| record.holder),
                }
            })
            .collect())
    }

    fn find(process: &super::instance::ProcessInstance, id: WorkItemId) -> Result<&ProcessWorkItem> {
        process
            .work_item(id)
            .ok_or_else(|| EngineError::WorkItemNotFound { id: id.to_string() })
    }

    fn locked<T>(&self, key: crate::models::ObjectId) -> Resolution<T> {
        Resolution::Rejected(RejectReason::Locked {
            holder: self.ctx.locks.holder(key).map(|record| record.holder),
        })
    }

    fn archive_if_finished(&self, process: &SharedProcess) -> Result<()> {
        let (id, finished) = {
            let process = read_process(process)?;
            (process.id(), process.status() == ProcessStatus::Finished)
        };
        if finished && !self.ctx.runtime.is_archived(id) {
            self.ctx.runtime.archive_process(id)?;
            info!(process = %id, "finished process archived");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::InMemoryDefinitionRegistry;
    use crate::models::{ActivityDefinition, ActivityKind, ProcessDefinition, TransitionDefinition};
    use std::sync::Arc;

    fn engine() -> WorkflowEngine {
        let mut definition = ProcessDefinition::new("ticket", "Support ticket");
        definition.define_activities(vec![
            ActivityDefinition::new("start", ActivityKind::Start),
            ActivityDefinition::task("triage", vec![]),
            ActivityDefinition::new("end", ActivityKind::End),
        ]);
        definition.define_transitions(vec![
            TransitionDefinition::new("open", "start", "triage"),
            TransitionDefinition::new("close", "triage", "end"),
        ]);

        let registry = Arc::new(InMemoryDefinitionRegistry::new());
        registry.register(definition).unwrap();
        WorkflowEngine::new(RuntimeContext::in_memory(registry, EngineConfig::default()))
    }

    #[test]
    fn test_startable_work_items() {
        let engine = engine();
        let items = engine.startable_work_items(&ProcessId::from("ticket")).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].node.as_str(), "triage");
        assert!(engine.startable_work_items(&ProcessId::from("nope")).is_err());
    }

    #[test]
    fn test_start_then_complete_archives() {
        let engine = engine();
        let request = RequestContext::for_principal("agent");
        let txn = WriteTransaction::begin(&request);
        let mut item = engine
            .startable_work_items(&ProcessId::from("ticket"))
            .unwrap()
            .remove(0);

        let started = engine.start(&mut item, &request, &txn, &[]).unwrap().completed().unwrap();
        let triage = started.work_item.unwrap();

        let pending = engine.pending_work_items(started.process_id).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, "plain");

        // close leads only to end, so completing finishes the process
        let raised = engine
            .complete(started.process_id, triage, &request, &txn)
            .unwrap()
            .completed()
            .unwrap();
        assert!(raised.is_empty());
        assert!(engine.context().runtime.is_archived(started.process_id));
        assert_eq!(read_process(&started.process).unwrap().status(), ProcessStatus::Finished);
    }

    #[test]
    fn test_locked_work_item_rejects_other_context() {
        let engine = engine();
        let alice = RequestContext::for_principal("alice");
        let bob = RequestContext::for_principal("bob");
        let txn = WriteTransaction::begin(&alice);
        let mut item = engine
            .startable_work_items(&ProcessId::from("ticket"))
            .unwrap()
            .remove(0);
        let started = engine.start(&mut item, &alice, &txn, &[]).unwrap().completed().unwrap();
        let triage = started.work_item.unwrap();

        assert!(engine.lock(started.process_id, triage, &alice).unwrap());
        assert!(!engine.lock(started.process_id, triage, &bob).unwrap());
        assert_eq!(
            engine.pending_work_items(started.process_id).unwrap()[0].locked_by,
            Some(alice.id)
        );

        let rejected = engine.complete(started.process_id, triage, &bob, &txn).unwrap();
        assert_eq!(
            rejected,
            Resolution::Rejected(RejectReason::Locked { holder: Some(alice.id) })
        );
        assert!(!engine.context().runtime.is_archived(started.process_id));

        assert!(engine.unlock(started.process_id, triage, &alice).unwrap());
        assert!(engine.complete(started.process_id, triage, &bob, &txn).unwrap().is_completed());
    }
}

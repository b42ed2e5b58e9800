// Definition registry and process runtime registry

//! # Registries
//!
//! Two repositories sit behind the engine:
//!
//! - **DefinitionRegistry**: validated process definitions, keyed by
//!   process id. Definitions are immutable once registered and handed out as
//!   `Arc<ProcessDefinition>`.
//! - **ProcessRuntime**: live process instances, plus the archive where
//!   finished instances are moved.
//!
//! Both are traits so that a persistent backend can replace the in-memory
//! implementations without touching the engine.
//!
//! ## Rust Learning Notes:
//!
//! ### Send + Sync Trait Objects
//! The engine holds `Arc<dyn DefinitionRegistry>` and `Arc<dyn ProcessRuntime>`.
//! The `Send + Sync` supertraits make those trait objects shareable across
//! threads.
//!
//! ### Interior Mutability
//! Every method takes `&self`. Mutation happens through `RwLock` (definitions)
//! or `DashMap` (instances), so a shared reference is enough to register.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tracing::{debug, info};

use super::instance::{read_process, SharedProcess};
use crate::models::{ProcessDefinition, ProcessId, ProcessInstanceId};
use crate::{EngineError, Result};

/// Repository of process definitions
pub trait DefinitionRegistry: Send + Sync {
    /// Look up a definition
    ///
    /// ## Errors
    /// `DefinitionNotFound` when no definition is registered under `id`.
    fn get_definition(&self, id: &ProcessId) -> Result<Arc<ProcessDefinition>>;

    fn list_definitions(&self) -> Result<Vec<Arc<ProcessDefinition>>>;
}

/// In-memory definition registry
#[derive(Debug, Default)]
pub struct InMemoryDefinitionRegistry {
    definitions: RwLock<HashMap<ProcessId, Arc<ProcessDefinition>>>,
}

impl InMemoryDefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a definition, replacing any previous one with the same id
    pub fn register(&self, definition: ProcessDefinition) -> Result<Arc<ProcessDefinition>> {
        definition.validate()?;

        let definition = Arc::new(definition);
        let mut definitions = self
            .definitions
            .write()
            .map_err(|_| EngineError::Internal("definition registry lock poisoned".to_string()))?;
        definitions.insert(definition.id.clone(), Arc::clone(&definition));

        info!(process = %definition.id, activities = definition.activities.len(), "registered definition");
        Ok(definition)
    }
}

impl DefinitionRegistry for InMemoryDefinitionRegistry {
    fn get_definition(&self, id: &ProcessId) -> Result<Arc<ProcessDefinition>> {
        let definitions = self
            .definitions
            .read()
            .map_err(|_| EngineError::Internal("definition registry lock poisoned".to_string()))?;
        definitions
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::DefinitionNotFound { id: id.to_string() })
    }

    fn list_definitions(&self) -> Result<Vec<Arc<ProcessDefinition>>> {
        let definitions = self
            .definitions
            .read()
            .map_err(|_| EngineError::Internal("definition registry lock poisoned".to_string()))?;
        let mut all: Vec<Arc<ProcessDefinition>> = definitions.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }
}

/// Registry of live and archived process instances
pub trait ProcessRuntime: Send + Sync {
    fn add_process(&self, process: SharedProcess) -> Result<ProcessInstanceId>;

    /// Look up a live instance
    fn get_process(&self, id: ProcessInstanceId) -> Result<SharedProcess>;

    /// Live instances, optionally only those of one definition
    fn list_processes(&self, definition: Option<&ProcessId>) -> Result<Vec<SharedProcess>>;

    /// Move a live instance to the archive
    fn archive_process(&self, id: ProcessInstanceId) -> Result<()>;

    fn is_archived(&self, id: ProcessInstanceId) -> bool;
}

#[derive(Debug, Default)]
pub struct InMemoryRuntime {
    live: DashMap<ProcessInstanceId, SharedProcess>,
    archived: DashMap<ProcessInstanceId, SharedProcess>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Archived instance, if `id` was archived
    pub fn archived_process(&self, id: ProcessInstanceId) -> Option<SharedProcess> {
        self.archived.get(&id).map(|entry| Arc::clone(entry.value()))
    }
}

impl ProcessRuntime for InMemoryRuntime {
    fn add_process(&self, process: SharedProcess) -> Result<ProcessInstanceId> {
        let id = read_process(&process)?.id();
        if self.live.contains_key(&id) || self.archived.contains_key(&id) {
            return Err(EngineError::ProtocolViolation(format!(
                "process {} is already registered",
                id
            )));
        }
        self.live.insert(id, process);
        debug!(process = %id, "added process to runtime");
        Ok(id)
    }

    fn get_process(&self, id: ProcessInstanceId) -> Result<SharedProcess> {
        self.live
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::ProcessNotFound { id: id.to_string() })
    }

    fn list_processes(&self, definition: Option<&ProcessId>) -> Result<Vec<SharedProcess>> {
        let mut processes = Vec::new();
        for entry in self.live.iter() {
            let keep = match definition {
                Some(wanted) => read_process(entry.value())?.definition().id == *wanted,
                None => true,
            };
            if keep {
                processes.push(Arc::clone(entry.value()));
            }
        }
        Ok(processes)
    }

    fn archive_process(&self, id: ProcessInstanceId) -> Result<()> {
        let (id, process) = self
            .live
            .remove(&id)
            .ok_or_else(|| EngineError::ProcessNotFound { id: id.to_string() })?;
        self.archived.insert(id, process);
        info!(process = %id, "archived process");
        Ok(())
    }

    fn is_archived(&self, id: ProcessInstanceId) -> bool {
        self.archived.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::instance::ProcessInstance;
    use crate::models::{ActivityDefinition, ActivityKind, TransitionDefinition};

    fn definition(id: &str) -> ProcessDefinition {
        let mut definition = ProcessDefinition::new(id, "Two step");
        definition.define_activities(vec![
            ActivityDefinition::new("start", ActivityKind::Start),
            ActivityDefinition::task("work", vec![]),
            ActivityDefinition::new("end", ActivityKind::End),
        ]);
        definition.define_transitions(vec![
            TransitionDefinition::new("t1", "start", "work"),
            TransitionDefinition::new("t2", "work", "end"),
        ]);
        definition
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = InMemoryDefinitionRegistry::new();
        registry.register(definition("b")).unwrap();
        registry.register(definition("a")).unwrap();

        assert_eq!(registry.get_definition(&ProcessId::from("a")).unwrap().id.as_str(), "a");
        let ids: Vec<String> = registry
            .list_definitions()
            .unwrap()
            .iter()
            .map(|d| d.id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert!(matches!(
            registry.get_definition(&ProcessId::from("missing")),
            Err(EngineError::DefinitionNotFound { .. })
        ));
    }

    #[test]
    fn test_register_rejects_invalid_definition() {
        let registry = InMemoryDefinitionRegistry::new();
        let mut broken = definition("broken");
        broken.define_transitions(vec![TransitionDefinition::new("t", "start", "nowhere")]);

        assert!(registry.register(broken).is_err());
        assert!(registry.list_definitions().unwrap().is_empty());
    }

    #[test]
    fn test_runtime_archive() {
        let runtime = InMemoryRuntime::new();
        let shared: SharedProcess = Arc::new(RwLock::new(ProcessInstance::new(Arc::new(definition("p")))));
        let id = runtime.add_process(Arc::clone(&shared)).unwrap();

        assert!(runtime.add_process(Arc::clone(&shared)).is_err());
        assert_eq!(runtime.list_processes(Some(&ProcessId::from("p"))).unwrap().len(), 1);
        assert!(runtime.list_processes(Some(&ProcessId::from("q"))).unwrap().is_empty());

        runtime.archive_process(id).unwrap();
        assert!(runtime.is_archived(id));
        assert_eq!(runtime.live_count(), 0);
        assert!(runtime.archived_process(id).is_some());
        assert!(matches!(
            runtime.get_process(id),
            Err(EngineError::ProcessNotFound { .. })
        ));
    }
}

// Waypoint Engine
// Runtime state, replay and the facade driving process instances

//! # Engine Module
//!
//! This module is the layer between the declared process graph (`models/`)
//! and whoever drives work through it.
//!
//! ## Engine Components
//!
//! ### Locks (`lock` module)
//! - Advisory, request-scoped claims on work items
//!
//! ### Aggregation (`composite` module)
//! - Single-owner containment with bidirectional views, used for
//!   node -> work items and work item -> actions
//!
//! ### Work Items (`workitem` module)
//! - Start, plain and decision work items and their validation rule
//!
//! ### Instances and Replay (`instance`, `transaction` modules)
//! - Live process state, its root transaction and named subtransactions
//! - Topological replay of decision paths
//!
//! ### External Interfaces (`registry`, `catalog` modules)
//! - Definition registry, process runtime and relation catalog traits with
//!   in-memory implementations
//!
//! ### Facade (`executor` module)
//! - [`WorkflowEngine`] wraps a [`RuntimeContext`] and exposes start,
//!   complete and resolve
//!
//! ## Expected Failures
//!
//! A lock held by someone else or a guard that does not hold is not an error.
//! Engine operations report it as [`Resolution::Rejected`] and leave every
//! piece of state untouched. `Err(EngineError)` is reserved for structural
//! problems.
//!
//! ## Rust Learning Notes:
//!
//! ### Explicit Context Passing
//! There is no global registry. Every operation needing a lookup receives the
//! [`RuntimeContext`], which bundles the shared services as trait objects
//! behind `Arc`.

use std::sync::Arc;

use serde::Serialize;

use crate::config::EngineConfig;
use crate::models::ContextId;

/// Relation catalog
///
/// Contains:
/// - Tagged relations between processes and entities
/// - Entity helpers (creator, involved processes)
pub mod catalog;

/// Composite aggregation arena
pub mod composite;

/// Workflow engine facade
///
/// Contains:
/// - Start work item discovery and process start
/// - Completion of plain work items and resolution of decisions
/// - Archiving of finished processes
pub mod executor;

/// Process instances and replay
pub mod instance;

/// Lock manager and the `Lockable` trait
pub mod lock;

/// Definition registry and process runtime
pub mod registry;

/// Root transaction and subtransactions
pub mod transaction;

/// Work item variants and decisions
pub mod workitem;


pub use catalog::{Entity, InMemoryRelationCatalog, Relation, RelationCatalog, RelationFilter, TagMatch};
pub use executor::{PendingWorkItem, Started, WorkflowEngine};
pub use registry::{DefinitionRegistry, InMemoryDefinitionRegistry, InMemoryRuntime, ProcessRuntime};

/// Shared services every engine operation may need
#[derive(Clone)]
pub struct RuntimeContext {
    pub definitions: Arc<dyn DefinitionRegistry>,
    pub catalog: Arc<dyn RelationCatalog>,
    pub runtime: Arc<dyn ProcessRuntime>,
    pub locks: Arc<lock::LockManager>,
    pub config: EngineConfig,
}

impl RuntimeContext {
    pub fn new(
        definitions: Arc<dyn DefinitionRegistry>,
        catalog: Arc<dyn RelationCatalog>,
        runtime: Arc<dyn ProcessRuntime>,
        config: EngineConfig,
    ) -> Self {
        RuntimeContext {
            definitions,
            catalog,
            runtime,
            locks: Arc::new(lock::LockManager::new()),
            config,
        }
    }

    /// Context backed by in-memory runtime and catalog
    pub fn in_memory(definitions: Arc<InMemoryDefinitionRegistry>, config: EngineConfig) -> Self {
        Self::new(
            definitions,
            Arc::new(InMemoryRelationCatalog::new()),
            Arc::new(InMemoryRuntime::new()),
            config,
        )
    }
}

/// Why an operation was turned down
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// Another request context holds the element
    Locked { holder: Option<ContextId> },
    /// A synchronous guard does not hold
    GuardFailed,
}

/// Outcome of an operation that can be turned down without being an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T> {
    Completed(T),
    Rejected(RejectReason),
}

impl<T> Resolution<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Resolution::Completed(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Resolution::Rejected(_))
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Resolution::Completed(value) => Some(value),
            Resolution::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&RejectReason> {
        match self {
            Resolution::Completed(_) => None,
            Resolution::Rejected(reason) => Some(reason),
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Resolution<U> {
        match self {
            Resolution::Completed(value) => Resolution::Completed(f(value)),
            Resolution::Rejected(reason) => Resolution::Rejected(reason),
        }
    }
}

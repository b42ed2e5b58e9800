// Waypoint - Rust Edition
// A process engine driving work items through declared process graphs

//! # Waypoint Library
//!
//! Waypoint executes instances of a declared process graph, tracks the work
//! items that are outstanding at any time, and advances the process when work
//! items are completed. This file is the **library root**: it declares the
//! modules and defines the crate-wide error type.
//!
//! ## Core Components
//!
//! ### Domain Models (`models`)
//! - [`ProcessDefinition`]: activities, transitions, applications, parameters
//! - [`TransitionDefinition`]: edges, synchronous ones gated by a [`Rule`]
//! - [`DecisionPath`]: mergeable set of edges a pending decision spans
//! - [`Action`]: capability trait of the business actions work items offer
//!
//! ### Engine (`engine`)
//! - [`LockManager`]: exclusive claims on work items per request context
//! - [`CompositeStore`]: single-owner aggregation with bidirectional views
//! - [`ProcessInstance`]: running process, its transaction and replay engine
//! - Work items: [`StartWorkItem`], [`WorkItem`], [`DecisionWorkItem`]
//! - [`WorkflowEngine`]: facade tying registry, runtime, catalog and locks
//!
//! ### Configuration (`config`)
//! [`EngineConfig`] loaded from `WAYPOINT_*` environment variables.
//!
//! ## Example
//!
//! ```rust
//! use waypoint::models::{ActivityDefinition, ActivityKind, ProcessDefinition, TransitionDefinition};
//!
//! let mut definition = ProcessDefinition::new("hello", "Hello process");
//! definition.define_activities(vec![
//!     ActivityDefinition::new("start", ActivityKind::Start),
//!     ActivityDefinition::task("greet", vec![]),
//! ]);
//! definition.define_transitions(vec![TransitionDefinition::new("go", "start", "greet")]);
//! assert!(definition.validate().is_ok());
//! ```
//!
//! ## Rust Learning Notes:
//!
//! ### Re-exports
//! `pub use` statements create shortcuts so users don't need to know the internal
//! module structure. Instead of `use waypoint::engine::lock::LockManager`,
//! users can write `use waypoint::LockManager`.

// Core domain models: identifiers, graph, rules, paths, actions
pub mod models;

// Runtime: locks, aggregation, work items, instances, replay
pub mod engine;

// Environment-driven engine settings
pub mod config;

pub use models::{
    Action, ActivityDefinition, ActivityId, ActivityKind, BehaviorDefinition, DecisionPath,
    ObjectId, ProcessDefinition, ProcessId, ProcessInstanceId, Rule, RuleCondition,
    TransitionDefinition, TransitionId, WorkItemId,
};

pub use engine::{
    composite::CompositeStore,
    instance::{ProcessInstance, ProcessStatus, SharedProcess},
    lock::{LockManager, Lockable, RequestContext},
    transaction::WriteTransaction,
    workitem::{DecisionWorkItem, StartWorkItem, UserDecision, WorkItem, WorkItemState},
    Resolution, RuntimeContext, WorkflowEngine,
};

pub use config::EngineConfig;

use thiserror::Error;

/// Error types for Waypoint operations
///
/// Validation failures (a guard that does not hold, a lock held by someone
/// else) are *not* errors: they surface as `Ok(false)` or
/// [`Resolution::Rejected`]. Everything below is either a structural problem
/// with a definition or with the way the engine was driven, a parameter
/// binding problem, a failed lookup, or a wrapped storage/serialization error.
///
/// ## Rust Learning Notes:
///
/// ### The `thiserror` Crate
/// - `#[derive(Error)]` implements the `std::error::Error` trait
/// - `#[error("...")]` provides human-readable error messages
/// - `#[from]` enables automatic conversion from other error types with `?`
#[derive(Error, Debug)]
pub enum EngineError {
    /// The process definition is malformed
    #[error("Invalid process definition: {0}")]
    InvalidDefinition(String),

    #[error("Unknown activity '{activity}' in process '{process}'")]
    UnknownActivity { process: String, activity: String },

    #[error("Unknown transition '{transition}' in process '{process}'")]
    UnknownTransition { process: String, transition: String },

    #[error("Activity '{activity}' uses undeclared application '{application}'")]
    UnknownApplication { activity: String, application: String },

    /// Composite property used before being defined
    #[error("Unknown composite property '{name}'")]
    UnknownProperty { name: String },

    /// The engine was driven against its protocol (e.g. firing from an inactive node)
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Replay could not fire any further transition although some remain
    #[error("Replay of subtransaction {subtransaction} stalled with {remaining:?} unfired")]
    ReplayStalled {
        subtransaction: String,
        remaining: Vec<String>,
    },

    #[error("Subtransaction not found: {id}")]
    SubtransactionNotFound { id: String },

    #[error("Process definition not found: {id}")]
    DefinitionNotFound { id: String },

    #[error("Process instance not found: {id}")]
    ProcessNotFound { id: String },

    #[error("Work item not found: {id}")]
    WorkItemNotFound { id: String },

    /// More positional arguments than declared input parameters
    #[error("Too many arguments: expected at most {expected}, got {got}")]
    TooManyArguments { expected: usize, got: usize },

    /// An input parameter received neither an argument nor a default
    #[error("No value for parameter '{parameter}'")]
    ParameterMismatch { parameter: String },

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether this error reports a structural problem rather than bad input
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidDefinition(_)
                | EngineError::UnknownActivity { .. }
                | EngineError::UnknownTransition { .. }
                | EngineError::UnknownApplication { .. }
                | EngineError::UnknownProperty { .. }
                | EngineError::ProtocolViolation(_)
                | EngineError::ReplayStalled { .. }
                | EngineError::SubtransactionNotFound { .. }
        )
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}

/// Type alias for Results that use our custom error type
pub type Result<T> = std::result::Result<T, EngineError>;

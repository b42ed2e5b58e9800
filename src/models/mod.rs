// Core domain models for Waypoint
// Pure data structures describing process graphs and the things they offer

//! # Domain Models Module
//!
//! Everything in here is plain data plus the pure functions over it: no
//! locks, no runtime state. The engine (`crate::engine`) builds on top.
//!
//! - `ids`: definition and runtime identifiers
//! - `rule`: guard conditions
//! - `transition`, `activity`, `process`: the process graph
//! - `path`: decision paths through the graph
//! - `action`: business actions offered by work items
//!
//! ## Rust Learning Notes:
//!
//! ### Re-exports for Clean APIs
//! The `pub use` statements at the bottom create a flat API:
//! `use waypoint::models::ProcessDefinition` instead of
//! `use waypoint::models::process::ProcessDefinition`.

pub mod action;
pub mod activity;
pub mod ids;
pub mod path;
pub mod process;
pub mod rule;
pub mod transition;

pub use action::{
    Action, ActionState, BehaviorDefinition, BehaviorKind, ConfirmAction, FormAction,
    GuardedAction, SearchableAction, Validator,
};
pub use activity::{
    ActivityDefinition, ActivityKind, ApplicationDefinition, ApplicationUsage, ParameterDefinition,
};
pub use ids::{
    ActivityId, ContextId, ObjectId, ProcessId, ProcessInstanceId, SubTransactionId, TransitionId,
    WorkItemId,
};
pub use path::{DecisionPath, PathEdge};
pub use process::ProcessDefinition;
pub use rule::{DataMap, Rule, RuleCondition, RuleEvaluationResult};
pub use transition::TransitionDefinition;

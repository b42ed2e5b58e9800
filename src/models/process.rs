// Process definitions - complete process graph blueprints

//! # Process Definitions
//!
//! A `ProcessDefinition` is the immutable blueprint every process instance
//! executes:
//! - All activities (nodes), in declaration order
//! - All transitions (edges) between them
//! - Applications used by activities and the process's own parameters
//! - Validation ensuring the graph is well formed
//!
//! Incoming and outgoing transitions of an activity are always derived from
//! the transition list; nothing is stored twice.
//!
//! ## Decision Path Discovery
//!
//! When a node completes, the engine asks the definition which decisions that
//! completion makes possible: `decision_paths_from(node)` walks forward
//! through gateways until it reaches task or end activities.
//!
//! ```text
//!   [review] --> <xor> --approve--> [publish]      two paths:
//!                  \---reject-----> [revise]       {review->xor, approve}
//!                                                  {review->xor, reject}
//!
//!   [draft] --> <and> --> [legal]                  one path, two targets:
//!                  \----> [tech]                   {draft->and, ->legal, ->tech}
//! ```
//!
//! ## Rust Learning Notes:
//!
//! ### Recursion Returning Alternatives
//! `expand_node` returns a `Vec` of alternatives. Exclusive branching
//! concatenates alternatives; parallel branching takes their cartesian
//! product, so each alternative of a parallel split contains one alternative
//! of every branch.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::activity::{ActivityDefinition, ActivityKind, ApplicationDefinition, ParameterDefinition};
use super::ids::{ActivityId, ProcessId, TransitionId};
use super::path::{DecisionPath, PathEdge};
use super::rule::DataMap;
use super::transition::TransitionDefinition;
use crate::{EngineError, Result};

/// One way of continuing from a node: edges taken and where they stop
#[derive(Debug, Clone, Default)]
struct Alternative<'a> {
    edges: Vec<&'a TransitionDefinition>,
    targets: BTreeSet<ActivityId>,
}

impl<'a> Alternative<'a> {
    fn combine(&self, other: &Alternative<'a>) -> Alternative<'a> {
        let mut combined = self.clone();
        for edge in &other.edges {
            if !combined.edges.iter().any(|e| e.id == edge.id) {
                combined.edges.push(edge);
            }
        }
        combined.targets.extend(other.targets.iter().cloned());
        combined
    }
}

/// Immutable process graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDefinition {
    pub id: ProcessId,

    #[serde(default)]
    pub description: String,

    /// Controlled processes skip the incoming-guard check of plain work items
    #[serde(default)]
    pub controlled: bool,

    pub activities: Vec<ActivityDefinition>,

    #[serde(default)]
    pub applications: Vec<ApplicationDefinition>,

    pub transitions: Vec<TransitionDefinition>,

    #[serde(default)]
    pub parameters: Vec<ParameterDefinition>,
}

impl ProcessDefinition {
    /// Create an empty definition; populate it with the `define_*` methods
    pub fn new<I: Into<ProcessId>, D: Into<String>>(id: I, description: D) -> Self {
        ProcessDefinition {
            id: id.into(),
            description: description.into(),
            controlled: false,
            activities: vec![],
            applications: vec![],
            transitions: vec![],
            parameters: vec![],
        }
    }

    /// Add activity definitions to the collection of defined activities
    pub fn define_activities(&mut self, activities: Vec<ActivityDefinition>) {
        self.activities.extend(activities);
    }

    /// Add transition definitions
    pub fn define_transitions(&mut self, transitions: Vec<TransitionDefinition>) {
        self.transitions.extend(transitions);
    }

    /// Declare applications used by activities
    pub fn define_applications(&mut self, applications: Vec<ApplicationDefinition>) {
        self.applications.extend(applications);
    }

    /// Declare process parameters; input parameters become workflow data
    pub fn define_parameters(&mut self, parameters: Vec<ParameterDefinition>) {
        self.parameters.extend(parameters);
    }

    pub fn find_activity(&self, id: &ActivityId) -> Option<&ActivityDefinition> {
        self.activities.iter().find(|a| a.id == *id)
    }

    /// Get an activity, failing with a structural error if it is unknown
    pub fn activity(&self, id: &ActivityId) -> Result<&ActivityDefinition> {
        self.find_activity(id).ok_or_else(|| EngineError::UnknownActivity {
            process: self.id.to_string(),
            activity: id.to_string(),
        })
    }

    pub fn transition(&self, id: &TransitionId) -> Result<&TransitionDefinition> {
        self.transitions
            .iter()
            .find(|t| t.id == *id)
            .ok_or_else(|| EngineError::UnknownTransition {
                process: self.id.to_string(),
                transition: id.to_string(),
            })
    }

    /// Position of a transition in declaration order
    pub fn transition_index(&self, id: &TransitionId) -> Option<usize> {
        self.transitions.iter().position(|t| t.id == *id)
    }

    pub fn incoming(&self, id: &ActivityId) -> Vec<&TransitionDefinition> {
        self.transitions.iter().filter(|t| t.to == *id).collect()
    }

    pub fn outgoing(&self, id: &ActivityId) -> Vec<&TransitionDefinition> {
        self.transitions.iter().filter(|t| t.from == *id).collect()
    }

    pub fn start_activities(&self) -> Vec<&ActivityDefinition> {
        self.activities
            .iter()
            .filter(|a| a.kind == ActivityKind::Start)
            .collect()
    }

    pub fn input_parameters(&self) -> Vec<&ParameterDefinition> {
        self.parameters.iter().filter(|p| p.input).collect()
    }

    /// Bind positional arguments to the input parameters
    ///
    /// Parameters without an argument fall back to their default.
    ///
    /// ## Errors
    /// - `TooManyArguments` when more arguments than input parameters are given
    /// - `ParameterMismatch` when a parameter has neither argument nor default
    pub fn bind_arguments(&self, args: &[serde_json::Value]) -> Result<DataMap> {
        let inputs = self.input_parameters();
        if args.len() > inputs.len() {
            return Err(EngineError::TooManyArguments {
                expected: inputs.len(),
                got: args.len(),
            });
        }

        let mut data = DataMap::new();
        for (index, parameter) in inputs.iter().enumerate() {
            let value = match (args.get(index), &parameter.default) {
                (Some(value), _) => value.clone(),
                (None, Some(default)) => default.clone(),
                (None, None) => {
                    return Err(EngineError::ParameterMismatch {
                        parameter: parameter.name.clone(),
                    })
                }
            };
            data.insert(parameter.name.clone(), value);
        }
        Ok(data)
    }

    /// Workflow data holding only the declared parameter defaults
    pub fn default_data(&self) -> DataMap {
        self.input_parameters()
            .into_iter()
            .filter_map(|p| p.default.clone().map(|value| (p.name.clone(), value)))
            .collect()
    }

    /// Validate that the graph is well formed
    ///
    /// Checks that ids are unique, that there is at least one start activity,
    /// that every transition endpoint names a declared activity, and that every
    /// application usage names a declared application with a matching number
    /// of parameter bindings.
    pub fn validate(&self) -> Result<()> {
        let mut activity_ids = HashSet::new();
        for activity in &self.activities {
            if !activity_ids.insert(&activity.id) {
                return Err(EngineError::InvalidDefinition(format!(
                    "Activity '{}' is declared twice in process '{}'",
                    activity.id, self.id
                )));
            }
        }

        if self.start_activities().is_empty() {
            return Err(EngineError::InvalidDefinition(format!(
                "Process '{}' has no start activity",
                self.id
            )));
        }

        let mut transition_ids = HashSet::new();
        for transition in &self.transitions {
            if !transition_ids.insert(&transition.id) {
                return Err(EngineError::InvalidDefinition(format!(
                    "Transition '{}' is declared twice in process '{}'",
                    transition.id, self.id
                )));
            }
            self.activity(&transition.from)?;
            self.activity(&transition.to)?;
        }

        for activity in &self.activities {
            for usage in &activity.applications {
                let application = self
                    .applications
                    .iter()
                    .find(|a| a.id == usage.application)
                    .ok_or_else(|| EngineError::UnknownApplication {
                        activity: activity.id.to_string(),
                        application: usage.application.clone(),
                    })?;

                if application.parameters.len() != usage.parameters.len() {
                    return Err(EngineError::InvalidDefinition(format!(
                        "Activity '{}' binds {} parameters to application '{}' which declares {}",
                        activity.id,
                        usage.parameters.len(),
                        application.id,
                        application.parameters.len()
                    )));
                }
            }
        }

        Ok(())
    }

    /// Activities that can never be reached from a start activity
    ///
    /// Depth-first search from every start activity; anything not visited is
    /// unreachable and usually a modelling mistake.
    pub fn find_unreachable_activities(&self) -> Vec<&ActivityId> {
        let mut reachable = HashSet::new();
        let mut to_visit: Vec<&ActivityId> = self
            .start_activities()
            .into_iter()
            .map(|a| &a.id)
            .collect();

        while let Some(activity) = to_visit.pop() {
            if reachable.insert(activity) {
                for transition in self.outgoing(activity) {
                    if !reachable.contains(&transition.to) {
                        to_visit.push(&transition.to);
                    }
                }
            }
        }

        self.activities
            .iter()
            .map(|a| &a.id)
            .filter(|id| !reachable.contains(id))
            .collect()
    }

    /// Decision paths made possible by the completion of `node`
    ///
    /// Paths continue through gateways and stop at task, start or end
    /// activities. `max_depth` bounds the number of gateways crossed.
    pub fn decision_paths_from(&self, node: &ActivityId, max_depth: usize) -> Result<Vec<DecisionPath>> {
        let origin = self.activity(node)?;
        let mut visited = vec![origin.id.clone()];
        let alternatives = self.expand_node(origin, 0, max_depth, &mut visited)?;

        let mut paths = Vec::with_capacity(alternatives.len());
        for alternative in alternatives {
            if alternative.edges.is_empty() || alternative.targets.is_empty() {
                continue;
            }
            let first: Vec<TransitionId> = alternative
                .edges
                .iter()
                .filter(|t| t.from == *node)
                .map(|t| t.id.clone())
                .collect();
            let edges = alternative.edges.iter().map(|t| {
                (
                    t.id.clone(),
                    PathEdge {
                        from: t.from.clone(),
                        to: t.to.clone(),
                    },
                )
            });
            paths.push(DecisionPath::new(
                edges,
                vec![node.clone()],
                alternative.targets,
                first,
            )?);
        }

        debug!(process = %self.id, node = %node, count = paths.len(), "computed decision paths");
        Ok(paths)
    }

    /// Paths from every start activity; each one backs a start work item
    pub fn startable_paths(&self, max_depth: usize) -> Result<Vec<DecisionPath>> {
        let mut paths = Vec::new();
        for start in self.start_activities() {
            paths.extend(self.decision_paths_from(&start.id, max_depth)?);
        }
        Ok(paths)
    }

    fn expand_node<'a>(
        &'a self,
        node: &'a ActivityDefinition,
        depth: usize,
        max_depth: usize,
        visited: &mut Vec<ActivityId>,
    ) -> Result<Vec<Alternative<'a>>> {
        let outgoing = self.outgoing(&node.id);

        let mut per_branch = Vec::with_capacity(outgoing.len());
        for transition in outgoing {
            per_branch.push(self.expand_transition(transition, depth, max_depth, visited)?);
        }

        if node.kind == ActivityKind::ParallelGateway {
            // Cartesian product: one alternative from every branch
            let mut product = vec![Alternative::default()];
            for branch in per_branch.into_iter().filter(|b| !b.is_empty()) {
                let mut next = Vec::with_capacity(product.len() * branch.len());
                for partial in &product {
                    for alternative in &branch {
                        next.push(partial.combine(alternative));
                    }
                }
                product = next;
            }
            Ok(product.into_iter().filter(|a| !a.edges.is_empty()).collect())
        } else {
            Ok(per_branch.into_iter().flatten().collect())
        }
    }

    fn expand_transition<'a>(
        &'a self,
        transition: &'a TransitionDefinition,
        depth: usize,
        max_depth: usize,
        visited: &mut Vec<ActivityId>,
    ) -> Result<Vec<Alternative<'a>>> {
        let target = self.activity(&transition.to)?;

        let stop_here = || Alternative {
            edges: vec![transition],
            targets: BTreeSet::from([target.id.clone()]),
        };

        if !target.kind.is_gateway() {
            return Ok(vec![stop_here()]);
        }

        if visited.contains(&target.id) {
            // Gateway-only cycle: the branch leads nowhere new
            debug!(process = %self.id, gateway = %target.id, "cut gateway cycle");
            return Ok(vec![]);
        }

        if depth >= max_depth {
            return Err(EngineError::InvalidDefinition(format!(
                "Decision path through '{}' crosses more than {} gateways",
                target.id, max_depth
            )));
        }

        if self.outgoing(&target.id).is_empty() {
            return Ok(vec![stop_here()]);
        }

        visited.push(target.id.clone());
        let continuations = self.expand_node(target, depth + 1, max_depth, visited)?;
        visited.pop();

        Ok(continuations
            .into_iter()
            .map(|continuation| {
                let mut alternative = Alternative {
                    edges: vec![transition],
                    targets: BTreeSet::new(),
                };
                alternative = alternative.combine(&continuation);
                alternative
            })
            .collect())
    }
}

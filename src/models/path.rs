// Decision paths - mergeable progress through a process graph

//! # Decision Paths
//!
//! A `DecisionPath` describes how far along the graph a pending decision
//! reaches, independent of any work item:
//!
//! - **transitions**: the edges the decision would traverse
//! - **sources**: nodes the decision spans from
//! - **targets**: nodes the decision converges on
//! - **first**: entry transitions (those leaving a source)
//!
//! ```text
//!   [n1] --t_left--\
//!                   >--[join]      merge({t_left}, {t_right})
//!   [n2] --t_right-/               = {t_left, t_right}, sources {n1, n2}
//! ```
//!
//! Paths are plain data. Two paths raised independently (for example by the
//! two incoming branches of a join) are combined with [`DecisionPath::merge`],
//! which is a set union: commutative, associative and idempotent, so the
//! order in which completions are observed never changes the result.
//!
//! ## Rust Learning Notes:
//!
//! ### BTreeMap / BTreeSet for Deterministic Order
//! Ordered collections iterate in key order regardless of insertion order.
//! Two paths built from the same edges in a different order therefore look
//! identical, which is exactly what a set-union merge needs.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::ids::{ActivityId, TransitionId};
use super::process::ProcessDefinition;
use super::rule::DataMap;
use crate::{EngineError, Result};

/// Endpoints of a transition, copied into the path so it stands on its own
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathEdge {
    pub from: ActivityId,
    pub to: ActivityId,
}

/// Set of graph edges and nodes spanned by a not-yet-resolved decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionPath {
    transitions: BTreeMap<TransitionId, PathEdge>,
    sources: BTreeSet<ActivityId>,
    targets: BTreeSet<ActivityId>,
    first: BTreeSet<TransitionId>,
}

impl DecisionPath {
    /// Build a path, rejecting empty source or target sets
    pub fn new<E, S, T, F>(edges: E, sources: S, targets: T, first: F) -> Result<Self>
    where
        E: IntoIterator<Item = (TransitionId, PathEdge)>,
        S: IntoIterator<Item = ActivityId>,
        T: IntoIterator<Item = ActivityId>,
        F: IntoIterator<Item = TransitionId>,
    {
        let path = DecisionPath {
            transitions: edges.into_iter().collect(),
            sources: sources.into_iter().collect(),
            targets: targets.into_iter().collect(),
            first: first.into_iter().collect(),
        };

        if path.sources.is_empty() || path.targets.is_empty() {
            return Err(EngineError::InvalidDefinition(
                "decision path needs at least one source and one target".to_string(),
            ));
        }

        Ok(path)
    }

    pub fn sources(&self) -> &BTreeSet<ActivityId> {
        &self.sources
    }

    pub fn targets(&self) -> &BTreeSet<ActivityId> {
        &self.targets
    }

    pub fn first(&self) -> &BTreeSet<TransitionId> {
        &self.first
    }

    /// Transition ids in key order
    pub fn transitions(&self) -> impl Iterator<Item = &TransitionId> {
        self.transitions.keys()
    }

    pub fn edge(&self, id: &TransitionId) -> Option<&PathEdge> {
        self.transitions.get(id)
    }

    pub fn contains(&self, id: &TransitionId) -> bool {
        self.transitions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Transitions of this path leaving `node`
    pub fn transitions_from(&self, node: &ActivityId) -> BTreeSet<TransitionId> {
        self.transitions
            .iter()
            .filter(|(_, edge)| edge.from == *node)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Transitions of this path after the entry ones
    pub fn remaining(&self) -> BTreeSet<TransitionId> {
        self.transitions
            .keys()
            .filter(|id| !self.first.contains(*id))
            .cloned()
            .collect()
    }

    /// Least path containing both operands
    ///
    /// Source, target, first and transition sets are unions; no transition is
    /// ever duplicated.
    pub fn merge(&self, other: &DecisionPath) -> DecisionPath {
        let mut merged = self.clone();
        for (id, edge) in &other.transitions {
            merged.transitions.entry(id.clone()).or_insert_with(|| edge.clone());
        }
        merged.sources.extend(other.sources.iter().cloned());
        merged.targets.extend(other.targets.iter().cloned());
        merged.first.extend(other.first.iter().cloned());
        merged
    }

    /// Two paths are equal iff their transition sets are equal
    pub fn equal(&self, other: &DecisionPath) -> bool {
        self.transitions.len() == other.transitions.len()
            && self.transitions.keys().all(|id| other.transitions.contains_key(id))
    }

    /// Paths converging on at least one common node
    pub fn converges_with(&self, other: &DecisionPath) -> bool {
        !self.targets.is_disjoint(&other.targets)
    }

    /// Evaluate guard conditions along the path
    ///
    /// Without any synchronous transition the path is valid unconditionally.
    /// Otherwise *every* synchronous transition must satisfy its condition;
    /// asynchronous transitions on the same path are never evaluated.
    ///
    /// ## Errors
    /// Returns a structural error when the path names a transition the
    /// definition does not declare.
    pub fn validate(
        &self,
        definition: &ProcessDefinition,
        workflow: &DataMap,
        application: &serde_json::Value,
    ) -> Result<bool> {
        let mut sync_transitions = Vec::new();
        for id in self.transitions.keys() {
            let transition = definition.transition(id)?;
            if transition.sync {
                sync_transitions.push(transition);
            }
        }

        if sync_transitions.is_empty() {
            return Ok(true);
        }

        Ok(sync_transitions
            .iter()
            .all(|transition| transition.condition_holds(workflow, application)))
    }
}

impl PartialEq for DecisionPath {
    fn eq(&self, other: &Self) -> bool {
        self.equal(other)
    }
}

impl Eq for DecisionPath {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::activity::{ActivityDefinition, ActivityKind};
    use crate::models::rule::Rule;
    use crate::models::transition::TransitionDefinition;
    use serde_json::json;

    fn edge(id: &str, from: &str, to: &str) -> (TransitionId, PathEdge) {
        (
            TransitionId::from(id),
            PathEdge {
                from: ActivityId::from(from),
                to: ActivityId::from(to),
            },
        )
    }

    fn single(id: &str, from: &str, to: &str) -> DecisionPath {
        DecisionPath::new(
            vec![edge(id, from, to)],
            vec![ActivityId::from(from)],
            vec![ActivityId::from(to)],
            vec![TransitionId::from(id)],
        )
        .unwrap()
    }

    #[test]
    fn test_empty_sources_rejected() {
        let result = DecisionPath::new(
            vec![edge("t", "a", "b")],
            Vec::<ActivityId>::new(),
            vec![ActivityId::from("b")],
            Vec::<TransitionId>::new(),
        );
        assert!(matches!(result, Err(EngineError::InvalidDefinition(_))));
    }

    #[test]
    fn test_merge_is_commutative() {
        let left = single("t_left", "n1", "join");
        let right = single("t_right", "n2", "join");

        let lr = left.merge(&right);
        let rl = right.merge(&left);

        assert_eq!(lr, rl);
        assert_eq!(lr.sources(), rl.sources());
        assert_eq!(lr.targets(), rl.targets());
        assert_eq!(lr.first(), rl.first());
        assert_eq!(lr.len(), 2);
        assert_eq!(
            lr.sources().iter().map(|a| a.as_str()).collect::<Vec<_>>(),
            vec!["n1", "n2"]
        );
        assert_eq!(lr.targets().len(), 1);
    }

    #[test]
    fn test_merge_is_idempotent_and_associative() {
        let a = single("t1", "a", "x");
        let b = single("t2", "b", "x");
        let c = single("t3", "c", "x");

        let aa = a.merge(&a);
        assert_eq!(aa, a);
        assert_eq!(aa.sources(), a.sources());
        assert_eq!(aa.len(), 1);

        let left = a.merge(&b).merge(&c);
        let right = a.merge(&b.merge(&c));
        assert_eq!(left, right);
        assert_eq!(left.sources(), right.sources());
    }

    #[test]
    fn test_equality_ignores_sources() {
        let a = single("t1", "a", "x");
        let mut b = single("t1", "a", "x");
        b.sources.insert(ActivityId::from("other"));
        assert!(a.equal(&b));
        assert_ne!(a, single("t2", "a", "x"));
    }

    #[test]
    fn test_transitions_from_and_remaining() {
        let path = DecisionPath::new(
            vec![edge("t1", "a", "gw"), edge("t2", "gw", "b")],
            vec![ActivityId::from("a")],
            vec![ActivityId::from("b")],
            vec![TransitionId::from("t1")],
        )
        .unwrap();

        let from_a = path.transitions_from(&ActivityId::from("a"));
        assert_eq!(from_a.len(), 1);
        assert!(from_a.contains(&TransitionId::from("t1")));

        let remaining = path.remaining();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.contains(&TransitionId::from("t2")));
    }

    fn guarded_definition(c2: bool, c3: bool) -> ProcessDefinition {
        let mut definition = ProcessDefinition::new("guarded", "Guarded chain");
        definition.define_activities(vec![
            ActivityDefinition::new("s", ActivityKind::Start),
            ActivityDefinition::new("g1", ActivityKind::ExclusiveGateway),
            ActivityDefinition::new("g2", ActivityKind::ExclusiveGateway),
            ActivityDefinition::task("end_task", vec![]),
        ]);
        let truth = |id: &str, holds: bool| {
            if holds {
                Rule::always(id)
            } else {
                Rule::field_exists(id, "never_set")
            }
        };
        definition.define_transitions(vec![
            // async with a failing condition: must be ignored
            {
                let mut t = TransitionDefinition::new("t1", "s", "g1");
                t.condition = Some(Rule::field_exists("c1", "never_set"));
                t
            },
            TransitionDefinition::new("t2", "g1", "g2").sync_when(truth("c2", c2)),
            TransitionDefinition::new("t3", "g2", "end_task").sync_when(truth("c3", c3)),
        ]);
        definition
    }

    fn chain() -> DecisionPath {
        DecisionPath::new(
            vec![edge("t1", "s", "g1"), edge("t2", "g1", "g2"), edge("t3", "g2", "end_task")],
            vec![ActivityId::from("s")],
            vec![ActivityId::from("end_task")],
            vec![TransitionId::from("t1")],
        )
        .unwrap()
    }

    #[test]
    fn test_validation_requires_every_sync_guard() {
        let data = DataMap::new();
        let app = json!({});

        assert!(chain().validate(&guarded_definition(true, true), &data, &app).unwrap());
        assert!(!chain().validate(&guarded_definition(true, false), &data, &app).unwrap());
        assert!(!chain().validate(&guarded_definition(false, true), &data, &app).unwrap());
    }

    #[test]
    fn test_async_only_path_always_valid() {
        let definition = guarded_definition(false, false);
        let only_async = DecisionPath::new(
            vec![edge("t1", "s", "g1")],
            vec![ActivityId::from("s")],
            vec![ActivityId::from("g1")],
            vec![TransitionId::from("t1")],
        )
        .unwrap();

        assert!(only_async
            .validate(&definition, &DataMap::new(), &serde_json::Value::Null)
            .unwrap());
    }

    #[test]
    fn test_unknown_transition_is_structural() {
        let definition = guarded_definition(true, true);
        let bogus = single("missing", "s", "g1");
        let err = bogus
            .validate(&definition, &DataMap::new(), &json!({}))
            .unwrap_err();
        assert!(err.is_structural());
    }
}

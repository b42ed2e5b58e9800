// Transition definitions - edges of a process graph

//! # Transition Definitions
//!
//! A `TransitionDefinition` connects two activities of a process graph:
//! - `from`: the activity that must be active for the transition to fire
//! - `to`: the activity that becomes active once it fired
//! - `sync`: whether the transition blocks on its guard condition
//! - `condition`: a guard evaluated against process data (sync transitions only)
//!
//! ## Synchronous vs Asynchronous
//!
//! An **asynchronous** transition never blocks a decision: its condition is
//! not evaluated at all. A **synchronous** transition only lets a decision
//! through when its condition holds against the current process data. When a
//! decision path crosses several synchronous transitions, all of them must
//! hold (see `DecisionPath::validate`).
//!
//! ## Rust Learning Notes:
//!
//! ### Builder Methods Taking `self`
//! `sync_when` and `with_guard_source` take `self` by value and return it,
//! which allows chained construction:
//! `TransitionDefinition::new("t", "a", "b").sync_when(rule)`.

use serde::{Deserialize, Serialize};

use super::ids::{ActivityId, TransitionId};
use super::rule::{DataMap, Rule, RuleEvaluationResult};

/// Edge of a process graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionDefinition {
    /// Unique identifier for this transition
    pub id: TransitionId,

    /// Source activity
    pub from: ActivityId,

    /// Target activity
    pub to: ActivityId,

    /// Synchronous transitions are gated by `condition`
    #[serde(default)]
    pub sync: bool,

    /// Guard predicate over process data. `None` means "always true".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Rule>,

    /// Original guard expression text, kept for display and auditing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
}

impl TransitionDefinition {
    /// Create an asynchronous transition without a guard
    ///
    /// ## Rust Learning Notes:
    ///
    /// ### Into<T> Trait
    /// The `Into` trait enables automatic conversions. Callers can pass
    /// string literals, `String`s or already-constructed ids.
    pub fn new<I, F, T>(id: I, from: F, to: T) -> Self
    where
        I: Into<TransitionId>,
        F: Into<ActivityId>,
        T: Into<ActivityId>,
    {
        TransitionDefinition {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            sync: false,
            condition: None,
            guard: None,
        }
    }

    /// Make this transition synchronous, gated by `condition`
    pub fn sync_when(mut self, condition: Rule) -> Self {
        self.sync = true;
        self.condition = Some(condition);
        self
    }

    /// Attach the textual guard expression this transition was authored with
    pub fn with_guard_source<S: Into<String>>(mut self, guard: S) -> Self {
        self.guard = Some(guard.into());
        self
    }

    /// Evaluate the guard predicate against process data
    ///
    /// This ignores `sync`: callers decide whether the condition matters.
    pub fn condition_holds(&self, workflow: &DataMap, application: &serde_json::Value) -> bool {
        self.condition
            .as_ref()
            .map_or(true, |rule| rule.evaluate(workflow, application))
    }

    /// A transition lets a decision through if it is async or its guard holds
    pub fn permits(&self, workflow: &DataMap, application: &serde_json::Value) -> bool {
        !self.sync || self.condition_holds(workflow, application)
    }

    /// Detailed guard evaluation, `None` when the transition has no guard
    pub fn explain(
        &self,
        workflow: &DataMap,
        application: &serde_json::Value,
    ) -> Option<RuleEvaluationResult> {
        self.condition
            .as_ref()
            .map(|rule| rule.evaluate_detailed(workflow, application))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transition_definition() {
        let transition = TransitionDefinition::new("submit", "draft", "review");

        assert_eq!(transition.id.as_str(), "submit");
        assert_eq!(transition.from.as_str(), "draft");
        assert_eq!(transition.to.as_str(), "review");
        assert!(!transition.sync);
        assert!(transition.condition.is_none());
    }

    #[test]
    fn test_async_transition_ignores_condition() {
        // A condition on an async transition is never a blocker
        let mut transition = TransitionDefinition::new("submit", "draft", "review");
        transition.condition = Some(Rule::field_exists("content", "content"));

        let empty = DataMap::new();
        assert!(!transition.condition_holds(&empty, &json!({})));
        assert!(transition.permits(&empty, &json!({})));
    }

    #[test]
    fn test_sync_transition_uses_guard() {
        let transition = TransitionDefinition::new("approve", "review", "approved")
            .sync_when(Rule::field_equals("ok", "decision", json!("yes")))
            .with_guard_source("decision == 'yes'");

        let mut data = DataMap::new();
        assert!(!transition.permits(&data, &json!({})));

        data.insert("decision".to_string(), json!("yes"));
        assert!(transition.permits(&data, &json!({})));
        assert_eq!(transition.guard.as_deref(), Some("decision == 'yes'"));
        assert!(transition.explain(&data, &json!({})).unwrap().passed);
    }

    #[test]
    fn test_transition_json_defaults() {
        let transition: TransitionDefinition =
            serde_json::from_value(json!({"id": "go", "from": "a", "to": "b"})).unwrap();
        assert!(!transition.sync);
        assert!(transition.condition.is_none());
    }
}

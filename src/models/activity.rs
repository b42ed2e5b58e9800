// Activity, application and parameter definitions

//! # Activity Definitions
//!
//! Activities are the nodes of a process graph. Each one has a **kind**
//! deciding how the engine treats it when a transition activates it:
//!
//! - `Start`: entry point; a process begins with its start activities active
//! - `Task`: human or system work; a work item is created when it activates
//! - `ExclusiveGateway`: routing node, exactly one outgoing branch is taken
//! - `ParallelGateway`: routing node, all outgoing branches are taken together
//! - `End`: terminal node
//!
//! Activities may use **applications** (declared once on the process) by
//! binding process data names to the application's parameters, and offer
//! **behaviors** that become the actions of their work items.

use serde::{Deserialize, Serialize};

use super::action::BehaviorDefinition;
use super::ids::ActivityId;

/// How the engine treats a node once it becomes active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Start,
    Task,
    ExclusiveGateway,
    ParallelGateway,
    End,
}

impl ActivityKind {
    /// Gateways are routed through by decision paths, never targeted
    pub fn is_gateway(&self) -> bool {
        matches!(self, ActivityKind::ExclusiveGateway | ActivityKind::ParallelGateway)
    }
}

impl Default for ActivityKind {
    fn default() -> Self {
        ActivityKind::Task
    }
}

/// An activity's use of a declared application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationUsage {
    /// Must match an `ApplicationDefinition::id` of the process
    pub application: String,
    /// Process data names bound positionally to the application's parameters
    #[serde(default)]
    pub parameters: Vec<String>,
}

/// Activity (node) definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityDefinition {
    pub id: ActivityId,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub kind: ActivityKind,

    /// Applications used by this activity, in declaration order
    #[serde(default)]
    pub applications: Vec<ApplicationUsage>,

    /// Behaviors offered as actions on this activity's work items
    #[serde(default)]
    pub behaviors: Vec<BehaviorDefinition>,
}

impl ActivityDefinition {
    pub fn new<I: Into<ActivityId>>(id: I, kind: ActivityKind) -> Self {
        ActivityDefinition {
            id: id.into(),
            description: String::new(),
            kind,
            applications: vec![],
            behaviors: vec![],
        }
    }

    /// Task activity offering the given behaviors
    pub fn task<I: Into<ActivityId>>(id: I, behaviors: Vec<BehaviorDefinition>) -> Self {
        let mut activity = Self::new(id, ActivityKind::Task);
        activity.behaviors = behaviors;
        activity
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    /// Declare that this activity uses an application
    ///
    /// The parameter bindings are checked against the application definition
    /// by `ProcessDefinition::validate`.
    pub fn add_application<S: Into<String>>(&mut self, application: S, parameters: Vec<String>) {
        self.applications.push(ApplicationUsage {
            application: application.into(),
            parameters,
        });
    }
}

/// Parameter of a process or of an application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    #[serde(default)]
    pub input: bool,
    #[serde(default)]
    pub output: bool,
    /// Value used when no argument is supplied for an input parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl ParameterDefinition {
    pub fn input<S: Into<String>>(name: S) -> Self {
        ParameterDefinition {
            name: name.into(),
            input: true,
            output: false,
            default: None,
        }
    }

    pub fn output<S: Into<String>>(name: S) -> Self {
        ParameterDefinition {
            name: name.into(),
            input: false,
            output: true,
            default: None,
        }
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Application declared once per process and used by activities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationDefinition {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDefinition>,
}

impl ApplicationDefinition {
    pub fn new<S: Into<String>>(id: S, parameters: Vec<ParameterDefinition>) -> Self {
        ApplicationDefinition {
            id: id.into(),
            description: String::new(),
            parameters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_activity_kind_json() {
        let activity: ActivityDefinition = serde_json::from_value(json!({
            "id": "split",
            "kind": "parallel_gateway"
        }))
        .unwrap();
        assert_eq!(activity.kind, ActivityKind::ParallelGateway);
        assert!(activity.kind.is_gateway());

        // Kind defaults to task
        let activity: ActivityDefinition = serde_json::from_value(json!({"id": "review"})).unwrap();
        assert_eq!(activity.kind, ActivityKind::Task);
        assert!(!activity.kind.is_gateway());
    }

    #[test]
    fn test_add_application() {
        let mut activity = ActivityDefinition::task("review", vec![]).with_description("Review it");
        activity.add_application("mailer", vec!["recipient".to_string()]);

        assert_eq!(activity.description, "Review it");
        assert_eq!(activity.applications.len(), 1);
        assert_eq!(activity.applications[0].application, "mailer");
    }
}

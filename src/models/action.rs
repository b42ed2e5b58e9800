// Business actions offered by work items

//! # Actions
//!
//! A work item offers one or more **actions** to whoever resolves it: fill a
//! form, confirm a step, submit data that must satisfy a rule. Every concrete
//! action implements the [`Action`] capability trait, so a work item can hold
//! them as one polymorphic collection (`Vec<Box<dyn Action>>` or an arena of
//! boxed actions) and ask each one for its [`Validator`].
//!
//! Actions are declared on activities through [`BehaviorDefinition`]s and
//! instantiated each time a work item is created for that activity.
//!
//! ## Rust Learning Notes:
//!
//! ### Trait Objects
//! `Box<dyn Action>` stores any type implementing `Action` behind a pointer.
//! Method calls are dispatched at runtime through a vtable, which is how we
//! get per-variant behavior (`validator()`) without knowing the concrete type.
//!
//! ### Provided Trait Methods
//! Only `behavior_id`, `title`, `validator` and the two state accessors must
//! be written by each implementation; everything else has a default body
//! built on top of `state()`/`state_mut()`.

use serde::{Deserialize, Serialize};

use super::ids::{ActivityId, ObjectId, ProcessId, ProcessInstanceId, WorkItemId};
use super::rule::{DataMap, Rule};

/// Checks the data a resolving actor submits for an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Validator {
    /// Accept anything
    Always,
    /// Every listed field must be present and non-null
    RequiredFields { fields: Vec<String> },
    /// Submitted object must satisfy the rule
    Rule { rule: Rule },
}

impl Validator {
    /// Validate a submitted application structure
    pub fn validate(&self, appstruct: &serde_json::Value) -> bool {
        match self {
            Validator::Always => true,
            Validator::RequiredFields { fields } => fields
                .iter()
                .all(|field| appstruct.get(field).map_or(false, |v| !v.is_null())),
            Validator::Rule { rule } => rule.evaluate(&DataMap::new(), appstruct),
        }
    }
}

/// Mutable bookkeeping shared by every action implementation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionState {
    /// Arena handle of this action inside a process aggregation store
    pub object_id: ObjectId,
    /// Pre-bound flag: set while the action is registered but not yet unlocked
    pub dtlock: bool,
    /// Work item this action is attached to
    pub workitem: Option<WorkItemId>,
    /// How many times the completion callback ran
    pub calls: u32,
}

impl ActionState {
    pub fn new() -> Self {
        ActionState {
            object_id: ObjectId::new(),
            dtlock: false,
            workitem: None,
            calls: 0,
        }
    }
}

impl Default for ActionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Projection of an action consumed by the external search layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchableAction {
    pub behavior_id: String,
    pub process_id: ProcessId,
    pub node_id: ActivityId,
    /// `None` while the action belongs to a start work item (no instance yet)
    pub process_instance: Option<ProcessInstanceId>,
    /// Content types the action applies to
    pub context_ids: Vec<String>,
}

/// Capability interface implemented by every concrete action
pub trait Action: std::fmt::Debug + Send + Sync {
    /// Stable identifier of the behavior this action performs
    fn behavior_id(&self) -> &str;

    fn title(&self) -> &str;

    /// Validator for the data submitted with this action
    fn validator(&self) -> Validator;

    /// Content types the action applies to
    fn context_ids(&self) -> &[String];

    fn state(&self) -> &ActionState;

    fn state_mut(&mut self) -> &mut ActionState;

    fn object_id(&self) -> ObjectId {
        self.state().object_id
    }

    fn is_dtlocked(&self) -> bool {
        self.state().dtlock
    }

    fn set_dtlock(&mut self, locked: bool) {
        self.state_mut().dtlock = locked;
    }

    fn workitem(&self) -> Option<WorkItemId> {
        self.state().workitem
    }

    fn attach(&mut self, workitem: WorkItemId) {
        self.state_mut().workitem = Some(workitem);
    }

    /// Completion callback, run when a pre-bound action gets unlocked
    fn call(&mut self) {
        self.state_mut().calls += 1;
    }

    fn call_count(&self) -> u32 {
        self.state().calls
    }

    fn searchable(
        &self,
        process_id: &ProcessId,
        node_id: &ActivityId,
        process_instance: Option<ProcessInstanceId>,
    ) -> SearchableAction {
        SearchableAction {
            behavior_id: self.behavior_id().to_string(),
            process_id: process_id.clone(),
            node_id: node_id.clone(),
            process_instance,
            context_ids: self.context_ids().to_vec(),
        }
    }
}

/// Action asking the actor to fill in a set of fields
#[derive(Debug, Clone)]
pub struct FormAction {
    pub id: String,
    pub title: String,
    pub fields: Vec<String>,
    pub context: Vec<String>,
    pub state: ActionState,
}

impl Action for FormAction {
    fn behavior_id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn validator(&self) -> Validator {
        Validator::RequiredFields {
            fields: self.fields.clone(),
        }
    }

    fn context_ids(&self) -> &[String] {
        &self.context
    }

    fn state(&self) -> &ActionState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ActionState {
        &mut self.state
    }
}

/// Action that only needs an acknowledgement
#[derive(Debug, Clone)]
pub struct ConfirmAction {
    pub id: String,
    pub title: String,
    pub context: Vec<String>,
    pub state: ActionState,
}

impl Action for ConfirmAction {
    fn behavior_id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn validator(&self) -> Validator {
        Validator::Always
    }

    fn context_ids(&self) -> &[String] {
        &self.context
    }

    fn state(&self) -> &ActionState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ActionState {
        &mut self.state
    }
}

/// Action whose submitted data must satisfy a rule
#[derive(Debug, Clone)]
pub struct GuardedAction {
    pub id: String,
    pub title: String,
    pub rule: Rule,
    pub context: Vec<String>,
    pub state: ActionState,
}

impl Action for GuardedAction {
    fn behavior_id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn validator(&self) -> Validator {
        Validator::Rule {
            rule: self.rule.clone(),
        }
    }

    fn context_ids(&self) -> &[String] {
        &self.context
    }

    fn state(&self) -> &ActionState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ActionState {
        &mut self.state
    }
}

/// Which concrete action a behavior produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BehaviorKind {
    Form { fields: Vec<String> },
    Confirm,
    Guarded { rule: Rule },
}

/// Declaration of an action offered at an activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorDefinition {
    pub id: String,
    pub title: String,
    pub kind: BehaviorKind,
    /// Content types the action applies to
    #[serde(default)]
    pub context: Vec<String>,
}

impl BehaviorDefinition {
    pub fn new<I: Into<String>, T: Into<String>>(id: I, title: T, kind: BehaviorKind) -> Self {
        BehaviorDefinition {
            id: id.into(),
            title: title.into(),
            kind,
            context: vec![],
        }
    }

    /// Shorthand for a confirm behavior
    pub fn confirm<I: Into<String>, T: Into<String>>(id: I, title: T) -> Self {
        Self::new(id, title, BehaviorKind::Confirm)
    }

    /// Build a fresh action instance for a new work item
    pub fn instantiate(&self) -> Box<dyn Action> {
        let state = ActionState::new();
        match &self.kind {
            BehaviorKind::Form { fields } => Box::new(FormAction {
                id: self.id.clone(),
                title: self.title.clone(),
                fields: fields.clone(),
                context: self.context.clone(),
                state,
            }),
            BehaviorKind::Confirm => Box::new(ConfirmAction {
                id: self.id.clone(),
                title: self.title.clone(),
                context: self.context.clone(),
                state,
            }),
            BehaviorKind::Guarded { rule } => Box::new(GuardedAction {
                id: self.id.clone(),
                title: self.title.clone(),
                rule: rule.clone(),
                context: self.context.clone(),
                state,
            }),
        }
    }
}

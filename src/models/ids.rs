// Identifiers for process graph elements and runtime objects
//
// ## Identifier Overview
//
// Two families of identifiers live here:
//
// **Definition identifiers** are plain string wrappers chosen by whoever
// authors the process graph:
// - `ProcessId`: "document_review", "purchase_order"
// - `ActivityId`: "draft", "legal_check", "join"
// - `TransitionId`: "submit", "approve", "to_join"
//
// **Runtime identifiers** are generated UUIDs:
// - `ObjectId`: handle of any object stored in an aggregation arena
// - `WorkItemId`: a pending unit of work
// - `ProcessInstanceId`: one running process
// - `ContextId`: identity of a request context (used by the lock manager)
// - `SubTransactionId`: a scoped unit of replay work
//
// Runtime objects reference each other through these handles instead of
// pointers, so there is never a reference cycle between a container and its
// elements.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// **Activity** - identifies a node of a process graph
///
/// ```rust
/// # use waypoint::ActivityId;
/// let activity = ActivityId::from("review");
/// assert_eq!(activity.as_str(), "review");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActivityId(pub String);

impl ActivityId {
    /// Get the activity identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Create a new activity id from any string-like input
    pub fn new<S: Into<String>>(name: S) -> Self {
        ActivityId(name.into())
    }
}

impl From<&str> for ActivityId {
    fn from(s: &str) -> Self {
        ActivityId(s.to_string())
    }
}

impl From<String> for ActivityId {
    fn from(s: String) -> Self {
        ActivityId(s)
    }
}

impl std::fmt::Display for ActivityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// **Transition** - identifies an edge of a process graph
///
/// ```rust
/// # use waypoint::TransitionId;
/// let transition = TransitionId::new("approve");
/// assert_eq!(transition, TransitionId::from("approve"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransitionId(pub String);

impl TransitionId {
    /// Get the transition identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Create a new transition id from any string-like input
    pub fn new<S: Into<String>>(name: S) -> Self {
        TransitionId(name.into())
    }
}

impl From<&str> for TransitionId {
    fn from(s: &str) -> Self {
        TransitionId(s.to_string())
    }
}

impl From<String> for TransitionId {
    fn from(s: String) -> Self {
        TransitionId(s)
    }
}

impl std::fmt::Display for TransitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a process definition in the definition registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(pub String);

impl ProcessId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn new<S: Into<String>>(name: S) -> Self {
        ProcessId(name.into())
    }
}

impl From<&str> for ProcessId {
    fn from(s: &str) -> Self {
        ProcessId(s.to_string())
    }
}

impl From<String> for ProcessId {
    fn from(s: String) -> Self {
        ProcessId(s)
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generated identifiers all share the same shape: a UUID v4 wrapper that can
/// be copied freely and used as a map key.
///
/// ## Rust Learning Notes:
///
/// ### Declarative Macros
/// `macro_rules!` lets us stamp out the same struct and impls for several
/// names without repeating ourselves. Each invocation below expands into a
/// full type definition at compile time.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random identifier
            pub fn new() -> Self {
                $name(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                $name(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Handle of an object living in an aggregation arena (nodes, work items, actions)
    ObjectId
);
uuid_id!(
    /// Identifier of a pending or consumed work item
    WorkItemId
);
uuid_id!(
    /// Identifier of a running (or archived) process instance
    ProcessInstanceId
);
uuid_id!(
    /// Identity of a request context; locks compare holders by this value
    ContextId
);
uuid_id!(
    /// Identifier of a subtransaction opened on a process's root transaction
    SubTransactionId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_id_creation() {
        let a1 = ActivityId::from("draft");
        let a2 = ActivityId::from("draft".to_string());
        let a3 = ActivityId::new("draft");

        assert_eq!(a1, a2);
        assert_eq!(a2, a3);
        assert_eq!(a1.as_str(), "draft");
        assert_eq!(a1.to_string(), "draft");
    }

    #[test]
    fn test_ids_order_like_their_strings() {
        let mut ids = vec![
            TransitionId::from("t3"),
            TransitionId::from("t1"),
            TransitionId::from("t2"),
        ];
        ids.sort();
        let names: Vec<&str> = ids.iter().map(|t| t.as_str()).collect();
        assert_eq!(names, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let first = WorkItemId::new();
        let second = WorkItemId::new();
        assert_ne!(first, second);

        let uuid = Uuid::new_v4();
        assert_eq!(ContextId::from(uuid).as_uuid(), &uuid);
    }
}

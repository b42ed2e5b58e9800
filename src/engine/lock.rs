// Advisory, request-scoped locks on work items and decisions

//! # Lock Manager
//!
//! Every lockable element (a work item, a pending decision, a start work item)
//! can be claimed by one request context at a time. Locking is advisory: it
//! never blocks. A context that finds an element held by someone else gets
//! `false` back and decides for itself whether to retry or give up.
//!
//! ```text
//!   context A: lock(W)      -> true     A holds W
//!   context B: is_locked(W) -> true     B must not validate or consume W
//!   context B: lock(W)      -> false
//!   context A: unlock(W)    -> true
//!   context B: lock(W)      -> true     B holds W
//! ```
//!
//! Holder identity is the request context's id, nothing else.
//!
//! ## Rust Learning Notes:
//!
//! ### DashMap
//! `DashMap` is a concurrent hash map sharded internally, so many callers can
//! lock different elements at once without a global mutex. Its `entry` API
//! gives an atomic "insert if absent" which is exactly a try-lock.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::models::{ContextId, ObjectId};

/// Identity of the caller on whose behalf an operation runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub id: ContextId,
    /// Who is acting, for logging only
    pub principal: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        RequestContext {
            id: ContextId::new(),
            principal: None,
        }
    }

    pub fn for_principal<S: Into<String>>(principal: S) -> Self {
        RequestContext {
            id: ContextId::new(),
            principal: Some(principal.into()),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Who holds an element and since when
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub holder: ContextId,
    pub acquired_at: DateTime<Utc>,
}

/// Concurrent table of lock records keyed by element handle
#[derive(Debug, Default)]
pub struct LockManager {
    locks: DashMap<ObjectId, LockRecord>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to claim `element` for `context`
    ///
    /// Returns `false` when a different context already holds it. Locking an
    /// element the context already holds is a successful no-op.
    pub fn lock(&self, element: ObjectId, context: &RequestContext) -> bool {
        match self.locks.entry(element) {
            Entry::Occupied(entry) => {
                let held = entry.get().holder == context.id;
                if !held {
                    debug!(element = %element, holder = %entry.get().holder, requester = %context.id, "lock refused");
                }
                held
            }
            Entry::Vacant(entry) => {
                entry.insert(LockRecord {
                    holder: context.id,
                    acquired_at: Utc::now(),
                });
                debug!(element = %element, holder = %context.id, "lock acquired");
                true
            }
        }
    }

    /// Release `element`; only its holder can
    pub fn unlock(&self, element: ObjectId, context: &RequestContext) -> bool {
        let released = self
            .locks
            .remove_if(&element, |_, record| record.holder == context.id)
            .is_some();
        if released {
            debug!(element = %element, holder = %context.id, "lock released");
        }
        released
    }

    /// True iff `element` is held by a context other than `context`
    pub fn is_locked(&self, element: ObjectId, context: &RequestContext) -> bool {
        self.locks
            .get(&element)
            .map_or(false, |record| record.holder != context.id)
    }

    pub fn holder(&self, element: ObjectId) -> Option<LockRecord> {
        self.locks.get(&element).map(|record| record.clone())
    }

    /// Forget the record for `element` whoever holds it
    ///
    /// Used once the element itself is gone (consumed or retired).
    pub fn release(&self, element: ObjectId) -> bool {
        let released = self.locks.remove(&element);
        if let Some((_, record)) = &released {
            debug!(element = %element, holder = %record.holder, "lock record dropped");
        }
        released.is_some()
    }

    /// Drop every lock held by `context`, returning how many were released
    pub fn release_all(&self, context: &RequestContext) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, record| record.holder != context.id);
        before - self.locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Anything the lock manager can guard
///
/// Implementors only name their lock key; locking itself is delegated to the
/// manager passed in.
pub trait Lockable {
    fn lock_key(&self) -> ObjectId;

    fn lock(&self, locks: &LockManager, context: &RequestContext) -> bool {
        locks.lock(self.lock_key(), context)
    }

    fn unlock(&self, locks: &LockManager, context: &RequestContext) -> bool {
        locks.unlock(self.lock_key(), context)
    }

    fn is_locked(&self, locks: &LockManager, context: &RequestContext) -> bool {
        locks.is_locked(self.lock_key(), context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_exclusivity() {
        let locks = LockManager::new();
        let element = ObjectId::new();
        let a = RequestContext::for_principal("alice");
        let b = RequestContext::for_principal("bob");

        assert!(locks.lock(element, &a));
        assert!(locks.lock(element, &a), "re-locking by the holder succeeds");
        assert!(locks.is_locked(element, &b));
        assert!(!locks.is_locked(element, &a));
        assert!(!locks.lock(element, &b));
        assert!(!locks.unlock(element, &b), "only the holder releases");

        assert!(locks.unlock(element, &a));
        assert!(!locks.is_locked(element, &b));
        assert!(locks.lock(element, &b));
        assert_eq!(locks.holder(element).unwrap().holder, b.id);
    }

    #[test]
    fn test_release_all() {
        let locks = LockManager::new();
        let a = RequestContext::new();
        let b = RequestContext::new();

        locks.lock(ObjectId::new(), &a);
        locks.lock(ObjectId::new(), &a);
        locks.lock(ObjectId::new(), &b);

        assert_eq!(locks.release_all(&a), 2);
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn test_release_ignores_holder() {
        let locks = LockManager::new();
        let element = ObjectId::new();
        let a = RequestContext::new();

        assert!(locks.lock(element, &a));
        assert!(locks.release(element));
        assert!(!locks.release(element));
        assert!(locks.is_empty());
    }

    struct Item(ObjectId);

    impl Lockable for Item {
        fn lock_key(&self) -> ObjectId {
            self.0
        }
    }

    #[test]
    fn test_lockable_delegates_to_manager() {
        let locks = LockManager::new();
        let item = Item(ObjectId::new());
        let a = RequestContext::new();
        let b = RequestContext::new();

        assert!(item.lock(&locks, &a));
        assert!(item.is_locked(&locks, &b));
        assert!(item.unlock(&locks, &a));
        assert!(locks.is_empty());
    }
}

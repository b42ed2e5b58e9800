// Single-owner aggregation with bidirectional views

//! # Composite Aggregation
//!
//! A composite-multiple property is a named one-to-many relation between a
//! container and its elements with *ownership*: an element has at most one
//! composite parent. Adding an element to a new container silently detaches
//! it from the previous one first.
//!
//! A property may declare an **opposite** name. The opposite is the element's
//! view of the relation: when work item `W` holds action `A` under `actions`,
//! `A` sees `W` under `workitem`.
//!
//! ```text
//!   add(Y, actions, A)  with A currently in X.actions
//!
//!   before:  X.actions = [A]   A.workitem = [X]   Y.actions = []
//!   after:   X.actions = []    A.workitem = [Y]   Y.actions = [A]
//! ```
//!
//! ## Arena Layout
//!
//! Nothing here holds a pointer to a container or an element. Everything is
//! an [`ObjectId`] handle; the store keeps the membership lists of every
//! container and the owner record of every element, and updates both in the
//! same call so the two views cannot diverge.

use std::collections::HashMap;

use tracing::debug;

use crate::models::ObjectId;
use crate::{EngineError, Result};

/// Declaration of a composite-multiple property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyDef {
    pub name: &'static str,
    /// Name of the element-side view, if the relation is bidirectional
    pub opposite: Option<&'static str>,
    /// Adding an element that is already present is a no-op
    pub unique: bool,
}

impl PropertyDef {
    pub fn composite_multiple(name: &'static str) -> Self {
        PropertyDef {
            name,
            opposite: None,
            unique: false,
        }
    }

    pub fn with_opposite(mut self, opposite: &'static str) -> Self {
        self.opposite = Some(opposite);
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Where an element currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Membership {
    pub owner: ObjectId,
    pub property: &'static str,
}

/// Arena-style store of composite relations
#[derive(Debug, Default)]
pub struct CompositeStore {
    properties: HashMap<&'static str, PropertyDef>,
    /// Ordered member lists, keyed by (container, property or view name)
    contents: HashMap<(ObjectId, &'static str), Vec<ObjectId>>,
    /// Composite parent of every owned element
    owners: HashMap<ObjectId, Membership>,
}

impl CompositeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, property: PropertyDef) {
        self.properties.insert(property.name, property);
    }

    fn property(&self, name: &str) -> Result<PropertyDef> {
        self.properties
            .get(name)
            .copied()
            .ok_or_else(|| EngineError::UnknownProperty {
                name: name.to_string(),
            })
    }

    /// Resolve a property or view name to its canonical `&'static str`
    fn known_name(&self, name: &str) -> Result<&'static str> {
        self.properties
            .values()
            .find_map(|p| {
                if p.name == name {
                    Some(p.name)
                } else {
                    p.opposite.filter(|o| *o == name)
                }
            })
            .ok_or_else(|| EngineError::UnknownProperty {
                name: name.to_string(),
            })
    }

    /// Attach `element` to `container` under `property`
    pub fn add(&mut self, container: ObjectId, property: &str, element: ObjectId) -> Result<()> {
        let def = self.property(property)?;

        if def.unique && self.contains(container, def.name, element) {
            return Ok(());
        }

        if let Some(previous) = self.owners.get(&element).copied() {
            if previous.owner != container || previous.property != def.name {
                debug!(element = %element, from = %previous.owner, to = %container, property = def.name, "moving element");
            }
            self.unlink(previous, element)?;
        }

        self.contents
            .entry((container, def.name))
            .or_default()
            .push(element);
        self.owners.insert(
            element,
            Membership {
                owner: container,
                property: def.name,
            },
        );

        // Reciprocal view; plain list update, it never re-enters `add`
        if let Some(opposite) = def.opposite {
            let view = self.contents.entry((element, opposite)).or_default();
            if !view.contains(&container) {
                view.push(container);
            }
        }

        Ok(())
    }

    /// Detach `elements` from `container` under `property`
    pub fn remove(&mut self, container: ObjectId, property: &str, elements: &[ObjectId]) -> Result<()> {
        let def = self.property(property)?;
        for element in elements {
            let membership = Membership {
                owner: container,
                property: def.name,
            };
            if self.owners.get(element) == Some(&membership) {
                self.unlink(membership, *element)?;
            }
        }
        Ok(())
    }

    /// Replace the members of `container` under `property`
    ///
    /// Elements not listed are removed; listed elements not yet present are
    /// added in order.
    pub fn set(&mut self, container: ObjectId, property: &str, elements: &[ObjectId]) -> Result<()> {
        let def = self.property(property)?;
        let stale: Vec<ObjectId> = self
            .contents_of(container, def.name)
            .iter()
            .filter(|e| !elements.contains(e))
            .copied()
            .collect();
        self.remove(container, def.name, &stale)?;

        for element in elements {
            if !self.contains(container, def.name, *element) {
                self.add(container, def.name, *element)?;
            }
        }
        Ok(())
    }

    /// Members of `container` under a property or a view name, in order
    pub fn contents(&self, container: ObjectId, property: &str) -> Result<Vec<ObjectId>> {
        let name = self.known_name(property)?;
        Ok(self.contents_of(container, name).to_vec())
    }

    pub fn owner(&self, element: ObjectId) -> Option<Membership> {
        self.owners.get(&element).copied()
    }

    /// Remove `element` from whatever container owns it
    pub fn detach(&mut self, element: ObjectId) -> Result<Option<Membership>> {
        match self.owners.get(&element).copied() {
            Some(previous) => {
                self.unlink(previous, element)?;
                Ok(Some(previous))
            }
            None => Ok(None),
        }
    }

    fn contains(&self, container: ObjectId, property: &'static str, element: ObjectId) -> bool {
        self.contents_of(container, property).contains(&element)
    }

    fn contents_of(&self, container: ObjectId, property: &'static str) -> &[ObjectId] {
        self.contents
            .get(&(container, property))
            .map(|members| members.as_slice())
            .unwrap_or(&[])
    }

    /// Remove one ownership link and its reciprocal view entry
    fn unlink(&mut self, membership: Membership, element: ObjectId) -> Result<()> {
        let def = self.property(membership.property)?;

        if let Some(members) = self.contents.get_mut(&(membership.owner, def.name)) {
            members.retain(|e| *e != element);
        }
        self.owners.remove(&element);

        if let Some(opposite) = def.opposite {
            if let Some(view) = self.contents.get_mut(&(element, opposite)) {
                view.retain(|c| *c != membership.owner);
            }
        }
        Ok(())
    }
}

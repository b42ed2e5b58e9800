// Relation catalog linking processes to the entities they touch

//! # Relation Catalog
//!
//! Processes record which entities they created or are involved with as
//! tagged relations:
//!
//! ```text
//!   (process) --[created, created_invoice]--> (entity)
//!   (process) --[involved]------------------> (entity)
//! ```
//!
//! An [`Entity`] asks the catalog for its creator and for the processes
//! involved with it. The catalog itself is an external service; this module
//! defines the [`RelationCatalog`] trait and an in-memory implementation.

use std::collections::BTreeSet;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::models::ObjectId;
use crate::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub id: Uuid,
    pub source_id: ObjectId,
    pub target_id: ObjectId,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl Relation {
    pub fn new(source_id: ObjectId, target_id: ObjectId, tags: BTreeSet<String>) -> Self {
        Relation {
            id: Uuid::new_v4(),
            source_id,
            target_id,
            tags,
            created_at: Utc::now(),
        }
    }

    /// Relation tagged `base`, plus `base` followed by `suffix` when given
    pub fn tagged(source_id: ObjectId, target_id: ObjectId, base: &str, suffix: Option<&str>) -> Self {
        let mut tags = BTreeSet::from([base.to_string()]);
        if let Some(suffix) = suffix {
            tags.insert(format!("{}{}", base, suffix));
        }
        Self::new(source_id, target_id, tags)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TagMatch {
    #[default]
    Any,
    /// At least one of these tags
    AnyOf(Vec<String>),
}

impl TagMatch {
    fn matches(&self, tags: &BTreeSet<String>) -> bool {
        match self {
            TagMatch::Any => true,
            TagMatch::AnyOf(wanted) => wanted.iter().any(|t| tags.contains(t)),
        }
    }
}

/// Query over relations; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct RelationFilter {
    pub source_id: Option<ObjectId>,
    pub target_id: Option<ObjectId>,
    pub tag: TagMatch,
}

impl RelationFilter {
    fn matches(&self, relation: &Relation) -> bool {
        self.source_id.map_or(true, |id| id == relation.source_id)
            && self.target_id.map_or(true, |id| id == relation.target_id)
            && self.tag.matches(&relation.tags)
    }
}

pub trait RelationCatalog: Send + Sync {
    /// Relations matching `filter`, oldest first
    fn find_relations(&self, filter: &RelationFilter) -> Result<Vec<Relation>>;

    fn add_relation(&self, relation: Relation) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryRelationCatalog {
    relations: RwLock<Vec<Relation>>,
}

impl InMemoryRelationCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RelationCatalog for InMemoryRelationCatalog {
    fn find_relations(&self, filter: &RelationFilter) -> Result<Vec<Relation>> {
        let relations = self
            .relations
            .read()
            .map_err(|_| EngineError::Internal("relation catalog lock poisoned".to_string()))?;
        Ok(relations.iter().filter(|r| filter.matches(r)).cloned().collect())
    }

    fn add_relation(&self, relation: Relation) -> Result<()> {
        debug!(source = %relation.source_id, target = %relation.target_id, tags = ?relation.tags, "adding relation");
        self.relations
            .write()
            .map_err(|_| EngineError::Internal("relation catalog lock poisoned".to_string()))?
            .push(relation);
        Ok(())
    }
}

/// Business object processes create and get involved with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub object_id: ObjectId,
    /// Ordered list of state names, current state first
    state: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Entity {
    pub fn new() -> Self {
        Entity {
            object_id: ObjectId::new(),
            state: vec![],
            created_at: Utc::now(),
        }
    }

    pub fn state(&self) -> &[String] {
        &self.state
    }

    pub fn set_state(&mut self, state: Vec<String>) {
        self.state = state;
    }

    /// Object that created this entity, if any relation records one
    pub fn creator(&self, catalog: &dyn RelationCatalog) -> Result<Option<ObjectId>> {
        let filter = RelationFilter {
            target_id: Some(self.object_id),
            tag: TagMatch::AnyOf(vec!["created".to_string()]),
            ..RelationFilter::default()
        };
        Ok(catalog
            .find_relations(&filter)?
            .first()
            .map(|relation| relation.source_id))
    }

    /// Processes involved with this entity, each listed once
    ///
    /// With `tag`, only relations carrying `involved` followed by `tag`;
    /// otherwise anything tagged `involved`.
    pub fn involved_processes(&self, catalog: &dyn RelationCatalog, tag: Option<&str>) -> Result<Vec<ObjectId>> {
        let wanted = match tag {
            Some(tag) => format!("involved{}", tag),
            None => "involved".to_string(),
        };
        let filter = RelationFilter {
            target_id: Some(self.object_id),
            tag: TagMatch::AnyOf(vec![wanted]),
            ..RelationFilter::default()
        };

        let mut processes: Vec<ObjectId> = Vec::new();
        for relation in catalog.find_relations(&filter)? {
            if !processes.contains(&relation.source_id) {
                processes.push(relation.source_id);
            }
        }
        Ok(processes)
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creator_and_involved() {
        let catalog = InMemoryRelationCatalog::new();
        let creator = ObjectId::new();
        let reviewer = ObjectId::new();
        let entity = Entity::new();

        catalog
            .add_relation(Relation::tagged(creator, entity.object_id, "created", Some("_doc")))
            .unwrap();
        catalog
            .add_relation(Relation::tagged(creator, entity.object_id, "involved", None))
            .unwrap();
        catalog
            .add_relation(Relation::tagged(reviewer, entity.object_id, "involved", Some("_review")))
            .unwrap();

        assert_eq!(entity.creator(&catalog).unwrap(), Some(creator));
        assert_eq!(entity.involved_processes(&catalog, None).unwrap(), vec![creator, reviewer]);
        assert_eq!(
            entity.involved_processes(&catalog, Some("_review")).unwrap(),
            vec![reviewer]
        );
    }

    #[test]
    fn test_entity_without_relations() {
        let catalog = InMemoryRelationCatalog::new();
        let mut entity = Entity::new();
        entity.set_state(vec!["draft".to_string(), "private".to_string()]);

        assert_eq!(entity.state(), &["draft".to_string(), "private".to_string()]);
        assert!(entity.creator(&catalog).unwrap().is_none());
        assert!(entity.involved_processes(&catalog, None).unwrap().is_empty());
    }

    #[test]
    fn test_tagged_relation_tags() {
        let relation = Relation::tagged(ObjectId::new(), ObjectId::new(), "created", Some("_x"));
        let tags: Vec<&str> = relation.tags.iter().map(|t| t.as_str()).collect();
        assert_eq!(tags, vec!["created", "created_x"]);

        let filter = RelationFilter {
            source_id: Some(relation.source_id),
            ..RelationFilter::default()
        };
        assert!(filter.matches(&relation));
    }
}

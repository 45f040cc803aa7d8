//! Catalog snapshot: all entity types plus the relation map derived from them.

use crate::error::EngineError;
use crate::schema::{EntityType, RelationMap};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default)]
pub struct Catalog {
    types: BTreeMap<String, EntityType>,
    relations: RelationMap,
}

impl Catalog {
    pub fn new(types: Vec<EntityType>) -> Self {
        let relations = RelationMap::build(&types);
        let types = types.into_iter().map(|t| (t.id.clone(), t)).collect();
        Catalog { types, relations }
    }

    pub fn relations(&self) -> &RelationMap {
        &self.relations
    }

    pub fn get(&self, id: &str) -> Option<&EntityType> {
        self.types.get(id)
    }

    pub fn by_name(&self, name: &str) -> Option<&EntityType> {
        self.types.values().find(|t| t.name == name)
    }

    /// Look up by id first, then by name.
    pub fn resolve(&self, id_or_name: &str) -> Result<&EntityType, EngineError> {
        self.get(id_or_name)
            .or_else(|| self.by_name(id_or_name))
            .ok_or_else(|| EngineError::NotFound(format!("entity type '{}'", id_or_name)))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.types.contains_key(id)
    }

    /// Types in id order.
    pub fn types(&self) -> impl Iterator<Item = &EntityType> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// `(type name, field name)` of every relation field of another type that targets `id`.
    pub fn references_to(&self, id: &str) -> Vec<(&str, &str)> {
        self.types
            .values()
            .filter(|t| t.id != id)
            .flat_map(|t| {
                t.fields.iter().filter_map(move |f| {
                    f.relation_kind()
                        .filter(|r| r.target_entity_type_id == id)
                        .map(|_| (t.name.as_str(), f.name.as_str()))
                })
            })
            .collect()
    }
}

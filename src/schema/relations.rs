//! Relation map: every relation field yields a forward entry on its source type and a
//! reverse entry on its target type, both under derived, human-readable names.

use crate::naming::{pluralize, strip_key_suffix, to_camel_case, to_pascal_case};
use crate::schema::EntityType;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationDirection {
    /// Declared on this type; this type is the source.
    Forward,
    /// Declared on the other type; this type is the target.
    Reverse,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationEntry {
    /// Type at the other end of the relation.
    pub target_entity_type_id: String,
    pub direction: RelationDirection,
    /// Name of the declaring relation field (on the source type).
    pub source_field_name: String,
    pub using_join_table: bool,
}

impl RelationEntry {
    /// Join-table relations and reverse sides of direct relations yield arrays; a forward
    /// direct relation yields at most one row.
    pub fn is_array(&self) -> bool {
        self.using_join_table || self.direction == RelationDirection::Reverse
    }
}

/// `entityTypeId -> relationName -> entry`. Immutable once built.
#[derive(Clone, Debug, Default)]
pub struct RelationMap {
    by_type: HashMap<String, BTreeMap<String, RelationEntry>>,
}

impl RelationMap {
    /// Build from a catalog. Types are processed in id order and forward names are
    /// assigned before reverse names, so the result does not depend on input order.
    pub fn build(types: &[EntityType]) -> Self {
        let mut sorted: Vec<&EntityType> = types.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let field_names: HashMap<&str, HashSet<&str>> = sorted
            .iter()
            .map(|t| (t.id.as_str(), t.fields.iter().map(|f| f.name.as_str()).collect()))
            .collect();
        let known: HashSet<&str> = sorted.iter().map(|t| t.id.as_str()).collect();

        let mut by_type: HashMap<String, BTreeMap<String, RelationEntry>> =
            sorted.iter().map(|t| (t.id.clone(), BTreeMap::new())).collect();

        for source in &sorted {
            for f in &source.fields {
                let Some(rel) = f.relation_kind() else { continue };
                if !known.contains(rel.target_entity_type_id.as_str()) {
                    continue;
                }
                let mut base = strip_key_suffix(&f.name).to_string();
                if f.allow_multiple {
                    base = pluralize(&base);
                }
                let reserved = field_names.get(source.id.as_str());
                if base == f.name || reserved.map(|r| r.contains(base.as_str())).unwrap_or(false) {
                    base.push_str("Ref");
                }
                let entries = by_type.entry(source.id.clone()).or_default();
                let name = unique_name(entries, reserved, base, &f.name);
                entries.insert(
                    name,
                    RelationEntry {
                        target_entity_type_id: rel.target_entity_type_id.clone(),
                        direction: RelationDirection::Forward,
                        source_field_name: f.name.clone(),
                        using_join_table: f.allow_multiple,
                    },
                );
            }
        }

        for source in &sorted {
            for f in &source.fields {
                let Some(rel) = f.relation_kind() else { continue };
                let target_id = rel.target_entity_type_id.as_str();
                if !known.contains(target_id) {
                    continue;
                }
                let mut base = pluralize(&to_camel_case(&source.name));
                if base.is_empty() {
                    base = "related".into();
                }
                let reserved = field_names.get(target_id);
                let entries = by_type.entry(target_id.to_string()).or_default();
                let name = unique_name(entries, reserved, base, &f.name);
                entries.insert(
                    name,
                    RelationEntry {
                        target_entity_type_id: source.id.clone(),
                        direction: RelationDirection::Reverse,
                        source_field_name: f.name.clone(),
                        using_join_table: f.allow_multiple,
                    },
                );
            }
        }

        RelationMap { by_type }
    }

    pub fn get(&self, type_id: &str, name: &str) -> Option<&RelationEntry> {
        self.by_type.get(type_id).and_then(|m| m.get(name))
    }

    /// All relations of a type, ordered by name.
    pub fn relations_of(&self, type_id: &str) -> impl Iterator<Item = (&String, &RelationEntry)> {
        self.by_type.get(type_id).into_iter().flat_map(|m| m.iter())
    }

    /// Join-table relations whose target is `type_id`, as `(source type id, field name)`.
    /// These are the relations the integrity engine has to settle when rows of `type_id` are deleted.
    pub fn join_relations_targeting(&self, type_id: &str) -> Vec<(&str, &str)> {
        self.relations_of(type_id)
            .filter(|(_, e)| e.direction == RelationDirection::Reverse && e.using_join_table)
            .map(|(_, e)| (e.target_entity_type_id.as_str(), e.source_field_name.as_str()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_type.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn unique_name(
    taken: &BTreeMap<String, RelationEntry>,
    reserved: Option<&HashSet<&str>>,
    base: String,
    field: &str,
) -> String {
    let free = |n: &str| !taken.contains_key(n) && !reserved.map(|r| r.contains(n)).unwrap_or(false);
    if free(&base) {
        return base;
    }
    let by_field = format!("{}By{}", base, to_pascal_case(field));
    if free(&by_field) {
        return by_field;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}{}", by_field, n);
        if free(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

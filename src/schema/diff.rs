//! Plan the physical steps that turn an entity type's old field set into a new one.
//!
//! Steps run in phases: removals, renames (through temporary names so swaps work),
//! in-place alterations, then additions.

use crate::error::EngineError;
use crate::schema::{EntityType, FieldChange, FieldDef};
use std::collections::HashSet;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchemaStep {
    AddColumn(FieldDef),
    DropColumn(String),
    RenameColumn { from: String, to: String, foreign_key: bool },
    DropForeignKey(String),
    /// Change the column type, backfilling the kind default.
    AlterColumnType(FieldDef),
    /// Change the column type, casting the existing values (widening kinds only).
    CastColumnType(FieldDef),
    SetNotNull(FieldDef),
    DropNotNull(String),
    /// Reset every value to NULL (relation retargeted).
    ClearColumn(String),
    AddForeignKey(FieldDef),
    AttachJoinTable { target: String },
    DeleteJoinRows { target: String, field: String },
    RenameJoinField { target: String, from: String, to: String },
}

#[derive(Default)]
struct Phases {
    removals: Vec<SchemaStep>,
    renames_out: Vec<SchemaStep>,
    renames_in: Vec<SchemaStep>,
    alterations: Vec<SchemaStep>,
    additions: Vec<SchemaStep>,
    temp: usize,
}

impl Phases {
    fn temp_name(&mut self) -> String {
        self.temp += 1;
        format!("__renaming_{}", self.temp)
    }

    fn rename_column(&mut self, from: &str, to: &str, foreign_key: bool) {
        let tmp = self.temp_name();
        self.renames_out.push(SchemaStep::RenameColumn {
            from: from.to_string(),
            to: tmp.clone(),
            foreign_key,
        });
        self.renames_in.push(SchemaStep::RenameColumn {
            from: tmp,
            to: to.to_string(),
            foreign_key,
        });
    }

    fn rename_join_field(&mut self, target: &str, from: &str, to: &str) {
        let tmp = self.temp_name();
        self.renames_out.push(SchemaStep::RenameJoinField {
            target: target.to_string(),
            from: from.to_string(),
            to: tmp.clone(),
        });
        self.renames_in.push(SchemaStep::RenameJoinField {
            target: target.to_string(),
            from: tmp,
            to: to.to_string(),
        });
    }

    fn into_steps(self) -> Vec<SchemaStep> {
        let mut out = self.removals;
        out.extend(self.renames_out);
        out.extend(self.renames_in);
        out.extend(self.alterations);
        out.extend(self.additions);
        out
    }
}

fn target(f: &FieldDef) -> &str {
    f.relation_kind().map(|r| r.target_entity_type_id.as_str()).unwrap_or_default()
}

fn add_field(p: &mut Phases, f: &FieldDef) {
    if f.is_external() {
        p.additions.push(SchemaStep::AttachJoinTable {
            target: target(f).to_string(),
        });
    } else {
        p.additions.push(SchemaStep::AddColumn(f.clone()));
    }
}

fn remove_field(p: &mut Phases, f: &FieldDef) {
    if f.is_external() {
        p.removals.push(SchemaStep::DeleteJoinRows {
            target: target(f).to_string(),
            field: f.name.clone(),
        });
    } else {
        p.removals.push(SchemaStep::DropColumn(f.name.clone()));
    }
}

fn change_column(p: &mut Phases, old: &FieldDef, new: &FieldDef) {
    let old_rel = old.relation_kind();
    let new_rel = new.relation_kind();
    if old.name != new.name {
        p.rename_column(&old.name, &new.name, old_rel.is_some());
    }
    let fk_changed = old_rel != new_rel;
    let retargeted = matches!((old_rel, new_rel), (Some(o), Some(n)) if o.target_entity_type_id != n.target_entity_type_id);

    if old_rel.is_some() && fk_changed {
        p.alterations.push(SchemaStep::DropForeignKey(new.name.clone()));
    }
    if old.column_type() != new.column_type() {
        p.alterations.push(if old.casts_losslessly_to(new) {
            SchemaStep::CastColumnType(new.clone())
        } else {
            SchemaStep::AlterColumnType(new.clone())
        });
        if new.required {
            p.alterations.push(SchemaStep::SetNotNull(new.clone()));
        }
    } else {
        if retargeted {
            p.alterations.push(SchemaStep::ClearColumn(new.name.clone()));
        }
        if new.required && (!old.required || retargeted) {
            p.alterations.push(SchemaStep::SetNotNull(new.clone()));
        } else if !new.required && old.required {
            p.alterations.push(SchemaStep::DropNotNull(new.name.clone()));
        }
    }
    if new_rel.is_some() && fk_changed {
        p.alterations.push(SchemaStep::AddForeignKey(new.clone()));
    }
}

/// Steps turning `old`'s fields into the `changes` set. Changes carrying an `original_name`
/// are matched first, so a field renamed away frees its name for a new field.
pub fn plan_edit(old: &EntityType, changes: &[FieldChange]) -> Result<Vec<SchemaStep>, EngineError> {
    let mut matched: HashSet<&str> = HashSet::new();
    let mut pairs: Vec<(Option<&FieldDef>, &FieldDef)> = Vec::with_capacity(changes.len());

    for ch in changes.iter().filter(|c| c.original_name.is_some()) {
        let name = ch.match_name();
        let Some(old_f) = old.field(name) else {
            return Err(EngineError::Validation(format!(
                "field '{}' has originalName '{}' which does not exist on entity type '{}'",
                ch.field.name, name, old.name
            )));
        };
        if !matched.insert(old_f.name.as_str()) {
            return Err(EngineError::Validation(format!("field '{}' is matched more than once", name)));
        }
        pairs.push((Some(old_f), &ch.field));
    }
    for ch in changes.iter().filter(|c| c.original_name.is_none()) {
        match old.field(&ch.field.name).filter(|f| !matched.contains(f.name.as_str())) {
            Some(old_f) => {
                matched.insert(old_f.name.as_str());
                pairs.push((Some(old_f), &ch.field));
            }
            None => pairs.push((None, &ch.field)),
        }
    }

    let mut p = Phases::default();
    for f in old.fields.iter().filter(|f| !matched.contains(f.name.as_str())) {
        remove_field(&mut p, f);
    }
    for (old_f, new_f) in pairs {
        let Some(old_f) = old_f else {
            add_field(&mut p, new_f);
            continue;
        };
        match (old_f.is_external(), new_f.is_external()) {
            (true, true) => {
                if target(old_f) != target(new_f) {
                    p.removals.push(SchemaStep::DeleteJoinRows {
                        target: target(old_f).to_string(),
                        field: old_f.name.clone(),
                    });
                    add_field(&mut p, new_f);
                } else if old_f.name != new_f.name {
                    p.rename_join_field(target(old_f), &old_f.name, &new_f.name);
                }
            }
            (false, false) => change_column(&mut p, old_f, new_f),
            (true, false) | (false, true) => {
                remove_field(&mut p, old_f);
                add_field(&mut p, new_f);
            }
        }
    }
    Ok(p.into_steps())
}

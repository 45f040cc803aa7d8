//! Rebuild an entity type's field list from the physical schema.
//!
//! Columns and foreign keys come from `information_schema`; join-table fields leave no
//! trace on the entity table, so they come from the packed integrity metadata.

use crate::error::EngineError;
use crate::schema::{FieldDef, IntegrityEntry, IntegrityStrategy, ScalarKind, PRIMARY_KEY};
use std::collections::HashMap;

/// One row of `information_schema.columns`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnRow {
    pub name: String,
    /// `int4`, `text`, ... with a leading `_` for arrays.
    pub udt_name: String,
    pub nullable: bool,
}

/// A single-column foreign key of the entity table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForeignKeyRow {
    pub column: String,
    pub foreign_table: String,
    pub delete_rule: String,
}

/// `table_to_type` maps entity table names back to type ids.
pub fn fields_from_catalog(
    columns: &[ColumnRow],
    foreign_keys: &[ForeignKeyRow],
    integrity: &[String],
    table_to_type: &HashMap<String, String>,
) -> Result<Vec<FieldDef>, EngineError> {
    let mut fields = Vec::with_capacity(columns.len() + integrity.len());
    for col in columns.iter().filter(|c| c.name != PRIMARY_KEY) {
        let (udt, multiple) = match col.udt_name.strip_prefix('_') {
            Some(base) => (base, true),
            None => (col.udt_name.as_str(), false),
        };
        let mut field = match foreign_keys.iter().find(|fk| fk.column == col.name) {
            Some(fk) => {
                let target = table_to_type.get(&fk.foreign_table).ok_or_else(|| {
                    EngineError::NotFound(format!(
                        "column '{}' references table '{}' which belongs to no entity type",
                        col.name, fk.foreign_table
                    ))
                })?;
                let strategy = IntegrityStrategy::from_delete_rule(&fk.delete_rule).unwrap_or_default();
                FieldDef::relation(col.name.clone(), target.clone(), strategy)
            }
            None => {
                let kind = ScalarKind::from_udt_name(udt).ok_or_else(|| {
                    EngineError::Validation(format!("column '{}' has unsupported type '{}'", col.name, col.udt_name))
                })?;
                FieldDef::scalar(col.name.clone(), kind)
            }
        };
        field.required = !col.nullable;
        field.allow_multiple = multiple;
        fields.push(field);
    }
    for packed in integrity {
        let e = IntegrityEntry::parse(packed)?;
        let mut field = FieldDef::relation(e.field, e.target_entity_type_id, e.strategy).multiple();
        field.required = e.required;
        fields.push(field);
    }
    Ok(fields)
}

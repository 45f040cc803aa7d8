//! Write payload validation against an entity type's fields.

use crate::error::EngineError;
use crate::schema::{EntityType, PRIMARY_KEY};
use crate::sql::{as_list, uuid_text, PgBindValue, RowValues};
use serde_json::{Map, Value};

pub struct RequestValidator;

impl RequestValidator {
    /// Validate a create payload. All required fields must be present and non-null.
    pub fn validate<'a>(entity: &'a EntityType, body: &Value) -> Result<RowValues<'a>, EngineError> {
        split(entity, body, true)
    }

    /// Validate only the fields present in body (for updates). Required fields may be
    /// omitted but not cleared; the primary key cannot be changed.
    pub fn validate_partial<'a>(entity: &'a EntityType, body: &Value) -> Result<RowValues<'a>, EngineError> {
        split(entity, body, false)
    }
}

fn object<'v>(entity: &EntityType, body: &'v Value) -> Result<&'v Map<String, Value>, EngineError> {
    body.as_object()
        .ok_or_else(|| EngineError::Validation(format!("{} payload must be a JSON object", entity.name)))
}

fn split<'a>(entity: &'a EntityType, body: &Value, creating: bool) -> Result<RowValues<'a>, EngineError> {
    let obj = object(entity, body)?;
    if let Some(key) = obj.keys().find(|k| *k != PRIMARY_KEY && entity.field(k).is_none()) {
        return Err(EngineError::Validation(format!("unknown field '{}' for {}", key, entity.name)));
    }

    let mut row = RowValues::default();
    match obj.get(PRIMARY_KEY) {
        Some(v) if !creating => {
            return Err(EngineError::Validation(format!("{} cannot be changed (got {})", PRIMARY_KEY, v)));
        }
        Some(Value::Null) | None => {}
        Some(v) => row.uuid = Some(uuid_text(PRIMARY_KEY, v)?),
    }

    for f in &entity.fields {
        let value = obj.get(&f.name);
        let empty = match value {
            None | Some(Value::Null) => true,
            Some(v) => f.is_external() && as_list(v).is_empty(),
        };
        if f.required && empty && (creating || value.is_some()) {
            return Err(EngineError::Validation(format!("{} is required", f.name)));
        }
        let Some(v) = value else { continue };
        if f.is_external() {
            let ids = as_list(v)
                .iter()
                .map(|item| uuid_text(&f.name, item))
                .collect::<Result<Vec<_>, _>>()?;
            row.links.push((f, ids));
        } else {
            row.columns.push((f, PgBindValue::for_field(f, v)?));
        }
    }
    Ok(row)
}

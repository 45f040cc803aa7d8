//! Bind values. Every value is sent as text (or a text array) and cast in SQL with
//! `$n::type`, so one bind type covers every field kind and nothing is inlined.

use crate::error::EngineError;
use crate::schema::{FieldDef, FieldKind, ScalarKind};
use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::Database;

#[derive(Clone, Debug, PartialEq)]
pub enum PgBindValue {
    Null,
    Text(String),
    TextArray(Vec<String>),
}

impl PgBindValue {
    pub fn text(s: impl Into<String>) -> Self {
        PgBindValue::Text(s.into())
    }

    /// Convert a JSON value destined for `field` into its bind form, checking the value's shape.
    pub fn for_field(field: &FieldDef, v: &Value) -> Result<Self, EngineError> {
        if v.is_null() {
            return Ok(PgBindValue::Null);
        }
        if field.allow_multiple {
            let items = as_list(v);
            let texts = items
                .iter()
                .map(|item| element_text(field, item))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(PgBindValue::TextArray(texts));
        }
        if v.is_array() {
            return Err(EngineError::Validation(format!("{} does not accept multiple values", field.name)));
        }
        Ok(PgBindValue::Text(element_text(field, v)?))
    }

    /// Single element of `field` (for `= ANY(col)` and `IN` predicates on array columns).
    pub fn element_for_field(field: &FieldDef, v: &Value) -> Result<Self, EngineError> {
        if v.is_null() {
            return Ok(PgBindValue::Null);
        }
        Ok(PgBindValue::Text(element_text(field, v)?))
    }

    /// A list of uuids (join-table links, `uuid IN` filters).
    pub fn uuid_list(name: &str, v: &Value) -> Result<Self, EngineError> {
        let items = as_list(v);
        let texts = items
            .iter()
            .map(|item| uuid_text(name, item))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PgBindValue::TextArray(texts))
    }
}

/// A scalar or an array, as a list.
pub fn as_list(v: &Value) -> Vec<Value> {
    match v {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

fn element_text(field: &FieldDef, v: &Value) -> Result<String, EngineError> {
    match &field.kind {
        FieldKind::Relation(_) => uuid_text(&field.name, v),
        FieldKind::Scalar(kind) => scalar_text(&field.name, *kind, v),
    }
}

/// Text form of a scalar value, rejecting values the kind cannot hold.
pub fn scalar_text(name: &str, kind: ScalarKind, v: &Value) -> Result<String, EngineError> {
    let mismatch = || EngineError::Validation(format!("{} must be of kind {}, got {}", name, kind.pg_type(), v));
    match kind {
        ScalarKind::Varchar | ScalarKind::Text => match v {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            _ => Err(mismatch()),
        },
        ScalarKind::Integer => match v {
            Value::Number(n) => n
                .as_i64()
                .filter(|i| i32::try_from(*i).is_ok())
                .map(|i| i.to_string())
                .ok_or_else(mismatch),
            Value::String(s) => s.trim().parse::<i32>().map(|i| i.to_string()).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        ScalarKind::Float8 => match v {
            Value::Number(n) => n.as_f64().map(|f| f.to_string()).ok_or_else(mismatch),
            Value::String(s) => s.trim().parse::<f64>().map(|f| f.to_string()).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        ScalarKind::Boolean => match v {
            Value::Bool(b) => Ok(b.to_string()),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok("true".into()),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok("false".into()),
            _ => Err(mismatch()),
        },
        ScalarKind::Date => match v {
            Value::String(s) => {
                let day = s.get(..10).unwrap_or(s);
                chrono::NaiveDate::parse_from_str(day, "%Y-%m-%d")
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .map_err(|_| mismatch())
            }
            _ => Err(mismatch()),
        },
    }
}

pub fn uuid_text(name: &str, v: &Value) -> Result<String, EngineError> {
    v.as_str()
        .and_then(|s| uuid::Uuid::parse_str(s).ok())
        .map(|u| u.to_string())
        .ok_or_else(|| EngineError::Validation(format!("{} must be a uuid, got {}", name, v)))
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        match self {
            PgBindValue::Null => Ok(IsNull::Yes),
            PgBindValue::Text(s) => <&str as Encode<Postgres>>::encode_by_ref(&s.as_str(), buf),
            PgBindValue::TextArray(v) => <Vec<String> as Encode<Postgres>>::encode_by_ref(v, buf),
        }
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        match self {
            PgBindValue::TextArray(_) => Some(<Vec<String> as sqlx::Type<Postgres>>::type_info()),
            PgBindValue::Null | PgBindValue::Text(_) => Some(<String as sqlx::Type<Postgres>>::type_info()),
        }
    }
}

impl sqlx::Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::IntegrityStrategy;
    use serde_json::json;

    const U: &str = "0190f2a4-7c1e-7b3a-9d2f-4e5a6b7c8d9e";

    #[test]
    fn scalars_bind_as_text() {
        let likes = FieldDef::scalar("likes", ScalarKind::Integer);
        assert_eq!(PgBindValue::for_field(&likes, &json!(3)).unwrap(), PgBindValue::text("3"));
        assert_eq!(PgBindValue::for_field(&likes, &json!("42")).unwrap(), PgBindValue::text("42"));
        assert_eq!(PgBindValue::for_field(&likes, &Value::Null).unwrap(), PgBindValue::Null);
        assert!(PgBindValue::for_field(&likes, &json!(1.5)).is_err());
        assert!(PgBindValue::for_field(&likes, &json!([1, 2])).is_err());
        assert!(PgBindValue::for_field(&likes, &json!(5_000_000_000i64)).is_err());
    }

    #[test]
    fn kinds_are_checked() {
        assert!(scalar_text("b", ScalarKind::Boolean, &json!(true)).is_ok());
        assert!(scalar_text("b", ScalarKind::Boolean, &json!(1)).is_err());
        assert_eq!(scalar_text("d", ScalarKind::Date, &json!("2024-02-29")).unwrap(), "2024-02-29");
        assert_eq!(scalar_text("d", ScalarKind::Date, &json!("2024-02-29T10:00:00Z")).unwrap(), "2024-02-29");
        assert!(scalar_text("d", ScalarKind::Date, &json!("2023-02-29")).is_err());
        assert_eq!(scalar_text("f", ScalarKind::Float8, &json!(2.5)).unwrap(), "2.5");
        assert_eq!(scalar_text("t", ScalarKind::Text, &json!(7)).unwrap(), "7");
        assert!(scalar_text("t", ScalarKind::Text, &json!({"a": 1})).is_err());
    }

    #[test]
    fn multi_values_bind_as_arrays() {
        let scores = FieldDef::scalar("scores", ScalarKind::Integer).multiple();
        assert_eq!(
            PgBindValue::for_field(&scores, &json!([1, 2])).unwrap(),
            PgBindValue::TextArray(vec!["1".into(), "2".into()])
        );
        assert_eq!(
            PgBindValue::for_field(&scores, &json!(3)).unwrap(),
            PgBindValue::TextArray(vec!["3".into()])
        );
    }

    #[test]
    fn relations_require_uuids() {
        let owner = FieldDef::relation("owner", "t", IntegrityStrategy::SetNull);
        assert_eq!(PgBindValue::for_field(&owner, &json!(U)).unwrap(), PgBindValue::text(U));
        assert!(PgBindValue::for_field(&owner, &json!("nope")).is_err());
        assert_eq!(
            PgBindValue::uuid_list("tags", &json!(U)).unwrap(),
            PgBindValue::TextArray(vec![U.into()])
        );
        assert!(PgBindValue::uuid_list("tags", &json!([U, 3])).is_err());
    }
}

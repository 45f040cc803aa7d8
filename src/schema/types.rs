//! Entity-type definitions: field kinds as a sum type, plus their JSON wire form.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    Varchar,
    Text,
    Integer,
    Float8,
    Boolean,
    Date,
}

impl ScalarKind {
    /// PostgreSQL type name, also used for `$n::type` casts.
    pub fn pg_type(self) -> &'static str {
        match self {
            ScalarKind::Varchar => "varchar",
            ScalarKind::Text => "text",
            ScalarKind::Integer => "integer",
            ScalarKind::Float8 => "float8",
            ScalarKind::Boolean => "boolean",
            ScalarKind::Date => "date",
        }
    }

    /// Whether every value of this kind survives a plain cast to `to`.
    pub fn casts_losslessly_to(self, to: ScalarKind) -> bool {
        self == to
            || matches!(
                (self, to),
                (ScalarKind::Integer, ScalarKind::Float8) | (_, ScalarKind::Text) | (_, ScalarKind::Varchar)
            )
    }

    /// Backfill literal used when a column changes kind or becomes required.
    pub fn default_literal(self) -> &'static str {
        match self {
            ScalarKind::Varchar | ScalarKind::Text => "''",
            ScalarKind::Integer => "0",
            ScalarKind::Float8 => "0.0",
            ScalarKind::Boolean => "false",
            ScalarKind::Date => "now()",
        }
    }

    /// `udt_name` reported by information_schema for this kind.
    pub fn udt_name(self) -> &'static str {
        match self {
            ScalarKind::Varchar => "varchar",
            ScalarKind::Text => "text",
            ScalarKind::Integer => "int4",
            ScalarKind::Float8 => "float8",
            ScalarKind::Boolean => "bool",
            ScalarKind::Date => "date",
        }
    }

    pub fn from_udt_name(udt: &str) -> Option<Self> {
        Some(match udt {
            "varchar" => ScalarKind::Varchar,
            "text" => ScalarKind::Text,
            "int4" => ScalarKind::Integer,
            "float8" => ScalarKind::Float8,
            "bool" => ScalarKind::Boolean,
            "date" => ScalarKind::Date,
            _ => return None,
        })
    }
}

/// Policy applied to the referencing side when a relation's target row is deleted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityStrategy {
    Cascade,
    #[default]
    SetNull,
    Restrict,
    Invalidate,
}

impl IntegrityStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            IntegrityStrategy::Cascade => "cascade",
            IntegrityStrategy::SetNull => "set_null",
            IntegrityStrategy::Restrict => "restrict",
            IntegrityStrategy::Invalidate => "invalidate",
        }
    }

    /// `ON DELETE` action of the foreign key backing a singular relation.
    pub fn on_delete(self) -> &'static str {
        match self {
            IntegrityStrategy::Cascade => "CASCADE",
            IntegrityStrategy::SetNull => "SET NULL",
            IntegrityStrategy::Restrict => "RESTRICT",
            IntegrityStrategy::Invalidate => "NO ACTION",
        }
    }

    /// Inverse of [`on_delete`](Self::on_delete), as reported by `referential_constraints.delete_rule`.
    pub fn from_delete_rule(rule: &str) -> Option<Self> {
        Some(match rule {
            "CASCADE" => IntegrityStrategy::Cascade,
            "SET NULL" => IntegrityStrategy::SetNull,
            "RESTRICT" => IntegrityStrategy::Restrict,
            "NO ACTION" => IntegrityStrategy::Invalidate,
            _ => return None,
        })
    }
}

impl fmt::Display for IntegrityStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegrityStrategy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cascade" => Ok(IntegrityStrategy::Cascade),
            "set_null" => Ok(IntegrityStrategy::SetNull),
            "restrict" => Ok(IntegrityStrategy::Restrict),
            "invalidate" => Ok(IntegrityStrategy::Invalidate),
            other => Err(EngineError::Validation(format!(
                "invalid integrity strategy: {} (expected cascade, set_null, restrict or invalidate)",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationKind {
    pub target_entity_type_id: String,
    pub integrity_strategy: IntegrityStrategy,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(ScalarKind),
    Relation(RelationKind),
}

/// One field of an entity type. Serialized through [`RawField`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawField", into = "RawField")]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub allow_multiple: bool,
}

impl FieldDef {
    pub fn scalar(name: impl Into<String>, kind: ScalarKind) -> Self {
        FieldDef {
            name: name.into(),
            kind: FieldKind::Scalar(kind),
            required: false,
            allow_multiple: false,
        }
    }

    pub fn relation(name: impl Into<String>, target: impl Into<String>, strategy: IntegrityStrategy) -> Self {
        FieldDef {
            name: name.into(),
            kind: FieldKind::Relation(RelationKind {
                target_entity_type_id: target.into(),
                integrity_strategy: strategy,
            }),
            required: false,
            allow_multiple: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn multiple(mut self) -> Self {
        self.allow_multiple = true;
        self
    }

    pub fn relation_kind(&self) -> Option<&RelationKind> {
        match &self.kind {
            FieldKind::Relation(r) => Some(r),
            FieldKind::Scalar(_) => None,
        }
    }

    /// Multi-valued relation, stored in a join table instead of a column.
    pub fn is_external(&self) -> bool {
        self.allow_multiple && matches!(self.kind, FieldKind::Relation(_))
    }

    /// Column type of a non-external field, e.g. `integer[]` or `uuid`.
    pub fn column_type(&self) -> String {
        let base = match &self.kind {
            FieldKind::Scalar(k) => k.pg_type(),
            FieldKind::Relation(_) => "uuid",
        };
        if self.allow_multiple {
            format!("{}[]", base)
        } else {
            base.to_string()
        }
    }

    /// Scalar columns of the same arity whose kind widens can keep their values on a type change.
    pub fn casts_losslessly_to(&self, new: &FieldDef) -> bool {
        match (&self.kind, &new.kind) {
            (FieldKind::Scalar(a), FieldKind::Scalar(b)) => {
                self.allow_multiple == new.allow_multiple && a.casts_losslessly_to(*b)
            }
            _ => false,
        }
    }

    /// Backfill literal for this column, `None` for relations (there is no sensible default uuid).
    pub fn default_literal(&self) -> Option<&'static str> {
        match &self.kind {
            FieldKind::Scalar(_) if self.allow_multiple => Some("'{}'"),
            FieldKind::Scalar(k) => Some(k.default_literal()),
            FieldKind::Relation(_) => None,
        }
    }
}

/// JSON shape of a field: `{"name","kind","required","allowMultiple"}` plus
/// `targetEntityTypeId`/`integrityStrategy` when `kind` is `relation`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawField {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub allow_multiple: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_entity_type_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity_strategy: Option<IntegrityStrategy>,
}

impl TryFrom<RawField> for FieldDef {
    type Error = EngineError;

    fn try_from(raw: RawField) -> Result<Self, Self::Error> {
        let kind = match raw.kind.as_str() {
            "relation" => {
                let target = raw.target_entity_type_id.ok_or_else(|| {
                    EngineError::Validation(format!("relation field '{}' requires targetEntityTypeId", raw.name))
                })?;
                FieldKind::Relation(RelationKind {
                    target_entity_type_id: target,
                    integrity_strategy: raw.integrity_strategy.unwrap_or_default(),
                })
            }
            "varchar" => FieldKind::Scalar(ScalarKind::Varchar),
            "text" => FieldKind::Scalar(ScalarKind::Text),
            "integer" => FieldKind::Scalar(ScalarKind::Integer),
            "float8" => FieldKind::Scalar(ScalarKind::Float8),
            "boolean" => FieldKind::Scalar(ScalarKind::Boolean),
            "date" => FieldKind::Scalar(ScalarKind::Date),
            other => {
                return Err(EngineError::Validation(format!(
                    "unsupported field kind '{}' for field '{}'",
                    other, raw.name
                )))
            }
        };
        Ok(FieldDef {
            name: raw.name,
            kind,
            required: raw.required,
            allow_multiple: raw.allow_multiple,
        })
    }
}

impl From<FieldDef> for RawField {
    fn from(f: FieldDef) -> Self {
        let (kind, target, strategy) = match f.kind {
            FieldKind::Scalar(k) => (k.pg_type().to_string(), None, None),
            FieldKind::Relation(r) => ("relation".to_string(), Some(r.target_entity_type_id), Some(r.integrity_strategy)),
        };
        RawField {
            name: f.name,
            kind,
            required: f.required,
            allow_multiple: f.allow_multiple,
            target_entity_type_id: target,
            integrity_strategy: strategy,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    pub id: String,
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl EntityType {
    pub fn table_name(&self) -> String {
        crate::naming::entity_table_name(&self.id)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields stored as columns on the entity table.
    pub fn column_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| !f.is_external())
    }

    /// Multi-valued relation fields, stored in join tables.
    pub fn external_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.is_external())
    }

    /// Packed integrity metadata, one entry per external field.
    pub fn integrity_entries(&self) -> Vec<IntegrityEntry> {
        self.external_fields()
            .filter_map(|f| {
                f.relation_kind().map(|r| IntegrityEntry {
                    field: f.name.clone(),
                    target_entity_type_id: r.target_entity_type_id.clone(),
                    required: f.required,
                    strategy: r.integrity_strategy,
                })
            })
            .collect()
    }
}

/// Field change for `edit_entity_type`: the new definition plus the name it had before, if any.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    #[serde(flatten)]
    pub field: FieldDef,
}

impl FieldChange {
    pub fn new(field: FieldDef) -> Self {
        FieldChange {
            original_name: None,
            field,
        }
    }

    pub fn renamed_from(original: impl Into<String>, field: FieldDef) -> Self {
        FieldChange {
            original_name: Some(original.into()),
            field,
        }
    }

    /// Name of the old field this change matches: `originalName`, or the field's own name.
    pub fn match_name(&self) -> &str {
        self.original_name.as_deref().unwrap_or(&self.field.name)
    }
}

/// `fieldName#targetTypeId#required(0|1)#strategy`: what the integrity engine knows about
/// a join-table relation, since the join table itself carries no policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntegrityEntry {
    pub field: String,
    pub target_entity_type_id: String,
    pub required: bool,
    pub strategy: IntegrityStrategy,
}

impl IntegrityEntry {
    pub fn pack(&self) -> String {
        format!(
            "{}#{}#{}#{}",
            self.field,
            self.target_entity_type_id,
            if self.required { "1" } else { "0" },
            self.strategy
        )
    }

    pub fn parse(packed: &str) -> Result<Self, EngineError> {
        let parts: Vec<&str> = packed.split('#').collect();
        let [field, target, required, strategy] = parts.as_slice() else {
            return Err(EngineError::Validation(format!("malformed integrity entry '{}'", packed)));
        };
        let required = match *required {
            "1" => true,
            "0" => false,
            other => {
                return Err(EngineError::Validation(format!(
                    "malformed required flag '{}' in integrity entry '{}'",
                    other, packed
                )))
            }
        };
        Ok(IntegrityEntry {
            field: field.to_string(),
            target_entity_type_id: target.to_string(),
            required,
            strategy: strategy.parse()?,
        })
    }

    /// Lookup prefix used by the integrity SQL (`field#`).
    pub fn prefix(field: &str) -> String {
        format!("{}#", field)
    }
}

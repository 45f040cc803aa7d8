//! Entity-type definitions, the catalog snapshot, the relation map and the schema manager.

mod catalog;
mod diff;
mod introspect;
mod manager;
mod relations;
mod types;
mod validator;

pub use catalog::Catalog;
pub use diff::{plan_edit, SchemaStep};
pub use introspect::{fields_from_catalog, ColumnRow, ForeignKeyRow};
pub use manager::SchemaManager;
pub use relations::{RelationDirection, RelationEntry, RelationMap};
pub use types::*;
pub use validator::{is_valid_identifier, validate_fields, validate_type_name, PRIMARY_KEY};

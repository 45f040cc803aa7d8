//! Asset engine: runtime-defined entity types on PostgreSQL, with a relation-aware query
//! compiler and single-statement mutations that keep join tables and integrity rules in step.

pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod grants;
pub mod naming;
pub mod query;
pub mod schema;
pub mod service;
pub mod sql;
pub mod store;

pub use config::EngineConfig;
pub use engine::{AssetEngine, FoundEntity};
pub use error::EngineError;
pub use gateway::PgGateway;
pub use grants::{Grant, GrantStore};
pub use query::{Filter, FindQuery, Include, Includes, OrderBy, Predicate, SortDirection};
pub use schema::{
    Catalog, EntityType, FieldChange, FieldDef, FieldKind, IntegrityStrategy, RelationDirection, RelationEntry,
    RelationKind, RelationMap, ScalarKind,
};
pub use service::{AssetModel, Model, TypedModel};
pub use store::{ensure_database_exists, EntityTypeVersion};

//! Query buffer and identifier quoting shared by every statement builder.

use crate::error::EngineError;
use crate::naming::{entity_table_name, join_table_name};
use crate::schema::{Catalog, EntityType};
use crate::sql::PgBindValue;
use crate::store::{CATALOG_TABLE, GRANTS_TABLE};

/// Result column holding an entity's JSON object.
pub const ENTITY_COLUMN: &str = "__entity";
/// Result column holding the owning type id (`get_entity_by_uuid`).
pub const TYPE_COLUMN: &str = "__type";
/// Alias of the root row in every statement.
pub const MAIN: &str = "main";

/// Quote identifier for PostgreSQL. Identifiers come from validated definitions or engine-generated names.
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Schema-qualified table name.
pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

/// `alias."column"`.
pub fn column_ref(alias: &str, column: &str) -> String {
    format!("{}.{}", alias, quoted(column))
}

/// What statement builders need besides the entity itself: the catalog snapshot and the schema.
#[derive(Clone, Copy)]
pub struct SqlContext<'a> {
    pub catalog: &'a Catalog,
    pub schema: &'a str,
}

impl<'a> SqlContext<'a> {
    pub fn new(catalog: &'a Catalog, schema: &'a str) -> Self {
        SqlContext { catalog, schema }
    }

    pub fn table(&self, entity: &EntityType) -> String {
        qualified_table(self.schema, &entity_table_name(&entity.id))
    }

    pub fn table_for_id(&self, type_id: &str) -> String {
        qualified_table(self.schema, &entity_table_name(type_id))
    }

    pub fn join_table(&self, source_type_id: &str, target_type_id: &str) -> String {
        qualified_table(self.schema, &join_table_name(source_type_id, target_type_id))
    }

    pub fn catalog_table(&self) -> String {
        qualified_table(self.schema, CATALOG_TABLE)
    }

    pub fn grants_table(&self) -> String {
        qualified_table(self.schema, GRANTS_TABLE)
    }

    pub fn entity(&self, type_id: &str) -> Result<&'a EntityType, EngineError> {
        self.catalog
            .get(type_id)
            .ok_or_else(|| EngineError::NotFound(format!("entity type '{}'", type_id)))
    }
}

/// SQL text plus its bind values, `$1..$n` in push order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBindValue>,
}

impl QueryBuf {
    pub fn new() -> Self {
        QueryBuf::default()
    }

    pub fn with_sql(sql: impl Into<String>) -> Self {
        QueryBuf {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Push a bind value, returning its placeholder number.
    pub fn push_param(&mut self, v: PgBindValue) -> usize {
        self.params.push(v);
        self.params.len()
    }

    /// Push a bind value, returning `$n::cast`.
    pub fn placeholder(&mut self, v: PgBindValue, cast: &str) -> String {
        let n = self.push_param(v);
        format!("${}::{}", n, cast)
    }

    /// Push a text bind value, returning `$n` (for text columns such as the join-table `field`).
    pub fn text_placeholder(&mut self, s: &str) -> String {
        let n = self.push_param(PgBindValue::text(s));
        format!("${}", n)
    }
}

/// Alias generator for nested sub-selects (`t1`, `t2`, ...).
#[derive(Debug, Default)]
pub struct Aliases {
    next: usize,
}

impl Aliases {
    pub fn next(&mut self, prefix: &str) -> String {
        self.next += 1;
        format!("{}{}", prefix, self.next)
    }
}

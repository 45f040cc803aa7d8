//! Schema manager: entity-type lifecycle. Every change runs in one transaction covering
//! the DDL and the catalog row, so a failed alteration leaves nothing behind.

use crate::error::EngineError;
use crate::gateway::{self, PgGateway};
use crate::naming::{entity_table_name, id_suffix, join_table_source_prefix, join_table_target_suffix, JOIN_TABLE_PREFIX};
use crate::schema::{
    fields_from_catalog, plan_edit, validate_fields, validate_type_name, Catalog, EntityType, FieldChange, FieldDef,
};
use crate::sql::{ddl, qualified_table, quoted, QueryBuf};
use crate::store::{self, EntityTypeVersion, GRANTS_TABLE};
use sqlx::PgConnection;
use std::collections::{HashMap, HashSet};

#[derive(Clone)]
pub struct SchemaManager {
    gateway: PgGateway,
}

async fn run(conn: &mut PgConnection, sql: String) -> Result<(), EngineError> {
    gateway::execute(&mut *conn, &QueryBuf::with_sql(sql)).await?;
    Ok(())
}

/// Join tables of `source_id` whose target suffix no live multi-valued field points at.
fn orphaned_join_tables(tables: &[String], source_id: &str, live_targets: &[&str]) -> Vec<String> {
    let prefix = join_table_source_prefix(source_id);
    let live: HashSet<String> = live_targets.iter().map(|t| id_suffix(t)).collect();
    tables
        .iter()
        .filter(|t| t.starts_with(&prefix))
        .filter(|t| join_table_target_suffix(t).map(|s| !live.contains(s)).unwrap_or(false))
        .cloned()
        .collect()
}

/// Join tables with `type_id` on either side.
fn join_tables_touching(tables: &[String], type_id: &str) -> Vec<String> {
    let prefix = join_table_source_prefix(type_id);
    let suffix = id_suffix(type_id);
    tables
        .iter()
        .filter(|t| t.starts_with(&prefix) || join_table_target_suffix(t) == Some(suffix.as_str()))
        .cloned()
        .collect()
}

impl SchemaManager {
    pub fn new(gateway: PgGateway) -> Self {
        SchemaManager { gateway }
    }

    fn schema(&self) -> &str {
        self.gateway.schema()
    }

    /// Read every entity type from the catalog table.
    pub async fn load_catalog(&self) -> Result<Catalog, EngineError> {
        let pool = self.gateway.pool()?;
        let mut conn = pool.acquire().await?;
        let types = store::load_types(&mut conn, self.schema()).await?;
        Ok(Catalog::new(types))
    }

    /// Create a type with its table and join tables. A type already named `name` is returned as is.
    pub async fn create_entity_type(&self, catalog: &Catalog, name: &str, fields: Vec<FieldDef>) -> Result<String, EngineError> {
        validate_type_name(name)?;
        if let Some(existing) = catalog.by_name(name) {
            tracing::warn!(name = %name, id = %existing.id, "entity type already exists, keeping it");
            return Ok(existing.id.clone());
        }
        validate_fields(&fields, |id| catalog.contains(id))?;

        let entity = EntityType {
            id: uuid::Uuid::now_v7().to_string(),
            name: name.to_string(),
            fields,
        };
        let schema = self.schema();
        let mut tx = self.gateway.begin().await?;
        run(&mut tx, ddl::create_entity_table(schema, &entity)).await?;
        for f in entity.external_fields() {
            if let Some(r) = f.relation_kind() {
                for sql in ddl::create_join_table(schema, &entity.id, &r.target_entity_type_id) {
                    run(&mut tx, sql).await?;
                }
            }
        }
        store::insert_row(&mut tx, schema, &entity).await?;
        tx.commit().await?;
        tracing::info!(id = %entity.id, name = %entity.name, fields = entity.fields.len(), "entity type created");
        Ok(entity.id)
    }

    /// Rename and/or reshape a type. `changes` is the complete new field set; each change
    /// matches an old field through `originalName`, falling back to its own name.
    pub async fn edit_entity_type(
        &self,
        catalog: &Catalog,
        id: &str,
        new_name: Option<&str>,
        changes: Vec<FieldChange>,
    ) -> Result<EntityType, EngineError> {
        let schema = self.schema();
        let mut tx = self.gateway.begin().await?;
        let old = store::load_row(&mut tx, schema, id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("entity type '{}'", id)))?
            .entity_type;

        let name = new_name.unwrap_or(&old.name).to_string();
        validate_type_name(&name)?;
        if catalog.by_name(&name).map(|t| t.id != id).unwrap_or(false) {
            return Err(EngineError::Validation(format!("entity type name '{}' is already taken", name)));
        }
        let fields: Vec<FieldDef> = changes.iter().map(|c| c.field.clone()).collect();
        validate_fields(&fields, |t| t == id || catalog.contains(t))?;

        let steps = plan_edit(&old, &changes)?;
        for step in &steps {
            tracing::debug!(id = %id, step = ?step, "schema step");
            for q in ddl::render_step(schema, id, step) {
                gateway::execute(&mut *tx, &q).await?;
            }
        }

        let entity = EntityType {
            id: id.to_string(),
            name,
            fields,
        };
        let version = store::replace_row(&mut tx, schema, &entity).await?;

        let live: Vec<&str> = entity
            .external_fields()
            .filter_map(|f| f.relation_kind().map(|r| r.target_entity_type_id.as_str()))
            .collect();
        let tables = gateway::join_tables_with_prefix(&mut *tx, schema, &join_table_source_prefix(id)).await?;
        for table in orphaned_join_tables(&tables, id, &live) {
            run(&mut tx, ddl::drop_table(schema, &table)).await?;
            tracing::info!(table = %table, "join table dropped");
        }

        tx.commit().await?;
        tracing::info!(id = %id, name = %entity.name, version, steps = steps.len(), "entity type edited");
        Ok(entity)
    }

    /// Drop a type, its join tables and the grants on its rows. Refused while another type
    /// still declares a relation to it.
    pub async fn delete_entity_type(&self, catalog: &Catalog, id: &str) -> Result<(), EngineError> {
        let entity = catalog
            .get(id)
            .ok_or_else(|| EngineError::NotFound(format!("entity type '{}'", id)))?;
        let refs = catalog.references_to(id);
        if !refs.is_empty() {
            let list: Vec<String> = refs.iter().map(|(t, f)| format!("{}.{}", t, f)).collect();
            return Err(EngineError::IntegrityViolation(format!(
                "entity type '{}' is still referenced by {}",
                entity.name,
                list.join(", ")
            )));
        }

        let schema = self.schema();
        let table = qualified_table(schema, &entity.table_name());
        let mut tx = self.gateway.begin().await?;
        run(
            &mut tx,
            format!(
                "DELETE FROM {} WHERE {} IN (SELECT {} FROM {})",
                qualified_table(schema, GRANTS_TABLE),
                quoted("asset_uuid"),
                quoted("uuid"),
                table
            ),
        )
        .await?;

        let tables = gateway::join_tables_with_prefix(&mut *tx, schema, JOIN_TABLE_PREFIX).await?;
        for jt in join_tables_touching(&tables, id) {
            run(&mut tx, ddl::drop_table(schema, &jt)).await?;
            tracing::info!(table = %jt, "join table dropped");
        }
        run(&mut tx, ddl::drop_table(schema, &entity.table_name())).await?;
        store::delete_row(&mut tx, schema, id).await?;
        tx.commit().await?;
        tracing::info!(id = %id, name = %entity.name, "entity type deleted");
        Ok(())
    }

    /// Rebuild a type's field list from the physical schema and its stored integrity metadata.
    pub async fn reconstruct_entity_type(&self, catalog: &Catalog, id: &str) -> Result<EntityType, EngineError> {
        let pool = self.gateway.pool()?;
        let schema = self.schema();
        let table = entity_table_name(id);
        if !gateway::table_exists(&pool, schema, &table).await? {
            return Err(EngineError::NotFound(format!("table for entity type '{}'", id)));
        }
        let row = {
            let mut conn = pool.acquire().await?;
            store::load_row(&mut conn, schema, id).await?
        }
        .ok_or_else(|| EngineError::NotFound(format!("entity type '{}'", id)))?;

        let columns = gateway::column_catalog(&pool, schema, &table).await?;
        let foreign_keys = gateway::foreign_key_catalog(&pool, schema, &table).await?;
        let mut table_to_type: HashMap<String, String> =
            catalog.types().map(|t| (t.table_name(), t.id.clone())).collect();
        table_to_type.insert(table, id.to_string());

        let fields = fields_from_catalog(&columns, &foreign_keys, &row.integrity, &table_to_type)?;
        Ok(EntityType {
            id: id.to_string(),
            name: row.entity_type.name,
            fields,
        })
    }

    pub async fn entity_type_history(&self, id: &str) -> Result<Vec<EntityTypeVersion>, EngineError> {
        let pool = self.gateway.pool()?;
        let mut conn = pool.acquire().await?;
        store::load_history(&mut conn, self.schema(), id).await
    }
}

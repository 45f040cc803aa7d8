//! System tables: the entity-type catalog, its history copy and the grants table.
//! All of them live in the configured schema next to the entity tables.

use crate::error::EngineError;
use crate::schema::{EntityType, FieldDef};
use crate::sql::{qualified_table, quoted};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{ConnectOptions, PgConnection, PgPool};
use std::str::FromStr;

pub const CATALOG_TABLE: &str = "entity_types";
pub const HISTORY_TABLE: &str = "entity_types_history";
pub const GRANTS_TABLE: &str = "entity_grants";

/// Create the schema and system tables if missing. Idempotent.
pub async fn ensure_system_tables(pool: &PgPool, schema: &str) -> Result<(), EngineError> {
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(schema)))
        .execute(pool)
        .await?;

    let catalog = qualified_table(schema, CATALOG_TABLE);
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            fields JSONB NOT NULL,
            integrity TEXT[] NOT NULL DEFAULT '{{}}',
            version BIGINT NOT NULL DEFAULT 1,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
        catalog
    ))
    .execute(pool)
    .await?;

    let history = qualified_table(schema, HISTORY_TABLE);
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            id TEXT NOT NULL,
            name TEXT NOT NULL,
            fields JSONB NOT NULL,
            integrity TEXT[] NOT NULL,
            version BIGINT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (id, version)
        )
        "#,
        history
    ))
    .execute(pool)
    .await?;

    let grants = qualified_table(schema, GRANTS_TABLE);
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            asset_uuid UUID NOT NULL,
            subject TEXT NOT NULL,
            permission TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (asset_uuid, subject, permission)
        )
        "#,
        grants
    ))
    .execute(pool)
    .await?;
    Ok(())
}

/// A catalog row as stored.
#[derive(Clone, Debug)]
pub struct CatalogRow {
    pub entity_type: EntityType,
    pub integrity: Vec<String>,
    pub version: i64,
}

/// A superseded definition from the history table.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityTypeVersion {
    pub version: i64,
    pub entity_type: EntityType,
    pub recorded_at: DateTime<Utc>,
}

fn decode_fields(id: &str, fields: serde_json::Value) -> Result<Vec<FieldDef>, EngineError> {
    serde_json::from_value(fields)
        .map_err(|e| EngineError::Validation(format!("stored fields of entity type '{}' are invalid: {}", id, e)))
}

pub fn encode_fields(fields: &[FieldDef]) -> Result<serde_json::Value, EngineError> {
    serde_json::to_value(fields).map_err(|e| EngineError::Validation(format!("cannot encode fields: {}", e)))
}

/// Every entity type, ordered by id.
pub async fn load_types(conn: &mut PgConnection, schema: &str) -> Result<Vec<EntityType>, EngineError> {
    let rows: Vec<(String, String, serde_json::Value)> = sqlx::query_as(&format!(
        "SELECT id, name, fields FROM {} ORDER BY id",
        qualified_table(schema, CATALOG_TABLE)
    ))
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter()
        .map(|(id, name, fields)| {
            let fields = decode_fields(&id, fields)?;
            Ok(EntityType { id, name, fields })
        })
        .collect()
}

pub async fn load_row(conn: &mut PgConnection, schema: &str, id: &str) -> Result<Option<CatalogRow>, EngineError> {
    let row: Option<(String, serde_json::Value, Vec<String>, i64)> = sqlx::query_as(&format!(
        "SELECT name, fields, integrity, version FROM {} WHERE id = $1",
        qualified_table(schema, CATALOG_TABLE)
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(|(name, fields, integrity, version)| {
        Ok(CatalogRow {
            entity_type: EntityType {
                id: id.to_string(),
                name,
                fields: decode_fields(id, fields)?,
            },
            integrity,
            version,
        })
    })
    .transpose()
}

pub async fn insert_row(conn: &mut PgConnection, schema: &str, entity: &EntityType) -> Result<(), EngineError> {
    let integrity: Vec<String> = entity.integrity_entries().iter().map(|e| e.pack()).collect();
    sqlx::query(&format!(
        "INSERT INTO {} (id, name, fields, integrity, version, created_at, updated_at) VALUES ($1, $2, $3, $4, 1, NOW(), NOW())",
        qualified_table(schema, CATALOG_TABLE)
    ))
    .bind(&entity.id)
    .bind(&entity.name)
    .bind(encode_fields(&entity.fields)?)
    .bind(&integrity)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Copy the current definition of `id` to the history table.
pub async fn archive_row(conn: &mut PgConnection, schema: &str, id: &str) -> Result<(), EngineError> {
    sqlx::query(&format!(
        "INSERT INTO {} (id, name, fields, integrity, version, created_at) SELECT id, name, fields, integrity, version, updated_at FROM {} WHERE id = $1",
        qualified_table(schema, HISTORY_TABLE),
        qualified_table(schema, CATALOG_TABLE)
    ))
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Archive the current row, then overwrite it with `entity` under the next version.
/// Returns the new version. Call within a transaction.
pub async fn replace_row(conn: &mut PgConnection, schema: &str, entity: &EntityType) -> Result<i64, EngineError> {
    archive_row(&mut *conn, schema, &entity.id).await?;
    let integrity: Vec<String> = entity.integrity_entries().iter().map(|e| e.pack()).collect();
    let version: (i64,) = sqlx::query_as(&format!(
        "UPDATE {} SET name = $2, fields = $3, integrity = $4, version = version + 1, updated_at = NOW() WHERE id = $1 RETURNING version",
        qualified_table(schema, CATALOG_TABLE)
    ))
    .bind(&entity.id)
    .bind(&entity.name)
    .bind(encode_fields(&entity.fields)?)
    .bind(&integrity)
    .fetch_one(&mut *conn)
    .await?;
    Ok(version.0)
}

/// Archive the row, then delete it. History is kept.
pub async fn delete_row(conn: &mut PgConnection, schema: &str, id: &str) -> Result<bool, EngineError> {
    archive_row(&mut *conn, schema, id).await?;
    let done = sqlx::query(&format!("DELETE FROM {} WHERE id = $1", qualified_table(schema, CATALOG_TABLE)))
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(done.rows_affected() > 0)
}

/// Superseded definitions, newest first.
pub async fn load_history(conn: &mut PgConnection, schema: &str, id: &str) -> Result<Vec<EntityTypeVersion>, EngineError> {
    let rows: Vec<(String, serde_json::Value, i64, DateTime<Utc>)> = sqlx::query_as(&format!(
        "SELECT name, fields, version, created_at FROM {} WHERE id = $1 ORDER BY version DESC",
        qualified_table(schema, HISTORY_TABLE)
    ))
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter()
        .map(|(name, fields, version, recorded_at)| {
            Ok(EntityTypeVersion {
                version,
                entity_type: EntityType {
                    id: id.to_string(),
                    name,
                    fields: decode_fields(id, fields)?,
                },
                recorded_at,
            })
        })
        .collect()
}

/// Ensure the database in `database_url` exists; create it if not. Connects to the
/// default `postgres` database to run CREATE DATABASE. Call before creating the main pool.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), EngineError> {
    let (admin_url, db_name) = split_database_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| EngineError::Config(format!("invalid database url: {}", e)))?;
    let mut conn: PgConnection = opts
        .connect()
        .await
        .map_err(|e| EngineError::ConnectionFailure(e.to_string()))?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", quoted(&db_name)))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

/// `(admin url pointing at postgres, database name)`.
fn split_database_url(url: &str) -> Result<(String, String), EngineError> {
    let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
    let path_start = url[scheme_end..]
        .find('/')
        .map(|i| scheme_end + i + 1)
        .ok_or_else(|| EngineError::Config("database url has no database name".into()))?;
    let rest = url.get(path_start..).unwrap_or("");
    let (db_name, query) = match rest.split_once('?') {
        Some((db, q)) => (db.trim(), format!("?{}", q)),
        None => (rest.trim(), String::new()),
    };
    let admin_url = format!("{}postgres{}", &url[..path_start], query);
    Ok((admin_url, db_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_url_splits_into_admin_url_and_name() {
        let (admin, db) = split_database_url("postgres://u:p@localhost:5432/assets").unwrap();
        assert_eq!(admin, "postgres://u:p@localhost:5432/postgres");
        assert_eq!(db, "assets");

        let (admin, db) = split_database_url("postgres://localhost/assets?sslmode=disable").unwrap();
        assert_eq!(admin, "postgres://localhost/postgres?sslmode=disable");
        assert_eq!(db, "assets");

        assert!(split_database_url("postgres://localhost").is_err());
    }

    #[test]
    fn stored_fields_decode() {
        let json = serde_json::json!([{"name": "title", "kind": "text", "required": true}]);
        let fields = decode_fields("t", json).unwrap();
        assert_eq!(fields[0].name, "title");
        assert!(fields[0].required);
        assert!(decode_fields("t", serde_json::json!([{"name": "x", "kind": "blob"}])).is_err());
    }
}

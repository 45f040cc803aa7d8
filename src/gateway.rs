//! PostgreSQL gateway: pool lifecycle, statement execution and catalog introspection.
//!
//! Statement helpers are generic over the executor so the same code runs against the
//! pool or inside a transaction.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::schema::{ColumnRow, ForeignKeyRow};
use crate::sql::{QueryBuf, ENTITY_COLUMN};
use crate::store::{ensure_database_exists, ensure_system_tables};
use serde_json::{Map, Value};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Executor, PgPool, Postgres, Transaction};
use std::sync::{Arc, RwLock};

#[derive(Clone)]
pub struct PgGateway {
    config: Arc<EngineConfig>,
    pool: Arc<RwLock<Option<PgPool>>>,
}

fn poisoned<T>(_: T) -> EngineError {
    EngineError::ConnectionFailure("gateway lock poisoned".into())
}

impl PgGateway {
    pub fn new(config: EngineConfig) -> Self {
        PgGateway {
            config: Arc::new(config),
            pool: Arc::new(RwLock::new(None)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn schema(&self) -> &str {
        &self.config.schema
    }

    /// Open the pool (creating the database first when configured) and ensure the system
    /// tables exist. A no-op when already connected.
    pub async fn connect(&self) -> Result<(), EngineError> {
        self.config.validate()?;
        if self.is_connected() {
            return Ok(());
        }
        if self.config.create_database {
            ensure_database_exists(&self.config.database_url).await?;
        }
        let pool = PgPoolOptions::new()
            .max_connections(self.config.max_connections)
            .connect(&self.config.database_url)
            .await
            .map_err(|e| EngineError::ConnectionFailure(e.to_string()))?;
        ensure_system_tables(&pool, &self.config.schema).await?;
        *self.pool.write().map_err(poisoned)? = Some(pool);
        tracing::info!(schema = %self.config.schema, max_connections = self.config.max_connections, "connected");
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), EngineError> {
        let pool = self.pool.write().map_err(poisoned)?.take();
        if let Some(pool) = pool {
            pool.close().await;
            tracing::info!("disconnected");
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.pool.read().map(|p| p.is_some()).unwrap_or(false)
    }

    /// The open pool, or `NotConnected`.
    pub fn pool(&self) -> Result<PgPool, EngineError> {
        self.pool.read().map_err(poisoned)?.clone().ok_or(EngineError::NotConnected)
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, EngineError> {
        Ok(self.pool()?.begin().await?)
    }

    pub async fn fetch_json(&self, q: &QueryBuf) -> Result<Vec<Value>, EngineError> {
        fetch_json(&self.pool()?, q).await
    }

    pub async fn execute(&self, q: &QueryBuf) -> Result<u64, EngineError> {
        execute(&self.pool()?, q).await
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool, EngineError> {
        table_exists(&self.pool()?, self.schema(), table).await
    }

    pub async fn column_catalog(&self, table: &str) -> Result<Vec<ColumnRow>, EngineError> {
        column_catalog(&self.pool()?, self.schema(), table).await
    }

    pub async fn foreign_key_catalog(&self, table: &str) -> Result<Vec<ForeignKeyRow>, EngineError> {
        foreign_key_catalog(&self.pool()?, self.schema(), table).await
    }

    pub async fn join_tables_with_prefix(&self, prefix: &str) -> Result<Vec<String>, EngineError> {
        join_tables_with_prefix(&self.pool()?, self.schema(), prefix).await
    }
}

/// Run a statement and return each row as JSON: `__entity` merged with any other columns.
pub async fn fetch_json<'e, E>(exec: E, q: &QueryBuf) -> Result<Vec<Value>, EngineError>
where
    E: Executor<'e, Database = Postgres>,
{
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(p.clone());
    }
    let rows = query.fetch_all(exec).await?;
    Ok(rows.iter().map(row_to_json).collect())
}

/// Run a statement, returning the affected row count.
pub async fn execute<'e, E>(exec: E, q: &QueryBuf) -> Result<u64, EngineError>
where
    E: Executor<'e, Database = Postgres>,
{
    tracing::debug!(sql = %q.sql, params = ?q.params, "execute");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(p.clone());
    }
    Ok(query.execute(exec).await?.rows_affected())
}

pub async fn table_exists<'e, E>(exec: E, schema: &str, table: &str) -> Result<bool, EngineError>
where
    E: Executor<'e, Database = Postgres>,
{
    let row: (bool,) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_schema = $1 AND table_name = $2)",
    )
    .bind(schema)
    .bind(table)
    .fetch_one(exec)
    .await?;
    Ok(row.0)
}

/// Columns of a table in ordinal order.
pub async fn column_catalog<'e, E>(exec: E, schema: &str, table: &str) -> Result<Vec<ColumnRow>, EngineError>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<(String, String, bool)> = sqlx::query_as(
        "SELECT column_name::text, udt_name::text, (is_nullable = 'YES') \
         FROM information_schema.columns WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
    )
    .bind(schema)
    .bind(table)
    .fetch_all(exec)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(name, udt_name, nullable)| ColumnRow { name, udt_name, nullable })
        .collect())
}

pub async fn foreign_key_catalog<'e, E>(exec: E, schema: &str, table: &str) -> Result<Vec<ForeignKeyRow>, EngineError>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT kcu.column_name::text, ccu.table_name::text, rc.delete_rule::text \
         FROM information_schema.table_constraints tc \
         JOIN information_schema.key_column_usage kcu \
           ON kcu.constraint_schema = tc.constraint_schema AND kcu.constraint_name = tc.constraint_name \
         JOIN information_schema.referential_constraints rc \
           ON rc.constraint_schema = tc.constraint_schema AND rc.constraint_name = tc.constraint_name \
         JOIN information_schema.constraint_column_usage ccu \
           ON ccu.constraint_schema = tc.constraint_schema AND ccu.constraint_name = tc.constraint_name \
         WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = $1 AND tc.table_name = $2",
    )
    .bind(schema)
    .bind(table)
    .fetch_all(exec)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(column, foreign_table, delete_rule)| ForeignKeyRow {
            column,
            foreign_table,
            delete_rule,
        })
        .collect())
}

/// Tables of `schema` whose name starts with `prefix` (compared literally, not as a LIKE pattern).
pub async fn join_tables_with_prefix<'e, E>(exec: E, schema: &str, prefix: &str) -> Result<Vec<String>, EngineError>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT table_name::text FROM information_schema.tables \
         WHERE table_schema = $1 AND left(table_name, length($2)) = $2 ORDER BY table_name",
    )
    .bind(schema)
    .bind(prefix)
    .fetch_all(exec)
    .await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
}

fn row_to_json(row: &PgRow) -> Value {
    use sqlx::{Column, Row};
    merge_columns(
        row.columns()
            .iter()
            .map(|c| (c.name().to_string(), cell_to_value(row, c.name())))
            .collect(),
    )
}

/// Fold every column other than `__entity` into the `__entity` object.
fn merge_columns(columns: Vec<(String, Value)>) -> Value {
    let mut entity = Map::new();
    let mut extras = Map::new();
    for (name, v) in columns {
        match v {
            Value::Object(m) if name == ENTITY_COLUMN => entity = m,
            other => {
                extras.insert(name, other);
            }
        }
    }
    entity.extend(extras);
    Value::Object(entity)
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    Value::Null
}

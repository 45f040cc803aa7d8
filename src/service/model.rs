//! Generic CRUD over one entity type. Each call compiles its statement against the
//! catalog snapshot the model was created from.

use crate::error::EngineError;
use crate::gateway::{self, PgGateway};
use crate::query::{Filter, FindQuery};
use crate::schema::{Catalog, EntityType};
use crate::service::RequestValidator;
use crate::sql::{integrity, mutation, select, QueryBuf, SqlContext};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

#[async_trait]
pub trait Model<T>: Send + Sync {
    async fn find_one(&self, query: FindQuery) -> Result<Option<T>, EngineError>;
    async fn find_many(&self, query: FindQuery) -> Result<Vec<T>, EngineError>;
    async fn create_one(&self, data: Value) -> Result<T, EngineError>;
    /// Rows touching join-table fields are inserted one by one inside a transaction;
    /// otherwise a single multi-row INSERT is used.
    async fn create_many(&self, data: Vec<Value>) -> Result<Vec<T>, EngineError>;
    /// Updates at most one matching row, chosen arbitrarily when several match.
    /// `NotFound` when nothing matches.
    async fn update_one(&self, filter: Filter, data: Value) -> Result<T, EngineError>;
    async fn update_many(&self, filter: Filter, data: Value) -> Result<Vec<T>, EngineError>;
    /// Exactly one row must match: `NotFound` for none, `IntegrityViolation` for several.
    /// Returns the deleted row.
    async fn delete_one(&self, filter: Filter) -> Result<T, EngineError>;
    /// Number of deleted rows (cascaded rows of other types are not counted).
    async fn delete_many(&self, filter: Filter) -> Result<u64, EngineError>;
}

/// Model yielding plain JSON objects.
#[derive(Clone)]
pub struct AssetModel {
    gateway: PgGateway,
    catalog: Arc<Catalog>,
    type_id: String,
}

impl AssetModel {
    pub fn new(gateway: PgGateway, catalog: Arc<Catalog>, type_id: impl Into<String>) -> Self {
        AssetModel {
            gateway,
            catalog,
            type_id: type_id.into(),
        }
    }

    pub fn entity_type(&self) -> Result<&EntityType, EngineError> {
        self.catalog
            .get(&self.type_id)
            .ok_or_else(|| EngineError::NotFound(format!("entity type '{}'", self.type_id)))
    }

    fn ctx(&self) -> SqlContext<'_> {
        SqlContext::new(&self.catalog, self.gateway.schema())
    }

    /// Run `q` in a transaction and keep its effect only if it returned exactly one row.
    async fn exactly_one(&self, op: &str, q: &QueryBuf) -> Result<Value, EngineError> {
        let mut tx = self.gateway.begin().await?;
        let mut rows = gateway::fetch_json(&mut *tx, q).await?;
        match rows.len() {
            1 => {
                tx.commit().await?;
                Ok(rows.remove(0))
            }
            0 => {
                tx.rollback().await?;
                Err(EngineError::NotFound(format!("{}: no {} matches", op, self.type_name())))
            }
            n => {
                tracing::warn!(op, matched = n, entity_type = %self.type_id, "rolled back");
                tx.rollback().await?;
                Err(EngineError::IntegrityViolation(format!(
                    "{}: {} rows of {} match, expected one",
                    op,
                    n,
                    self.type_name()
                )))
            }
        }
    }

    fn type_name(&self) -> &str {
        self.catalog.get(&self.type_id).map(|t| t.name.as_str()).unwrap_or(&self.type_id)
    }
}

#[async_trait]
impl Model<Value> for AssetModel {
    async fn find_one(&self, mut query: FindQuery) -> Result<Option<Value>, EngineError> {
        query.limit = Some(1);
        Ok(self.find_many(query).await?.into_iter().next())
    }

    async fn find_many(&self, query: FindQuery) -> Result<Vec<Value>, EngineError> {
        let entity = self.entity_type()?;
        let q = select::select_find(&self.ctx(), entity, &query)?;
        self.gateway.fetch_json(&q).await
    }

    async fn create_one(&self, data: Value) -> Result<Value, EngineError> {
        let entity = self.entity_type()?;
        let row = RequestValidator::validate(entity, &data)?;
        let q = mutation::insert_one(&self.ctx(), entity, &row)?;
        self.gateway
            .fetch_json(&q)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::NotFound(format!("{} row after insert", entity.name)))
    }

    async fn create_many(&self, data: Vec<Value>) -> Result<Vec<Value>, EngineError> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let entity = self.entity_type()?;
        let ctx = self.ctx();
        let rows = data
            .iter()
            .map(|d| RequestValidator::validate(entity, d))
            .collect::<Result<Vec<_>, _>>()?;

        if !rows.iter().any(|r| r.has_links()) {
            let q = mutation::insert_batch(&ctx, entity, &rows)?;
            return self.gateway.fetch_json(&q).await;
        }

        let mut tx = self.gateway.begin().await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let q = mutation::insert_one(&ctx, entity, row)?;
            match gateway::fetch_json(&mut *tx, &q).await {
                Ok(mut created) => out.append(&mut created),
                Err(e) => {
                    tracing::warn!(error = %e, entity_type = %entity.id, "create_many rolled back");
                    if let Err(rb) = tx.rollback().await {
                        tracing::warn!(error = %rb, "rollback failed");
                    }
                    return Err(e);
                }
            }
        }
        tx.commit().await?;
        Ok(out)
    }

    async fn update_one(&self, filter: Filter, data: Value) -> Result<Value, EngineError> {
        let entity = self.entity_type()?;
        let row = RequestValidator::validate_partial(entity, &data)?;
        let q = mutation::update(&self.ctx(), entity, &filter, &row, true)?;
        self.exactly_one("update_one", &q).await
    }

    async fn update_many(&self, filter: Filter, data: Value) -> Result<Vec<Value>, EngineError> {
        let entity = self.entity_type()?;
        let row = RequestValidator::validate_partial(entity, &data)?;
        let q = mutation::update(&self.ctx(), entity, &filter, &row, false)?;
        self.gateway.fetch_json(&q).await
    }

    async fn delete_one(&self, filter: Filter) -> Result<Value, EngineError> {
        let entity = self.entity_type()?;
        let q = integrity::delete(&self.ctx(), entity, &filter)?;
        self.exactly_one("delete_one", &q).await
    }

    async fn delete_many(&self, filter: Filter) -> Result<u64, EngineError> {
        let entity = self.entity_type()?;
        let q = integrity::delete(&self.ctx(), entity, &filter)?;
        Ok(self.gateway.fetch_json(&q).await?.len() as u64)
    }
}

/// Model that deserializes every returned entity into `T`.
pub struct TypedModel<T> {
    inner: AssetModel,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedModel<T> {
    fn clone(&self) -> Self {
        TypedModel {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> TypedModel<T> {
    pub fn new(inner: AssetModel) -> Self {
        TypedModel {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn untyped(&self) -> &AssetModel {
        &self.inner
    }
}

fn decode<T: DeserializeOwned>(v: Value) -> Result<T, EngineError> {
    serde_json::from_value(v).map_err(|e| EngineError::Validation(format!("cannot decode entity: {}", e)))
}

fn decode_all<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, EngineError> {
    rows.into_iter().map(decode).collect()
}

#[async_trait]
impl<T> Model<T> for TypedModel<T>
where
    T: DeserializeOwned + Send + 'static,
{
    async fn find_one(&self, query: FindQuery) -> Result<Option<T>, EngineError> {
        self.inner.find_one(query).await?.map(decode).transpose()
    }

    async fn find_many(&self, query: FindQuery) -> Result<Vec<T>, EngineError> {
        decode_all(self.inner.find_many(query).await?)
    }

    async fn create_one(&self, data: Value) -> Result<T, EngineError> {
        decode(self.inner.create_one(data).await?)
    }

    async fn create_many(&self, data: Vec<Value>) -> Result<Vec<T>, EngineError> {
        decode_all(self.inner.create_many(data).await?)
    }

    async fn update_one(&self, filter: Filter, data: Value) -> Result<T, EngineError> {
        decode(self.inner.update_one(filter, data).await?)
    }

    async fn update_many(&self, filter: Filter, data: Value) -> Result<Vec<T>, EngineError> {
        decode_all(self.inner.update_many(filter, data).await?)
    }

    async fn delete_one(&self, filter: Filter) -> Result<T, EngineError> {
        decode(self.inner.delete_one(filter).await?)
    }

    async fn delete_many(&self, filter: Filter) -> Result<u64, EngineError> {
        self.inner.delete_many(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::schema::{FieldDef, ScalarKind};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Note {
        uuid: String,
        title: String,
    }

    fn model() -> AssetModel {
        let catalog = Catalog::new(vec![EntityType {
            id: "n".into(),
            name: "Note".into(),
            fields: vec![FieldDef::scalar("title", ScalarKind::Text).required()],
        }]);
        AssetModel::new(PgGateway::new(EngineConfig::default()), Arc::new(catalog), "n")
    }

    #[test]
    fn typed_rows_decode() {
        let n: Note = decode(json!({"uuid": "u1", "title": "hello", "extra": 1})).unwrap();
        assert_eq!(n, Note { uuid: "u1".into(), title: "hello".into() });
        assert!(decode::<Note>(json!({"uuid": "u1"})).is_err());
    }

    #[tokio::test]
    async fn calls_without_a_pool_fail_with_not_connected() {
        let m = model();
        assert!(matches!(m.find_many(FindQuery::new()).await, Err(EngineError::NotConnected)));
        assert!(matches!(
            m.delete_one(Filter::by_uuid("4f1c5a52-3c1e-4d7b-9a55-0a1b2c3d4e5f")).await,
            Err(EngineError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn payload_errors_come_before_the_database() {
        let m = model();
        assert!(matches!(m.create_one(json!({})).await, Err(EngineError::Validation(_))));
        assert!(matches!(m.create_many(Vec::new()).await, Ok(v) if v.is_empty()));
        assert!(matches!(
            m.update_many(Filter::all(), json!({})).await,
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn unknown_type_is_not_found() {
        let m = AssetModel::new(PgGateway::new(EngineConfig::default()), Arc::new(Catalog::default()), "gone");
        assert!(matches!(m.entity_type(), Err(EngineError::NotFound(_))));
    }
}

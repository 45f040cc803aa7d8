//! Engine facade: owns the gateway and the current catalog snapshot. The snapshot is
//! replaced after every schema change; models keep the snapshot they were created from.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::gateway::PgGateway;
use crate::grants::GrantStore;
use crate::schema::{Catalog, EntityType, FieldChange, FieldDef, SchemaManager};
use crate::service::{AssetModel, TypedModel};
use crate::sql::{select, uuid_text, SqlContext, TYPE_COLUMN};
use crate::store::EntityTypeVersion;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};

/// Result of a lookup by uuid across all entity types.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FoundEntity {
    pub entity_type_id: String,
    pub entity: Value,
}

pub struct AssetEngine {
    gateway: PgGateway,
    schema: SchemaManager,
    catalog: RwLock<Arc<Catalog>>,
}

impl AssetEngine {
    /// Unconnected engine with an empty catalog.
    pub fn new(config: EngineConfig) -> Self {
        let gateway = PgGateway::new(config);
        AssetEngine {
            schema: SchemaManager::new(gateway.clone()),
            gateway,
            catalog: RwLock::new(Arc::new(Catalog::default())),
        }
    }

    /// Connect and load the catalog.
    pub async fn connect(config: EngineConfig) -> Result<Self, EngineError> {
        let engine = AssetEngine::new(config);
        engine.gateway.connect().await?;
        engine.reload().await?;
        Ok(engine)
    }

    pub async fn disconnect(&self) -> Result<(), EngineError> {
        self.gateway.disconnect().await
    }

    pub fn gateway(&self) -> &PgGateway {
        &self.gateway
    }

    /// Current catalog snapshot.
    pub fn catalog(&self) -> Arc<Catalog> {
        self.catalog.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Re-read the catalog table and swap the snapshot.
    pub async fn reload(&self) -> Result<Arc<Catalog>, EngineError> {
        let catalog = Arc::new(self.schema.load_catalog().await?);
        *self.catalog.write().unwrap_or_else(PoisonError::into_inner) = catalog.clone();
        tracing::debug!(types = catalog.len(), relations = catalog.relations().len(), "catalog reloaded");
        Ok(catalog)
    }

    pub async fn create_entity_type(&self, name: &str, fields: Vec<FieldDef>) -> Result<String, EngineError> {
        let id = self.schema.create_entity_type(&self.catalog(), name, fields).await?;
        self.reload().await?;
        Ok(id)
    }

    pub async fn edit_entity_type(
        &self,
        id: &str,
        new_name: Option<&str>,
        changes: Vec<FieldChange>,
    ) -> Result<EntityType, EngineError> {
        let edited = self.schema.edit_entity_type(&self.catalog(), id, new_name, changes).await?;
        self.reload().await?;
        Ok(edited)
    }

    pub async fn delete_entity_type(&self, id: &str) -> Result<(), EngineError> {
        self.schema.delete_entity_type(&self.catalog(), id).await?;
        self.reload().await?;
        Ok(())
    }

    pub fn get_entity_type(&self, id: &str) -> Result<EntityType, EngineError> {
        self.catalog()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("entity type '{}'", id)))
    }

    pub fn get_entity_types(&self) -> Vec<EntityType> {
        self.catalog().types().cloned().collect()
    }

    /// Find the entity with `uuid` in whichever table holds it.
    pub async fn get_entity_by_uuid(&self, uuid: &str) -> Result<Option<FoundEntity>, EngineError> {
        let uuid = uuid_text("uuid", &Value::String(uuid.to_string()))?;
        let catalog = self.catalog();
        let Some(q) = select::select_by_uuid_any(&SqlContext::new(&catalog, self.gateway.schema()), &uuid)? else {
            return Ok(None);
        };
        let Some(mut row) = self.gateway.fetch_json(&q).await?.into_iter().next() else {
            return Ok(None);
        };
        let entity_type_id = match row.as_object_mut().and_then(|o| o.remove(TYPE_COLUMN)) {
            Some(Value::String(id)) => id,
            _ => return Err(EngineError::NotFound(format!("owning type of '{}'", uuid))),
        };
        Ok(Some(FoundEntity {
            entity_type_id,
            entity: row,
        }))
    }

    pub async fn reconstruct_entity_type(&self, id: &str) -> Result<EntityType, EngineError> {
        self.schema.reconstruct_entity_type(&self.catalog(), id).await
    }

    pub async fn entity_type_history(&self, id: &str) -> Result<Vec<EntityTypeVersion>, EngineError> {
        self.schema.entity_type_history(id).await
    }

    /// JSON model for a type, by id or name.
    pub fn model(&self, type_id_or_name: &str) -> Result<AssetModel, EngineError> {
        let catalog = self.catalog();
        let id = catalog.resolve(type_id_or_name)?.id.clone();
        Ok(AssetModel::new(self.gateway.clone(), catalog, id))
    }

    pub fn typed_model<T: DeserializeOwned>(&self, type_id_or_name: &str) -> Result<TypedModel<T>, EngineError> {
        Ok(TypedModel::new(self.model(type_id_or_name)?))
    }

    pub fn grants(&self) -> GrantStore {
        GrantStore::new(self.gateway.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_engine_has_an_empty_catalog() {
        let engine = AssetEngine::new(EngineConfig::default());
        assert!(engine.get_entity_types().is_empty());
        assert!(matches!(engine.get_entity_type("x"), Err(EngineError::NotFound(_))));
        assert!(matches!(engine.model("Note"), Err(EngineError::NotFound(_))));
        assert!(!engine.gateway().is_connected());
    }

    #[tokio::test]
    async fn uuid_lookup_validates_and_short_circuits() {
        let engine = AssetEngine::new(EngineConfig::default());
        assert!(matches!(engine.get_entity_by_uuid("nope").await, Err(EngineError::Validation(_))));
        assert_eq!(
            engine.get_entity_by_uuid("4f1c5a52-3c1e-4d7b-9a55-0a1b2c3d4e5f").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn schema_changes_need_a_connection() {
        let engine = AssetEngine::new(EngineConfig::default());
        assert!(matches!(
            engine.create_entity_type("Note", Vec::new()).await,
            Err(EngineError::NotConnected)
        ));
    }
}

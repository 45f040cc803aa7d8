//! Grant store: permissions held by subjects on individual entities. Rows are removed
//! together with the entities they point at.

use crate::error::EngineError;
use crate::gateway::PgGateway;
use crate::sql::{qualified_table, uuid_text};
use crate::store::GRANTS_TABLE;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    pub asset_uuid: String,
    pub subject: String,
    pub permission: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct GrantStore {
    gateway: PgGateway,
}

fn checked_uuid(s: &str) -> Result<String, EngineError> {
    uuid_text("asset_uuid", &serde_json::Value::String(s.to_string()))
}

impl GrantStore {
    pub fn new(gateway: PgGateway) -> Self {
        GrantStore { gateway }
    }

    fn table(&self) -> String {
        qualified_table(self.gateway.schema(), GRANTS_TABLE)
    }

    /// Record a grant. Granting twice is a no-op.
    pub async fn grant(&self, asset_uuid: &str, subject: &str, permission: &str) -> Result<(), EngineError> {
        let asset_uuid = checked_uuid(asset_uuid)?;
        let sql = format!(
            "INSERT INTO {} (asset_uuid, subject, permission) VALUES ($1::uuid, $2, $3) ON CONFLICT DO NOTHING",
            self.table()
        );
        tracing::debug!(sql = %sql, "query");
        sqlx::query(&sql)
            .bind(&asset_uuid)
            .bind(subject)
            .bind(permission)
            .execute(&self.gateway.pool()?)
            .await?;
        Ok(())
    }

    /// Returns whether a grant was removed.
    pub async fn revoke(&self, asset_uuid: &str, subject: &str, permission: &str) -> Result<bool, EngineError> {
        let asset_uuid = checked_uuid(asset_uuid)?;
        let sql = format!(
            "DELETE FROM {} WHERE asset_uuid = $1::uuid AND subject = $2 AND permission = $3",
            self.table()
        );
        tracing::debug!(sql = %sql, "query");
        let done = sqlx::query(&sql)
            .bind(&asset_uuid)
            .bind(subject)
            .bind(permission)
            .execute(&self.gateway.pool()?)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Grants on one entity, ordered by subject then permission.
    pub async fn list(&self, asset_uuid: &str) -> Result<Vec<Grant>, EngineError> {
        let asset_uuid = checked_uuid(asset_uuid)?;
        let sql = format!(
            "SELECT asset_uuid::text, subject, permission, created_at FROM {} WHERE asset_uuid = $1::uuid ORDER BY subject, permission",
            self.table()
        );
        tracing::debug!(sql = %sql, "query");
        let rows: Vec<(String, String, String, DateTime<Utc>)> = sqlx::query_as(&sql)
            .bind(&asset_uuid)
            .fetch_all(&self.gateway.pool()?)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(asset_uuid, subject, permission, created_at)| Grant {
                asset_uuid,
                subject,
                permission,
                created_at,
            })
            .collect())
    }
}

//! Demo: a separate binary that drives asset-engine end to end.
//!
//! Run from repo root: `cargo run -p asset-engine-demo`
//! Reads DATABASE_URL (and the other ASSET_* settings) from the environment or `.env`.

use asset_engine::{
    AssetEngine, EngineConfig, FieldDef, Filter, FindQuery, IntegrityStrategy, Model, OrderBy, ScalarKind,
};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct Note {
    uuid: String,
    title: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("asset_engine=info")),
        )
        .init();

    let engine = AssetEngine::connect(EngineConfig::from_env()?).await?;

    let note_type = engine
        .create_entity_type("Note", vec![FieldDef::scalar("title", ScalarKind::Text).required()])
        .await?;
    let link_type = engine
        .create_entity_type(
            "Link",
            vec![
                FieldDef::scalar("likes", ScalarKind::Integer),
                FieldDef::relation("linkedAsset", note_type.as_str(), IntegrityStrategy::Cascade),
                FieldDef::relation("tagIds", note_type.as_str(), IntegrityStrategy::SetNull).multiple(),
            ],
        )
        .await?;

    let notes = engine.typed_model::<Note>(&note_type)?;
    let links = engine.model(&link_type)?;

    let created = notes
        .create_many(vec![json!({"title": "first"}), json!({"title": "second"})])
        .await?;
    let (first, second) = (&created[0], &created[1]);
    tracing::info!(first = %first.uuid, second = %second.uuid, "notes created");

    let link = links
        .create_one(json!({"likes": 3, "linkedAsset": first.uuid, "tagIds": [first.uuid, second.uuid]}))
        .await?;
    let link_uuid = link["uuid"].as_str().unwrap_or_default().to_string();
    tracing::info!(link = %link, "link created");

    let found = links
        .find_one(
            FindQuery::new()
                .filter(Filter::by_uuid(link_uuid.as_str()))
                .include("linkedAssetRef")
                .include("tags"),
        )
        .await?;
    tracing::info!(found = ?found, "link with includes");

    let popular = links
        .find_many(
            FindQuery::new()
                .filter(Filter::range("likes", None, Some(json!(1))))
                .order_by(OrderBy::desc("likes")),
        )
        .await?;
    tracing::info!(count = popular.len(), "links with more than one like");

    // set_null on a join-table relation: the tag disappears from the array.
    notes.delete_one(Filter::by_uuid(second.uuid.as_str())).await?;
    let after = links.find_one(FindQuery::new().filter(Filter::by_uuid(link_uuid.as_str()))).await?;
    tracing::info!(after = ?after, "second note deleted");

    // cascade on the singular relation: the link goes with the note.
    notes.delete_one(Filter::by_uuid(first.uuid.as_str())).await?;
    let remaining = engine.get_entity_by_uuid(&link_uuid).await?;
    tracing::info!(remaining = ?remaining, "first note deleted");

    match engine.delete_entity_type(&note_type).await {
        Err(e) => tracing::info!(error = %e, code = e.code(), "Note is still referenced by Link"),
        Ok(()) => tracing::warn!("Note deleted while referenced"),
    }

    for v in engine.entity_type_history(&link_type).await? {
        tracing::info!(version = v.version, name = %v.entity_type.name, "history");
    }
    engine.disconnect().await?;
    Ok(())
}

//! End-to-end behavior against a live PostgreSQL. Run with
//! `DATABASE_URL=postgres://... cargo test -- --ignored`.

use asset_engine::{
    AssetEngine, EngineConfig, EngineError, FieldChange, FieldDef, Filter, FindQuery, IntegrityStrategy, Model,
    OrderBy, ScalarKind,
};
use serde_json::{json, Value};

async fn engine() -> AssetEngine {
    let config = EngineConfig::from_env().expect("config from env");
    AssetEngine::connect(config).await.expect("connect")
}

fn unique(name: &str) -> String {
    format!("{}{}", name, uuid::Uuid::new_v4().simple())
}

fn uuid_of(v: &Value) -> String {
    v["uuid"].as_str().expect("uuid").to_string()
}

/// Note{title} and Link{likes, linkedAsset -> Note, tagIds -> [Note]}.
async fn note_and_link(
    engine: &AssetEngine,
    single: IntegrityStrategy,
    multi: IntegrityStrategy,
) -> (String, String) {
    let note = engine
        .create_entity_type(&unique("Note"), vec![FieldDef::scalar("title", ScalarKind::Text)])
        .await
        .unwrap();
    let link = engine
        .create_entity_type(
            &unique("Link"),
            vec![
                FieldDef::scalar("likes", ScalarKind::Integer).required(),
                FieldDef::relation("linkedAsset", note.as_str(), single),
                FieldDef::relation("tagIds", note.as_str(), multi).multiple(),
            ],
        )
        .await
        .unwrap();
    (note, link)
}

#[tokio::test]
#[ignore]
async fn missing_required_field_is_a_validation_error() {
    let engine = engine().await;
    let (_, link) = note_and_link(&engine, IntegrityStrategy::SetNull, IntegrityStrategy::SetNull).await;
    let err = engine.model(&link).unwrap().create_one(json!({})).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)), "{:?}", err);
}

#[tokio::test]
#[ignore]
async fn create_then_find_round_trips_scalars() {
    let engine = engine().await;
    let (note, link) = note_and_link(&engine, IntegrityStrategy::SetNull, IntegrityStrategy::SetNull).await;
    let n = engine.model(&note).unwrap().create_one(json!({"title": "hello"})).await.unwrap();
    let links = engine.model(&link).unwrap();
    let created = links
        .create_one(json!({"likes": 7, "linkedAsset": uuid_of(&n), "tagIds": [uuid_of(&n)]}))
        .await
        .unwrap();
    let found = links
        .find_one(FindQuery::new().filter(Filter::by_uuid(uuid_of(&created))))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found["likes"], json!(7));
    assert_eq!(found["linkedAsset"], json!(uuid_of(&n)));
    assert_eq!(found["tagIds"], json!([uuid_of(&n)]));
    assert_eq!(found, created);
}

#[tokio::test]
#[ignore]
async fn includes_nest_the_related_entity() {
    let engine = engine().await;
    let (note, link) = note_and_link(&engine, IntegrityStrategy::SetNull, IntegrityStrategy::SetNull).await;
    let n = engine.model(&note).unwrap().create_one(json!({"title": "target"})).await.unwrap();
    let links = engine.model(&link).unwrap();
    let l = links.create_one(json!({"likes": 1, "linkedAsset": uuid_of(&n)})).await.unwrap();

    let plain = links
        .find_one(FindQuery::new().filter(Filter::by_uuid(uuid_of(&l))))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(plain["linkedAsset"], json!(uuid_of(&n)));

    let nested = links
        .find_one(
            FindQuery::new()
                .filter(Filter::by_uuid(uuid_of(&l)))
                .include("linkedAssetRef"),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(nested["linkedAssetRef"]["title"], json!("target"));
    assert_eq!(nested["linkedAssetRef"]["uuid"], json!(uuid_of(&n)));
}

#[tokio::test]
#[ignore]
async fn find_many_is_deterministic() {
    let engine = engine().await;
    let (_, link) = note_and_link(&engine, IntegrityStrategy::SetNull, IntegrityStrategy::SetNull).await;
    let links = engine.model(&link).unwrap();
    links
        .create_many(vec![json!({"likes": 2}), json!({"likes": 2}), json!({"likes": 5})])
        .await
        .unwrap();
    let query = FindQuery::new().order_by(OrderBy::desc("likes")).limit(10);
    let a = links.find_many(query.clone()).await.unwrap();
    let b = links.find_many(query).await.unwrap();
    assert_eq!(a.len(), 3);
    assert_eq!(a, b);
    assert_eq!(a[0]["likes"], json!(5));
}

#[tokio::test]
#[ignore]
async fn singular_cascade_deletes_the_referencing_row() {
    let engine = engine().await;
    let (note, link) = note_and_link(&engine, IntegrityStrategy::Cascade, IntegrityStrategy::SetNull).await;
    let notes = engine.model(&note).unwrap();
    let n = notes.create_one(json!({"title": "u"})).await.unwrap();
    let l = engine
        .model(&link)
        .unwrap()
        .create_one(json!({"likes": 1, "linkedAsset": uuid_of(&n)}))
        .await
        .unwrap();
    notes.delete_one(Filter::by_uuid(uuid_of(&n))).await.unwrap();
    assert!(engine.get_entity_by_uuid(&uuid_of(&l)).await.unwrap().is_none());
}

#[tokio::test]
#[ignore]
async fn singular_set_null_clears_the_reference() {
    let engine = engine().await;
    let (note, link) = note_and_link(&engine, IntegrityStrategy::SetNull, IntegrityStrategy::SetNull).await;
    let notes = engine.model(&note).unwrap();
    let n = notes.create_one(json!({"title": "u"})).await.unwrap();
    let links = engine.model(&link).unwrap();
    let l = links.create_one(json!({"likes": 1, "linkedAsset": uuid_of(&n)})).await.unwrap();
    notes.delete_one(Filter::by_uuid(uuid_of(&n))).await.unwrap();
    let after = links
        .find_one(FindQuery::new().filter(Filter::by_uuid(uuid_of(&l))))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after["linkedAsset"], Value::Null);
}

#[tokio::test]
#[ignore]
async fn multi_set_null_shrinks_the_array() {
    let engine = engine().await;
    let (note, link) = note_and_link(&engine, IntegrityStrategy::SetNull, IntegrityStrategy::SetNull).await;
    let notes = engine.model(&note).unwrap();
    let u1 = notes.create_one(json!({"title": "one"})).await.unwrap();
    let u2 = notes.create_one(json!({"title": "two"})).await.unwrap();
    let links = engine.model(&link).unwrap();
    let l = links
        .create_one(json!({"likes": 1, "tagIds": [uuid_of(&u1), uuid_of(&u2)]}))
        .await
        .unwrap();
    let by_uuid = || FindQuery::new().filter(Filter::by_uuid(uuid_of(&l)));

    notes.delete_one(Filter::by_uuid(uuid_of(&u1))).await.unwrap();
    let after = links.find_one(by_uuid()).await.unwrap().unwrap();
    assert_eq!(after["tagIds"], json!([uuid_of(&u2)]));

    notes.delete_one(Filter::by_uuid(uuid_of(&u2))).await.unwrap();
    let after = links.find_one(by_uuid()).await.unwrap().unwrap();
    assert_eq!(after["tagIds"], json!([]));
}

#[tokio::test]
#[ignore]
async fn multi_cascade_keeps_rows_with_surviving_links() {
    let engine = engine().await;
    let (note, link) = note_and_link(&engine, IntegrityStrategy::SetNull, IntegrityStrategy::Cascade).await;
    let notes = engine.model(&note).unwrap();
    let u1 = notes.create_one(json!({"title": "one"})).await.unwrap();
    let u2 = notes.create_one(json!({"title": "two"})).await.unwrap();
    let links = engine.model(&link).unwrap();
    let only_u1 = links.create_one(json!({"likes": 1, "tagIds": [uuid_of(&u1)]})).await.unwrap();
    let both = links
        .create_one(json!({"likes": 2, "tagIds": [uuid_of(&u1), uuid_of(&u2)]}))
        .await
        .unwrap();

    notes.delete_one(Filter::by_uuid(uuid_of(&u1))).await.unwrap();
    assert!(engine.get_entity_by_uuid(&uuid_of(&only_u1)).await.unwrap().is_none());
    let kept = engine.get_entity_by_uuid(&uuid_of(&both)).await.unwrap().unwrap();
    assert_eq!(kept.entity_type_id, link);
    assert_eq!(kept.entity["tagIds"], json!([uuid_of(&u2)]));
}

#[tokio::test]
#[ignore]
async fn referenced_type_cannot_be_deleted() {
    let engine = engine().await;
    let (note, _) = note_and_link(&engine, IntegrityStrategy::SetNull, IntegrityStrategy::SetNull).await;
    let err = engine.delete_entity_type(&note).await.unwrap_err();
    assert!(matches!(err, EngineError::IntegrityViolation(_)), "{:?}", err);
    let table = engine.get_entity_type(&note).unwrap().table_name();
    assert!(engine.gateway().table_exists(&table).await.unwrap());
}

#[tokio::test]
#[ignore]
async fn update_one_changes_a_single_row() {
    let engine = engine().await;
    let (_, link) = note_and_link(&engine, IntegrityStrategy::SetNull, IntegrityStrategy::SetNull).await;
    let links = engine.model(&link).unwrap();
    links.create_many(vec![json!({"likes": 4}), json!({"likes": 4})]).await.unwrap();

    let updated = links.update_one(Filter::eq("likes", 4), json!({"likes": 5})).await.unwrap();
    assert_eq!(updated["likes"], json!(5));
    let changed = links.find_many(FindQuery::new().filter(Filter::eq("likes", 5))).await.unwrap();
    assert_eq!(changed.len(), 1);
    assert_eq!(uuid_of(&changed[0]), uuid_of(&updated));
    let untouched = links.find_many(FindQuery::new().filter(Filter::eq("likes", 4))).await.unwrap();
    assert_eq!(untouched.len(), 1);

    let err = links.update_one(Filter::eq("likes", 99), json!({"likes": 5})).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)), "{:?}", err);
}

#[tokio::test]
#[ignore]
async fn failed_create_many_with_links_keeps_nothing() {
    let engine = engine().await;
    let (note, link) = note_and_link(&engine, IntegrityStrategy::SetNull, IntegrityStrategy::SetNull).await;
    let n = engine.model(&note).unwrap().create_one(json!({"title": "real"})).await.unwrap();
    let missing = uuid::Uuid::new_v4().to_string();
    let links = engine.model(&link).unwrap();

    let err = links
        .create_many(vec![
            json!({"likes": 1, "tagIds": [uuid_of(&n)]}),
            json!({"likes": 2, "tagIds": [missing]}),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::IntegrityViolation(_)), "{:?}", err);
    assert!(links.find_many(FindQuery::new()).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn delete_drops_grants_of_deleted_and_cascaded_rows() {
    let engine = engine().await;
    let (note, link) = note_and_link(&engine, IntegrityStrategy::SetNull, IntegrityStrategy::Cascade).await;
    let notes = engine.model(&note).unwrap();
    let n = notes.create_one(json!({"title": "shared"})).await.unwrap();
    let l = engine
        .model(&link)
        .unwrap()
        .create_one(json!({"likes": 1, "tagIds": [uuid_of(&n)]}))
        .await
        .unwrap();
    let grants = engine.grants();
    grants.grant(&uuid_of(&n), "alice", "read").await.unwrap();
    grants.grant(&uuid_of(&l), "alice", "write").await.unwrap();
    assert_eq!(grants.list(&uuid_of(&l)).await.unwrap().len(), 1);

    notes.delete_one(Filter::by_uuid(uuid_of(&n))).await.unwrap();
    assert!(engine.get_entity_by_uuid(&uuid_of(&l)).await.unwrap().is_none());
    assert!(grants.list(&uuid_of(&n)).await.unwrap().is_empty());
    assert!(grants.list(&uuid_of(&l)).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn restrict_and_invalidate_block_deleting_a_referenced_target() {
    for strategy in [IntegrityStrategy::Restrict, IntegrityStrategy::Invalidate] {
        let engine = engine().await;
        let (note, link) = note_and_link(&engine, strategy, IntegrityStrategy::SetNull).await;
        let notes = engine.model(&note).unwrap();
        let n = notes.create_one(json!({"title": "pinned"})).await.unwrap();
        engine
            .model(&link)
            .unwrap()
            .create_one(json!({"likes": 1, "linkedAsset": uuid_of(&n)}))
            .await
            .unwrap();

        let err = notes.delete_one(Filter::by_uuid(uuid_of(&n))).await.unwrap_err();
        assert!(matches!(err, EngineError::IntegrityViolation(_)), "{:?}: {:?}", strategy, err);
        assert!(engine.get_entity_by_uuid(&uuid_of(&n)).await.unwrap().is_some());
    }
}

#[tokio::test]
#[ignore]
async fn update_replaces_link_sets() {
    let engine = engine().await;
    let (note, link) = note_and_link(&engine, IntegrityStrategy::SetNull, IntegrityStrategy::SetNull).await;
    let notes = engine.model(&note).unwrap();
    let u1 = notes.create_one(json!({"title": "one"})).await.unwrap();
    let u2 = notes.create_one(json!({"title": "two"})).await.unwrap();
    let links = engine.model(&link).unwrap();
    let l = links.create_one(json!({"likes": 1, "tagIds": [uuid_of(&u1)]})).await.unwrap();

    let updated = links
        .update_one(Filter::by_uuid(uuid_of(&l)), json!({"tagIds": [uuid_of(&u2)]}))
        .await
        .unwrap();
    assert_eq!(updated["tagIds"], json!([uuid_of(&u2)]));
    assert_eq!(updated["likes"], json!(1));
}

#[tokio::test]
#[ignore]
async fn edits_keep_data_and_record_history() {
    let engine = engine().await;
    let id = engine
        .create_entity_type(
            &unique("Post"),
            vec![
                FieldDef::scalar("title", ScalarKind::Text),
                FieldDef::scalar("score", ScalarKind::Integer),
            ],
        )
        .await
        .unwrap();
    let posts = engine.model(&id).unwrap();
    let p = posts.create_one(json!({"title": "kept", "score": 3})).await.unwrap();

    engine
        .edit_entity_type(
            &id,
            None,
            vec![
                FieldChange::renamed_from("title", FieldDef::scalar("heading", ScalarKind::Text)),
                FieldChange::new(FieldDef::scalar("score", ScalarKind::Integer).required()),
                FieldChange::new(FieldDef::scalar("published", ScalarKind::Boolean).required()),
            ],
        )
        .await
        .unwrap();

    let posts = engine.model(&id).unwrap();
    let after = posts
        .find_one(FindQuery::new().filter(Filter::by_uuid(uuid_of(&p))))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after["heading"], json!("kept"));
    assert_eq!(after["score"], json!(3));
    assert_eq!(after["published"], json!(false));
    assert!(after.get("title").is_none());

    let history = engine.entity_type_history(&id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].version, 1);
    assert_eq!(history[0].entity_type.fields[0].name, "title");
}

#[tokio::test]
#[ignore]
async fn widening_kind_change_keeps_values() {
    let engine = engine().await;
    let id = engine
        .create_entity_type(&unique("Score"), vec![FieldDef::scalar("points", ScalarKind::Integer)])
        .await
        .unwrap();
    let s = engine.model(&id).unwrap().create_one(json!({"points": 1})).await.unwrap();

    engine
        .edit_entity_type(&id, None, vec![FieldChange::new(FieldDef::scalar("points", ScalarKind::Text))])
        .await
        .unwrap();
    let after = engine
        .model(&id)
        .unwrap()
        .find_one(FindQuery::new().filter(Filter::by_uuid(uuid_of(&s))))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after["points"], json!("1"));
}

#[tokio::test]
#[ignore]
async fn reconstruction_matches_the_definition() {
    let engine = engine().await;
    let (_, link) = note_and_link(&engine, IntegrityStrategy::Cascade, IntegrityStrategy::Restrict).await;
    let rebuilt = engine.reconstruct_entity_type(&link).await.unwrap();
    assert_eq!(rebuilt, engine.get_entity_type(&link).unwrap());
}

#[tokio::test]
#[ignore]
async fn unreferenced_types_delete_cleanly() {
    let engine = engine().await;
    let (note, link) = note_and_link(&engine, IntegrityStrategy::SetNull, IntegrityStrategy::SetNull).await;
    let table = engine.get_entity_type(&link).unwrap().table_name();
    engine.delete_entity_type(&link).await.unwrap();
    assert!(!engine.gateway().table_exists(&table).await.unwrap());
    assert!(engine.model(&link).is_err());
    engine.delete_entity_type(&note).await.unwrap();
    assert_eq!(engine.entity_type_history(&link).await.unwrap().len(), 1);
}

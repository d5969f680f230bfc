//! Integration tests for collections, pins and stars ordering, plus the
//! maintenance repair and reindex tasks.

use folio_db::test_fixtures::{
    create_collection, create_published, seed_flat_collection, test_actor, TestDataBuilder,
    TestDatabase,
};
use folio_db::{
    CollectionRepository, CreateCollectionRequest, DocumentRepository, Error, PinRepository,
    StarRepository, StarTarget, StructureIssue, MAX_PINS_PER_SCOPE,
};

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_collections_append_in_order() {
    let test_db = TestDatabase::new().await;
    let db = &test_db.db;
    let actor = test_actor();

    let first = create_collection(db, &actor, "First").await;
    let second = create_collection(db, &actor, "Second").await;
    let third = create_collection(db, &actor, "Third").await;
    assert!(first.index < second.index && second.index < third.index);

    // Move the last collection to the front with an explicit key.
    let front = db.collections.move_to(third.id, "0V").await.unwrap();
    assert_eq!(front.index, "0V");

    let listed: Vec<_> = db
        .collections
        .list(actor.team_id)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(listed, vec![third.id, first.id, second.id]);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_collection_moves_after_sibling() {
    let test_db = TestDatabase::new().await;
    let db = &test_db.db;
    let actor = test_actor();

    let first = create_collection(db, &actor, "First").await;
    let second = create_collection(db, &actor, "Second").await;
    let third = create_collection(db, &actor, "Third").await;

    let mut tx = db.pool.begin().await.unwrap();
    let moved = db
        .collections
        .move_after_tx(&mut tx, first.id, Some(second.id))
        .await
        .unwrap();
    assert!(moved.index > second.index && moved.index < third.index);
    db.collections
        .move_after_tx(&mut tx, third.id, None)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let listed: Vec<_> = db
        .collections
        .list(actor.team_id)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(listed, vec![third.id, second.id, first.id]);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_last_collection_cannot_be_deleted() {
    let test_db = TestDatabase::new().await;
    let db = &test_db.db;
    let data = seed_flat_collection(db).await;
    let only = data.collections[0];

    let refused = db.collections.delete(only).await;
    assert!(matches!(refused, Err(Error::Validation(_))));

    create_collection(db, &data.actor, "Spare").await;
    db.collections.delete(only).await.expect("second collection allows delete");

    for id in &data.documents {
        let document = db.documents.get(*id).await.unwrap().unwrap();
        assert!(document.is_deleted());
    }

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_pin_scope_is_capped() {
    let test_db = TestDatabase::new().await;
    let db = &test_db.db;
    let data = TestDataBuilder::new(db)
        .with_collection("Pinned")
        .await
        .build();
    let actor = data.actor;
    let collection_id = data.collections[0];

    let mut pinned = Vec::new();
    for n in 0..MAX_PINS_PER_SCOPE {
        let document =
            create_published(db, &actor, collection_id, None, &format!("Doc {}", n)).await;
        pinned.push(db.pins.create(&actor, document.id, None).await.unwrap());
    }
    assert!(pinned.windows(2).all(|w| w[0].index < w[1].index));

    let extra = create_published(db, &actor, collection_id, None, "One too many").await;
    let refused = db.pins.create(&actor, extra.id, None).await;
    assert!(matches!(refused, Err(Error::Validation(_))));

    // The collection scope is counted separately.
    db.pins
        .create(&actor, extra.id, Some(collection_id))
        .await
        .expect("collection scope has room");

    // Moving onto a taken key nudges above it.
    let last = pinned.last().unwrap();
    let moved = db.pins.move_to(last.id, &pinned[0].index).await.unwrap();
    assert!(moved.index > pinned[0].index && moved.index < pinned[1].index);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_stars_are_ordered_per_user() {
    let test_db = TestDatabase::new().await;
    let db = &test_db.db;
    let data = seed_flat_collection(db).await;
    let user = data.actor.user_id;

    let first = db
        .stars
        .create(user, StarTarget::Document(data.documents[0]))
        .await
        .unwrap();
    let second = db
        .stars
        .create(user, StarTarget::Collection(data.collections[0]))
        .await
        .unwrap();
    assert!(first.index < second.index);

    let duplicate = db
        .stars
        .create(user, StarTarget::Document(data.documents[0]))
        .await;
    assert!(matches!(duplicate, Err(Error::Validation(_))));

    db.stars.move_to(second.id, "1").await.unwrap();
    let listed: Vec<_> = db
        .stars
        .list(user)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(listed, vec![second.id, first.id]);

    db.stars.delete(first.id).await.unwrap();
    assert_eq!(db.stars.list(user).await.unwrap().len(), 1);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_repair_rebuilds_lost_structure() {
    let test_db = TestDatabase::new().await;
    let db = &test_db.db;
    let data = seed_flat_collection(db).await;
    let collection_id = data.collections[0];

    sqlx::query("UPDATE collection SET document_structure = '[]'::jsonb WHERE id = $1")
        .bind(collection_id)
        .execute(&test_db.pool)
        .await
        .unwrap();

    let issues = db.maintenance.verify_collection(collection_id).await.unwrap();
    assert_eq!(issues.len(), 3);
    assert!(issues
        .iter()
        .all(|i| matches!(i, StructureIssue::MissingNode { .. })));

    let recorded = db.maintenance.repair_collection(collection_id).await.unwrap();
    assert!(recorded.outcome.repaired);
    assert_eq!(recorded.outcome.node_count, 3);
    assert_eq!(recorded.envelope.unwrap().event_type, "collections.repair");

    assert!(db
        .maintenance
        .verify_collection(collection_id)
        .await
        .unwrap()
        .is_empty());
    let again = db.maintenance.repair_collection(collection_id).await.unwrap();
    assert!(!again.outcome.repaired);
    assert!(again.envelope.is_none());

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_reindex_shortens_keys_and_keeps_order() {
    let test_db = TestDatabase::new().await;
    let db = &test_db.db;
    let actor = test_actor();

    let mut ids = Vec::new();
    for (name, index) in [("a", "V"), ("b", "VVVVVVV1"), ("c", "VVVVVVV2"), ("d", "W")] {
        let collection = db
            .collections
            .create(CreateCollectionRequest {
                team_id: actor.team_id,
                name: name.to_string(),
                description: None,
                index: Some(index.to_string()),
            })
            .await
            .unwrap();
        ids.push(collection.id);
    }

    let rewritten = db.maintenance.reindex_collections(actor.team_id).await.unwrap();
    assert_eq!(rewritten, 4);

    let listed = db.collections.list(actor.team_id).await.unwrap();
    assert_eq!(listed.iter().map(|c| c.id).collect::<Vec<_>>(), ids);
    assert!(listed.iter().all(|c| c.index.len() <= 2));

    assert_eq!(
        db.maintenance.reindex_collections(actor.team_id).await.unwrap(),
        0,
        "short keys are left alone"
    );

    test_db.cleanup().await;
}

//! Integration tests for document moves: reordering, reparenting,
//! cross-collection moves and concurrent opposite moves.

use folio_db::test_fixtures::{
    create_collection, create_published, seed_flat_collection, TestDataBuilder, TestDatabase,
};
use folio_db::{
    AllowAll, CollectionRepository, DocumentCommands, DocumentRepository, Error, EventBus,
    MoveDocumentRequest, PinRepository,
};
use uuid::Uuid;

fn move_request(
    document_id: Uuid,
    collection_id: Uuid,
    parent_document_id: Option<Uuid>,
    index: Option<usize>,
) -> MoveDocumentRequest {
    MoveDocumentRequest {
        document_id,
        collection_id,
        parent_document_id,
        index,
    }
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_reorder_within_siblings_compensates_index() {
    let test_db = TestDatabase::new().await;
    let db = &test_db.db;
    let data = seed_flat_collection(db).await;
    let (a, b, c) = (data.documents[0], data.documents[1], data.documents[2]);
    let collection_id = data.collections[0];

    let recorded = db
        .mover
        .move_document(&data.actor, &move_request(a, collection_id, None, Some(2)))
        .await
        .expect("move should succeed");

    assert_eq!(recorded.outcome.documents.len(), 1);
    assert_eq!(recorded.outcome.collections.len(), 1);
    assert_eq!(
        recorded.outcome.collections[0].document_structure.document_ids(),
        vec![b, a, c]
    );

    let stored = db.collections.get(collection_id).await.unwrap().unwrap();
    assert_eq!(stored.document_structure.document_ids(), vec![b, a, c]);

    let envelope = recorded.envelope.expect("move records an event");
    assert_eq!(envelope.event_type, "documents.move");
    assert_eq!(envelope.document_ids, vec![a]);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_reparent_keeps_children() {
    let test_db = TestDatabase::new().await;
    let db = &test_db.db;
    let builder = TestDataBuilder::new(db)
        .with_collection("Handbook")
        .await
        .with_published("Parent", None)
        .await;
    let parent = builder.last_document();
    let builder = builder.with_published("Child", parent).await;
    let data = builder.with_published("Sibling", None).await.build();
    let (parent, child, sibling) = (data.documents[0], data.documents[1], data.documents[2]);
    let collection_id = data.collections[0];

    let recorded = db
        .mover
        .move_document(
            &data.actor,
            &move_request(parent, collection_id, Some(sibling), None),
        )
        .await
        .expect("reparent should succeed");

    let structure = &recorded.outcome.collections[0].document_structure;
    assert_eq!(structure.ancestors(parent), Some(vec![sibling]));
    assert_eq!(structure.ancestors(child), Some(vec![sibling, parent]));

    let moved = db.documents.get(parent).await.unwrap().unwrap();
    assert_eq!(moved.parent_document_id, Some(sibling));

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_cross_collection_move_touches_subtree_and_drops_stale_pin() {
    let test_db = TestDatabase::new().await;
    let db = &test_db.db;
    let builder = TestDataBuilder::new(db)
        .with_collection("Source")
        .await
        .with_published("Root", None)
        .await;
    let root = builder.last_document();
    let builder = builder.with_published("Child", root).await;
    let child = builder.last_document();
    let data = builder
        .with_published("Grandchild", child)
        .await
        .with_collection("Destination")
        .await
        .build();
    let (root, child) = (data.documents[0], data.documents[1]);
    let (source, destination) = (data.collections[0], data.collections[1]);

    db.pins
        .create(&data.actor, root, Some(source))
        .await
        .expect("collection pin");
    db.pins
        .create(&data.actor, child, Some(source))
        .await
        .expect("descendant collection pin");
    db.pins
        .create(&data.actor, root, None)
        .await
        .expect("home pin");

    let recorded = db
        .mover
        .move_document(&data.actor, &move_request(root, destination, None, Some(0)))
        .await
        .expect("cross-collection move should succeed");

    let outcome = &recorded.outcome;
    assert_eq!(outcome.documents.len(), 3);
    assert!(outcome
        .documents
        .iter()
        .all(|d| d.collection_id == Some(destination)));
    assert_eq!(outcome.collections.len(), 2);
    assert!(outcome.collections[0].document_structure.is_empty());
    assert_eq!(outcome.collections[1].document_structure.len(), 3);

    let source_pins = db.pins.list(data.actor.team_id, Some(source)).await.unwrap();
    assert!(
        source_pins.is_empty(),
        "pins of the subtree scoped to the old collection are gone"
    );
    let home_pins = db.pins.list(data.actor.team_id, None).await.unwrap();
    assert_eq!(home_pins.len(), 1, "home pin survives");

    let envelope = recorded.envelope.unwrap();
    assert_eq!(envelope.collection_ids, vec![source, destination]);
    assert_eq!(envelope.document_ids.len(), 3);

    let audit = db.events.list_for_document(root).await.unwrap();
    assert!(audit.iter().any(|e| e.name == "documents.move"));

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_move_beneath_descendant_is_rejected() {
    let test_db = TestDatabase::new().await;
    let db = &test_db.db;
    let builder = TestDataBuilder::new(db)
        .with_collection("Cycles")
        .await
        .with_published("Parent", None)
        .await;
    let parent = builder.last_document();
    let data = builder.with_published("Child", parent).await.build();
    let (parent, child) = (data.documents[0], data.documents[1]);
    let collection_id = data.collections[0];

    let beneath_child = db
        .mover
        .move_document(&data.actor, &move_request(parent, collection_id, Some(child), None))
        .await;
    assert!(matches!(beneath_child, Err(Error::Validation(_))));

    let beneath_self = db
        .mover
        .move_document(&data.actor, &move_request(parent, collection_id, Some(parent), None))
        .await;
    assert!(matches!(beneath_self, Err(Error::Validation(_))));

    // Nothing changed.
    let stored = db.collections.get(collection_id).await.unwrap().unwrap();
    assert_eq!(stored.document_structure.ancestors(child), Some(vec![parent]));

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_move_with_out_of_range_index_is_rejected() {
    let test_db = TestDatabase::new().await;
    let db = &test_db.db;
    let data = seed_flat_collection(db).await;
    let collection_id = data.collections[0];

    let result = db
        .mover
        .move_document(
            &data.actor,
            &move_request(data.documents[0], collection_id, None, Some(7)),
        )
        .await;
    assert!(matches!(result, Err(Error::Validation(_))));

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_concurrent_opposite_moves_both_commit() {
    let test_db = TestDatabase::new().await;
    let db = &test_db.db;
    let data = TestDataBuilder::new(db)
        .with_collection("Left")
        .await
        .build();
    let actor = data.actor;
    let left = data.collections[0];
    let right = create_collection(db, &actor, "Right").await.id;
    let a = create_published(db, &actor, left, None, "A").await.id;
    let b = create_published(db, &actor, right, None, "B").await.id;

    let commands = DocumentCommands::new(db.clone(), AllowAll, EventBus::new(32));
    let mut events = commands.bus().subscribe();

    let (first, second) = futures::join!(
        commands.move_document(&actor, move_request(a, right, None, None)),
        commands.move_document(&actor, move_request(b, left, None, None)),
    );
    first.expect("first move should commit after retry");
    second.expect("second move should commit after retry");

    let left_ids = db
        .collections
        .get(left)
        .await
        .unwrap()
        .unwrap()
        .document_structure
        .document_ids();
    let right_ids = db
        .collections
        .get(right)
        .await
        .unwrap()
        .unwrap()
        .document_structure
        .document_ids();
    assert_eq!(left_ids, vec![b]);
    assert_eq!(right_ids, vec![a]);

    let mut moved = Vec::new();
    while let Ok(envelope) = events.try_recv() {
        moved.push(envelope.payload.document_id());
    }
    assert_eq!(moved.len(), 2, "both committed moves are broadcast");

    test_db.cleanup().await;
}

//! Integration tests for the lifecycle cascades.

use std::time::Duration;

use folio_db::test_fixtures::{
    create_collection, create_draft, test_actor, TestData, TestDataBuilder, TestDatabase,
};
use folio_db::{
    Actor, AllowAll, CascadeOutcome, CollectionRepository, CreateDocumentRequest, Database,
    DocumentCommands, DocumentRepository, Error, EventBus, MoveDocumentRequest, Recorded, Result,
    TreeEvent, UpdateDocumentRequest,
};
use uuid::Uuid;

/// One collection holding Parent > Child > Grandchild plus a top-level Other.
async fn seed_nested(db: &Database) -> TestData {
    let builder = TestDataBuilder::new(db)
        .with_collection("Nested")
        .await
        .with_published("Parent", None)
        .await;
    let parent = builder.last_document();
    let builder = builder.with_published("Child", parent).await;
    let child = builder.last_document();
    builder
        .with_published("Grandchild", child)
        .await
        .with_published("Other", None)
        .await
        .build()
}

/// Run one cascade in its own committed transaction.
async fn run<F>(db: &Database, actor: &Actor, cascade: F) -> Result<Recorded<CascadeOutcome>>
where
    F: for<'t> FnOnce(
        &'t Database,
        &'t Actor,
        &'t mut sqlx::Transaction<'static, sqlx::Postgres>,
    ) -> futures::future::BoxFuture<'t, Result<Recorded<CascadeOutcome>>>,
{
    let mut tx = db.pool.begin().await.map_err(Error::Database)?;
    let recorded = cascade(db, actor, &mut tx).await?;
    tx.commit().await.map_err(Error::Database)?;
    Ok(recorded)
}

async fn structure_ids(db: &Database, collection_id: Uuid) -> Vec<Uuid> {
    db.collections
        .get(collection_id)
        .await
        .unwrap()
        .unwrap()
        .document_structure
        .document_ids()
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_publish_inserts_node_and_is_idempotent() {
    let test_db = TestDatabase::new().await;
    let db = &test_db.db;
    let data = TestDataBuilder::new(db)
        .with_collection("Drafts")
        .await
        .with_published("First", None)
        .await
        .build();
    let collection_id = data.collections[0];
    let actor = data.actor;
    let draft = create_draft(db, &actor, collection_id, None, "Second").await;

    let first = run(db, &actor, move |db, actor, tx| {
        Box::pin(db.lifecycle.publish_tx(tx, actor, draft.id, Some(0)))
    })
    .await
    .unwrap();
    assert!(first.outcome.document.is_published());
    assert_eq!(first.envelope.unwrap().event_type, "documents.publish");
    assert_eq!(
        structure_ids(db, collection_id).await,
        vec![draft.id, data.documents[0]]
    );

    let again = run(db, &actor, move |db, actor, tx| {
        Box::pin(db.lifecycle.publish_tx(tx, actor, draft.id, None))
    })
    .await
    .unwrap();
    assert!(again.envelope.is_none(), "republishing records nothing");
    assert_eq!(structure_ids(db, collection_id).await.len(), 2);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_update_refreshes_node_display_fields() {
    let test_db = TestDatabase::new().await;
    let db = &test_db.db;
    let data = seed_nested(db).await;
    let commands = DocumentCommands::new(db.clone(), AllowAll, EventBus::new(32));
    let child = data.documents[1];

    let outcome = commands
        .update(
            &data.actor,
            child,
            UpdateDocumentRequest {
                title: Some("Renamed".to_string()),
                icon: Some("book".to_string()),
                color: None,
            },
        )
        .await
        .unwrap();

    let collection = outcome.collection.expect("placed document touches its collection");
    let node = collection.document_structure.get_tree(child).unwrap();
    assert_eq!(node.title, "Renamed");
    assert_eq!(node.icon.as_deref(), Some("book"));
    assert_eq!(node.children.len(), 1, "children untouched");
    assert_eq!(node.url, outcome.document.url());

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_archive_cascades_and_keeps_nodes() {
    let test_db = TestDatabase::new().await;
    let db = &test_db.db;
    let data = seed_nested(db).await;
    let actor = data.actor;
    let (parent, child, grandchild, other) = (
        data.documents[0],
        data.documents[1],
        data.documents[2],
        data.documents[3],
    );

    let recorded = run(db, &actor, move |db, actor, tx| {
        Box::pin(db.lifecycle.archive_tx(tx, actor, parent))
    })
    .await
    .unwrap();
    let mut affected = recorded.outcome.affected_document_ids.clone();
    affected.sort();
    let mut expected = vec![parent, child, grandchild];
    expected.sort();
    assert_eq!(affected, expected);

    for id in [parent, child, grandchild] {
        assert!(db.documents.get(id).await.unwrap().unwrap().is_archived());
    }
    assert!(!db.documents.get(other).await.unwrap().unwrap().is_archived());
    assert_eq!(structure_ids(db, data.collections[0]).await.len(), 4);

    // Restore brings back the whole archived subtree.
    let restored = run(db, &actor, move |db, actor, tx| {
        Box::pin(db.lifecycle.restore_tx(tx, actor, parent))
    })
    .await
    .unwrap();
    assert_eq!(restored.outcome.affected_document_ids.len(), 3);
    for id in [parent, child, grandchild] {
        assert!(!db.documents.get(id).await.unwrap().unwrap().is_archived());
    }

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_delete_cascades_and_removes_subtree() {
    let test_db = TestDatabase::new().await;
    let db = &test_db.db;
    let data = seed_nested(db).await;
    let actor = data.actor;
    let (parent, other) = (data.documents[0], data.documents[3]);

    let recorded = run(db, &actor, move |db, actor, tx| {
        Box::pin(db.lifecycle.delete_tx(tx, actor, parent))
    })
    .await
    .unwrap();
    assert_eq!(recorded.outcome.affected_document_ids.len(), 3);
    assert!(recorded.outcome.document.is_deleted());
    for id in &data.documents[..3] {
        assert!(db.documents.get(*id).await.unwrap().unwrap().is_deleted());
    }
    assert_eq!(structure_ids(db, data.collections[0]).await, vec![other]);

    let again = run(db, &actor, move |db, actor, tx| {
        Box::pin(db.lifecycle.delete_tx(tx, actor, parent))
    })
    .await
    .unwrap();
    assert!(again.envelope.is_none(), "deleting twice is a no-op");

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_restore_without_parent_goes_to_top_level() {
    let test_db = TestDatabase::new().await;
    let db = &test_db.db;
    let data = seed_nested(db).await;
    let actor = data.actor;
    let (parent, child) = (data.documents[0], data.documents[1]);

    // Deleting the parent takes the child with it; restoring only the
    // child leaves it without a placed parent.
    run(db, &actor, move |db, actor, tx| {
        Box::pin(db.lifecycle.delete_tx(tx, actor, parent))
    })
    .await
    .unwrap();

    let recorded = run(db, &actor, move |db, actor, tx| {
        Box::pin(db.lifecycle.restore_tx(tx, actor, child))
    })
    .await
    .unwrap();
    assert_eq!(recorded.outcome.document.parent_document_id, None);
    assert!(!recorded.outcome.document.is_deleted());

    let structure = db
        .collections
        .get(data.collections[0])
        .await
        .unwrap()
        .unwrap()
        .document_structure;
    assert_eq!(structure.ancestors(child), Some(vec![]));

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_permanent_delete_requires_soft_delete() {
    let test_db = TestDatabase::new().await;
    let db = &test_db.db;
    let data = seed_nested(db).await;
    let actor = data.actor;
    let other = data.documents[3];

    let live = run(db, &actor, move |db, actor, tx| {
        Box::pin(db.lifecycle.permanent_delete_tx(tx, actor, other))
    })
    .await;
    assert!(matches!(live, Err(Error::Validation(_))));

    run(db, &actor, move |db, actor, tx| {
        Box::pin(db.lifecycle.delete_tx(tx, actor, other))
    })
    .await
    .unwrap();
    let recorded = run(db, &actor, move |db, actor, tx| {
        Box::pin(db.lifecycle.permanent_delete_tx(tx, actor, other))
    })
    .await
    .unwrap();
    assert_eq!(
        recorded.envelope.unwrap().event_type,
        "documents.permanent_delete"
    );
    assert!(db.documents.get(other).await.unwrap().is_none());

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_restore_after_parent_permanently_deleted() {
    let test_db = TestDatabase::new().await;
    let db = &test_db.db;
    let data = seed_nested(db).await;
    let actor = data.actor;
    let (parent, child, grandchild) = (data.documents[0], data.documents[1], data.documents[2]);

    run(db, &actor, move |db, actor, tx| {
        Box::pin(db.lifecycle.delete_tx(tx, actor, parent))
    })
    .await
    .unwrap();
    run(db, &actor, move |db, actor, tx| {
        Box::pin(db.lifecycle.permanent_delete_tx(tx, actor, parent))
    })
    .await
    .unwrap();

    // The foreign key cleared the child's link to the removed row.
    let orphan = db.documents.get(child).await.unwrap().unwrap();
    assert!(orphan.is_deleted());
    assert_eq!(orphan.parent_document_id, None);

    let recorded = run(db, &actor, move |db, actor, tx| {
        Box::pin(db.lifecycle.restore_tx(tx, actor, child))
    })
    .await
    .unwrap();
    assert!(!recorded.outcome.document.is_deleted());
    assert_eq!(recorded.outcome.document.parent_document_id, None);
    match recorded.envelope.unwrap().payload {
        TreeEvent::DocumentRestored {
            moved_to_root,
            document_ids,
            ..
        } => {
            assert!(!moved_to_root, "no parent link was left to fall back from");
            assert_eq!(document_ids, vec![child]);
        }
        other => panic!("unexpected event {:?}", other),
    }

    let structure = db
        .collections
        .get(data.collections[0])
        .await
        .unwrap()
        .unwrap()
        .document_structure;
    assert_eq!(structure.ancestors(child), Some(vec![]));
    assert!(structure.get_tree(child).unwrap().children.is_empty());
    assert!(!structure.contains(grandchild), "grandchild stays deleted");
    assert!(db
        .maintenance
        .verify_collection(data.collections[0])
        .await
        .unwrap()
        .is_empty());

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_publish_and_draft_move_of_same_document_serialize() {
    let test_db = TestDatabase::new().await;
    let db = &test_db.db;
    let data = TestDataBuilder::new(db)
        .with_collection("Source")
        .await
        .with_collection("Destination")
        .await
        .build();
    let actor = data.actor;
    let (source, destination) = (data.collections[0], data.collections[1]);
    let draft = create_draft(db, &actor, source, None, "Contended").await.id;

    // Hold the source collection so the publish stalls after locking the draft.
    let mut holder = db.pool.begin().await.unwrap();
    db.collections.lock_tx(&mut holder, source).await.unwrap();

    let publish = {
        let db = db.clone();
        tokio::spawn(async move {
            let mut tx = db.pool.begin().await.map_err(Error::Database)?;
            db.lifecycle.publish_tx(&mut tx, &actor, draft, None).await?;
            tx.commit().await.map_err(Error::Database)
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mover = {
        let db = db.clone();
        tokio::spawn(async move {
            let req = MoveDocumentRequest {
                document_id: draft,
                collection_id: destination,
                parent_document_id: None,
                index: None,
            };
            db.mover.move_document(&actor, &req).await.map(|_| ())
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    holder.rollback().await.unwrap();

    publish.await.unwrap().expect("publish commits first");
    mover.await.unwrap().expect("move then sees the published document");

    let row = db.documents.get(draft).await.unwrap().unwrap();
    assert!(row.is_published());
    assert_eq!(row.collection_id, Some(destination));
    assert!(!structure_ids(db, source).await.contains(&draft));
    assert_eq!(structure_ids(db, destination).await, vec![draft]);
    for id in [source, destination] {
        assert!(db.maintenance.verify_collection(id).await.unwrap().is_empty());
    }

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_create_under_parent_being_deleted_is_rejected() {
    let test_db = TestDatabase::new().await;
    let db = &test_db.db;
    let actor = test_actor();
    let collection_id = create_collection(db, &actor, "Racing").await.id;
    let parent = create_draft(db, &actor, collection_id, None, "Parent").await.id;

    // Soft-delete the parent in a transaction that is still open.
    let mut deleting = db.pool.begin().await.unwrap();
    db.lifecycle
        .delete_tx(&mut deleting, &actor, parent)
        .await
        .unwrap();

    let create = {
        let db = db.clone();
        tokio::spawn(async move {
            db.documents
                .create(
                    &actor,
                    CreateDocumentRequest {
                        collection_id: Some(collection_id),
                        parent_document_id: Some(parent),
                        title: "Child".to_string(),
                        icon: None,
                        color: None,
                        template: false,
                    },
                )
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    deleting.commit().await.unwrap();

    let created = create.await.unwrap();
    assert!(matches!(created, Err(Error::DocumentNotFound(id)) if id == parent));

    test_db.cleanup().await;
}

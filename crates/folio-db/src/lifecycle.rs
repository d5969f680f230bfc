//! Lifecycle cascades: publish, display updates, archive, restore, soft and
//! permanent delete.
//!
//! Each cascade keeps tree membership in step with document state inside one
//! transaction: a node exists exactly for published, non-template, non-deleted
//! documents. Archived documents keep their node.
//!
//! Every cascade locks the document row before its collection row and reads
//! the collection and parent from the locked row.

use chrono::Utc;
use sqlx::{Pool, Postgres, Transaction};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use folio_core::{
    Actor, CascadeOutcome, Collection, Document, Error, EventActor, Result, TreeEvent,
    UpdateDocumentRequest,
};

use crate::collections::PgCollectionRepository;
use crate::documents::PgDocumentRepository;
use crate::events::PgEventRepository;
use crate::pins::PgPinRepository;
use crate::Recorded;

/// Runs the document lifecycle cascades.
#[derive(Clone)]
pub struct DocumentLifecycle {
    pool: Pool<Postgres>,
    documents: PgDocumentRepository,
    collections: PgCollectionRepository,
    pins: PgPinRepository,
    events: PgEventRepository,
}

impl DocumentLifecycle {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            documents: PgDocumentRepository::new(pool.clone()),
            collections: PgCollectionRepository::new(pool.clone()),
            pins: PgPinRepository::new(pool.clone()),
            events: PgEventRepository::new(pool.clone()),
            pool,
        }
    }

    /// The connection pool cascades open their transactions on.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// Publish a draft and insert its node at `index` among its siblings
    /// (appended when `None`).
    #[instrument(
        skip(self, tx, actor, id),
        fields(subsystem = "tree", component = "lifecycle", op = "publish", document_id = %id)
    )]
    pub async fn publish_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        actor: &Actor,
        id: Uuid,
        index: Option<usize>,
    ) -> Result<Recorded<CascadeOutcome>> {
        let document = self.live_document_tx(tx, id).await?;
        if document.template {
            return Err(Error::Validation(
                "templates are not published into a collection structure".to_string(),
            ));
        }
        let collection_id = document.collection_id.ok_or_else(|| {
            Error::Validation(format!("document {} has no collection to publish into", id))
        })?;

        let mut collection = self.live_collection_tx(tx, collection_id).await?;
        if document.is_published() && collection.document_structure.contains(id) {
            debug!("Document already published and placed");
            return Ok(Recorded::unchanged(CascadeOutcome {
                document,
                collection: Some(collection),
                affected_document_ids: Vec::new(),
            }));
        }

        let published = self.documents.publish_tx(tx, id).await?;
        let at = collection.document_structure.insert(&published, index, None)?;
        let collection = self
            .collections
            .save_structure_tx(tx, collection.id, &collection.document_structure)
            .await?;

        let event = TreeEvent::DocumentPublished {
            document_id: id,
            collection_id,
        };
        let envelope = self
            .events
            .record_tx(tx, event, published.team_id, EventActor::from(actor))
            .await?;

        info!(collection_id = %collection_id, index = at, "Document published");
        Ok(Recorded::new(
            CascadeOutcome {
                document: published,
                collection: Some(collection),
                affected_document_ids: vec![id],
            },
            envelope,
        ))
    }

    /// Change title, icon or color, refreshing the node when the document is
    /// in its collection's tree.
    #[instrument(
        skip(self, tx, actor, id, req),
        fields(subsystem = "tree", component = "lifecycle", op = "update", document_id = %id)
    )]
    pub async fn update_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        actor: &Actor,
        id: Uuid,
        req: &UpdateDocumentRequest,
    ) -> Result<Recorded<CascadeOutcome>> {
        let document = self.live_document_tx(tx, id).await?;
        if req.title.is_none() && req.icon.is_none() && req.color.is_none() {
            return Ok(Recorded::unchanged(CascadeOutcome {
                document,
                collection: None,
                affected_document_ids: Vec::new(),
            }));
        }

        let mut collection = match document.collection_id {
            Some(collection_id) if document.belongs_in_structure() => {
                Some(self.collections.lock_tx(tx, collection_id).await?)
            }
            _ => None,
        };

        let updated = self.documents.update_display_tx(tx, id, req).await?;

        if let Some(c) = collection.as_mut() {
            if c.document_structure.update_display_fields(&updated) {
                *c = self
                    .collections
                    .save_structure_tx(tx, c.id, &c.document_structure)
                    .await?;
            } else {
                warn!(collection_id = %c.id, "Published document has no node to refresh");
            }
        }

        let event = TreeEvent::DocumentUpdated {
            document_id: id,
            collection_id: updated.collection_id,
        };
        let envelope = self
            .events
            .record_tx(tx, event, updated.team_id, EventActor::from(actor))
            .await?;

        info!("Document display fields updated");
        Ok(Recorded::new(
            CascadeOutcome {
                document: updated,
                collection,
                affected_document_ids: vec![id],
            },
            envelope,
        ))
    }

    /// Soft-delete a document with its whole relational subtree and drop its
    /// node. Deleting an already deleted document is a no-op.
    #[instrument(
        skip(self, tx, actor, id),
        fields(subsystem = "tree", component = "lifecycle", op = "delete", document_id = %id)
    )]
    pub async fn delete_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        actor: &Actor,
        id: Uuid,
    ) -> Result<Recorded<CascadeOutcome>> {
        let document = self.documents.lock_tx(tx, id).await?;
        if document.is_deleted() {
            debug!("Document already deleted");
            return Ok(Recorded::unchanged(CascadeOutcome {
                document,
                collection: None,
                affected_document_ids: Vec::new(),
            }));
        }

        let collection = match document.collection_id {
            Some(collection_id) => {
                let mut collection = self.collections.lock_tx(tx, collection_id).await?;
                match collection.document_structure.remove(id) {
                    Some(removed) => {
                        debug!(previous_index = removed.previous_index, "Node removed");
                        Some(
                            self.collections
                                .save_structure_tx(tx, collection.id, &collection.document_structure)
                                .await?,
                        )
                    }
                    None => Some(collection),
                }
            }
            None => None,
        };

        let mut ids = vec![id];
        ids.extend(self.documents.descendant_ids_tx(tx, id).await?);
        let deleted = self.documents.soft_delete_many_tx(tx, &ids, Utc::now()).await?;
        let unpinned = self.pins.delete_for_documents_tx(tx, &deleted).await?;
        if unpinned > 0 {
            debug!(unpinned, "Removed pins of deleted documents");
        }

        let event = TreeEvent::DocumentDeleted {
            document_id: id,
            collection_id: document.collection_id,
            document_ids: deleted.clone(),
        };
        let envelope = self
            .events
            .record_tx(tx, event, document.team_id, EventActor::from(actor))
            .await?;
        let document = self.documents.fetch_tx(tx, id).await?;

        info!(affected_documents = deleted.len(), "Document deleted");
        Ok(Recorded::new(
            CascadeOutcome {
                document,
                collection,
                affected_document_ids: deleted,
            },
            envelope,
        ))
    }

    /// Archive a document and every non-deleted descendant with one shared
    /// timestamp. Nodes stay in the tree.
    #[instrument(
        skip(self, tx, actor, id),
        fields(subsystem = "tree", component = "lifecycle", op = "archive", document_id = %id)
    )]
    pub async fn archive_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        actor: &Actor,
        id: Uuid,
    ) -> Result<Recorded<CascadeOutcome>> {
        let document = self.live_document_tx(tx, id).await?;
        if document.is_archived() {
            debug!("Document already archived");
            return Ok(Recorded::unchanged(CascadeOutcome {
                document,
                collection: None,
                affected_document_ids: Vec::new(),
            }));
        }

        let collection = match document.collection_id {
            Some(collection_id) => Some(self.collections.lock_tx(tx, collection_id).await?),
            None => None,
        };

        let mut ids = vec![id];
        ids.extend(self.documents.descendant_ids_tx(tx, id).await?);
        let archived = self.documents.archive_many_tx(tx, &ids, Utc::now()).await?;

        let event = TreeEvent::DocumentArchived {
            document_id: id,
            collection_id: document.collection_id,
            document_ids: archived.clone(),
        };
        let envelope = self
            .events
            .record_tx(tx, event, document.team_id, EventActor::from(actor))
            .await?;
        let document = self.documents.fetch_tx(tx, id).await?;

        info!(affected_documents = archived.len(), "Document archived");
        Ok(Recorded::new(
            CascadeOutcome {
                document,
                collection,
                affected_document_ids: archived,
            },
            envelope,
        ))
    }

    /// Restore an archived or deleted document.
    ///
    /// Descendants archived by the same cascade are unarchived with it;
    /// deleted descendants stay deleted. A published document missing from
    /// the tree goes back under its recorded parent when that parent is still
    /// placed, otherwise to the top level with its parent cleared.
    #[instrument(
        skip(self, tx, actor, id),
        fields(subsystem = "tree", component = "lifecycle", op = "restore", document_id = %id)
    )]
    pub async fn restore_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        actor: &Actor,
        id: Uuid,
    ) -> Result<Recorded<CascadeOutcome>> {
        let document = self.documents.lock_tx(tx, id).await?;
        if !document.is_archived() && !document.is_deleted() {
            debug!("Document is neither archived nor deleted");
            return Ok(Recorded::unchanged(CascadeOutcome {
                document,
                collection: None,
                affected_document_ids: Vec::new(),
            }));
        }

        let placed = document.is_published() && !document.template;
        let mut collection = match document.collection_id {
            Some(collection_id) => {
                let collection = self.collections.lock_tx(tx, collection_id).await?;
                if collection.deleted_at.is_some() {
                    return Err(Error::Validation(format!(
                        "cannot restore into deleted collection {}",
                        collection_id
                    )));
                }
                Some(collection)
            }
            None if placed => {
                return Err(Error::Validation(format!(
                    "document {} has no collection to restore into",
                    id
                )));
            }
            None => None,
        };

        let needs_node = placed
            && collection
                .as_ref()
                .is_some_and(|c| !c.document_structure.contains(id));
        let moved_to_root = needs_node
            && match (&collection, document.parent_document_id) {
                (Some(c), Some(parent_id)) => !c.document_structure.contains(parent_id),
                _ => false,
            };
        if moved_to_root {
            warn!(
                parent_document_id = ?document.parent_document_id,
                "Recorded parent is no longer placed, restoring to the top level"
            );
        }

        let restored = self.documents.restore_tx(tx, id, moved_to_root).await?;
        let mut affected = vec![id];
        if let (false, Some(archived_at)) = (document.is_deleted(), document.archived_at) {
            let descendants = self.documents.descendant_ids_tx(tx, id).await?;
            affected.extend(
                self.documents
                    .unarchive_many_tx(tx, &descendants, archived_at)
                    .await?,
            );
        }

        if let Some(c) = collection.as_mut() {
            if needs_node {
                c.document_structure.insert(&restored, None, None)?;
                *c = self
                    .collections
                    .save_structure_tx(tx, c.id, &c.document_structure)
                    .await?;
            }
        }

        let event = TreeEvent::DocumentRestored {
            document_id: id,
            collection_id: restored.collection_id,
            document_ids: affected.clone(),
            moved_to_root,
        };
        let envelope = self
            .events
            .record_tx(tx, event, restored.team_id, EventActor::from(actor))
            .await?;

        info!(
            affected_documents = affected.len(),
            reinserted = needs_node,
            moved_to_root,
            "Document restored"
        );
        Ok(Recorded::new(
            CascadeOutcome {
                document: restored,
                collection,
                affected_document_ids: affected,
            },
            envelope,
        ))
    }

    /// Delete the row of a soft-deleted document for good. Children rows keep
    /// existing with their parent cleared by the foreign key.
    #[instrument(
        skip(self, tx, actor, id),
        fields(subsystem = "tree", component = "lifecycle", op = "permanent_delete", document_id = %id)
    )]
    pub async fn permanent_delete_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        actor: &Actor,
        id: Uuid,
    ) -> Result<Recorded<CascadeOutcome>> {
        let document = self.documents.lock_tx(tx, id).await?;
        if !document.is_deleted() {
            return Err(Error::Validation(format!(
                "document {} must be deleted before it is permanently deleted",
                id
            )));
        }

        let collection = match document.collection_id {
            Some(collection_id) => {
                let mut collection = self.collections.lock_tx(tx, collection_id).await?;
                if collection.document_structure.remove(id).is_some() {
                    warn!(collection_id = %collection_id, "Deleted document still had a node");
                    collection = self
                        .collections
                        .save_structure_tx(tx, collection.id, &collection.document_structure)
                        .await?;
                }
                Some(collection)
            }
            None => None,
        };

        self.documents.hard_delete_tx(tx, id).await?;

        let event = TreeEvent::DocumentPermanentlyDeleted {
            document_id: id,
            collection_id: document.collection_id,
        };
        let envelope = self
            .events
            .record_tx(tx, event, document.team_id, EventActor::from(actor))
            .await?;

        info!("Document permanently deleted");
        Ok(Recorded::new(
            CascadeOutcome {
                document,
                collection,
                affected_document_ids: vec![id],
            },
            envelope,
        ))
    }

    async fn live_document_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Document> {
        let document = self.documents.lock_tx(tx, id).await?;
        if document.is_deleted() {
            return Err(Error::DocumentNotFound(id));
        }
        Ok(document)
    }

    async fn live_collection_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Collection> {
        let collection = self.collections.lock_tx(tx, id).await?;
        if collection.deleted_at.is_some() {
            return Err(Error::CollectionNotFound(id));
        }
        Ok(collection)
    }
}

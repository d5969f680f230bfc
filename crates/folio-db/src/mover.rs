//! Transactional document moves.
//!
//! A move removes a document's node with its whole subtree from the source
//! collection's structure and inserts it, children untouched, at the
//! requested parent and position in the destination structure. The row
//! updates, the descendants' `collection_id`, stale pins and the audit row
//! all commit together with both structures.

use std::time::Instant;

use sqlx::{Pool, Postgres, Transaction};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use folio_core::{
    relocate, Actor, Document, Error, EventActor, MoveDocumentRequest, MoveOutcome, Result,
    TreeEvent,
};

use crate::collections::PgCollectionRepository;
use crate::documents::PgDocumentRepository;
use crate::events::PgEventRepository;
use crate::pins::PgPinRepository;
use crate::Recorded;

/// Moves documents between parents and collections.
#[derive(Clone)]
pub struct DocumentMover {
    pool: Pool<Postgres>,
    documents: PgDocumentRepository,
    collections: PgCollectionRepository,
    pins: PgPinRepository,
    events: PgEventRepository,
}

impl DocumentMover {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            documents: PgDocumentRepository::new(pool.clone()),
            collections: PgCollectionRepository::new(pool.clone()),
            pins: PgPinRepository::new(pool.clone()),
            events: PgEventRepository::new(pool.clone()),
            pool,
        }
    }

    /// Run one move in its own transaction.
    pub async fn move_document(
        &self,
        actor: &Actor,
        req: &MoveDocumentRequest,
    ) -> Result<Recorded<MoveOutcome>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let recorded = self.move_tx(&mut tx, actor, req).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(recorded)
    }

    /// Move a document (and its subtree) within an existing transaction.
    ///
    /// Locks the document row, then the source collection row, then the
    /// destination's when it differs. Templates and drafts have no node and
    /// only get their row updated.
    #[instrument(
        skip(self, tx, actor, req),
        fields(
            subsystem = "tree",
            component = "mover",
            op = "move",
            document_id = %req.document_id,
            target_collection_id = %req.collection_id,
        )
    )]
    pub async fn move_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        actor: &Actor,
        req: &MoveDocumentRequest,
    ) -> Result<Recorded<MoveOutcome>> {
        let start = Instant::now();
        let document = self.documents.lock_tx(tx, req.document_id).await?;
        if document.is_deleted() {
            return Err(Error::DocumentNotFound(document.id));
        }
        if document.template || !document.is_published() {
            return self.move_unplaced_tx(tx, actor, document, req).await;
        }

        let source_id = document.collection_id.ok_or_else(|| {
            Error::Validation(format!("document {} is not in a collection", document.id))
        })?;
        let collection_changed = source_id != req.collection_id;

        let mut source = self.collections.lock_tx(tx, source_id).await?;
        let mut destination = if collection_changed {
            Some(self.collections.lock_tx(tx, req.collection_id).await?)
        } else {
            None
        };
        {
            let target = destination.as_ref().unwrap_or(&source);
            if target.deleted_at.is_some() {
                return Err(Error::CollectionNotFound(target.id));
            }
            if target.team_id != document.team_id {
                return Err(Error::Validation(
                    "documents cannot move between teams".to_string(),
                ));
            }
        }

        if let Some(parent_id) = req.parent_document_id {
            self.check_parent_tx(tx, &document, parent_id, req.collection_id)
                .await?;
        }

        let mut moved = document.clone();
        moved.collection_id = Some(req.collection_id);
        moved.parent_document_id = req.parent_document_id;

        let relocation = relocate(
            &mut source.document_structure,
            destination.as_mut().map(|c| &mut c.document_structure),
            &moved,
            req.index,
        )?;
        if relocation.compensated {
            debug!(
                previous_index = relocation.previous_index,
                requested_index = ?req.index,
                index = relocation.index,
                "Index compensated for removal from the same sibling list"
            );
        }

        let updated = self
            .documents
            .set_location_tx(tx, document.id, Some(req.collection_id), req.parent_document_id)
            .await?;

        let mut document_ids = vec![document.id];
        if collection_changed {
            let descendants = self.documents.descendant_ids_tx(tx, document.id).await?;
            self.documents
                .set_collection_many_tx(tx, &descendants, req.collection_id)
                .await?;
            document_ids.extend(descendants);

            let unpinned = self
                .pins
                .delete_for_documents_in_collection_tx(tx, &document_ids, source_id)
                .await?;
            if unpinned > 0 {
                debug!(unpinned, "Removed pins scoped to the previous collection");
            }
        }

        let mut collections = vec![
            self.collections
                .save_structure_tx(tx, source.id, &source.document_structure)
                .await?,
        ];
        if let Some(destination) = &destination {
            collections.push(
                self.collections
                    .save_structure_tx(tx, destination.id, &destination.document_structure)
                    .await?,
            );
        }

        let documents = if document_ids.len() == 1 {
            vec![updated]
        } else {
            self.documents.get_many_tx(tx, &document_ids).await?
        };

        let event = TreeEvent::DocumentMoved {
            document_id: document.id,
            collection_ids: collections.iter().map(|c| c.id).collect(),
            document_ids,
        };
        let envelope = self
            .events
            .record_tx(tx, event, document.team_id, EventActor::from(actor))
            .await?;

        info!(
            collection_id = %source_id,
            previous_index = relocation.previous_index,
            index = relocation.index,
            affected_documents = documents.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Document moved"
        );
        Ok(Recorded::new(
            MoveOutcome {
                documents,
                collections,
            },
            envelope,
        ))
    }

    /// Move a template or draft: row updates only. A template that keeps its
    /// collection is left alone, and templates never take a parent.
    async fn move_unplaced_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        actor: &Actor,
        document: Document,
        req: &MoveDocumentRequest,
    ) -> Result<Recorded<MoveOutcome>> {
        let source_id = document.collection_id;
        let collection_changed = source_id != Some(req.collection_id);
        if document.template && !collection_changed {
            debug!("Template stays in its collection, nothing to move");
            return Ok(Recorded::unchanged(MoveOutcome {
                documents: vec![document],
                collections: Vec::new(),
            }));
        }

        // Same order as placed moves: source, then destination.
        if let Some(source_id) = source_id.filter(|id| *id != req.collection_id) {
            self.collections.lock_tx(tx, source_id).await?;
        }
        let destination = self.collections.lock_tx(tx, req.collection_id).await?;
        if destination.deleted_at.is_some() {
            return Err(Error::CollectionNotFound(destination.id));
        }
        if destination.team_id != document.team_id {
            return Err(Error::Validation(
                "documents cannot move between teams".to_string(),
            ));
        }

        let parent_id = if document.template {
            None
        } else {
            req.parent_document_id
        };
        if let Some(parent_id) = parent_id {
            self.check_parent_tx(tx, &document, parent_id, req.collection_id)
                .await?;
        }

        let updated = self
            .documents
            .set_location_tx(tx, document.id, Some(req.collection_id), parent_id)
            .await?;

        let mut document_ids = vec![document.id];
        if collection_changed && !document.template {
            let descendants = self.documents.descendant_ids_tx(tx, document.id).await?;
            self.documents
                .set_collection_many_tx(tx, &descendants, req.collection_id)
                .await?;
            document_ids.extend(descendants);
        }
        let documents = if document_ids.len() == 1 {
            vec![updated]
        } else {
            self.documents.get_many_tx(tx, &document_ids).await?
        };

        let collection_ids: Vec<Uuid> = source_id
            .filter(|id| *id != destination.id)
            .into_iter()
            .chain(std::iter::once(destination.id))
            .collect();
        let event = TreeEvent::DocumentMoved {
            document_id: document.id,
            collection_ids,
            document_ids,
        };
        let envelope = self
            .events
            .record_tx(tx, event, document.team_id, EventActor::from(actor))
            .await?;

        info!(
            template = document.template,
            affected_documents = documents.len(),
            "Unplaced document moved"
        );
        Ok(Recorded::new(
            MoveOutcome {
                documents,
                collections: Vec::new(),
            },
            envelope,
        ))
    }

    /// Reject a parent that is missing, deleted, in another collection, or
    /// the document itself or one of its descendants.
    async fn check_parent_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        document: &Document,
        parent_id: Uuid,
        collection_id: Uuid,
    ) -> Result<()> {
        if parent_id == document.id {
            return Err(Error::Validation(format!(
                "cannot move document {} beneath itself",
                document.id
            )));
        }
        let parent = self
            .documents
            .lock_shared_tx(tx, parent_id)
            .await?
            .filter(|p| !p.is_deleted())
            .ok_or(Error::ParentNotFound(parent_id))?;
        if parent.collection_id != Some(collection_id) {
            return Err(Error::Validation(format!(
                "parent document {} is not in collection {}",
                parent_id, collection_id
            )));
        }
        let chain = self.documents.ancestor_chain_tx(tx, parent_id).await?;
        if chain.contains(&document.id) {
            return Err(Error::Validation(format!(
                "cannot move document {} beneath its own descendant {}",
                document.id, parent_id
            )));
        }
        Ok(())
    }
}

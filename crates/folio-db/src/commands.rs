//! Document commands: the entry points a host application calls.
//!
//! Every command asks the [`Authorizer`] first, then runs its transaction
//! under [`with_retry`], and only after commit hands the recorded audit
//! envelope to the [`EventBus`]. Broadcast is best effort; the audit row is
//! the durable record.

use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use folio_core::{
    Action, Actor, Authorizer, CascadeOutcome, Collection, CollectionRepository,
    CreateCollectionRequest, CreateDocumentRequest, Document, Error, EventBus,
    MoveDocumentRequest, MoveOutcome, Pin, PinRepository, Resource, Result, Star,
    StarRepository, StarTarget, UpdateDocumentRequest,
};

use crate::retry::{with_retry, RetryPolicy};
use crate::{Database, Recorded};

/// Authorized, retried and broadcast document operations.
pub struct DocumentCommands<A: Authorizer> {
    db: Database,
    authorizer: A,
    bus: EventBus,
    retry: RetryPolicy,
}

impl<A: Authorizer> DocumentCommands<A> {
    pub fn new(db: Database, authorizer: A, bus: EventBus) -> Self {
        Self {
            db,
            authorizer,
            bus,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Create a draft. Drafts have no node until published.
    pub async fn create_document(
        &self,
        actor: &Actor,
        req: CreateDocumentRequest,
    ) -> Result<Document> {
        let resource = match req.collection_id {
            Some(collection_id) => Resource::Collection(collection_id),
            None => Resource::Team(actor.team_id),
        };
        self.authorizer
            .authorize(actor, Action::Create, resource)
            .await?;
        let req = &req;
        with_retry(&self.retry, "create_document", move || async move {
            let mut tx = self.begin().await?;
            let document = self.db.documents.create_tx(&mut tx, actor, req).await?;
            tx.commit().await.map_err(Error::Database)?;
            Ok(document)
        })
        .await
    }

    pub async fn publish(
        &self,
        actor: &Actor,
        document_id: Uuid,
        index: Option<usize>,
    ) -> Result<CascadeOutcome> {
        self.authorizer
            .authorize(actor, Action::Publish, Resource::Document(document_id))
            .await?;
        let recorded = with_retry(&self.retry, "publish_document", move || async move {
            let mut tx = self.begin().await?;
            let recorded = self
                .db
                .lifecycle
                .publish_tx(&mut tx, actor, document_id, index)
                .await?;
            tx.commit().await.map_err(Error::Database)?;
            Ok(recorded)
        })
        .await?;
        Ok(self.broadcast(recorded))
    }

    pub async fn update(
        &self,
        actor: &Actor,
        document_id: Uuid,
        req: UpdateDocumentRequest,
    ) -> Result<CascadeOutcome> {
        self.authorizer
            .authorize(actor, Action::Update, Resource::Document(document_id))
            .await?;
        let req = &req;
        let recorded = with_retry(&self.retry, "update_document", move || async move {
            let mut tx = self.begin().await?;
            let recorded = self
                .db
                .lifecycle
                .update_tx(&mut tx, actor, document_id, req)
                .await?;
            tx.commit().await.map_err(Error::Database)?;
            Ok(recorded)
        })
        .await?;
        Ok(self.broadcast(recorded))
    }

    /// Move or reorder a document. Needs `Move` on the document and `Update`
    /// on the destination collection.
    pub async fn move_document(
        &self,
        actor: &Actor,
        req: MoveDocumentRequest,
    ) -> Result<MoveOutcome> {
        self.authorizer
            .authorize(actor, Action::Move, Resource::Document(req.document_id))
            .await?;
        self.authorizer
            .authorize(actor, Action::Update, Resource::Collection(req.collection_id))
            .await?;
        let req = &req;
        let recorded = with_retry(&self.retry, "move_document", move || async move {
            self.db.mover.move_document(actor, req).await
        })
        .await?;
        Ok(self.broadcast(recorded))
    }

    pub async fn archive(&self, actor: &Actor, document_id: Uuid) -> Result<CascadeOutcome> {
        self.authorizer
            .authorize(actor, Action::Archive, Resource::Document(document_id))
            .await?;
        let recorded = with_retry(&self.retry, "archive_document", move || async move {
            let mut tx = self.begin().await?;
            let recorded = self
                .db
                .lifecycle
                .archive_tx(&mut tx, actor, document_id)
                .await?;
            tx.commit().await.map_err(Error::Database)?;
            Ok(recorded)
        })
        .await?;
        Ok(self.broadcast(recorded))
    }

    pub async fn restore(&self, actor: &Actor, document_id: Uuid) -> Result<CascadeOutcome> {
        self.authorizer
            .authorize(actor, Action::Restore, Resource::Document(document_id))
            .await?;
        let recorded = with_retry(&self.retry, "restore_document", move || async move {
            let mut tx = self.begin().await?;
            let recorded = self
                .db
                .lifecycle
                .restore_tx(&mut tx, actor, document_id)
                .await?;
            tx.commit().await.map_err(Error::Database)?;
            Ok(recorded)
        })
        .await?;
        Ok(self.broadcast(recorded))
    }

    pub async fn delete(&self, actor: &Actor, document_id: Uuid) -> Result<CascadeOutcome> {
        self.authorizer
            .authorize(actor, Action::Delete, Resource::Document(document_id))
            .await?;
        let recorded = with_retry(&self.retry, "delete_document", move || async move {
            let mut tx = self.begin().await?;
            let recorded = self
                .db
                .lifecycle
                .delete_tx(&mut tx, actor, document_id)
                .await?;
            tx.commit().await.map_err(Error::Database)?;
            Ok(recorded)
        })
        .await?;
        Ok(self.broadcast(recorded))
    }

    pub async fn permanent_delete(
        &self,
        actor: &Actor,
        document_id: Uuid,
    ) -> Result<CascadeOutcome> {
        self.authorizer
            .authorize(actor, Action::PermanentDelete, Resource::Document(document_id))
            .await?;
        let recorded = with_retry(&self.retry, "permanent_delete_document", move || async move {
            let mut tx = self.begin().await?;
            let recorded = self
                .db
                .lifecycle
                .permanent_delete_tx(&mut tx, actor, document_id)
                .await?;
            tx.commit().await.map_err(Error::Database)?;
            Ok(recorded)
        })
        .await?;
        Ok(self.broadcast(recorded))
    }

    /// Pin to the home screen (`collection_id = None`) or a collection.
    pub async fn pin(
        &self,
        actor: &Actor,
        document_id: Uuid,
        collection_id: Option<Uuid>,
    ) -> Result<Pin> {
        self.authorizer
            .authorize(actor, Action::Pin, Resource::Document(document_id))
            .await?;
        let resource = match collection_id {
            Some(collection_id) => Resource::Collection(collection_id),
            None => Resource::Team(actor.team_id),
        };
        self.authorizer
            .authorize(actor, Action::Update, resource)
            .await?;
        self.db.pins.create(actor, document_id, collection_id).await
    }

    pub async fn star(&self, actor: &Actor, target: StarTarget) -> Result<Star> {
        let resource = match target {
            StarTarget::Document(id) => Resource::Document(id),
            StarTarget::Collection(id) => Resource::Collection(id),
        };
        self.authorizer
            .authorize(actor, Action::Star, resource)
            .await?;
        self.db.stars.create(actor.user_id, target).await
    }

    pub async fn create_collection(
        &self,
        actor: &Actor,
        req: CreateCollectionRequest,
    ) -> Result<Collection> {
        self.authorizer
            .authorize(actor, Action::Create, Resource::Team(req.team_id))
            .await?;
        self.db.collections.create(req).await
    }

    /// Soft-delete a collection and its documents.
    pub async fn delete_collection(&self, actor: &Actor, collection_id: Uuid) -> Result<()> {
        self.authorizer
            .authorize(actor, Action::Delete, Resource::Collection(collection_id))
            .await?;
        with_retry(&self.retry, "delete_collection", move || async move {
            self.db.collections.delete(collection_id).await
        })
        .await
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        self.db.pool.begin().await.map_err(Error::Database)
    }

    fn broadcast<T>(&self, recorded: Recorded<T>) -> T {
        if let Some(envelope) = recorded.envelope {
            self.bus.publish(envelope);
        }
        recorded.outcome
    }
}

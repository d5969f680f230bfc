//! Core traits for folio abstractions.
//!
//! Repository traits cover the plain CRUD surface that concrete backends
//! implement. Structural mutations (move, archive, restore, delete) are not
//! behind traits: they need a shared transaction and live in `folio-db`.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::*;

// =============================================================================
// AUTHORIZATION
// =============================================================================

/// Operation an actor wants to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Create,
    Update,
    Publish,
    Move,
    Archive,
    Restore,
    Delete,
    PermanentDelete,
    Pin,
    Star,
}

/// Object of an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Document(Uuid),
    Collection(Uuid),
    Team(Uuid),
}

/// Permission capability consumed by the document commands. Rules live
/// outside this crate; an implementation only answers yes (`Ok`) or no
/// (`Err(Error::Forbidden)`).
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, actor: &Actor, action: Action, resource: Resource) -> Result<()>;
}

/// Authorizer that permits everything. For maintenance tasks and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _actor: &Actor, _action: Action, _resource: Resource) -> Result<()> {
        Ok(())
    }
}

/// Authorizer that only permits actors of the resource team. Resources other
/// than teams are accepted; row-level rules belong to the host application.
#[derive(Debug, Clone, Copy, Default)]
pub struct SameTeam;

#[async_trait]
impl Authorizer for SameTeam {
    async fn authorize(&self, actor: &Actor, action: Action, resource: Resource) -> Result<()> {
        match resource {
            Resource::Team(team_id) if team_id != actor.team_id => Err(Error::Forbidden(format!(
                "{:?} on team {} is not allowed for user {}",
                action, team_id, actor.user_id
            ))),
            _ => Ok(()),
        }
    }
}

// =============================================================================
// REPOSITORY TRAITS
// =============================================================================

/// Repository for collection rows.
#[async_trait]
pub trait CollectionRepository: Send + Sync {
    /// Create a collection with an empty structure.
    async fn create(&self, req: CreateCollectionRequest) -> Result<Collection>;

    /// Get a collection by ID (deleted collections included).
    async fn get(&self, id: Uuid) -> Result<Option<Collection>>;

    /// List a team's live collections in index order.
    async fn list(&self, team_id: Uuid) -> Result<Vec<Collection>>;

    /// Change the fractional index of a collection.
    async fn move_to(&self, id: Uuid, index: &str) -> Result<Collection>;

    /// Soft-delete a collection and its documents. Refuses the team's last
    /// collection.
    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// Repository for document rows.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Create a draft document.
    async fn create(&self, actor: &Actor, req: CreateDocumentRequest) -> Result<Document>;

    /// Get a document by ID (archived and deleted included).
    async fn get(&self, id: Uuid) -> Result<Option<Document>>;

    /// All rows with the given collection id.
    async fn list_in_collection(&self, collection_id: Uuid) -> Result<Vec<Document>>;

    /// Ids of every descendant of `id` through `parent_document_id`.
    async fn descendant_ids(&self, id: Uuid) -> Result<Vec<Uuid>>;
}

/// Repository for pins.
#[async_trait]
pub trait PinRepository: Send + Sync {
    /// Pin a document to the home screen (`collection_id = None`) or to a
    /// collection. At most [`MAX_PINS_PER_SCOPE`] per scope.
    async fn create(
        &self,
        actor: &Actor,
        document_id: Uuid,
        collection_id: Option<Uuid>,
    ) -> Result<Pin>;

    /// Pins of one scope in index order.
    async fn list(&self, team_id: Uuid, collection_id: Option<Uuid>) -> Result<Vec<Pin>>;

    async fn move_to(&self, id: Uuid, index: &str) -> Result<Pin>;

    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// Repository for stars.
#[async_trait]
pub trait StarRepository: Send + Sync {
    /// Star a document or collection, appended after the user's last star.
    async fn create(&self, user_id: Uuid, target: StarTarget) -> Result<Star>;

    /// A user's stars in index order.
    async fn list(&self, user_id: Uuid) -> Result<Vec<Star>>;

    async fn move_to(&self, id: Uuid, index: &str) -> Result<Star>;

    async fn delete(&self, id: Uuid) -> Result<()>;
}

//! Collection repository implementation.
//!
//! Besides plain CRUD this owns the collection row lock: every structural
//! mutation calls [`PgCollectionRepository::lock_tx`] before it reads a
//! `document_structure`, and writes it back with
//! [`PgCollectionRepository::save_structure_tx`] in the same transaction.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use folio_core::fractional_index::{self, validate_key};
use folio_core::{
    new_v7, Collection, CollectionRepository, CreateCollectionRequest, DocumentStructure, Error,
    Result,
};

use crate::retry::with_key_retry;

pub(crate) const COLLECTION_COLUMNS: &str = r#"id, team_id, name, description, "index",
    document_structure, created_at, updated_at, deleted_at"#;

pub(crate) fn collection_from_row(row: &PgRow) -> Result<Collection> {
    let structure: Option<Json<DocumentStructure>> = row
        .try_get("document_structure")
        .map_err(Error::Database)?;
    Ok(Collection {
        id: row.get("id"),
        team_id: row.get("team_id"),
        name: row.get("name"),
        description: row.get("description"),
        index: row.get("index"),
        document_structure: structure.map(|Json(s)| s).unwrap_or_default(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        deleted_at: row.get("deleted_at"),
    })
}

/// PostgreSQL implementation of CollectionRepository.
#[derive(Clone)]
pub struct PgCollectionRepository {
    pool: Pool<Postgres>,
}

impl PgCollectionRepository {
    /// Create a new PgCollectionRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Fetch a collection without locking it.
    pub async fn get_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<Collection>> {
        let sql = format!("SELECT {} FROM collection WHERE id = $1", COLLECTION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(Error::Database)?;
        row.as_ref().map(collection_from_row).transpose()
    }

    /// Lock the collection row (`FOR UPDATE`) and return it with its current
    /// structure. Held until the transaction ends.
    pub async fn lock_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Collection> {
        let sql = format!(
            "SELECT {} FROM collection WHERE id = $1 FOR UPDATE",
            COLLECTION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(Error::Database)?
            .ok_or(Error::CollectionNotFound(id))?;
        debug!(
            subsystem = "db",
            component = "collections",
            op = "lock",
            collection_id = %id,
            "Locked collection row"
        );
        collection_from_row(&row)
    }

    /// Persist a structure. The caller must hold the row lock.
    pub async fn save_structure_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        structure: &DocumentStructure,
    ) -> Result<Collection> {
        let sql = format!(
            "UPDATE collection SET document_structure = $2, updated_at = now()
             WHERE id = $1 RETURNING {}",
            COLLECTION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(Json(structure))
            .fetch_optional(&mut **tx)
            .await
            .map_err(Error::Database)?
            .ok_or(Error::CollectionNotFound(id))?;
        collection_from_row(&row)
    }

    /// Create a collection within an existing transaction.
    ///
    /// Without an explicit index the collection goes after the team's last
    /// one. An explicit index that is already taken is nudged just above the
    /// existing key.
    pub async fn create_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        req: &CreateCollectionRequest,
    ) -> Result<Collection> {
        if req.name.trim().is_empty() {
            return Err(Error::InvalidInput("collection name must not be empty".to_string()));
        }
        let index = match &req.index {
            Some(index) => {
                validate_key(index)?;
                self.free_index_tx(tx, req.team_id, index, None).await?
            }
            None => {
                let last = self.last_index_tx(tx, req.team_id).await?;
                fractional_index::next(last.as_deref(), None)?
            }
        };

        let sql = format!(
            r#"INSERT INTO collection (id, team_id, name, description, "index", document_structure)
               VALUES ($1, $2, $3, $4, $5, '[]'::jsonb)
               RETURNING {}"#,
            COLLECTION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(new_v7())
            .bind(req.team_id)
            .bind(req.name.trim())
            .bind(&req.description)
            .bind(&index)
            .fetch_one(&mut **tx)
            .await
            .map_err(Error::Database)?;
        collection_from_row(&row)
    }

    /// A team's live collections in index order.
    pub async fn list_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        team_id: Uuid,
    ) -> Result<Vec<Collection>> {
        let sql = format!(
            r#"SELECT {} FROM collection
               WHERE team_id = $1 AND deleted_at IS NULL
               ORDER BY "index" COLLATE "C", updated_at DESC"#,
            COLLECTION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(team_id)
            .fetch_all(&mut **tx)
            .await
            .map_err(Error::Database)?;
        rows.iter().map(collection_from_row).collect()
    }

    /// Give a collection a caller-supplied index key.
    pub async fn move_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        index: &str,
    ) -> Result<Collection> {
        validate_key(index)?;
        let collection = self.lock_live_tx(tx, id).await?;
        let index = self
            .free_index_tx(tx, collection.team_id, index, Some(id))
            .await?;
        self.set_index_tx(tx, id, &index).await
    }

    /// Move a collection directly after `after`, or to the front when `after`
    /// is `None`.
    pub async fn move_after_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        after: Option<Uuid>,
    ) -> Result<Collection> {
        let collection = self.lock_live_tx(tx, id).await?;
        let siblings: Vec<(Uuid, String)> = self
            .list_tx(tx, collection.team_id)
            .await?
            .into_iter()
            .filter(|c| c.id != id)
            .map(|c| (c.id, c.index))
            .collect();

        let split = match after {
            None => 0,
            Some(after) => {
                siblings
                    .iter()
                    .position(|(sibling, _)| *sibling == after)
                    .ok_or(Error::CollectionNotFound(after))?
                    + 1
            }
        };
        let lower = split
            .checked_sub(1)
            .and_then(|i| siblings.get(i))
            .map(|(_, index)| index.as_str());
        let upper = siblings.get(split).map(|(_, index)| index.as_str());
        let index = fractional_index::next(lower, upper)?;
        self.set_index_tx(tx, id, &index).await
    }

    /// Soft-delete a collection and every live document in it. Returns the
    /// ids of the documents that were deleted.
    ///
    /// Refuses to delete the last live collection of a team.
    pub async fn delete_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Vec<Uuid>> {
        let collection = self.lock_live_tx(tx, id).await?;

        let live: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM collection WHERE team_id = $1 AND deleted_at IS NULL
             ORDER BY id FOR UPDATE",
        )
        .bind(collection.team_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)?;
        if live.len() <= 1 {
            return Err(Error::Validation(
                "cannot delete the last collection of a team".to_string(),
            ));
        }

        sqlx::query("UPDATE collection SET deleted_at = now(), updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;

        let deleted: Vec<Uuid> = sqlx::query_scalar(
            "UPDATE document SET deleted_at = now(), updated_at = now()
             WHERE collection_id = $1 AND deleted_at IS NULL
             RETURNING id",
        )
        .bind(id)
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)?;

        sqlx::query("DELETE FROM pin WHERE collection_id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "collections",
            op = "delete",
            collection_id = %id,
            team_id = %collection.team_id,
            affected_documents = deleted.len(),
            "Collection deleted"
        );
        Ok(deleted)
    }

    /// Teams owning at least one live collection.
    pub async fn team_ids(&self) -> Result<Vec<Uuid>> {
        sqlx::query_scalar(
            "SELECT DISTINCT team_id FROM collection WHERE deleted_at IS NULL ORDER BY team_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)
    }

    /// Ids of every live collection, optionally limited to one team.
    pub async fn live_ids(&self, team_id: Option<Uuid>) -> Result<Vec<Uuid>> {
        sqlx::query_scalar(
            r#"SELECT id FROM collection
               WHERE deleted_at IS NULL AND ($1::uuid IS NULL OR team_id = $1)
               ORDER BY team_id, "index" COLLATE "C""#,
        )
        .bind(team_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)
    }

    /// Assign `keys[i]` to collection `ids[i]`. The caller holds the row locks
    /// from [`Self::lock_team_order_tx`].
    pub(crate) async fn rewrite_indexes_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ids: &[Uuid],
        keys: &[String],
    ) -> Result<()> {
        // Park every row on a key outside the alphabet first, so reassigning
        // never trips the unique index halfway through.
        sqlx::query(r#"UPDATE collection SET "index" = '~' || id::text WHERE id = ANY($1)"#)
            .bind(ids)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
        sqlx::query(
            r#"UPDATE collection AS c SET "index" = k.key
               FROM unnest($1::uuid[], $2::text[]) AS k(id, key)
               WHERE c.id = k.id"#,
        )
        .bind(ids)
        .bind(keys)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    /// Lock and return a team's live collection ids in index order.
    pub(crate) async fn lock_team_order_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        team_id: Uuid,
    ) -> Result<Vec<(Uuid, String)>> {
        let rows = sqlx::query(
            r#"SELECT id, "index" FROM collection
               WHERE team_id = $1 AND deleted_at IS NULL
               ORDER BY "index" COLLATE "C", updated_at DESC
               FOR UPDATE"#,
        )
        .bind(team_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)?;
        Ok(rows
            .iter()
            .map(|r| (r.get("id"), r.get("index")))
            .collect())
    }

    async fn lock_live_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Collection> {
        let collection = self.lock_tx(tx, id).await?;
        if collection.deleted_at.is_some() {
            return Err(Error::CollectionNotFound(id));
        }
        Ok(collection)
    }

    async fn set_index_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        index: &str,
    ) -> Result<Collection> {
        let sql = format!(
            r#"UPDATE collection SET "index" = $2, updated_at = now()
               WHERE id = $1 RETURNING {}"#,
            COLLECTION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(index)
            .fetch_one(&mut **tx)
            .await
            .map_err(Error::Database)?;
        collection_from_row(&row)
    }

    async fn last_index_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        team_id: Uuid,
    ) -> Result<Option<String>> {
        sqlx::query_scalar(
            r#"SELECT "index" FROM collection
               WHERE team_id = $1 AND deleted_at IS NULL
               ORDER BY "index" COLLATE "C" DESC LIMIT 1"#,
        )
        .bind(team_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(Error::Database)
    }

    /// `wanted` if no other live collection of the team holds it, otherwise a
    /// key between `wanted` and the next key above it.
    async fn free_index_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        team_id: Uuid,
        wanted: &str,
        exclude: Option<Uuid>,
    ) -> Result<String> {
        let taken: bool = sqlx::query_scalar(
            r#"SELECT EXISTS (
                   SELECT 1 FROM collection
                   WHERE team_id = $1 AND deleted_at IS NULL AND "index" = $2
                     AND id IS DISTINCT FROM $3)"#,
        )
        .bind(team_id)
        .bind(wanted)
        .bind(exclude)
        .fetch_one(&mut **tx)
        .await
        .map_err(Error::Database)?;
        if !taken {
            return Ok(wanted.to_string());
        }

        let upper: Option<String> = sqlx::query_scalar(
            r#"SELECT "index" FROM collection
               WHERE team_id = $1 AND deleted_at IS NULL
                 AND "index" COLLATE "C" > $2 AND id IS DISTINCT FROM $3
               ORDER BY "index" COLLATE "C" LIMIT 1"#,
        )
        .bind(team_id)
        .bind(wanted)
        .bind(exclude)
        .fetch_optional(&mut **tx)
        .await
        .map_err(Error::Database)?;
        let nudged = fractional_index::nudge(wanted, upper.as_deref())?;
        debug!(
            subsystem = "db",
            component = "collections",
            op = "nudge_index",
            team_id = %team_id,
            wanted,
            nudged = %nudged,
            "Collection index taken, nudged"
        );
        Ok(nudged)
    }
}

#[async_trait]
impl CollectionRepository for PgCollectionRepository {
    async fn create(&self, req: CreateCollectionRequest) -> Result<Collection> {
        let req = &req;
        let collection = with_key_retry("create_collection", move || async move {
            let mut tx = self.pool.begin().await.map_err(Error::Database)?;
            let collection = self.create_tx(&mut tx, req).await?;
            tx.commit().await.map_err(Error::Database)?;
            Ok(collection)
        })
        .await?;
        info!(
            subsystem = "db",
            component = "collections",
            op = "create",
            collection_id = %collection.id,
            team_id = %collection.team_id,
            index = %collection.index,
            "Collection created"
        );
        Ok(collection)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Collection>> {
        let sql = format!("SELECT {} FROM collection WHERE id = $1", COLLECTION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        row.as_ref().map(collection_from_row).transpose()
    }

    async fn list(&self, team_id: Uuid) -> Result<Vec<Collection>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let collections = self.list_tx(&mut tx, team_id).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(collections)
    }

    async fn move_to(&self, id: Uuid, index: &str) -> Result<Collection> {
        with_key_retry("move_collection", move || async move {
            let mut tx = self.pool.begin().await.map_err(Error::Database)?;
            let collection = self.move_tx(&mut tx, id, index).await?;
            tx.commit().await.map_err(Error::Database)?;
            Ok(collection)
        })
        .await
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        self.delete_tx(&mut tx, id).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }
}

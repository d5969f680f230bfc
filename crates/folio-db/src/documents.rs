//! Document repository implementation.
//!
//! Row-level reads and writes only. Anything that also touches a collection
//! structure goes through [`crate::mover`] or [`crate::lifecycle`], which call
//! the `_tx` methods here while holding the collection lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row, Transaction};
use tracing::info;
use uuid::Uuid;

use folio_core::{
    new_url_id, new_v7, Actor, CreateDocumentRequest, Document, DocumentRepository, Error, Result,
    UpdateDocumentRequest,
};

pub(crate) const DOCUMENT_COLUMNS: &str = "id, team_id, collection_id, parent_document_id, title,
    url_id, icon, color, template, created_by, created_at, updated_at, published_at,
    archived_at, deleted_at";

pub(crate) fn document_from_row(row: &PgRow) -> Document {
    Document {
        id: row.get("id"),
        team_id: row.get("team_id"),
        collection_id: row.get("collection_id"),
        parent_document_id: row.get("parent_document_id"),
        title: row.get("title"),
        url_id: row.get("url_id"),
        icon: row.get("icon"),
        color: row.get("color"),
        template: row.get("template"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        published_at: row.get("published_at"),
        archived_at: row.get("archived_at"),
        deleted_at: row.get("deleted_at"),
    }
}

/// PostgreSQL implementation of DocumentRepository.
#[derive(Clone)]
pub struct PgDocumentRepository {
    pool: Pool<Postgres>,
}

impl PgDocumentRepository {
    /// Create a new PgDocumentRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Create a draft within an existing transaction.
    ///
    /// A parent must be a live document of the same collection.
    pub async fn create_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        actor: &Actor,
        req: &CreateDocumentRequest,
    ) -> Result<Document> {
        if let Some(parent_id) = req.parent_document_id {
            // Held until commit so the parent cannot be deleted underneath.
            let parent = self
                .lock_shared_tx(tx, parent_id)
                .await?
                .filter(|p| !p.is_deleted())
                .ok_or(Error::DocumentNotFound(parent_id))?;
            if parent.collection_id != req.collection_id {
                return Err(Error::Validation(format!(
                    "parent document {} belongs to a different collection",
                    parent_id
                )));
            }
        }

        let sql = format!(
            "INSERT INTO document
                 (id, team_id, collection_id, parent_document_id, title, url_id,
                  icon, color, template, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING {}",
            DOCUMENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(new_v7())
            .bind(actor.team_id)
            .bind(req.collection_id)
            .bind(req.parent_document_id)
            .bind(&req.title)
            .bind(new_url_id())
            .bind(&req.icon)
            .bind(&req.color)
            .bind(req.template)
            .bind(actor.user_id)
            .fetch_one(&mut **tx)
            .await
            .map_err(Error::Database)?;
        Ok(document_from_row(&row))
    }

    pub async fn get_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<Document>> {
        let sql = format!("SELECT {} FROM document WHERE id = $1", DOCUMENT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(Error::Database)?;
        Ok(row.as_ref().map(document_from_row))
    }

    /// Lock a document row `FOR UPDATE` and return its current state.
    ///
    /// Moves and cascades take this before any collection lock, so two
    /// mutations of the same document run one after the other and the second
    /// sees the first one's committed location.
    pub async fn lock_tx(&self, tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<Document> {
        let sql = format!(
            "SELECT {} FROM document WHERE id = $1 FOR UPDATE",
            DOCUMENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(Error::Database)?;
        row.as_ref()
            .map(document_from_row)
            .ok_or(Error::DocumentNotFound(id))
    }

    /// Lock a document row `FOR SHARE`: it may be read but not changed or
    /// deleted by others until the transaction ends.
    pub async fn lock_shared_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<Document>> {
        let sql = format!(
            "SELECT {} FROM document WHERE id = $1 FOR SHARE",
            DOCUMENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(Error::Database)?;
        Ok(row.as_ref().map(document_from_row))
    }

    /// Like [`Self::get_tx`] but a missing row is [`Error::DocumentNotFound`].
    pub async fn fetch_tx(&self, tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<Document> {
        self.get_tx(tx, id)
            .await?
            .ok_or(Error::DocumentNotFound(id))
    }

    /// Rows for `ids`, in the order given. Missing ids are skipped.
    pub async fn get_many_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ids: &[Uuid],
    ) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT d.* FROM document d
             JOIN unnest($1::uuid[]) WITH ORDINALITY AS k(id, pos) ON k.id = d.id
             ORDER BY k.pos",
        )
        .bind(ids)
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)?;
        Ok(rows.iter().map(document_from_row).collect())
    }

    /// Every row whose `collection_id` is `collection_id`, drafts, templates
    /// and deleted rows included.
    pub async fn list_in_collection_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        collection_id: Uuid,
    ) -> Result<Vec<Document>> {
        let sql = format!(
            "SELECT {} FROM document WHERE collection_id = $1 ORDER BY created_at, id",
            DOCUMENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(collection_id)
            .fetch_all(&mut **tx)
            .await
            .map_err(Error::Database)?;
        Ok(rows.iter().map(document_from_row).collect())
    }

    /// Ids of every descendant of `id` through `parent_document_id`, nearest
    /// first. `id` itself is never included, even on a corrupt cycle.
    pub async fn descendant_ids_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Vec<Uuid>> {
        sqlx::query_scalar(
            "WITH RECURSIVE subtree (id, depth, path) AS (
                 SELECT id, 1, ARRAY[$1::uuid, id]
                 FROM document WHERE parent_document_id = $1 AND id <> $1
                 UNION ALL
                 SELECT d.id, s.depth + 1, s.path || d.id
                 FROM document d JOIN subtree s ON d.parent_document_id = s.id
                 WHERE NOT d.id = ANY(s.path)
             )
             SELECT id FROM subtree GROUP BY id ORDER BY min(depth), id",
        )
        .bind(id)
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)
    }

    /// `id` followed by its ancestors through `parent_document_id`, nearest
    /// first. Stops after revisiting a row, so a corrupt cycle terminates.
    pub async fn ancestor_chain_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Vec<Uuid>> {
        sqlx::query_scalar(
            "WITH RECURSIVE chain (id, parent_document_id, depth, path) AS (
                 SELECT id, parent_document_id, 0, ARRAY[id]
                 FROM document WHERE id = $1
                 UNION ALL
                 SELECT d.id, d.parent_document_id, c.depth + 1, c.path || d.id
                 FROM document d JOIN chain c ON d.id = c.parent_document_id
                 WHERE NOT d.id = ANY(c.path)
             )
             SELECT id FROM chain ORDER BY depth",
        )
        .bind(id)
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)
    }

    /// Set collection and parent of one document.
    pub async fn set_location_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        collection_id: Option<Uuid>,
        parent_document_id: Option<Uuid>,
    ) -> Result<Document> {
        let sql = format!(
            "UPDATE document
             SET collection_id = $2, parent_document_id = $3, updated_at = now()
             WHERE id = $1 RETURNING {}",
            DOCUMENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(collection_id)
            .bind(parent_document_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(Error::Database)?
            .ok_or(Error::DocumentNotFound(id))?;
        Ok(document_from_row(&row))
    }

    /// Point every row in `ids` at `collection_id`. Returns rows changed.
    pub async fn set_collection_many_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ids: &[Uuid],
        collection_id: Uuid,
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE document SET collection_id = $2, updated_at = now() WHERE id = ANY($1)",
        )
        .bind(ids)
        .bind(collection_id)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    /// Set `published_at` unless it is already set.
    pub async fn publish_tx(&self, tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<Document> {
        let sql = format!(
            "UPDATE document
             SET published_at = COALESCE(published_at, now()), updated_at = now()
             WHERE id = $1 RETURNING {}",
            DOCUMENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(Error::Database)?
            .ok_or(Error::DocumentNotFound(id))?;
        Ok(document_from_row(&row))
    }

    /// Apply the set fields of `req` to title, icon and color.
    pub async fn update_display_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        req: &UpdateDocumentRequest,
    ) -> Result<Document> {
        let sql = format!(
            "UPDATE document
             SET title = COALESCE($2, title), icon = COALESCE($3, icon),
                 color = COALESCE($4, color), updated_at = now()
             WHERE id = $1 RETURNING {}",
            DOCUMENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(&req.title)
            .bind(&req.icon)
            .bind(&req.color)
            .fetch_optional(&mut **tx)
            .await
            .map_err(Error::Database)?
            .ok_or(Error::DocumentNotFound(id))?;
        Ok(document_from_row(&row))
    }

    /// Soft-delete every live row in `ids` with one shared timestamp. Returns
    /// the ids that changed.
    pub async fn soft_delete_many_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        sqlx::query_scalar(
            "UPDATE document SET deleted_at = $2, updated_at = now()
             WHERE id = ANY($1) AND deleted_at IS NULL
             RETURNING id",
        )
        .bind(ids)
        .bind(at)
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)
    }

    /// Archive every live, unarchived row in `ids` with one shared timestamp.
    /// Returns the ids that changed.
    pub async fn archive_many_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        sqlx::query_scalar(
            "UPDATE document SET archived_at = $2, updated_at = now()
             WHERE id = ANY($1) AND archived_at IS NULL AND deleted_at IS NULL
             RETURNING id",
        )
        .bind(ids)
        .bind(at)
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)
    }

    /// Clear `archived_at` on rows in `ids` archived at exactly `at`, i.e. by
    /// the same cascade.
    pub async fn unarchive_many_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        sqlx::query_scalar(
            "UPDATE document SET archived_at = NULL, updated_at = now()
             WHERE id = ANY($1) AND archived_at = $2
             RETURNING id",
        )
        .bind(ids)
        .bind(at)
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)
    }

    /// Clear `archived_at` and `deleted_at` on one row, optionally detaching
    /// it from its parent.
    pub async fn restore_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        detach_from_parent: bool,
    ) -> Result<Document> {
        let sql = format!(
            "UPDATE document
             SET archived_at = NULL, deleted_at = NULL, updated_at = now(),
                 parent_document_id = CASE WHEN $2 THEN NULL ELSE parent_document_id END
             WHERE id = $1 RETURNING {}",
            DOCUMENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(detach_from_parent)
            .fetch_optional(&mut **tx)
            .await
            .map_err(Error::Database)?
            .ok_or(Error::DocumentNotFound(id))?;
        Ok(document_from_row(&row))
    }

    /// Delete the row. Pins and stars go with it (FK cascade); children keep
    /// their rows with `parent_document_id` set to NULL.
    pub async fn hard_delete_tx(&self, tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM document WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::DocumentNotFound(id));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentRepository for PgDocumentRepository {
    async fn create(&self, actor: &Actor, req: CreateDocumentRequest) -> Result<Document> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let document = self.create_tx(&mut tx, actor, &req).await?;
        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "documents",
            op = "create",
            document_id = %document.id,
            collection_id = ?document.collection_id,
            actor_id = %actor.user_id,
            template = document.template,
            "Draft created"
        );
        Ok(document)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Document>> {
        let sql = format!("SELECT {} FROM document WHERE id = $1", DOCUMENT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.as_ref().map(document_from_row))
    }

    async fn list_in_collection(&self, collection_id: Uuid) -> Result<Vec<Document>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let documents = self.list_in_collection_tx(&mut tx, collection_id).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(documents)
    }

    async fn descendant_ids(&self, id: Uuid) -> Result<Vec<Uuid>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let ids = self.descendant_ids_tx(&mut tx, id).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(ids)
    }
}

//! Star repository implementation. Stars are ordered per user.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row, Transaction};
use tracing::info;
use uuid::Uuid;

use folio_core::fractional_index::{self, validate_key};
use folio_core::{new_v7, Error, Result, Star, StarRepository, StarTarget};

use crate::ordering::free_key;
use crate::retry::with_key_retry;

const STAR_COLUMNS: &str = r#"id, user_id, document_id, collection_id, "index", created_at"#;

fn star_from_row(row: &PgRow) -> Star {
    Star {
        id: row.get("id"),
        user_id: row.get("user_id"),
        document_id: row.get("document_id"),
        collection_id: row.get("collection_id"),
        index: row.get("index"),
        created_at: row.get("created_at"),
    }
}

/// PostgreSQL implementation of StarRepository.
#[derive(Clone)]
pub struct PgStarRepository {
    pool: Pool<Postgres>,
}

impl PgStarRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Star `target` after the user's last star.
    pub async fn create_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        target: StarTarget,
    ) -> Result<Star> {
        let (document_id, collection_id) = match target {
            StarTarget::Document(id) => (Some(id), None),
            StarTarget::Collection(id) => (None, Some(id)),
        };

        let existing = self.list_tx(tx, user_id).await?;
        if existing
            .iter()
            .any(|s| s.document_id == document_id && s.collection_id == collection_id)
        {
            return Err(Error::Validation("already starred".to_string()));
        }

        let index = fractional_index::next(existing.last().map(|s| s.index.as_str()), None)?;
        let sql = format!(
            r#"INSERT INTO star (id, user_id, document_id, collection_id, "index")
               VALUES ($1, $2, $3, $4, $5)
               RETURNING {}"#,
            STAR_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(new_v7())
            .bind(user_id)
            .bind(document_id)
            .bind(collection_id)
            .bind(&index)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_foreign_key_violation() => match target {
                    StarTarget::Document(id) => Error::DocumentNotFound(id),
                    StarTarget::Collection(id) => Error::CollectionNotFound(id),
                },
                _ => Error::Database(e),
            })?;
        Ok(star_from_row(&row))
    }

    /// A user's stars in index order.
    pub async fn list_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> Result<Vec<Star>> {
        let sql = format!(
            r#"SELECT {} FROM star WHERE user_id = $1
               ORDER BY "index" COLLATE "C", created_at"#,
            STAR_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&mut **tx)
            .await
            .map_err(Error::Database)?;
        Ok(rows.iter().map(star_from_row).collect())
    }

    pub async fn move_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        index: &str,
    ) -> Result<Star> {
        validate_key(index)?;
        let user_id: Uuid = sqlx::query_scalar("SELECT user_id FROM star WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(Error::Database)?
            .ok_or_else(|| Error::NotFound(format!("star {}", id)))?;

        let others: Vec<String> = self
            .list_tx(tx, user_id)
            .await?
            .into_iter()
            .filter(|s| s.id != id)
            .map(|s| s.index)
            .collect();
        let index = free_key(&others, index)?;

        let sql = format!(
            r#"UPDATE star SET "index" = $2 WHERE id = $1 RETURNING {}"#,
            STAR_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(&index)
            .fetch_one(&mut **tx)
            .await
            .map_err(Error::Database)?;
        Ok(star_from_row(&row))
    }

    pub async fn delete_tx(&self, tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM star WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("star {}", id)));
        }
        Ok(())
    }

    /// Users with at least one star.
    pub async fn user_ids(&self) -> Result<Vec<Uuid>> {
        sqlx::query_scalar("SELECT DISTINCT user_id FROM star ORDER BY user_id")
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)
    }

    pub(crate) async fn lock_user_order_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
    ) -> Result<Vec<(Uuid, String)>> {
        sqlx::query_as(
            r#"SELECT id, "index" FROM star WHERE user_id = $1
               ORDER BY "index" COLLATE "C", created_at
               FOR UPDATE"#,
        )
        .bind(user_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)
    }

    pub(crate) async fn rewrite_indexes_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ids: &[Uuid],
        keys: &[String],
    ) -> Result<()> {
        sqlx::query(r#"UPDATE star SET "index" = '~' || id::text WHERE id = ANY($1)"#)
            .bind(ids)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
        sqlx::query(
            r#"UPDATE star AS s SET "index" = k.key
               FROM unnest($1::uuid[], $2::text[]) AS k(id, key)
               WHERE s.id = k.id"#,
        )
        .bind(ids)
        .bind(keys)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

#[async_trait]
impl StarRepository for PgStarRepository {
    async fn create(&self, user_id: Uuid, target: StarTarget) -> Result<Star> {
        let star = with_key_retry("create_star", move || async move {
            let mut tx = self.pool.begin().await.map_err(Error::Database)?;
            let star = self.create_tx(&mut tx, user_id, target).await?;
            tx.commit().await.map_err(Error::Database)?;
            Ok(star)
        })
        .await?;
        info!(
            subsystem = "db",
            component = "stars",
            op = "create",
            user_id = %user_id,
            index = %star.index,
            "Star created"
        );
        Ok(star)
    }

    async fn list(&self, user_id: Uuid) -> Result<Vec<Star>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let stars = self.list_tx(&mut tx, user_id).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(stars)
    }

    async fn move_to(&self, id: Uuid, index: &str) -> Result<Star> {
        with_key_retry("move_star", move || async move {
            let mut tx = self.pool.begin().await.map_err(Error::Database)?;
            let star = self.move_tx(&mut tx, id, index).await?;
            tx.commit().await.map_err(Error::Database)?;
            Ok(star)
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

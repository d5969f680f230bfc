//! Pin repository implementation.
//!
//! A pin scope is a team's home screen (`collection_id IS NULL`) or one
//! collection. Pins in a scope are ordered by fractional `index`.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row, Transaction};
use tracing::info;
use uuid::Uuid;

use folio_core::fractional_index::{self, validate_key};
use folio_core::{new_v7, Actor, Error, Pin, PinRepository, Result, MAX_PINS_PER_SCOPE};

use crate::ordering::free_key;
use crate::retry::with_key_retry;

const PIN_COLUMNS: &str = r#"id, team_id, document_id, collection_id, "index", created_by, created_at"#;

fn pin_from_row(row: &PgRow) -> Pin {
    Pin {
        id: row.get("id"),
        team_id: row.get("team_id"),
        document_id: row.get("document_id"),
        collection_id: row.get("collection_id"),
        index: row.get("index"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
    }
}

/// PostgreSQL implementation of PinRepository.
#[derive(Clone)]
pub struct PgPinRepository {
    pool: Pool<Postgres>,
}

impl PgPinRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Pin `document_id` at the end of its scope.
    pub async fn create_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        actor: &Actor,
        document_id: Uuid,
        collection_id: Option<Uuid>,
    ) -> Result<Pin> {
        let document: Option<(Uuid, Option<Uuid>)> = sqlx::query_as(
            "SELECT team_id, collection_id FROM document
             WHERE id = $1 AND deleted_at IS NULL AND published_at IS NOT NULL",
        )
        .bind(document_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(Error::Database)?;
        let (team_id, document_collection) =
            document.ok_or(Error::DocumentNotFound(document_id))?;
        if team_id != actor.team_id {
            return Err(Error::DocumentNotFound(document_id));
        }
        if let Some(collection_id) = collection_id {
            if document_collection != Some(collection_id) {
                return Err(Error::Validation(format!(
                    "document {} is not in collection {}",
                    document_id, collection_id
                )));
            }
        }

        // No lock: concurrent appends compute the same key, collide on the
        // unique (scope, index) index, and with_key_retry re-reads the scope.
        let scope = self.scope_tx(tx, team_id, collection_id).await?;
        if scope.iter().any(|p| p.document_id == document_id) {
            return Err(Error::Validation(format!(
                "document {} is already pinned here",
                document_id
            )));
        }
        if scope.len() as i64 >= MAX_PINS_PER_SCOPE {
            return Err(Error::Validation(format!(
                "a scope holds at most {} pins",
                MAX_PINS_PER_SCOPE
            )));
        }

        let index = fractional_index::next(scope.last().map(|p| p.index.as_str()), None)?;
        let sql = format!(
            r#"INSERT INTO pin (id, team_id, document_id, collection_id, "index", created_by)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING {}"#,
            PIN_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(new_v7())
            .bind(team_id)
            .bind(document_id)
            .bind(collection_id)
            .bind(&index)
            .bind(actor.user_id)
            .fetch_one(&mut **tx)
            .await
            .map_err(Error::Database)?;
        Ok(pin_from_row(&row))
    }

    /// Pins of one scope in index order.
    pub async fn scope_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        team_id: Uuid,
        collection_id: Option<Uuid>,
    ) -> Result<Vec<Pin>> {
        let sql = format!(
            r#"SELECT {} FROM pin
               WHERE team_id = $1 AND collection_id IS NOT DISTINCT FROM $2
               ORDER BY "index" COLLATE "C", created_at"#,
            PIN_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(team_id)
            .bind(collection_id)
            .fetch_all(&mut **tx)
            .await
            .map_err(Error::Database)?;
        Ok(rows.iter().map(pin_from_row).collect())
    }

    /// Give a pin a new index; a key already used in the scope is nudged
    /// just above it.
    pub async fn move_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        index: &str,
    ) -> Result<Pin> {
        validate_key(index)?;
        let sql = format!("SELECT {} FROM pin WHERE id = $1 FOR UPDATE", PIN_COLUMNS);
        let pin = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(Error::Database)?
            .map(|row| pin_from_row(&row))
            .ok_or_else(|| Error::NotFound(format!("pin {}", id)))?;

        let others: Vec<String> = self
            .scope_tx(tx, pin.team_id, pin.collection_id)
            .await?
            .into_iter()
            .filter(|p| p.id != id)
            .map(|p| p.index)
            .collect();
        let index = free_key(&others, index)?;

        let sql = format!(
            r#"UPDATE pin SET "index" = $2 WHERE id = $1 RETURNING {}"#,
            PIN_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(&index)
            .fetch_one(&mut **tx)
            .await
            .map_err(Error::Database)?;
        Ok(pin_from_row(&row))
    }

    pub async fn delete_tx(&self, tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM pin WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("pin {}", id)));
        }
        Ok(())
    }

    /// Remove pins of `document_ids` scoped to `collection_id`. Used when the
    /// documents leave that collection.
    pub async fn delete_for_documents_in_collection_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        document_ids: &[Uuid],
        collection_id: Uuid,
    ) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM pin WHERE document_id = ANY($1) AND collection_id = $2",
        )
        .bind(document_ids)
        .bind(collection_id)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    /// Remove every pin of the given documents, in any scope.
    pub async fn delete_for_documents_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        document_ids: &[Uuid],
    ) -> Result<u64> {
        let result = sqlx::query("DELETE FROM pin WHERE document_id = ANY($1)")
            .bind(document_ids)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    /// Every pin scope that holds at least one pin.
    pub async fn scopes(&self, team_id: Option<Uuid>) -> Result<Vec<(Uuid, Option<Uuid>)>> {
        sqlx::query_as(
            "SELECT DISTINCT team_id, collection_id FROM pin
             WHERE $1::uuid IS NULL OR team_id = $1
             ORDER BY team_id, collection_id NULLS FIRST",
        )
        .bind(team_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)
    }

    /// Lock one scope's pins and return `(id, index)` in index order.
    pub(crate) async fn lock_scope_order_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        team_id: Uuid,
        collection_id: Option<Uuid>,
    ) -> Result<Vec<(Uuid, String)>> {
        sqlx::query_as(
            r#"SELECT id, "index" FROM pin
               WHERE team_id = $1 AND collection_id IS NOT DISTINCT FROM $2
               ORDER BY "index" COLLATE "C", created_at
               FOR UPDATE"#,
        )
        .bind(team_id)
        .bind(collection_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)
    }

    /// Assign `keys[i]` to pin `ids[i]`, parking rows first so the unique
    /// index never sees two rows with the same key.
    pub(crate) async fn rewrite_indexes_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ids: &[Uuid],
        keys: &[String],
    ) -> Result<()> {
        sqlx::query(r#"UPDATE pin SET "index" = '~' || id::text WHERE id = ANY($1)"#)
            .bind(ids)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
        sqlx::query(
            r#"UPDATE pin AS p SET "index" = k.key
               FROM unnest($1::uuid[], $2::text[]) AS k(id, key)
               WHERE p.id = k.id"#,
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
impl PinRepository for PgPinRepository {
    async fn create(
        &self,
        actor: &Actor,
        document_id: Uuid,
        collection_id: Option<Uuid>,
    ) -> Result<Pin> {
        let pin = with_key_retry("create_pin", move || async move {
            let mut tx = self.pool.begin().await.map_err(Error::Database)?;
            let pin = self
                .create_tx(&mut tx, actor, document_id, collection_id)
                .await?;
            tx.commit().await.map_err(Error::Database)?;
            Ok(pin)
        })
        .await?;
        info!(
            subsystem = "db",
            component = "pins",
            op = "create",
            document_id = %document_id,
            collection_id = ?collection_id,
            index = %pin.index,
            "Document pinned"
        );
        Ok(pin)
    }

    async fn list(&self, team_id: Uuid, collection_id: Option<Uuid>) -> Result<Vec<Pin>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let pins = self.scope_tx(&mut tx, team_id, collection_id).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(pins)
    }

    async fn move_to(&self, id: Uuid, index: &str) -> Result<Pin> {
        with_key_retry("move_pin", move || async move {
            let mut tx = self.pool.begin().await.map_err(Error::Database)?;
            let pin = self.move_tx(&mut tx, id, index).await?;
            tx.commit().await.map_err(Error::Database)?;
            Ok(pin)
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

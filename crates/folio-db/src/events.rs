//! Audit sink: the append-only `event` table.
//!
//! [`PgEventRepository::record_tx`] runs inside the mutation's transaction,
//! so an audit row exists exactly when the mutation committed. The returned
//! [`EventEnvelope`] is handed to the [`folio_core::EventBus`] by the caller
//! after commit.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

use folio_core::{Error, EventActor, EventEnvelope, Result, TreeEvent};

/// A stored audit row.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub name: String,
    pub actor_id: Option<Uuid>,
    pub team_id: Uuid,
    pub document_id: Option<Uuid>,
    pub collection_id: Option<Uuid>,
    /// `{"collection_ids": [...], "document_ids": [...], "payload": {...}}`
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Affected document ids stored in `data`.
    pub fn document_ids(&self) -> Vec<Uuid> {
        self.id_list("document_ids")
    }

    /// Affected collection ids stored in `data`.
    pub fn collection_ids(&self) -> Vec<Uuid> {
        self.id_list("collection_ids")
    }

    fn id_list(&self, key: &str) -> Vec<Uuid> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

/// PostgreSQL audit event repository.
#[derive(Clone)]
pub struct PgEventRepository {
    pool: Pool<Postgres>,
}

impl PgEventRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Append the audit row for `event` and return its envelope.
    pub async fn record_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: TreeEvent,
        team_id: Uuid,
        actor: EventActor,
    ) -> Result<EventEnvelope> {
        let envelope = EventEnvelope::new(event, team_id, actor);
        let data = serde_json::json!({
            "collection_ids": envelope.collection_ids,
            "document_ids": envelope.document_ids,
            "payload": envelope.payload,
        });

        sqlx::query(
            "INSERT INTO event (id, name, actor_id, team_id, document_id, collection_id, data, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(envelope.event_id)
        .bind(&envelope.event_type)
        .bind(envelope.actor.id)
        .bind(team_id)
        .bind(envelope.payload.document_id())
        .bind(envelope.collection_ids.first().copied())
        .bind(Json(&data))
        .bind(envelope.occurred_at)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "events",
            op = "record",
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            "Audit event recorded"
        );
        Ok(envelope)
    }

    /// Audit rows naming `document_id` as their subject, oldest first.
    pub async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(
            "SELECT id, name, actor_id, team_id, document_id, collection_id, data, created_at
             FROM event WHERE document_id = $1 ORDER BY created_at, id",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.iter().map(audit_from_row).collect())
    }

    /// Audit rows whose primary collection is `collection_id`, oldest first.
    pub async fn list_for_collection(&self, collection_id: Uuid) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(
            "SELECT id, name, actor_id, team_id, document_id, collection_id, data, created_at
             FROM event WHERE collection_id = $1 ORDER BY created_at, id",
        )
        .bind(collection_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.iter().map(audit_from_row).collect())
    }
}

fn audit_from_row(row: &sqlx::postgres::PgRow) -> AuditEvent {
    AuditEvent {
        id: row.get("id"),
        name: row.get("name"),
        actor_id: row.get("actor_id"),
        team_id: row.get("team_id"),
        document_id: row.get("document_id"),
        collection_id: row.get("collection_id"),
        data: row.get("data"),
        created_at: row.get("created_at"),
    }
}

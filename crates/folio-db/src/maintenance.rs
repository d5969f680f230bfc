//! Out-of-band maintenance: structure verification and repair from the
//! relational graph, and fractional-key reindexing.
//!
//! Nothing here runs in the request path. Every scope (one collection, one
//! pin scope, one user's stars, one team's collection order) is handled in
//! its own short transaction under the same row locks the request path
//! takes, so maintenance can run against a live database.

use std::time::Instant;

use serde::Serialize;
use sqlx::{Pool, Postgres};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use folio_core::{
    rebuild_structure, verify_structure, Error, EventActor, Result, StructureIssue, TreeEvent,
};

use crate::collections::PgCollectionRepository;
use crate::documents::PgDocumentRepository;
use crate::events::PgEventRepository;
use crate::ordering::fresh_keys;
use crate::pins::PgPinRepository;
use crate::retry::{with_retry, RetryPolicy};
use crate::stars::PgStarRepository;
use crate::Recorded;

/// Result of checking (and possibly rebuilding) one collection.
#[derive(Debug, Clone, Serialize)]
pub struct RepairReport {
    pub collection_id: Uuid,
    /// Issues found before repair.
    pub issues: Vec<StructureIssue>,
    /// Whether a rebuilt structure was written.
    pub repaired: bool,
    /// Node count of the structure as it now stands.
    pub node_count: usize,
}

/// Rows given new keys by a reindex run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReindexReport {
    pub collections: usize,
    pub pins: usize,
    pub stars: usize,
}

/// Maintenance tasks over a connection pool.
#[derive(Clone)]
pub struct Maintenance {
    pool: Pool<Postgres>,
    documents: PgDocumentRepository,
    collections: PgCollectionRepository,
    pins: PgPinRepository,
    stars: PgStarRepository,
    events: PgEventRepository,
    retry: RetryPolicy,
}

impl Maintenance {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            documents: PgDocumentRepository::new(pool.clone()),
            collections: PgCollectionRepository::new(pool.clone()),
            pins: PgPinRepository::new(pool.clone()),
            stars: PgStarRepository::new(pool.clone()),
            events: PgEventRepository::new(pool.clone()),
            retry: RetryPolicy::default(),
            pool,
        }
    }

    /// Use `policy` for the repair and reindex transactions.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Compare a collection's structure with its document rows. Read only.
    #[instrument(
        skip(self, id),
        fields(subsystem = "maintenance", component = "verify", op = "verify", collection_id = %id)
    )]
    pub async fn verify_collection(&self, id: Uuid) -> Result<Vec<StructureIssue>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let collection = self
            .collections
            .get_tx(&mut tx, id)
            .await?
            .ok_or(Error::CollectionNotFound(id))?;
        let documents = self.documents.list_in_collection_tx(&mut tx, id).await?;
        tx.commit().await.map_err(Error::Database)?;

        let issues = verify_structure(&collection.document_structure, &documents);
        if !issues.is_empty() {
            warn!(issue_count = issues.len(), "Collection structure diverges from documents");
        }
        Ok(issues)
    }

    /// Rebuild a collection's structure from its document rows when it
    /// diverges. A consistent structure is left untouched and no event is
    /// recorded.
    #[instrument(
        skip(self, id),
        fields(subsystem = "maintenance", component = "repair", op = "repair", collection_id = %id)
    )]
    pub async fn repair_collection(&self, id: Uuid) -> Result<Recorded<RepairReport>> {
        let start = Instant::now();
        let recorded = with_retry(&self.retry, "repair_collection", move || async move {
            let mut tx = self.pool.begin().await.map_err(Error::Database)?;
            let collection = self.collections.lock_tx(&mut tx, id).await?;
            if collection.deleted_at.is_some() {
                return Err(Error::CollectionNotFound(id));
            }
            let documents = self.documents.list_in_collection_tx(&mut tx, id).await?;
            let issues = verify_structure(&collection.document_structure, &documents);
            if issues.is_empty() {
                tx.commit().await.map_err(Error::Database)?;
                return Ok(Recorded::unchanged(RepairReport {
                    collection_id: id,
                    issues,
                    repaired: false,
                    node_count: collection.document_structure.len(),
                }));
            }

            let rebuilt = rebuild_structure(&documents, &collection.document_structure);
            let saved = self.collections.save_structure_tx(&mut tx, id, &rebuilt).await?;
            let event = TreeEvent::CollectionRepaired {
                collection_id: id,
                issues: issues.len(),
            };
            let envelope = self
                .events
                .record_tx(&mut tx, event, collection.team_id, EventActor::system())
                .await?;
            tx.commit().await.map_err(Error::Database)?;

            Ok(Recorded::new(
                RepairReport {
                    collection_id: id,
                    issues,
                    repaired: true,
                    node_count: saved.document_structure.len(),
                },
                envelope,
            ))
        })
        .await?;

        if recorded.outcome.repaired {
            info!(
                issue_count = recorded.outcome.issues.len(),
                node_count = recorded.outcome.node_count,
                duration_ms = start.elapsed().as_millis() as u64,
                "Collection structure rebuilt"
            );
        } else {
            debug!("Collection structure consistent");
        }
        Ok(recorded)
    }

    /// Repair every live collection, optionally limited to one team.
    pub async fn repair_all(&self, team_id: Option<Uuid>) -> Result<Vec<RepairReport>> {
        let mut reports = Vec::new();
        for id in self.collections.live_ids(team_id).await? {
            reports.push(self.repair_collection(id).await?.outcome);
        }
        Ok(reports)
    }

    /// Give a team's collections short keys in their current order. Returns
    /// the number of rows rewritten (0 when the keys were already short).
    #[instrument(
        skip(self, team_id),
        fields(subsystem = "maintenance", component = "reindex", op = "collections", team_id = %team_id)
    )]
    pub async fn reindex_collections(&self, team_id: Uuid) -> Result<usize> {
        with_retry(&self.retry, "reindex_collections", move || async move {
            let mut tx = self.pool.begin().await.map_err(Error::Database)?;
            let order = self.collections.lock_team_order_tx(&mut tx, team_id).await?;
            let Some((ids, keys)) = plan_reindex(&order)? else {
                tx.commit().await.map_err(Error::Database)?;
                return Ok(0);
            };
            self.collections.rewrite_indexes_tx(&mut tx, &ids, &keys).await?;
            tx.commit().await.map_err(Error::Database)?;
            info!(rewritten = ids.len(), "Collection keys reindexed");
            Ok(ids.len())
        })
        .await
    }

    /// Give one pin scope short keys in its current order.
    #[instrument(
        skip(self, team_id, collection_id),
        fields(subsystem = "maintenance", component = "reindex", op = "pins", team_id = %team_id)
    )]
    pub async fn reindex_pins(&self, team_id: Uuid, collection_id: Option<Uuid>) -> Result<usize> {
        with_retry(&self.retry, "reindex_pins", move || async move {
            let mut tx = self.pool.begin().await.map_err(Error::Database)?;
            let order = self
                .pins
                .lock_scope_order_tx(&mut tx, team_id, collection_id)
                .await?;
            let Some((ids, keys)) = plan_reindex(&order)? else {
                tx.commit().await.map_err(Error::Database)?;
                return Ok(0);
            };
            self.pins.rewrite_indexes_tx(&mut tx, &ids, &keys).await?;
            tx.commit().await.map_err(Error::Database)?;
            info!(collection_id = ?collection_id, rewritten = ids.len(), "Pin keys reindexed");
            Ok(ids.len())
        })
        .await
    }

    /// Give one user's stars short keys in their current order.
    #[instrument(
        skip(self, user_id),
        fields(subsystem = "maintenance", component = "reindex", op = "stars", user_id = %user_id)
    )]
    pub async fn reindex_stars(&self, user_id: Uuid) -> Result<usize> {
        with_retry(&self.retry, "reindex_stars", move || async move {
            let mut tx = self.pool.begin().await.map_err(Error::Database)?;
            let order = self.stars.lock_user_order_tx(&mut tx, user_id).await?;
            let Some((ids, keys)) = plan_reindex(&order)? else {
                tx.commit().await.map_err(Error::Database)?;
                return Ok(0);
            };
            self.stars.rewrite_indexes_tx(&mut tx, &ids, &keys).await?;
            tx.commit().await.map_err(Error::Database)?;
            info!(rewritten = ids.len(), "Star keys reindexed");
            Ok(ids.len())
        })
        .await
    }

    /// Reindex collections and pins of every team (or just `team_id`), and
    /// stars of every user when no team is given.
    pub async fn reindex_all(&self, team_id: Option<Uuid>) -> Result<ReindexReport> {
        let mut report = ReindexReport::default();
        let teams = match team_id {
            Some(team_id) => vec![team_id],
            None => self.collections.team_ids().await?,
        };
        for team in teams {
            report.collections += self.reindex_collections(team).await?;
        }
        for (team, collection) in self.pins.scopes(team_id).await? {
            report.pins += self.reindex_pins(team, collection).await?;
        }
        if team_id.is_none() {
            for user in self.stars.user_ids().await? {
                report.stars += self.reindex_stars(user).await?;
            }
        }
        info!(
            subsystem = "maintenance",
            component = "reindex",
            op = "all",
            collections = report.collections,
            pins = report.pins,
            stars = report.stars,
            "Reindex finished"
        );
        Ok(report)
    }
}

/// Ids and fresh keys for rows given as `(id, key)` in order, or `None` when
/// no current key is longer than the fresh ones would be.
fn plan_reindex(order: &[(Uuid, String)]) -> Result<Option<(Vec<Uuid>, Vec<String>)>> {
    let keys = fresh_keys(order.len())?;
    let longest = keys.iter().map(String::len).max().unwrap_or(0);
    if order.iter().all(|(_, key)| key.len() <= longest) {
        return Ok(None);
    }
    let ids = order.iter().map(|(id, _)| *id).collect();
    Ok(Some((ids, keys)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(keys: &[&str]) -> Vec<(Uuid, String)> {
        keys.iter()
            .map(|k| (Uuid::new_v4(), k.to_string()))
            .collect()
    }

    #[test]
    fn test_plan_reindex_skips_short_keys() {
        assert!(plan_reindex(&order(&["F", "V", "k"])).unwrap().is_none());
        assert!(plan_reindex(&[]).unwrap().is_none());
    }

    #[test]
    fn test_plan_reindex_rewrites_long_keys_in_order() {
        let rows = order(&["V", "VV", "VVVVVVV1"]);
        let (ids, keys) = plan_reindex(&rows).unwrap().expect("long key triggers reindex");
        assert_eq!(ids, rows.iter().map(|(id, _)| *id).collect::<Vec<_>>());
        assert_eq!(keys.len(), 3);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert!(keys.iter().all(|k| k.len() <= 2));
    }
}

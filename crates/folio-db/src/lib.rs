//! # folio-db
//!
//! PostgreSQL database layer for folio.
//!
//! This crate provides:
//! - Connection pool management with a session `lock_timeout`
//! - Repository implementations for collections, documents, pins and stars
//! - The transactional [`DocumentMover`] and [`DocumentLifecycle`] cascades
//! - The audit event sink and whole-transaction deadlock retry
//! - Out-of-band [`Maintenance`]: structure verify/repair and key reindexing
//! - [`DocumentCommands`]: authorize, run, commit, then broadcast
//!
//! ## Example
//!
//! ```rust,ignore
//! use folio_db::{AllowAll, Database, DocumentCommands, EventBus, MoveDocumentRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/folio").await?;
//!     let commands = DocumentCommands::new(db, AllowAll, EventBus::default());
//!
//!     let outcome = commands
//!         .move_document(&actor, MoveDocumentRequest {
//!             document_id,
//!             collection_id,
//!             parent_document_id: None,
//!             index: Some(0),
//!         })
//!         .await?;
//!     println!("moved {} documents", outcome.documents.len());
//!     Ok(())
//! }
//! ```

pub mod collections;
pub mod commands;
pub mod documents;
pub mod events;
pub mod lifecycle;
pub mod maintenance;
pub mod mover;
mod ordering;
pub mod pins;
pub mod pool;
pub mod retry;
pub mod stars;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use folio_core::*;

pub use collections::PgCollectionRepository;
pub use commands::DocumentCommands;
pub use documents::PgDocumentRepository;
pub use events::{AuditEvent, PgEventRepository};
pub use lifecycle::DocumentLifecycle;
pub use maintenance::{Maintenance, RepairReport};
pub use mover::DocumentMover;
pub use pins::PgPinRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use retry::{with_key_retry, with_retry, RetryPolicy};
pub use stars::PgStarRepository;

/// Outcome of a mutation plus the audit envelope recorded in its
/// transaction. `envelope` is `None` for no-op calls that wrote nothing.
#[derive(Debug, Clone)]
pub struct Recorded<T> {
    pub outcome: T,
    pub envelope: Option<EventEnvelope>,
}

impl<T> Recorded<T> {
    pub fn new(outcome: T, envelope: EventEnvelope) -> Self {
        Self {
            outcome,
            envelope: Some(envelope),
        }
    }

    /// An outcome with no audit row.
    pub fn unchanged(outcome: T) -> Self {
        Self {
            outcome,
            envelope: None,
        }
    }
}

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Collection rows, row locks and stored structures.
    pub collections: PgCollectionRepository,
    /// Document rows and relational tree queries.
    pub documents: PgDocumentRepository,
    /// Home-screen and collection pins.
    pub pins: PgPinRepository,
    /// Per-user stars.
    pub stars: PgStarRepository,
    /// Append-only audit events.
    pub events: PgEventRepository,
    /// Transactional document moves.
    pub mover: DocumentMover,
    /// Publish, update, archive, restore and delete cascades.
    pub lifecycle: DocumentLifecycle,
    /// Offline structure repair and reindexing.
    pub maintenance: Maintenance,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            collections: PgCollectionRepository::new(pool.clone()),
            documents: PgDocumentRepository::new(pool.clone()),
            pins: PgPinRepository::new(pool.clone()),
            stars: PgStarRepository::new(pool.clone()),
            events: PgEventRepository::new(pool.clone()),
            mover: DocumentMover::new(pool.clone()),
            lifecycle: DocumentLifecycle::new(pool.clone()),
            maintenance: Maintenance::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

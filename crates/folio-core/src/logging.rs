//! Structured logging schema and field name constants for folio.
//!
//! All crates use these constants for consistent structured logging fields so
//! log aggregation can query by the same names across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, retry or fallback applied |
//! | INFO  | Committed structural mutations, maintenance runs |
//! | DEBUG | Decision points (index compensation, lock order, retry delay) |
//! | TRACE | Per-node iteration during verification and rebuild |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "tree", "db", "maintenance", "admin"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "mover", "lifecycle", "pool", "retry", "reindex"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "move", "archive", "restore", "repair"
pub const OPERATION: &str = "op";

/// Actor (user) performing the mutation.
pub const ACTOR_ID: &str = "actor_id";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Document UUID being operated on.
pub const DOCUMENT_ID: &str = "document_id";

/// Collection UUID whose structure is touched.
pub const COLLECTION_ID: &str = "collection_id";

/// Destination collection of a move.
pub const TARGET_COLLECTION_ID: &str = "target_collection_id";

/// Team UUID owning the collection.
pub const TEAM_ID: &str = "team_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of documents affected by a cascade.
pub const AFFECTED_DOCUMENTS: &str = "affected_documents";

/// Number of nodes in a collection structure.
pub const NODE_COUNT: &str = "node_count";

/// Transaction attempt number (1-based) under retry.
pub const ATTEMPT: &str = "attempt";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_are_distinct_snake_case() {
        let fields = [
            SUBSYSTEM,
            COMPONENT,
            OPERATION,
            ACTOR_ID,
            DOCUMENT_ID,
            COLLECTION_ID,
            TARGET_COLLECTION_ID,
            TEAM_ID,
            DURATION_MS,
            AFFECTED_DOCUMENTS,
            NODE_COUNT,
            ATTEMPT,
            POOL_SIZE,
            POOL_IDLE,
            SUCCESS,
            ERROR_MSG,
        ];
        let unique: std::collections::HashSet<_> = fields.iter().collect();
        assert_eq!(unique.len(), fields.len());
        assert!(fields
            .iter()
            .all(|f| f.chars().all(|c| c.is_ascii_lowercase() || c == '_')));
    }
}

//! Audit events and the in-process event bus.
//!
//! Every structural mutation appends one audit row inside its own
//! transaction (see `folio_db::events`). After commit the same event is
//! wrapped in an [`EventEnvelope`] and broadcast on the [`EventBus`], where
//! notification and real-time consumers subscribe. Broadcast delivery is best
//! effort: a lagging subscriber misses events, the audit row does not.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::Actor;

// ============================================================================
// Event Envelope
// ============================================================================

/// Who caused an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventActor {
    /// Actor type: `"system"` or `"user"`.
    pub kind: String,
    /// User id for user actors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
}

impl EventActor {
    /// System actor (maintenance tasks, repair, reindex).
    pub fn system() -> Self {
        Self {
            kind: "system".to_string(),
            id: None,
        }
    }

    /// Authenticated user actor.
    pub fn user(id: Uuid) -> Self {
        Self {
            kind: "user".to_string(),
            id: Some(id),
        }
    }
}

impl From<&Actor> for EventActor {
    fn from(actor: &Actor) -> Self {
        Self::user(actor.user_id)
    }
}

/// Versioned envelope around a [`TreeEvent`].
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Id of the audit row this envelope mirrors (UUIDv7).
    pub event_id: Uuid,
    /// Audit name, e.g. `"documents.move"`.
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub team_id: Uuid,
    pub actor: EventActor,
    /// Every collection whose structure the mutation touched.
    pub collection_ids: Vec<Uuid>,
    /// Every document whose row or node the mutation touched.
    pub document_ids: Vec<Uuid>,
    /// Payload schema version.
    pub payload_version: u32,
    pub payload: TreeEvent,
}

impl EventEnvelope {
    pub fn new(event: TreeEvent, team_id: Uuid, actor: EventActor) -> Self {
        Self {
            event_id: crate::uuid_utils::new_v7(),
            event_type: event.name().to_string(),
            occurred_at: Utc::now(),
            team_id,
            actor,
            collection_ids: event.collection_ids(),
            document_ids: event.document_ids(),
            payload_version: 1,
            payload: event,
        }
    }
}

// ============================================================================
// Tree events (domain payloads)
// ============================================================================

/// A committed change to a collection structure or the documents in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TreeEvent {
    /// A draft was published into a collection.
    DocumentPublished {
        document_id: Uuid,
        collection_id: Uuid,
    },
    /// Title, icon or color changed.
    DocumentUpdated {
        document_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        collection_id: Option<Uuid>,
    },
    /// A document and its subtree moved or were reordered.
    DocumentMoved {
        document_id: Uuid,
        /// Source first, then destination when different.
        collection_ids: Vec<Uuid>,
        /// The moved document followed by every relocated descendant.
        document_ids: Vec<Uuid>,
    },
    DocumentArchived {
        document_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        collection_id: Option<Uuid>,
        document_ids: Vec<Uuid>,
    },
    DocumentRestored {
        document_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        collection_id: Option<Uuid>,
        document_ids: Vec<Uuid>,
        /// The recorded parent was gone, so the node went to the top level.
        moved_to_root: bool,
    },
    DocumentDeleted {
        document_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        collection_id: Option<Uuid>,
        document_ids: Vec<Uuid>,
    },
    DocumentPermanentlyDeleted {
        document_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        collection_id: Option<Uuid>,
    },
    /// Maintenance rebuilt a structure from the relational graph.
    CollectionRepaired { collection_id: Uuid, issues: usize },
}

impl TreeEvent {
    /// Audit name stored in the `events.name` column.
    pub fn name(&self) -> &'static str {
        match self {
            TreeEvent::DocumentPublished { .. } => "documents.publish",
            TreeEvent::DocumentUpdated { .. } => "documents.update",
            TreeEvent::DocumentMoved { .. } => "documents.move",
            TreeEvent::DocumentArchived { .. } => "documents.archive",
            TreeEvent::DocumentRestored { .. } => "documents.restore",
            TreeEvent::DocumentDeleted { .. } => "documents.delete",
            TreeEvent::DocumentPermanentlyDeleted { .. } => "documents.permanent_delete",
            TreeEvent::CollectionRepaired { .. } => "collections.repair",
        }
    }

    /// The document the event is about, if any.
    pub fn document_id(&self) -> Option<Uuid> {
        match self {
            TreeEvent::DocumentPublished { document_id, .. }
            | TreeEvent::DocumentUpdated { document_id, .. }
            | TreeEvent::DocumentMoved { document_id, .. }
            | TreeEvent::DocumentArchived { document_id, .. }
            | TreeEvent::DocumentRestored { document_id, .. }
            | TreeEvent::DocumentDeleted { document_id, .. }
            | TreeEvent::DocumentPermanentlyDeleted { document_id, .. } => Some(*document_id),
            TreeEvent::CollectionRepaired { .. } => None,
        }
    }

    /// Every collection the event affects.
    pub fn collection_ids(&self) -> Vec<Uuid> {
        match self {
            TreeEvent::DocumentMoved { collection_ids, .. } => collection_ids.clone(),
            TreeEvent::DocumentPublished { collection_id, .. }
            | TreeEvent::CollectionRepaired { collection_id, .. } => vec![*collection_id],
            TreeEvent::DocumentUpdated { collection_id, .. }
            | TreeEvent::DocumentArchived { collection_id, .. }
            | TreeEvent::DocumentRestored { collection_id, .. }
            | TreeEvent::DocumentDeleted { collection_id, .. }
            | TreeEvent::DocumentPermanentlyDeleted { collection_id, .. } => {
                collection_id.iter().copied().collect()
            }
        }
    }

    /// Every document the event affects.
    pub fn document_ids(&self) -> Vec<Uuid> {
        match self {
            TreeEvent::DocumentMoved { document_ids, .. }
            | TreeEvent::DocumentArchived { document_ids, .. }
            | TreeEvent::DocumentRestored { document_ids, .. }
            | TreeEvent::DocumentDeleted { document_ids, .. } => document_ids.clone(),
            other => other.document_id().into_iter().collect(),
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast-based bus distributing committed events to subscribers.
///
/// Uses `tokio::sync::broadcast`; receivers that fall behind get `Lagged` and
/// miss events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    ///
    /// Recommended: 256 for production, 32 for tests.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a committed event. Dropped silently when nobody listens.
    pub fn publish(&self, envelope: EventEnvelope) {
        tracing::debug!(
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            subscriber_count = self.tx.receiver_count(),
            "EventBus publish"
        );
        let _ = self.tx.send(envelope);
    }

    /// Subscribe to receive events. Each subscriber gets its own stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_event_lists_all_affected_ids() {
        let (doc, child, src, dst) = (
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
        );
        let event = TreeEvent::DocumentMoved {
            document_id: doc,
            collection_ids: vec![src, dst],
            document_ids: vec![doc, child],
        };
        assert_eq!(event.name(), "documents.move");
        assert_eq!(event.collection_ids(), vec![src, dst]);
        assert_eq!(event.document_ids(), vec![doc, child]);
        assert_eq!(event.document_id(), Some(doc));
    }

    #[test]
    fn test_single_document_events_fall_back_to_target_id() {
        let doc = Uuid::new_v4();
        let event = TreeEvent::DocumentPermanentlyDeleted {
            document_id: doc,
            collection_id: None,
        };
        assert_eq!(event.document_ids(), vec![doc]);
        assert!(event.collection_ids().is_empty());
    }

    #[test]
    fn test_event_json_is_tagged() {
        let event = TreeEvent::CollectionRepaired {
            collection_id: Uuid::nil(),
            issues: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "CollectionRepaired");
        assert_eq!(json["issues"], 2);
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();
        let user = Uuid::new_v4();
        let doc = Uuid::new_v4();
        let collection = Uuid::new_v4();

        bus.publish(EventEnvelope::new(
            TreeEvent::DocumentPublished {
                document_id: doc,
                collection_id: collection,
            },
            Uuid::nil(),
            EventActor::user(user),
        ));

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.event_type, "documents.publish");
        assert_eq!(envelope.payload_version, 1);
        assert_eq!(envelope.actor.id, Some(user));
        assert_eq!(envelope.collection_ids, vec![collection]);
        assert_eq!(envelope.document_ids, vec![doc]);
    }

    #[tokio::test]
    async fn test_event_bus_no_subscribers_ok() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(EventEnvelope::new(
            TreeEvent::CollectionRepaired {
                collection_id: Uuid::nil(),
                issues: 0,
            },
            Uuid::nil(),
            EventActor::system(),
        ));
    }
}

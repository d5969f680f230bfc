//! Core data models for folio.
//!
//! These types are shared across folio crates and represent the documents,
//! collections and ordering entities the tree engine works on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::structure::DocumentStructure;

// =============================================================================
// DOCUMENT TYPES
// =============================================================================

/// A wiki document row. `parent_document_id` is the canonical hierarchy; the
/// collection's [`DocumentStructure`] is a projection of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub team_id: Uuid,
    pub collection_id: Option<Uuid>,
    pub parent_document_id: Option<Uuid>,
    pub title: String,
    /// Stable suffix of the public URL.
    pub url_id: String,
    pub icon: Option<String>,
    pub color: Option<String>,
    /// Templates are never placed in a collection structure.
    pub template: bool,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Document {
    /// Public path of the document, e.g. `/doc/getting-started-a1b2c3d4e5`.
    pub fn url(&self) -> String {
        format!("/doc/{}-{}", slugify(&self.title), self.url_id)
    }

    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether this document must have a node in its collection's structure:
    /// published, not a template and not soft-deleted. Archived documents stay.
    pub fn belongs_in_structure(&self) -> bool {
        self.is_published() && !self.template && !self.is_deleted()
    }

    /// Project the display fields into a childless navigation node.
    pub fn to_navigation_node(&self) -> NavigationNode {
        NavigationNode {
            id: self.id,
            title: self.title.clone(),
            url: self.url(),
            icon: self.icon.clone(),
            color: self.color.clone(),
            children: Vec::new(),
        }
    }
}

/// Lowercase, dash-separated slug of a title. Empty titles become `untitled`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

/// One entry of a collection's document structure.
///
/// Everything except `children` can be rebuilt from the [`Document`]; the
/// children encode position and subtree membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationNode {
    pub id: Uuid,
    pub title: String,
    pub url: String,
    pub icon: Option<String>,
    pub color: Option<String>,
    #[serde(default)]
    pub children: Vec<NavigationNode>,
}

/// Request to create a document (always created as a draft).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateDocumentRequest {
    pub collection_id: Option<Uuid>,
    pub parent_document_id: Option<Uuid>,
    pub title: String,
    pub icon: Option<String>,
    pub color: Option<String>,
    #[serde(default)]
    pub template: bool,
}

/// Cosmetic edit of a document. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateDocumentRequest {
    pub title: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
}

/// Move (or reorder) a document and its subtree.
#[derive(Debug, Clone, Deserialize)]
pub struct MoveDocumentRequest {
    pub document_id: Uuid,
    pub collection_id: Uuid,
    pub parent_document_id: Option<Uuid>,
    /// Position among the destination siblings; `None` appends.
    pub index: Option<usize>,
}

/// Result of a move: every document and collection whose state changed.
#[derive(Debug, Clone, Serialize)]
pub struct MoveOutcome {
    pub documents: Vec<Document>,
    pub collections: Vec<Collection>,
}

/// Result of a lifecycle cascade (publish, archive, restore, delete).
#[derive(Debug, Clone, Serialize)]
pub struct CascadeOutcome {
    /// The document the command targeted, as committed.
    pub document: Document,
    /// The collection whose structure was read or changed, if any.
    pub collection: Option<Collection>,
    /// The target document plus every descendant whose row changed.
    pub affected_document_ids: Vec<Uuid>,
}

// =============================================================================
// COLLECTION TYPES
// =============================================================================

/// A collection owning an ordered tree of documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: Uuid,
    pub team_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Fractional key ordering the collection among its team's collections.
    pub index: String,
    pub document_structure: DocumentStructure,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Request to create a collection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateCollectionRequest {
    pub team_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Explicit fractional key; appended after the last collection when absent.
    pub index: Option<String>,
}

// =============================================================================
// PIN & STAR TYPES
// =============================================================================

/// Maximum pins per scope (team home screen or a single collection).
pub const MAX_PINS_PER_SCOPE: i64 = 8;

/// A document pinned to the home screen (`collection_id = None`) or to a
/// collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pin {
    pub id: Uuid,
    pub team_id: Uuid,
    pub document_id: Uuid,
    pub collection_id: Option<Uuid>,
    pub index: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A user's favourite document or collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Star {
    pub id: Uuid,
    pub user_id: Uuid,
    pub document_id: Option<Uuid>,
    pub collection_id: Option<Uuid>,
    pub index: String,
    pub created_at: DateTime<Utc>,
}

/// What a star points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StarTarget {
    Document(Uuid),
    Collection(Uuid),
}

// =============================================================================
// ACTOR
// =============================================================================

/// The authenticated user on whose behalf a command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub team_id: Uuid,
}

impl Actor {
    pub fn new(user_id: Uuid, team_id: Uuid) -> Self {
        Self { user_id, team_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(title: &str) -> Document {
        let now = Utc::now();
        Document {
            id: Uuid::new_v4(),
            team_id: Uuid::new_v4(),
            collection_id: Some(Uuid::new_v4()),
            parent_document_id: None,
            title: title.to_string(),
            url_id: "a1b2c3d4e5".to_string(),
            icon: Some("rocket".to_string()),
            color: None,
            template: false,
            created_by: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            published_at: Some(now),
            archived_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Getting Started"), "getting-started");
        assert_eq!(slugify("  API -- v2!  "), "api-v2");
        assert_eq!(slugify("Ünïcode Títle"), "ünïcode-títle");
        assert_eq!(slugify("???"), "untitled");
        assert_eq!(slugify(""), "untitled");
    }

    #[test]
    fn test_document_url() {
        let doc = document("Release Notes");
        assert_eq!(doc.url(), "/doc/release-notes-a1b2c3d4e5");
    }

    #[test]
    fn test_belongs_in_structure() {
        let mut doc = document("A");
        assert!(doc.belongs_in_structure());

        doc.archived_at = Some(Utc::now());
        assert!(doc.belongs_in_structure(), "archived documents stay in the tree");

        doc.deleted_at = Some(Utc::now());
        assert!(!doc.belongs_in_structure());

        let mut draft = document("B");
        draft.published_at = None;
        assert!(!draft.belongs_in_structure());

        let mut template = document("C");
        template.template = true;
        assert!(!template.belongs_in_structure());
    }

    #[test]
    fn test_navigation_node_json_shape() {
        let doc = document("Roadmap");
        let json = serde_json::to_value(doc.to_navigation_node()).unwrap();
        let obj = json.as_object().unwrap();
        let mut keys: Vec<_> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["children", "color", "icon", "id", "title", "url"]);
        assert!(obj["color"].is_null());
        assert_eq!(obj["children"], serde_json::json!([]));
    }

    #[test]
    fn test_navigation_node_missing_children_defaults_empty() {
        let id = Uuid::new_v4();
        let json = format!(
            r#"{{"id":"{}","title":"T","url":"/doc/t-x","icon":null,"color":null}}"#,
            id
        );
        let node: NavigationNode = serde_json::from_str(&json).unwrap();
        assert!(node.children.is_empty());
        assert_eq!(node.id, id);
    }
}

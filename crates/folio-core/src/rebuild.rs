//! Verification and offline rebuild of a collection structure from the
//! relational `parent_document_id` graph.
//!
//! Neither function is used on the request path: a structural mutation that
//! finds the tree and the rows disagreeing aborts instead of repairing. These
//! back the maintenance tooling that runs when divergence is suspected.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use uuid::Uuid;

use crate::models::{Document, NavigationNode};
use crate::structure::DocumentStructure;

/// A disagreement between a structure and the document rows of its collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructureIssue {
    /// Published, live, non-template document without a node.
    MissingNode { document_id: Uuid },
    /// Node whose document is absent, deleted, a draft, a template or in
    /// another collection.
    UnexpectedNode { document_id: Uuid },
    /// Node placed under a different parent than `parent_document_id` says.
    WrongParent {
        document_id: Uuid,
        expected: Option<Uuid>,
        actual: Option<Uuid>,
    },
    /// Same id present more than once.
    DuplicateNode { document_id: Uuid },
}

/// Compare `structure` against `documents`, the rows whose `collection_id`
/// is the structure's collection (drafts and deleted rows included).
pub fn verify_structure(
    structure: &DocumentStructure,
    documents: &[Document],
) -> Vec<StructureIssue> {
    let by_id: HashMap<Uuid, &Document> = documents.iter().map(|d| (d.id, d)).collect();
    let mut issues: Vec<StructureIssue> = structure
        .duplicate_ids()
        .into_iter()
        .map(|document_id| StructureIssue::DuplicateNode { document_id })
        .collect();

    let present: HashSet<Uuid> = structure.document_ids().into_iter().collect();
    for id in structure.document_ids() {
        let Some(document) = by_id.get(&id).filter(|d| d.belongs_in_structure()) else {
            issues.push(StructureIssue::UnexpectedNode { document_id: id });
            continue;
        };
        let actual = structure.parent_of(id).flatten();
        if actual != document.parent_document_id {
            issues.push(StructureIssue::WrongParent {
                document_id: id,
                expected: document.parent_document_id,
                actual,
            });
        }
    }

    for document in documents {
        if document.belongs_in_structure() && !present.contains(&document.id) {
            issues.push(StructureIssue::MissingNode {
                document_id: document.id,
            });
        }
    }

    tracing::trace!(
        subsystem = "tree",
        component = "rebuild",
        op = "verify",
        node_count = present.len(),
        issue_count = issues.len(),
        "Verified collection structure"
    );
    issues
}

/// Rebuild a structure from document rows.
///
/// Only documents that belong in a structure are placed. Siblings keep the
/// order they have in `hint` (normally the current, possibly damaged,
/// structure); documents unknown to the hint follow, ordered by
/// `published_at` then id. Documents whose parent is not placeable, and
/// members of a parent cycle, are placed at the top level.
pub fn rebuild_structure(documents: &[Document], hint: &DocumentStructure) -> DocumentStructure {
    let placeable: HashMap<Uuid, &Document> = documents
        .iter()
        .filter(|d| d.belongs_in_structure())
        .map(|d| (d.id, d))
        .collect();

    let hint_order: HashMap<Uuid, usize> = hint
        .document_ids()
        .into_iter()
        .enumerate()
        .map(|(pos, id)| (id, pos))
        .collect();

    let sort_key = |d: &&Document| {
        (
            hint_order.get(&d.id).copied().unwrap_or(usize::MAX),
            d.published_at,
            d.id,
        )
    };

    let mut children: HashMap<Option<Uuid>, Vec<&Document>> = HashMap::new();
    for document in placeable.values() {
        let parent = document
            .parent_document_id
            .filter(|p| placeable.contains_key(p) && *p != document.id);
        children.entry(parent).or_default().push(*document);
    }
    for siblings in children.values_mut() {
        siblings.sort_by_key(sort_key);
    }

    fn build(
        parent: Option<Uuid>,
        children: &HashMap<Option<Uuid>, Vec<&Document>>,
        visited: &mut HashSet<Uuid>,
    ) -> Vec<NavigationNode> {
        let Some(siblings) = children.get(&parent) else {
            return Vec::new();
        };
        let mut nodes = Vec::with_capacity(siblings.len());
        for document in siblings {
            if !visited.insert(document.id) {
                continue;
            }
            let mut node = document.to_navigation_node();
            node.children = build(Some(document.id), children, visited);
            nodes.push(node);
        }
        nodes
    }

    let mut visited = HashSet::new();
    let mut roots = build(None, &children, &mut visited);

    // Anything not reached from the roots sits on a parent cycle.
    let mut stranded: Vec<&Document> = placeable
        .values()
        .filter(|d| !visited.contains(&d.id))
        .copied()
        .collect();
    stranded.sort_by_key(sort_key);
    for document in stranded {
        if !visited.insert(document.id) {
            continue;
        }
        let mut node = document.to_navigation_node();
        node.children = build(Some(document.id), &children, &mut visited);
        roots.push(node);
    }

    DocumentStructure::new(roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn doc(title: &str, parent: Option<Uuid>, minutes: i64) -> Document {
        let now = Utc::now();
        Document {
            id: Uuid::new_v4(),
            team_id: Uuid::nil(),
            collection_id: Some(Uuid::nil()),
            parent_document_id: parent,
            title: title.to_string(),
            url_id: "0123456789".to_string(),
            icon: None,
            color: None,
            template: false,
            created_by: Uuid::nil(),
            created_at: now,
            updated_at: now,
            published_at: Some(now + Duration::minutes(minutes)),
            archived_at: None,
            deleted_at: None,
        }
    }

    fn titles(s: &DocumentStructure) -> Vec<String> {
        s.document_ids()
            .into_iter()
            .map(|id| s.get_tree(id).unwrap().title.clone())
            .collect()
    }

    #[test]
    fn test_consistent_structure_has_no_issues() {
        let a = doc("A", None, 0);
        let b = doc("B", Some(a.id), 1);
        let mut s = DocumentStructure::default();
        s.insert(&a, None, None).unwrap();
        s.insert(&b, None, None).unwrap();
        assert!(verify_structure(&s, &[a, b]).is_empty());
    }

    #[test]
    fn test_verify_reports_each_issue_kind() {
        let a = doc("A", None, 0);
        let b = doc("B", None, 1);
        let mut draft = doc("Draft", None, 2);
        draft.published_at = None;
        let missing = doc("Missing", None, 3);

        let mut s = DocumentStructure::default();
        s.insert(&a, None, None).unwrap();
        // B placed under A although its row says top level.
        let mut b_under_a = b.clone();
        b_under_a.parent_document_id = Some(a.id);
        s.insert(&b_under_a, None, None).unwrap();
        s.insert(&draft, None, None).unwrap();

        let issues = verify_structure(&s, &[a.clone(), b.clone(), draft.clone(), missing.clone()]);
        assert!(issues.contains(&StructureIssue::WrongParent {
            document_id: b.id,
            expected: None,
            actual: Some(a.id),
        }));
        assert!(issues.contains(&StructureIssue::UnexpectedNode {
            document_id: draft.id
        }));
        assert!(issues.contains(&StructureIssue::MissingNode {
            document_id: missing.id
        }));
        assert_eq!(issues.len(), 3);
    }

    #[test]
    fn test_verify_flags_duplicates() {
        let a = doc("A", None, 0);
        let dup = DocumentStructure::new(vec![a.to_navigation_node(), a.to_navigation_node()]);
        let issues = verify_structure(&dup, std::slice::from_ref(&a));
        assert!(issues.contains(&StructureIssue::DuplicateNode { document_id: a.id }));
    }

    #[test]
    fn test_rebuild_follows_hint_order() {
        let a = doc("A", None, 0);
        let b = doc("B", None, 1);
        let c = doc("C", None, 2);
        let b1 = doc("B1", Some(b.id), 3);
        let mut hint = DocumentStructure::default();
        for d in [&c, &a, &b] {
            hint.insert(d, None, None).unwrap();
        }
        // B1 missing from the hint, so it is appended by published_at.
        let rebuilt = rebuild_structure(&[a, b, c, b1], &hint);
        assert_eq!(titles(&rebuilt), vec!["C", "A", "B", "B1"]);
    }

    #[test]
    fn test_rebuild_skips_unplaceable_and_lifts_orphans() {
        let a = doc("A", None, 0);
        let mut deleted = doc("Deleted", None, 1);
        deleted.deleted_at = Some(Utc::now());
        let orphan = doc("Orphan", Some(deleted.id), 2);
        let mut template = doc("Template", None, 3);
        template.template = true;
        let mut archived = doc("Archived", Some(a.id), 4);
        archived.archived_at = Some(Utc::now());

        let rebuilt = rebuild_structure(
            &[a.clone(), deleted, orphan.clone(), template, archived.clone()],
            &DocumentStructure::default(),
        );
        assert_eq!(titles(&rebuilt), vec!["A", "Archived", "Orphan"]);
        assert_eq!(rebuilt.parent_of(orphan.id), Some(None));
        assert_eq!(rebuilt.parent_of(archived.id), Some(Some(a.id)));
    }

    #[test]
    fn test_rebuild_breaks_parent_cycles() {
        let mut x = doc("X", None, 0);
        let mut y = doc("Y", None, 1);
        x.parent_document_id = Some(y.id);
        y.parent_document_id = Some(x.id);
        let rebuilt = rebuild_structure(&[x.clone(), y.clone()], &DocumentStructure::default());
        assert_eq!(rebuilt.len(), 2);
        assert!(rebuilt.duplicate_ids().is_empty());
        assert_eq!(rebuilt.top_level_len(), 1);
    }

    #[test]
    fn test_rebuild_then_verify_is_clean() {
        let a = doc("A", None, 0);
        let a1 = doc("A1", Some(a.id), 1);
        let a2 = doc("A2", Some(a.id), 2);
        let docs = vec![a, a1, a2];
        let rebuilt = rebuild_structure(&docs, &DocumentStructure::default());
        assert!(verify_structure(&rebuilt, &docs).is_empty());
    }
}

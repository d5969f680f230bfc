//! Collection document structure.
//!
//! A collection stores its documents as an ordered forest of
//! [`NavigationNode`]s in a single JSON column. Sibling order is array order;
//! there is no separate position column. The relational
//! `parent_document_id` graph stays the source of truth and every mutation
//! here runs in the same transaction as the matching row updates.
//!
//! All operations walk the whole tree (O(n) in the number of nodes). Trees are
//! small, and an auxiliary index would have to be kept in sync with the JSON
//! on every write.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Document, NavigationNode};

/// Ordered forest of navigation nodes owned by one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentStructure(Vec<NavigationNode>);

/// A subtree detached by [`DocumentStructure::remove`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovedSubtree {
    /// The detached node with all of its descendants.
    pub node: NavigationNode,
    /// Position the node held among its siblings.
    pub previous_index: usize,
    /// Parent node it was detached from (`None` = top level).
    pub parent_id: Option<Uuid>,
}

/// What [`relocate`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    /// Position the node held before the move.
    pub previous_index: usize,
    /// Position the node was inserted at.
    pub index: usize,
    /// Whether the requested index was shifted down to account for the
    /// node's own removal from the same sibling array.
    pub compensated: bool,
}

impl DocumentStructure {
    pub fn new(nodes: Vec<NavigationNode>) -> Self {
        Self(nodes)
    }

    /// Top-level nodes in order.
    pub fn nodes(&self) -> &[NavigationNode] {
        &self.0
    }

    pub fn into_nodes(self) -> Vec<NavigationNode> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of top-level nodes.
    pub fn top_level_len(&self) -> usize {
        self.0.len()
    }

    /// Total number of nodes at every depth.
    pub fn len(&self) -> usize {
        fn count(nodes: &[NavigationNode]) -> usize {
            nodes.iter().map(|n| 1 + count(&n.children)).sum()
        }
        count(&self.0)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.get_tree(id).is_some()
    }

    /// Subtree rooted at `id`, found depth-first.
    pub fn get_tree(&self, id: Uuid) -> Option<&NavigationNode> {
        find(&self.0, id)
    }

    /// Ancestor ids of `id` from the root down to its direct parent.
    ///
    /// `None` if `id` is not in the structure; `Some(vec![])` for a top-level
    /// node.
    pub fn ancestors(&self, id: Uuid) -> Option<Vec<Uuid>> {
        fn walk(nodes: &[NavigationNode], id: Uuid, path: &mut Vec<Uuid>) -> bool {
            for node in nodes {
                if node.id == id {
                    return true;
                }
                path.push(node.id);
                if walk(&node.children, id, path) {
                    return true;
                }
                path.pop();
            }
            false
        }

        let mut path = Vec::new();
        walk(&self.0, id, &mut path).then_some(path)
    }

    /// Parent of `id` in the tree. `None` if absent, `Some(None)` at top level.
    pub fn parent_of(&self, id: Uuid) -> Option<Option<Uuid>> {
        self.ancestors(id).map(|path| path.last().copied())
    }

    /// Position of `id` among its siblings.
    pub fn position_of(&self, id: Uuid) -> Option<usize> {
        fn walk(nodes: &[NavigationNode], id: Uuid) -> Option<usize> {
            nodes
                .iter()
                .position(|n| n.id == id)
                .or_else(|| nodes.iter().find_map(|n| walk(&n.children, id)))
        }
        walk(&self.0, id)
    }

    /// True iff `candidate` sits anywhere below `ancestor`. False for equal
    /// ids or when either is absent.
    pub fn is_descendant(&self, ancestor: Uuid, candidate: Uuid) -> bool {
        if ancestor == candidate {
            return false;
        }
        self.get_tree(ancestor)
            .map(|node| find(&node.children, candidate).is_some())
            .unwrap_or(false)
    }

    /// Every document id in pre-order (parents before children, siblings in
    /// order).
    pub fn document_ids(&self) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(self.len());
        collect_ids(&self.0, &mut ids);
        ids
    }

    /// Ids that occur more than once. Always empty for a consistent structure.
    pub fn duplicate_ids(&self) -> Vec<Uuid> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for id in self.document_ids() {
            if !seen.insert(id) && !duplicates.contains(&id) {
                duplicates.push(id);
            }
        }
        duplicates
    }

    /// Insert a node built from `document`'s display fields.
    ///
    /// Goes to the top level when `parent_document_id` is `None`, otherwise
    /// under the matching parent node. `index` defaults to appending.
    /// `children` replaces the new node's children, so a relocated subtree
    /// keeps its descendants verbatim.
    pub fn insert(
        &mut self,
        document: &Document,
        index: Option<usize>,
        children: Option<Vec<NavigationNode>>,
    ) -> Result<usize> {
        let mut node = document.to_navigation_node();
        if let Some(children) = children {
            node.children = children;
        }
        self.insert_node(document.parent_document_id, index, node)
    }

    fn insert_node(
        &mut self,
        parent_id: Option<Uuid>,
        index: Option<usize>,
        node: NavigationNode,
    ) -> Result<usize> {
        let mut incoming = Vec::new();
        collect_ids(std::slice::from_ref(&node), &mut incoming);
        if let Some(existing) = incoming.into_iter().find(|id| self.contains(*id)) {
            return Err(Error::Validation(format!(
                "document {} is already in the collection structure",
                existing
            )));
        }

        let siblings = match parent_id {
            None => &mut self.0,
            Some(parent_id) => {
                &mut find_mut(&mut self.0, parent_id)
                    .ok_or(Error::ParentNotFound(parent_id))?
                    .children
            }
        };

        let at = index.unwrap_or(siblings.len());
        if at > siblings.len() {
            return Err(Error::Validation(format!(
                "index {} is out of range for {} siblings",
                at,
                siblings.len()
            )));
        }
        siblings.insert(at, node);
        Ok(at)
    }

    /// Detach `id` with its whole subtree. `None` when the id is absent, which
    /// idempotent callers treat as success.
    pub fn remove(&mut self, id: Uuid) -> Option<RemovedSubtree> {
        fn walk(
            nodes: &mut Vec<NavigationNode>,
            id: Uuid,
            parent_id: Option<Uuid>,
        ) -> Option<RemovedSubtree> {
            if let Some(pos) = nodes.iter().position(|n| n.id == id) {
                return Some(RemovedSubtree {
                    node: nodes.remove(pos),
                    previous_index: pos,
                    parent_id,
                });
            }
            nodes
                .iter_mut()
                .find_map(|node| walk(&mut node.children, id, Some(node.id)))
        }
        walk(&mut self.0, id, None)
    }

    /// Overwrite title, url, icon and color of the node for `document`,
    /// leaving its children alone. Returns false if the node is absent.
    pub fn update_display_fields(&mut self, document: &Document) -> bool {
        match find_mut(&mut self.0, document.id) {
            Some(node) => {
                node.title = document.title.clone();
                node.url = document.url();
                node.icon = document.icon.clone();
                node.color = document.color.clone();
                true
            }
            None => false,
        }
    }
}

impl From<Vec<NavigationNode>> for DocumentStructure {
    fn from(nodes: Vec<NavigationNode>) -> Self {
        Self(nodes)
    }
}

/// Move `document`'s node and subtree out of `source` and into `destination`
/// (or back into `source` when `destination` is `None`, i.e. the move stays
/// inside one collection).
///
/// `document` must already carry its new `parent_document_id`. When the node
/// keeps its collection and parent and its old position is before `index`,
/// the index is decremented: removing the node shifted every later sibling
/// left by one. On error both structures are left as they were.
pub fn relocate(
    source: &mut DocumentStructure,
    destination: Option<&mut DocumentStructure>,
    document: &Document,
    index: Option<usize>,
) -> Result<Relocation> {
    let id = document.id;
    if let Some(parent_id) = document.parent_document_id {
        if parent_id == id || source.is_descendant(id, parent_id) {
            return Err(Error::Validation(format!(
                "cannot move document {} beneath itself",
                id
            )));
        }
    }

    let removed = source.remove(id).ok_or_else(|| {
        Error::Validation(format!(
            "document {} not found in collection structure",
            id
        ))
    })?;

    let same_collection = destination.is_none();
    let same_parent = removed.parent_id == document.parent_document_id;
    let (index, compensated) = match index {
        Some(i) if same_collection && same_parent && removed.previous_index < i => {
            (Some(i - 1), true)
        }
        other => (other, false),
    };

    let mut node = document.to_navigation_node();
    node.children = removed.node.children.clone();

    let target = match destination {
        Some(destination) => destination,
        None => &mut *source,
    };
    match target.insert_node(document.parent_document_id, index, node) {
        Ok(at) => Ok(Relocation {
            previous_index: removed.previous_index,
            index: at,
            compensated,
        }),
        Err(e) => {
            source
                .insert_node(removed.parent_id, Some(removed.previous_index), removed.node)
                .map_err(|restore| {
                    Error::Internal(format!(
                        "failed to restore document {} after rejected move: {}",
                        id, restore
                    ))
                })?;
            Err(e)
        }
    }
}

fn find(nodes: &[NavigationNode], id: Uuid) -> Option<&NavigationNode> {
    for node in nodes {
        if node.id == id {
            return Some(node);
        }
        if let Some(found) = find(&node.children, id) {
            return Some(found);
        }
    }
    None
}

fn find_mut(nodes: &mut [NavigationNode], id: Uuid) -> Option<&mut NavigationNode> {
    for node in nodes {
        if node.id == id {
            return Some(node);
        }
        if let Some(found) = find_mut(&mut node.children, id) {
            return Some(found);
        }
    }
    None
}

fn collect_ids(nodes: &[NavigationNode], out: &mut Vec<Uuid>) {
    for node in nodes {
        out.push(node.id);
        collect_ids(&node.children, out);
    }
}

//! In-memory view of one document's full revision history.
//!
//! ```text
//!   roots            arena (BTreeMap<sequence, Node>)
//!   ┌────┐           ┌──────────────────────────────────────┐
//!   │ 1  │──────────►│ 1: 1-a   parent None   children [2, 4] │
//!   └────┘           │ 2: 2-b   parent 1      children [3]    │
//!                    │ 3: 3-c   parent 2      children []     │ ◄── leaf
//!                    │ 4: 2-x   parent 1      children []     │ ◄── leaf
//!                    └──────────────────────────────────────┘
//! ```
//!
//! Parent links are plain sequence keys into the arena, never references,
//! so the structure has no ownership cycles. Trees are rebuilt from rows on
//! every access and are never shared between transactions.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::revision::{Revision, RevisionId};

#[derive(Debug, Clone)]
struct Node {
    revision: Revision,
    children: Vec<u64>,
}

/// All revisions of one document, indexed by sequence.
#[derive(Debug, Clone)]
pub struct DocumentTree {
    document_id: String,
    nodes: BTreeMap<u64, Node>,
    roots: Vec<u64>,
    by_id: HashMap<RevisionId, u64>,
}

impl DocumentTree {
    /// An empty tree for `document_id`.
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            nodes: BTreeMap::new(),
            roots: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    /// Build a tree from persisted revisions, in any order.
    ///
    /// Every parent must be present with a lower sequence and a lower
    /// generation than its children.
    pub fn from_revisions(
        document_id: impl Into<String>,
        revisions: impl IntoIterator<Item = Revision>,
    ) -> Result<Self, TreeError> {
        let mut revisions: Vec<Revision> = revisions.into_iter().collect();
        revisions.sort_by_key(|r| r.sequence);

        let mut tree = Self::new(document_id);
        for revision in revisions {
            tree.insert(revision)?;
        }
        Ok(tree)
    }

    /// Add a revision whose parent (if any) is already in the tree.
    pub(crate) fn insert(&mut self, revision: Revision) -> Result<(), TreeError> {
        if revision.document_id != self.document_id {
            return Err(TreeError::MixedDocuments {
                expected: self.document_id.clone(),
                found: revision.document_id,
            });
        }
        if self.nodes.contains_key(&revision.sequence) {
            return Err(TreeError::DuplicateSequence(revision.sequence));
        }

        let sequence = revision.sequence;
        match revision.parent_sequence {
            None => self.roots.push(sequence),
            Some(parent_seq) => {
                let parent = self.nodes.get_mut(&parent_seq).ok_or(TreeError::OrphanRevision {
                    sequence,
                    parent: parent_seq,
                })?;
                if parent.revision.generation() >= revision.generation() {
                    return Err(TreeError::GenerationNotIncreasing {
                        parent: parent.revision.id.clone(),
                        child: revision.id,
                    });
                }
                parent.children.push(sequence);
            }
        }

        self.by_id.entry(revision.id.clone()).or_insert(sequence);
        self.nodes.insert(
            sequence,
            Node {
                revision,
                children: Vec::new(),
            },
        );
        Ok(())
    }

    /// Flip the `current` flag of a revision in this snapshot.
    pub(crate) fn set_current(&mut self, sequence: u64, current: bool) {
        if let Some(node) = self.nodes.get_mut(&sequence) {
            node.revision.current = current;
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All revisions in ascending sequence order.
    pub fn revisions(&self) -> impl Iterator<Item = &Revision> {
        self.nodes.values().map(|n| &n.revision)
    }

    /// Exact id match anywhere in the tree.
    pub fn lookup(&self, id: &RevisionId) -> Option<&Revision> {
        self.by_id.get(id).and_then(|seq| self.by_sequence(*seq))
    }

    pub fn by_sequence(&self, sequence: u64) -> Option<&Revision> {
        self.nodes.get(&sequence).map(|n| &n.revision)
    }

    /// Direct child of `parent` with the given id.
    pub fn lookup_child(&self, parent: &Revision, id: &RevisionId) -> Option<&Revision> {
        let node = self.nodes.get(&parent.sequence)?;
        node.children
            .iter()
            .filter_map(|seq| self.by_sequence(*seq))
            .find(|child| &child.id == id)
    }

    /// Direct children of the revision at `sequence`.
    pub fn children(&self, sequence: u64) -> Vec<&Revision> {
        self.nodes
            .get(&sequence)
            .map(|n| n.children.iter().filter_map(|s| self.by_sequence(*s)).collect())
            .unwrap_or_default()
    }

    pub fn roots(&self) -> Vec<&Revision> {
        self.roots.iter().filter_map(|s| self.by_sequence(*s)).collect()
    }

    /// Revisions with no recorded child, in ascending sequence order.
    pub fn leaves(&self) -> Vec<&Revision> {
        self.nodes
            .values()
            .filter(|n| n.children.is_empty())
            .map(|n| &n.revision)
            .collect()
    }

    /// Leaves that are not tombstones.
    pub fn live_leaves(&self) -> Vec<&Revision> {
        self.leaves().into_iter().filter(|r| !r.deleted).collect()
    }

    pub fn is_leaf(&self, sequence: u64) -> bool {
        self.nodes
            .get(&sequence)
            .map(|n| n.children.is_empty())
            .unwrap_or(false)
    }

    /// The revision flagged `current`, if any.
    pub fn current_revision(&self) -> Option<&Revision> {
        self.nodes
            .values()
            .map(|n| &n.revision)
            .find(|r| r.current)
    }

    /// Edge count from the tree's root to `sequence`.
    ///
    /// `None` when the sequence is not part of this tree.
    pub fn depth(&self, sequence: u64) -> Option<usize> {
        let mut node = self.nodes.get(&sequence)?;
        let mut depth = 0;
        while let Some(parent) = node.revision.parent_sequence {
            node = self.nodes.get(&parent)?;
            depth += 1;
            if depth > self.nodes.len() {
                return None;
            }
        }
        Some(depth)
    }

    /// True when more than one leaf is live.
    pub fn has_conflicts(&self) -> bool {
        self.nodes
            .values()
            .filter(|n| n.children.is_empty() && !n.revision.deleted)
            .nth(1)
            .is_some()
    }

    /// Path from the root down to `sequence`, oldest first.
    pub fn history(&self, sequence: u64) -> Vec<&Revision> {
        let mut path = Vec::new();
        let mut next = Some(sequence);
        while let Some(seq) = next {
            let Some(node) = self.nodes.get(&seq) else { break };
            path.push(&node.revision);
            if path.len() > self.nodes.len() {
                break;
            }
            next = node.revision.parent_sequence;
        }
        path.reverse();
        path
    }

    /// Ids along the path to `sequence`, oldest first. This is the ancestor
    /// chain a peer needs to graft the revision.
    pub fn history_ids(&self, sequence: u64) -> Vec<RevisionId> {
        self.history(sequence).into_iter().map(|r| r.id.clone()).collect()
    }
}

/// Rows that cannot form a valid tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// A revision of a different document was supplied
    MixedDocuments { expected: String, found: String },
    /// Two rows share a sequence number
    DuplicateSequence(u64),
    /// The parent sequence is not in the tree
    OrphanRevision { sequence: u64, parent: u64 },
    /// A child's generation is not above its parent's
    GenerationNotIncreasing { parent: RevisionId, child: RevisionId },
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeError::MixedDocuments { expected, found } => {
                write!(f, "Revision of document '{found}' added to tree of '{expected}'")
            }
            TreeError::DuplicateSequence(seq) => write!(f, "Duplicate sequence {seq} in tree"),
            TreeError::OrphanRevision { sequence, parent } => {
                write!(f, "Revision {sequence} references missing parent {parent}")
            }
            TreeError::GenerationNotIncreasing { parent, child } => {
                write!(f, "Revision {child} does not increase generation over parent {parent}")
            }
        }
    }
}

impl std::error::Error for TreeError {}

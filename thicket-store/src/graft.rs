//! Grafting a remote revision history into a local revision tree.
//!
//! Input is a revision plus its ancestor chain, oldest first, ending in the
//! revision itself. One of three cases applies:
//!
//! ```text
//!  A. no local tree          chain ──► new tree (stubs ... leaf)
//!
//!  B. chain[0] known         local:  1-a ── 2-b
//!                            chain:  1-a ── 2-b ── 3-c ── 4-d
//!                                           walk ──┘ insert ──►
//!
//!  C. chain[0] unknown       local:  1-a ── 2-b
//!                            chain:  1-x ── 2-y          (second root)
//! ```
//!
//! Every intermediate id that was never seen locally becomes a stub row
//! (`available = false`, empty body). The leaf gets the supplied body and
//! starts out `current`; in cases B and C it is then resolved against the
//! document's previous current revision with [`select_winner`].
//!
//! The algorithm writes through a [`RevisionSink`], which the store backs
//! with a RocksDB transaction. It owns a working copy of the tree so depths
//! of freshly inserted rows are visible to the winner selection.

use std::fmt;

use crate::body::DocumentBody;
use crate::event::DocumentEvent;
use crate::revision::{Revision, RevisionId};
use crate::tree::{DocumentTree, TreeError};
use crate::winner::select_winner;

/// A revision to insert together with its ancestry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraftRequest {
    pub document_id: String,
    pub revision: RevisionId,
    /// Oldest first, terminating in `revision`
    pub ancestors: Vec<RevisionId>,
    pub body: DocumentBody,
    pub deleted: bool,
}

/// A row to be written by a [`RevisionSink`]. The sink assigns the sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRevision {
    pub id: RevisionId,
    pub parent_sequence: Option<u64>,
    pub body: DocumentBody,
    pub deleted: bool,
    pub current: bool,
    pub available: bool,
}

impl NewRevision {
    fn stub(id: RevisionId, parent_sequence: Option<u64>) -> Self {
        Self {
            id,
            parent_sequence,
            body: DocumentBody::empty(),
            deleted: false,
            current: false,
            available: false,
        }
    }
}

/// Write access to one document's rows inside a single transaction.
pub trait RevisionSink {
    type Error: From<GraftError>;

    /// Persist a new row and return it with its assigned sequence.
    fn insert_revision(&mut self, revision: NewRevision) -> Result<Revision, Self::Error>;

    /// Flip `current` to false on an existing row.
    fn demote(&mut self, sequence: u64) -> Result<(), Self::Error>;

    /// Flip `current` to true on an existing leaf. Only used when a
    /// tombstone extends the winning branch and a live leaf takes over.
    fn promote(&mut self, sequence: u64) -> Result<(), Self::Error>;

    /// Re-read a row as currently stored.
    fn reload(&mut self, sequence: u64) -> Result<Option<Revision>, Self::Error>;
}

/// Result of a graft.
#[derive(Debug, Clone)]
pub struct GraftResult {
    /// Sequence of the leaf. For a re-delivered history this is the
    /// existing row's sequence.
    pub sequence: u64,
    /// The leaf as it stands after winner selection
    pub revision: Revision,
    /// Number of rows written
    pub inserted: usize,
    pub events: Vec<DocumentEvent>,
    /// The document's tree after the graft
    pub tree: DocumentTree,
}

impl GraftResult {
    /// True when the history was already known and nothing was written.
    pub fn is_noop(&self) -> bool {
        self.inserted == 0
    }
}

/// Graft errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraftError {
    /// Chain empty, out of order, not ending in the revision, or for another document
    InvalidGraftInput(String),
    /// Update or delete of a revision that is not a live leaf
    NotALeafRevision { document_id: String, revision: String },
    /// The previous current revision changed under the graft
    ConcurrentModification { document_id: String },
    /// The working tree rejected a row
    Tree(TreeError),
}

impl fmt::Display for GraftError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraftError::InvalidGraftInput(e) => write!(f, "Invalid graft input: {e}"),
            GraftError::NotALeafRevision { document_id, revision } => {
                write!(f, "Revision {revision} of document '{document_id}' is not a live leaf")
            }
            GraftError::ConcurrentModification { document_id } => {
                write!(f, "Document '{document_id}' was modified concurrently")
            }
            GraftError::Tree(e) => write!(f, "Tree error: {e}"),
        }
    }
}

impl std::error::Error for GraftError {}

impl From<TreeError> for GraftError {
    fn from(e: TreeError) -> Self {
        GraftError::Tree(e)
    }
}

/// Check the preconditions of a graft.
pub fn validate(request: &GraftRequest, existing: Option<&DocumentTree>) -> Result<(), GraftError> {
    let chain = &request.ancestors;
    let last = chain
        .last()
        .ok_or_else(|| GraftError::InvalidGraftInput("ancestor chain is empty".into()))?;
    if last != &request.revision {
        return Err(GraftError::InvalidGraftInput(format!(
            "ancestor chain ends in {last}, expected {}",
            request.revision
        )));
    }
    for pair in chain.windows(2) {
        if pair[0].generation() >= pair[1].generation() {
            return Err(GraftError::InvalidGraftInput(format!(
                "generations not strictly increasing: {} then {}",
                pair[0], pair[1]
            )));
        }
    }
    if let Some(tree) = existing {
        if tree.document_id() != request.document_id {
            return Err(GraftError::InvalidGraftInput(format!(
                "chain for '{}' grafted onto tree of '{}'",
                request.document_id,
                tree.document_id()
            )));
        }
    }
    Ok(())
}

/// The revision an update or delete may extend: a leaf that is not a tombstone.
pub fn extendable_leaf<'t>(tree: &'t DocumentTree, id: &RevisionId) -> Result<&'t Revision, GraftError> {
    let not_a_leaf = || GraftError::NotALeafRevision {
        document_id: tree.document_id().to_owned(),
        revision: id.to_string(),
    };
    let revision = tree.lookup(id).ok_or_else(not_a_leaf)?;
    if !tree.is_leaf(revision.sequence) || revision.deleted {
        return Err(not_a_leaf());
    }
    Ok(revision)
}

/// Insert `request` into the document's history.
///
/// `existing` is the document's tree as read inside the caller's
/// transaction, or `None` when the document is not stored yet.
pub fn graft<S: RevisionSink>(
    sink: &mut S,
    request: GraftRequest,
    existing: Option<DocumentTree>,
) -> Result<GraftResult, S::Error> {
    validate(&request, existing.as_ref())?;

    match existing {
        Some(tree) if !tree.is_empty() => {
            if let Some(parent) = tree.lookup(&request.ancestors[0]).cloned() {
                graft_into_branch(sink, request, tree, parent)
            } else {
                graft_new_tree(sink, request, tree)
            }
        }
        _ => create_document(sink, request),
    }
}

/// Case A: the document has no local history.
fn create_document<S: RevisionSink>(sink: &mut S, request: GraftRequest) -> Result<GraftResult, S::Error> {
    log::debug!(
        "Creating document '{}' from {} revision(s)",
        request.document_id,
        request.ancestors.len()
    );
    let mut tree = DocumentTree::new(request.document_id.clone());
    let leaf = insert_chain(sink, &mut tree, &request, 0, None)?;

    Ok(GraftResult {
        sequence: leaf.sequence,
        inserted: request.ancestors.len(),
        events: vec![DocumentEvent::Created { revision: leaf.clone() }],
        revision: leaf,
        tree,
    })
}

/// Case B: the chain starts in a branch we already hold.
fn graft_into_branch<S: RevisionSink>(
    sink: &mut S,
    request: GraftRequest,
    mut tree: DocumentTree,
    mut parent: Revision,
) -> Result<GraftResult, S::Error> {
    let previous = tree.current_revision().cloned();

    // Walk the chain while it matches local children.
    let mut next = 1;
    while next < request.ancestors.len() {
        match tree.lookup_child(&parent, &request.ancestors[next]) {
            Some(child) => parent = child.clone(),
            None => break,
        }
        next += 1;
    }

    if next == request.ancestors.len() {
        log::trace!("{} already known, nothing to insert", parent);
        return Ok(GraftResult {
            sequence: parent.sequence,
            revision: parent,
            inserted: 0,
            events: Vec::new(),
            tree,
        });
    }

    log::debug!(
        "Grafting {} onto {} ({} new row(s))",
        request.revision,
        parent,
        request.ancestors.len() - next
    );
    let demoted_previous = previous
        .as_ref()
        .map(|p| p.sequence == parent.sequence && p.current)
        .unwrap_or(false);
    let leaf = insert_chain(sink, &mut tree, &request, next, Some(parent))?;
    let inserted = request.ancestors.len() - next;

    if demoted_previous {
        // The graft extended the winning branch itself.
        return finish_extension(sink, tree, leaf, previous, inserted);
    }
    resolve_conflict(sink, tree, leaf, previous, inserted)
}

/// Case C: the chain's root is unknown, so it becomes a second tree.
fn graft_new_tree<S: RevisionSink>(
    sink: &mut S,
    request: GraftRequest,
    mut tree: DocumentTree,
) -> Result<GraftResult, S::Error> {
    log::debug!(
        "Grafting new root {} into existing document '{}'",
        request.ancestors[0],
        request.document_id
    );
    let previous = tree.current_revision().cloned();
    let leaf = insert_chain(sink, &mut tree, &request, 0, None)?;
    let inserted = request.ancestors.len();
    resolve_conflict(sink, tree, leaf, previous, inserted)
}

/// Insert `request.ancestors[from..]` below `parent`: stubs, then the leaf.
///
/// A parent that is current stops being current once it gains a child.
fn insert_chain<S: RevisionSink>(
    sink: &mut S,
    tree: &mut DocumentTree,
    request: &GraftRequest,
    from: usize,
    mut parent: Option<Revision>,
) -> Result<Revision, S::Error> {
    let last = request.ancestors.len() - 1;
    for (index, id) in request.ancestors.iter().enumerate().skip(from) {
        if let Some(p) = parent.as_ref().filter(|p| p.current) {
            log::trace!("Superseding {p}");
            sink.demote(p.sequence)?;
            tree.set_current(p.sequence, false);
        }
        let parent_sequence = parent.as_ref().map(|p| p.sequence);
        let row = if index == last {
            NewRevision {
                id: id.clone(),
                parent_sequence,
                body: request.body.clone(),
                deleted: request.deleted,
                current: true,
                available: true,
            }
        } else {
            NewRevision::stub(id.clone(), parent_sequence)
        };
        let inserted = sink.insert_revision(row)?;
        log::trace!("Inserted {inserted}");
        tree.insert(inserted.clone()).map_err(GraftError::from)?;
        parent = Some(inserted);
    }
    // The loop ran at least once: callers only get here with from <= last.
    parent.ok_or_else(|| GraftError::InvalidGraftInput("nothing to insert".into()).into())
}

/// The new leaf extends the previous winner. Its rank may still fall below
/// another leaf (a tombstone on the winning branch loses to a live
/// conflict), so it is checked against every other leaf.
fn finish_extension<S: RevisionSink>(
    sink: &mut S,
    mut tree: DocumentTree,
    leaf: Revision,
    previous: Option<Revision>,
    inserted: usize,
) -> Result<GraftResult, S::Error> {
    let best = {
        let depth = |seq: u64| tree.depth(seq).unwrap_or(0);
        tree.leaves()
            .into_iter()
            .fold(&leaf, |best, other| select_winner(best, other, depth).keep)
            .clone()
    };

    if best.sequence == leaf.sequence {
        return Ok(updated(tree, leaf, previous, inserted));
    }

    log::debug!("{} loses to live leaf {}", leaf, best);
    sink.demote(leaf.sequence)?;
    tree.set_current(leaf.sequence, false);
    sink.promote(best.sequence)?;
    tree.set_current(best.sequence, true);
    let leaf = tree.by_sequence(leaf.sequence).cloned().unwrap_or(leaf);
    let winner = tree.by_sequence(best.sequence).cloned().unwrap_or(best);
    Ok(GraftResult {
        sequence: leaf.sequence,
        events: vec![DocumentEvent::ConflictRecorded {
            revision: leaf.clone(),
            winner,
        }],
        revision: leaf,
        inserted,
        tree,
    })
}

/// Resolve the new leaf against the previous current revision.
fn resolve_conflict<S: RevisionSink>(
    sink: &mut S,
    mut tree: DocumentTree,
    leaf: Revision,
    previous: Option<Revision>,
    inserted: usize,
) -> Result<GraftResult, S::Error> {
    let Some(previous) = previous else {
        return Ok(updated(tree, leaf, None, inserted));
    };

    // Re-read the previous winner inside this transaction.
    let stored = sink.reload(previous.sequence)?;
    let Some(stored) = stored.filter(|r| r.current) else {
        log::warn!("Previous winner {} changed during graft", previous);
        return Err(GraftError::ConcurrentModification {
            document_id: previous.document_id.clone(),
        }
        .into());
    };

    let (keep, demote) = {
        let depth = |seq: u64| tree.depth(seq).unwrap_or(0);
        let selection = select_winner(&leaf, &stored, depth);
        (selection.keep.sequence, selection.demote.sequence)
    };
    log::debug!(
        "Conflict on '{}': keeping seq {keep}, demoting seq {demote}",
        leaf.document_id
    );
    sink.demote(demote)?;
    tree.set_current(demote, false);

    if keep == leaf.sequence {
        return Ok(updated(tree, leaf, Some(stored), inserted));
    }

    let leaf = tree.by_sequence(leaf.sequence).cloned().unwrap_or(leaf);
    Ok(GraftResult {
        sequence: leaf.sequence,
        events: vec![DocumentEvent::ConflictRecorded {
            revision: leaf.clone(),
            winner: stored,
        }],
        revision: leaf,
        inserted,
        tree,
    })
}

fn updated(tree: DocumentTree, leaf: Revision, previous: Option<Revision>, inserted: usize) -> GraftResult {
    GraftResult {
        sequence: leaf.sequence,
        events: vec![DocumentEvent::Updated {
            previous,
            revision: leaf.clone(),
        }],
        revision: leaf,
        inserted,
        tree,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    /// Rows of every document, keyed by sequence.
    #[derive(Default)]
    struct MemoryStore {
        rows: BTreeMap<u64, Revision>,
        last_sequence: u64,
    }

    struct MemorySink<'a> {
        store: &'a mut MemoryStore,
        document_id: String,
    }

    impl RevisionSink for MemorySink<'_> {
        type Error = GraftError;

        fn insert_revision(&mut self, revision: NewRevision) -> Result<Revision, GraftError> {
            self.store.last_sequence += 1;
            let row = Revision {
                document_id: self.document_id.clone(),
                id: revision.id,
                sequence: self.store.last_sequence,
                parent_sequence: revision.parent_sequence,
                body: revision.body,
                deleted: revision.deleted,
                current: revision.current,
                available: revision.available,
            };
            self.store.rows.insert(row.sequence, row.clone());
            Ok(row)
        }

        fn demote(&mut self, sequence: u64) -> Result<(), GraftError> {
            if let Some(row) = self.store.rows.get_mut(&sequence) {
                row.current = false;
            }
            Ok(())
        }

        fn promote(&mut self, sequence: u64) -> Result<(), GraftError> {
            if let Some(row) = self.store.rows.get_mut(&sequence) {
                row.current = true;
            }
            Ok(())
        }

        fn reload(&mut self, sequence: u64) -> Result<Option<Revision>, GraftError> {
            Ok(self.store.rows.get(&sequence).cloned())
        }
    }

    impl MemoryStore {
        fn tree(&self, document_id: &str) -> Option<DocumentTree> {
            let rows: Vec<Revision> = self
                .rows
                .values()
                .filter(|r| r.document_id == document_id)
                .cloned()
                .collect();
            if rows.is_empty() {
                return None;
            }
            Some(DocumentTree::from_revisions(document_id, rows).unwrap())
        }

        fn graft_with(
            &mut self,
            existing: Option<DocumentTree>,
            document_id: &str,
            chain: &[&str],
            body: &str,
            deleted: bool,
        ) -> Result<GraftResult, GraftError> {
            let ancestors: Vec<RevisionId> = chain.iter().map(|id| RevisionId::parse(id).unwrap()).collect();
            let request = GraftRequest {
                document_id: document_id.into(),
                revision: ancestors.last().cloned().unwrap_or_else(|| RevisionId::parse("1-x").unwrap()),
                ancestors,
                body: DocumentBody::from_bytes(body.as_bytes().to_vec()),
                deleted,
            };
            let mut sink = MemorySink {
                store: self,
                document_id: document_id.into(),
            };
            graft(&mut sink, request, existing)
        }

        fn apply(&mut self, document_id: &str, chain: &[&str], body: &str, deleted: bool) -> GraftResult {
            let existing = self.tree(document_id);
            self.graft_with(existing, document_id, chain, body, deleted).unwrap()
        }

        fn current(&self, document_id: &str) -> Vec<String> {
            self.rows
                .values()
                .filter(|r| r.document_id == document_id && r.current)
                .map(|r| r.id.to_string())
                .collect()
        }

        fn row(&self, document_id: &str, id: &str) -> Revision {
            self.rows
                .values()
                .find(|r| r.document_id == document_id && r.id.to_string() == id)
                .cloned()
                .unwrap()
        }
    }

    // ─── Case A ───────────────────────────────────────────────────────

    #[test]
    fn test_new_document_materializes_stubs() {
        let mut store = MemoryStore::default();
        let result = store.apply("doc", &["1-a", "2-b", "3-c"], "{\"v\":3}", false);

        assert_eq!(result.inserted, 3);
        assert_eq!(store.rows.len(), 3);
        for stub in ["1-a", "2-b"] {
            let row = store.row("doc", stub);
            assert!(!row.available);
            assert!(row.body.is_empty());
            assert!(!row.current);
        }
        let leaf = store.row("doc", "3-c");
        assert!(leaf.available);
        assert!(leaf.current);
        assert_eq!(leaf.body.as_bytes(), b"{\"v\":3}");
        assert_eq!(leaf.parent_sequence, Some(store.row("doc", "2-b").sequence));
        assert!(matches!(result.events.as_slice(), [DocumentEvent::Created { .. }]));
    }

    #[test]
    fn test_redelivery_is_idempotent() {
        let mut store = MemoryStore::default();
        let first = store.apply("doc", &["1-a", "2-b"], "{}", false);
        let second = store.apply("doc", &["1-a", "2-b"], "{}", false);

        assert!(second.is_noop());
        assert!(second.events.is_empty());
        assert_eq!(second.sequence, first.sequence);
        assert_eq!(store.rows.len(), 2);
        assert_eq!(store.current("doc"), vec!["2-b"]);
    }

    #[test]
    fn test_known_prefix_is_noop() {
        let mut store = MemoryStore::default();
        store.apply("doc", &["1-a", "2-b", "3-c"], "{}", false);
        let result = store.apply("doc", &["1-a", "2-b"], "{}", false);
        assert!(result.is_noop());
        assert_eq!(result.revision.id.to_string(), "2-b");
        assert_eq!(store.current("doc"), vec!["3-c"]);
    }

    // ─── Case B ───────────────────────────────────────────────────────

    #[test]
    fn test_linear_extension_moves_current() {
        let mut store = MemoryStore::default();
        store.apply("doc", &["1-a", "2-b"], "{}", false);
        let result = store.apply("doc", &["1-a", "2-b", "3-c", "4-d"], "{}", false);

        assert_eq!(result.inserted, 2);
        assert_eq!(store.current("doc"), vec!["4-d"]);
        assert!(!store.row("doc", "3-c").available);
        match result.events.as_slice() {
            [DocumentEvent::Updated { previous: Some(p), revision }] => {
                assert_eq!(p.id.to_string(), "2-b");
                assert_eq!(revision.id.to_string(), "4-d");
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn test_sibling_with_greater_hash_wins() {
        let mut store = MemoryStore::default();
        store.apply("doc1", &["1-root", "2-local"], "{}", false);
        let result = store.apply("doc1", &["1-root", "2-remoteB"], "{}", false);

        assert_eq!(store.current("doc1"), vec!["2-remoteB"]);
        assert!(!store.row("doc1", "2-local").current);
        assert!(result.tree.has_conflicts());
        assert_eq!(result.tree.leaves().len(), 2);
        assert!(matches!(result.events.as_slice(), [DocumentEvent::Updated { .. }]));
    }

    #[test]
    fn test_losing_branch_records_conflict() {
        let mut store = MemoryStore::default();
        store.apply("doc", &["1-a", "2-z"], "{}", false);
        let result = store.apply("doc", &["1-a", "2-b"], "{}", false);

        assert_eq!(store.current("doc"), vec!["2-z"]);
        assert!(!result.revision.current);
        match result.events.as_slice() {
            [DocumentEvent::ConflictRecorded { revision, winner }] => {
                assert_eq!(revision.id.to_string(), "2-b");
                assert_eq!(winner.id.to_string(), "2-z");
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn test_deeper_branch_beats_greater_hash() {
        let mut store = MemoryStore::default();
        store.apply("doc", &["1-a", "2-z"], "{}", false);
        store.apply("doc", &["1-a", "2-b", "3-c"], "{}", false);
        assert_eq!(store.current("doc"), vec!["3-c"]);
    }

    #[test]
    fn test_live_leaf_beats_deeper_tombstone() {
        let mut store = MemoryStore::default();
        store.apply("doc", &["1-a", "2-b"], "{}", false);
        store.apply("doc", &["1-a", "2-c", "3-d"], "", true);
        assert_eq!(store.current("doc"), vec!["2-b"]);
    }

    #[test]
    fn test_tombstone_on_winner_hands_over_to_live_leaf() {
        let mut store = MemoryStore::default();
        store.apply("doc", &["1-a", "2-b"], "{}", false);
        store.apply("doc", &["1-a", "2-c"], "{}", false);
        assert_eq!(store.current("doc"), vec!["2-c"]);

        let result = store.apply("doc", &["1-a", "2-c", "3-d"], "", true);
        assert_eq!(store.current("doc"), vec!["2-b"]);
        assert!(!result.tree.has_conflicts());
        assert!(matches!(result.events.as_slice(), [DocumentEvent::ConflictRecorded { .. }]));
    }

    #[test]
    fn test_extending_losing_branch_can_win() {
        let mut store = MemoryStore::default();
        store.apply("doc", &["1-a", "2-z"], "{}", false);
        store.apply("doc", &["1-a", "2-b"], "{}", false);
        assert_eq!(store.current("doc"), vec!["2-z"]);

        store.apply("doc", &["1-a", "2-b", "3-c"], "{}", false);
        assert_eq!(store.current("doc"), vec!["3-c"]);
        assert!(!store.row("doc", "2-b").current);
        assert!(!store.row("doc", "2-z").current);
    }

    // ─── Case C ───────────────────────────────────────────────────────

    #[test]
    fn test_unknown_root_starts_second_tree() {
        let mut store = MemoryStore::default();
        store.apply("doc", &["1-a", "2-b"], "{}", false);
        let result = store.apply("doc", &["1-x", "2-y", "3-z"], "{}", false);

        assert_eq!(result.inserted, 3);
        assert_eq!(result.tree.roots().len(), 2);
        assert!(store.row("doc", "1-x").parent_sequence.is_none());
        assert_eq!(store.current("doc"), vec!["3-z"]);
    }

    #[test]
    fn test_unknown_root_can_lose() {
        let mut store = MemoryStore::default();
        store.apply("doc", &["1-a", "2-b", "3-c"], "{}", false);
        let result = store.apply("doc", &["1-x", "2-y"], "{}", false);
        assert_eq!(store.current("doc"), vec!["3-c"]);
        assert!(!result.revision.current);
    }

    // ─── Validation ───────────────────────────────────────────────────

    #[test]
    fn test_rejects_invalid_chains() {
        let mut store = MemoryStore::default();
        let empty = store.graft_with(None, "doc", &[], "{}", false);
        assert!(matches!(empty, Err(GraftError::InvalidGraftInput(_))));

        let unordered = store.graft_with(None, "doc", &["2-a", "1-b"], "{}", false);
        assert!(matches!(unordered, Err(GraftError::InvalidGraftInput(_))));

        let repeated = store.graft_with(None, "doc", &["1-a", "1-b"], "{}", false);
        assert!(matches!(repeated, Err(GraftError::InvalidGraftInput(_))));
        assert!(store.rows.is_empty());
    }

    #[test]
    fn test_rejects_chain_not_ending_in_revision() {
        let request = GraftRequest {
            document_id: "doc".into(),
            revision: RevisionId::parse("3-c").unwrap(),
            ancestors: vec![RevisionId::parse("1-a").unwrap(), RevisionId::parse("2-b").unwrap()],
            body: DocumentBody::empty(),
            deleted: false,
        };
        assert!(matches!(validate(&request, None), Err(GraftError::InvalidGraftInput(_))));
    }

    #[test]
    fn test_rejects_foreign_tree() {
        let mut store = MemoryStore::default();
        store.apply("doc", &["1-a"], "{}", false);
        let tree = store.tree("doc");
        let result = store.graft_with(tree, "other", &["1-a", "2-b"], "{}", false);
        assert!(matches!(result, Err(GraftError::InvalidGraftInput(_))));
    }

    #[test]
    fn test_generation_gaps_accepted() {
        let mut store = MemoryStore::default();
        let result = store.apply("doc", &["1-a", "4-d", "9-i"], "{}", false);
        assert_eq!(result.tree.depth(result.sequence), Some(2));
    }

    #[test]
    fn test_extendable_leaf() {
        let mut store = MemoryStore::default();
        store.apply("doc", &["1-a", "2-b"], "{}", false);
        store.apply("doc", &["1-a", "2-c", "3-d"], "", true);
        let tree = store.tree("doc").unwrap();

        assert!(extendable_leaf(&tree, &RevisionId::parse("2-b").unwrap()).is_ok());
        for bad in ["1-a", "3-d", "7-nope"] {
            let err = extendable_leaf(&tree, &RevisionId::parse(bad).unwrap()).unwrap_err();
            assert!(matches!(err, GraftError::NotALeafRevision { .. }), "{bad}");
        }
    }

    #[test]
    fn test_stale_previous_winner_is_detected() {
        let mut store = MemoryStore::default();
        store.apply("doc", &["1-a", "2-b"], "{}", false);
        let stale = store.tree("doc");

        // A concurrent writer demotes 2-b.
        store.apply("doc", &["1-a", "2-c"], "{}", false);

        let result = store.graft_with(stale, "doc", &["1-a", "2-d"], "{}", false);
        assert_eq!(
            result.unwrap_err(),
            GraftError::ConcurrentModification { document_id: "doc".into() }
        );
    }

    // ─── Convergence ──────────────────────────────────────────────────

    #[derive(Debug, Clone)]
    struct Op {
        chain: Vec<String>,
        deleted: bool,
    }

    /// A random forest of revisions and the insert operations covering it.
    fn arb_history() -> impl Strategy<Value = Vec<Op>> {
        (1usize..9)
            .prop_flat_map(|n| {
                (
                    prop::collection::vec(prop::option::weighted(0.85, any::<prop::sample::Index>()), n),
                    prop::collection::vec("[a-z]{1,3}", n + 1),
                    prop::collection::vec(any::<bool>(), n + 1),
                    prop::collection::vec(any::<bool>(), n + 1),
                )
            })
            .prop_map(|(parents, hashes, deleted, interior)| {
                let n = parents.len();
                let mut parent: Vec<Option<usize>> = vec![None];
                for (i, choice) in parents.iter().enumerate() {
                    parent.push(choice.as_ref().map(|idx| idx.index(i + 1)));
                }
                let mut depth = vec![0usize; n + 1];
                for i in 1..=n {
                    depth[i] = parent[i].map(|p| depth[p] + 1).unwrap_or(0);
                }
                let ids: Vec<String> = (0..=n)
                    .map(|i| format!("{}-{}{}", depth[i] + 1, hashes[i], i))
                    .collect();
                let has_child: Vec<bool> = (0..=n).map(|i| parent.contains(&Some(i))).collect();

                let path = |mut i: usize| {
                    let mut chain = vec![ids[i].clone()];
                    while let Some(p) = parent[i] {
                        chain.push(ids[p].clone());
                        i = p;
                    }
                    chain.reverse();
                    chain
                };

                (0..=n)
                    .filter(|&i| !has_child[i] || interior[i])
                    .map(|i| Op {
                        chain: path(i),
                        deleted: !has_child[i] && deleted[i],
                    })
                    .collect()
            })
    }

    fn replay(ops: &[Op]) -> MemoryStore {
        let mut store = MemoryStore::default();
        for op in ops {
            let chain: Vec<&str> = op.chain.iter().map(String::as_str).collect();
            let body = if op.deleted { "" } else { "{}" };
            store.apply("doc", &chain, body, op.deleted);
        }
        store
    }

    proptest! {
        #[test]
        fn winner_is_independent_of_arrival_order(
            (first, second) in arb_history()
                .prop_flat_map(|ops| (Just(ops.clone()).prop_shuffle(), Just(ops).prop_shuffle()))
        ) {
            let a = replay(&first);
            let b = replay(&second);

            let current_a = a.current("doc");
            prop_assert_eq!(current_a.len(), 1);
            prop_assert_eq!(&current_a, &b.current("doc"));

            let tree = a.tree("doc").unwrap();
            let mut leaves_a: Vec<String> = tree.leaves().iter().map(|r| r.id.to_string()).collect();
            let mut leaves_b: Vec<String> = b.tree("doc").unwrap().leaves().iter().map(|r| r.id.to_string()).collect();
            leaves_a.sort();
            leaves_b.sort();
            prop_assert_eq!(leaves_a, leaves_b);

            // The current revision is the best-ranked leaf.
            let depth = |seq: u64| tree.depth(seq).unwrap_or(0);
            let leaves = tree.leaves();
            let best = leaves[1..]
                .iter()
                .fold(leaves[0], |best, &other| select_winner(best, other, depth).keep);
            prop_assert_eq!(best.id.to_string(), current_a[0].clone());
        }
    }
}

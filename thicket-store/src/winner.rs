//! Deterministic choice between two conflicting leaves.
//!
//! Every replica that holds the same two leaves must pick the same one,
//! whichever arrived first. The order is:
//!
//! 1. a live leaf beats a tombstone
//! 2. the deeper leaf (longer history) wins
//! 3. the lexicographically greater hash wins
//!
//! When depth and hash are both equal, which can only happen across
//! disjoint trees, generation and then the full id string decide, so the
//! order stays total. Two rows with the same id are the same revision; the
//! older row is kept.

use std::cmp::Ordering;

use crate::revision::{compare_hash, Revision};

/// Outcome of a conflict between two leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection<'a> {
    pub keep: &'a Revision,
    pub demote: &'a Revision,
}

/// Pick which of `a` and `b` stays current.
///
/// `depth_of` maps a sequence to its distance from the tree root.
pub fn select_winner<'a, F>(a: &'a Revision, b: &'a Revision, depth_of: F) -> Selection<'a>
where
    F: Fn(u64) -> usize,
{
    match rank(a, b, &depth_of) {
        Ordering::Less => Selection { keep: b, demote: a },
        _ => Selection { keep: a, demote: b },
    }
}

/// Total order over leaves: `Greater` means `a` wins.
fn rank<F>(a: &Revision, b: &Revision, depth_of: &F) -> Ordering
where
    F: Fn(u64) -> usize,
{
    // Live beats deleted, so "not deleted" is the larger value.
    (!a.deleted)
        .cmp(&!b.deleted)
        .then_with(|| depth_of(a.sequence).cmp(&depth_of(b.sequence)))
        .then_with(|| compare_hash(&a.id, &b.id))
        .then_with(|| a.id.generation().cmp(&b.id.generation()))
        .then_with(|| a.id.to_string().cmp(&b.id.to_string()))
        .then_with(|| b.sequence.cmp(&a.sequence))
}

//! Revision identifiers and the revision row view.
//!
//! A revision id has the form `<generation>-<hash>`:
//! - `generation` is a positive integer without leading zeros
//! - `hash` is a non-empty ASCII alphanumeric token
//!
//! The hash is opaque. It is only ever compared byte-wise, as the last
//! tie-break when two conflicting leaves have equal depth.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::body::DocumentBody;

/// A parsed `<generation>-<hash>` revision identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RevisionId {
    generation: u64,
    hash: String,
}

impl RevisionId {
    /// Parse a revision id, rejecting anything outside `^[1-9][0-9]*-[A-Za-z0-9]+$`.
    pub fn parse(input: &str) -> Result<Self, MalformedRevisionId> {
        let (gen_part, hash) = input
            .split_once('-')
            .ok_or_else(|| MalformedRevisionId::new(input, "missing '-' separator"))?;

        if gen_part.is_empty() {
            return Err(MalformedRevisionId::new(input, "empty generation"));
        }
        if !gen_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MalformedRevisionId::new(input, "generation is not numeric"));
        }
        if gen_part.starts_with('0') {
            return Err(MalformedRevisionId::new(input, "generation must be positive without leading zeros"));
        }
        let generation: u64 = gen_part
            .parse()
            .map_err(|_| MalformedRevisionId::new(input, "generation out of range"))?;

        if hash.is_empty() {
            return Err(MalformedRevisionId::new(input, "empty hash"));
        }
        if !hash.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(MalformedRevisionId::new(input, "hash must be alphanumeric"));
        }

        Ok(Self {
            generation,
            hash: hash.to_owned(),
        })
    }

    /// Build an id from parts. The hash must be a valid token.
    pub fn new(generation: u64, hash: impl Into<String>) -> Result<Self, MalformedRevisionId> {
        let hash = hash.into();
        Self::parse(&format!("{generation}-{hash}"))
    }

    /// First revision of a brand-new document with a random hash.
    pub fn first() -> Self {
        Self {
            generation: 1,
            hash: random_hash(),
        }
    }

    /// Successor of this revision with a random hash.
    pub fn next(&self) -> Result<Self, MalformedRevisionId> {
        Ok(Self {
            generation: self.next_generation()?,
            hash: random_hash(),
        })
    }

    /// Revision of a freshly created local document.
    pub fn first_local() -> Self {
        Self {
            generation: 1,
            hash: LOCAL_HASH.to_owned(),
        }
    }

    /// Successor of a local document revision.
    pub fn next_local(&self) -> Result<Self, MalformedRevisionId> {
        Ok(Self {
            generation: self.next_generation()?,
            hash: LOCAL_HASH.to_owned(),
        })
    }

    fn next_generation(&self) -> Result<u64, MalformedRevisionId> {
        self.generation
            .checked_add(1)
            .ok_or_else(|| MalformedRevisionId::new(&self.to_string(), "generation has no successor"))
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }
}

/// Lexicographic byte comparison of the hash tokens of two ids.
///
/// Only used as the final conflict tie-break.
pub fn compare_hash(a: &RevisionId, b: &RevisionId) -> Ordering {
    a.hash.as_bytes().cmp(b.hash.as_bytes())
}

/// Generation of a textual revision id.
pub fn generation_of(id: &str) -> Result<u64, MalformedRevisionId> {
    RevisionId::parse(id).map(|r| r.generation)
}

/// Hash token of every local document revision.
const LOCAL_HASH: &str = "local";

fn random_hash() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.hash)
    }
}

impl FromStr for RevisionId {
    type Err = MalformedRevisionId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RevisionId {
    type Error = MalformedRevisionId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RevisionId> for String {
    fn from(id: RevisionId) -> Self {
        id.to_string()
    }
}

/// A revision id that failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRevisionId {
    pub input: String,
    pub reason: &'static str,
}

impl MalformedRevisionId {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_owned(),
            reason,
        }
    }
}

impl fmt::Display for MalformedRevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Malformed revision id '{}': {}", self.input, self.reason)
    }
}

impl std::error::Error for MalformedRevisionId {}

/// One persisted revision of a document.
///
/// Revisions are immutable once written, except for `current`, which only
/// ever flips from true to false when another leaf wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub document_id: String,
    pub id: RevisionId,
    /// Global, store-wide, never reused
    pub sequence: u64,
    /// `None` for a tree root
    pub parent_sequence: Option<u64>,
    pub body: DocumentBody,
    pub deleted: bool,
    pub current: bool,
    /// False for stubs that only hold a place in history
    pub available: bool,
}

impl Revision {
    pub fn generation(&self) -> u64 {
        self.id.generation()
    }

    pub fn is_root(&self) -> bool {
        self.parent_sequence.is_none()
    }

    pub fn is_stub(&self) -> bool {
        !self.available
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} (seq {})", self.document_id, self.id, self.sequence)
    }
}

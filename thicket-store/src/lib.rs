//! # thicket-store: embedded multi-master document store
//!
//! Every document is a tree of revisions. Replicas edit independently and
//! exchange revisions together with their ancestor chains; grafting those
//! chains into the local tree and picking one winning leaf per document
//! converges every replica to the same current revision, whatever order
//! the revisions arrive in.
//!
//! ## Architecture
//!
//! ```text
//!  replicator ──(doc, rev, ancestors, body)──► RevisionStore
//!                                                   │ one transaction
//!                                                   ▼
//!               DocumentTree ◄── load ──┐      graft() ── select_winner()
//!               (arena by sequence)     │          │
//!                                       └──────────┤ RevisionSink
//!                                                  ▼
//!                                         RocksDB TransactionDB
//!                                                  │ commit
//!                                                  ▼
//!                                       GraftResult { events, .. }
//! ```
//!
//! ## Modules
//!
//! - [`revision`]: `<generation>-<hash>` ids and revision rows
//! - [`tree`]: in-memory revision tree of one document
//! - [`winner`]: deterministic conflict winner
//! - [`graft`]: insertion of a remote history into a tree
//! - [`event`]: notifications returned after commit
//! - [`storage`]: RocksDB persistence, units of work, diff and changes,
//!   local documents

pub mod attachment;
pub mod body;
pub mod event;
pub mod graft;
pub mod revision;
pub mod storage;
pub mod tree;
pub mod winner;

// Re-exports for convenience
pub use attachment::{digest_of, Attachment, AttachmentStub, Attachments};
pub use body::{DocumentBody, InvalidBody};
pub use event::DocumentEvent;
pub use graft::{graft, GraftError, GraftRequest, GraftResult, NewRevision, RevisionSink};
pub use revision::{compare_hash, generation_of, MalformedRevisionId, Revision, RevisionId};
pub use storage::{
    BatchOutcome, BatchReport, Changes, LocalDocument, ReplicatedRevision, RevisionStore,
    StoreConfig, StoreError, UnitOfWork,
};
pub use tree::{DocumentTree, TreeError};
pub use winner::{select_winner, Selection};

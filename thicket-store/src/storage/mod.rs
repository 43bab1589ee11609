//! Persistent storage layer for revision trees.
//!
//! Architecture:
//! ```text
//! ┌───────────────┐  transaction(f)  ┌──────────────────────────────┐
//! │ RevisionStore │ ───────────────► │ UnitOfWork                   │
//! │ (facade)      │  retry on        │  scope ─ savepoint           │
//! └──────┬────────┘  conflict        │  DocumentSink: RevisionSink  │
//!        │ snapshot reads            └──────────────┬───────────────┘
//!        ▼                                          ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ TransactionDB (RocksDB)                                          │
//! │  docs · doc_names · revs · doc_revs · current · rev_ids          │
//! │  attachments · blobs · meta · local                              │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod rocks;
pub mod unit;
mod rows;

pub use rocks::{BatchOutcome, BatchReport, Changes, RevisionStore, StoreConfig, StoreError};
pub use unit::{
    validate_document_id, validate_local_document_id, LocalDocument, ReplicatedRevision, UnitOfWork,
};

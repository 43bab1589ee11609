//! Scoped unit of work over one RocksDB transaction.
//!
//! ```text
//!  RevisionStore::transaction(|unit| ...)
//!  ┌───────────────────────────────────────────────┐
//!  │ unit ── scope ── savepoint 1                  │
//!  │          ├── graft doc A                      │
//!  │          └── scope ── savepoint 2            │
//!  │                 └── graft doc B  ✗ error      │
//!  │                     rollback to savepoint 2   │
//!  │ commit (outermost only) ──► events returned   │
//!  └───────────────────────────────────────────────┘
//! ```
//!
//! Every write path (replicated inserts, create, update, delete) runs in a
//! scope. A failing scope rolls back to its savepoint and drops the events
//! it produced; the enclosing work is untouched. Nothing is visible to
//! other readers until the store commits the outermost unit.

use rocksdb::{Transaction, TransactionOptions, WriteOptions};

use super::rocks::StoreError;
use super::rows::{self, Db, Families, LocalRow, RevisionRow, LAST_DOC_NUMBER, LAST_SEQUENCE};
use crate::attachment::{Attachment, Attachments};
use crate::body::DocumentBody;
use crate::event::DocumentEvent;
use crate::graft::{self, GraftRequest, GraftResult, NewRevision, RevisionSink};
use crate::revision::{Revision, RevisionId};
use crate::tree::DocumentTree;

/// A revision delivered by replication, with its ancestry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicatedRevision {
    pub document_id: String,
    pub revision_id: String,
    /// Oldest first, ending in `revision_id`
    pub ancestors: Vec<String>,
    pub body: DocumentBody,
    pub deleted: bool,
    pub attachments: Attachments,
}

impl ReplicatedRevision {
    /// A live revision whose id is the last element of `ancestors`.
    pub fn new<I>(document_id: impl Into<String>, ancestors: I, body: DocumentBody) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let ancestors: Vec<String> = ancestors.into_iter().map(Into::into).collect();
        Self {
            document_id: document_id.into(),
            revision_id: ancestors.last().cloned().unwrap_or_default(),
            ancestors,
            body,
            deleted: false,
            attachments: Attachments::new(),
        }
    }

    /// Mark as a tombstone.
    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }

    pub fn with_attachment(mut self, name: impl Into<String>, attachment: Attachment) -> Self {
        self.attachments.insert(name.into(), attachment);
        self
    }

    /// Parse and check everything that does not need the stored tree.
    fn to_request(&self) -> Result<GraftRequest, StoreError> {
        validate_document_id(&self.document_id)?;
        if !self.deleted {
            self.body.validate()?;
        }
        let revision = RevisionId::parse(&self.revision_id)?;
        let ancestors = self
            .ancestors
            .iter()
            .map(|id| RevisionId::parse(id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(GraftRequest {
            document_id: self.document_id.clone(),
            revision,
            ancestors,
            body: self.body.clone(),
            deleted: self.deleted,
        })
    }
}

/// Ids of replicated documents are non-empty. A leading underscore is
/// reserved for the `_design/` namespace; `_local/` ids name local
/// documents, which never enter a revision tree.
pub fn validate_document_id(document_id: &str) -> Result<(), StoreError> {
    if document_id.starts_with("_local/") {
        return Err(StoreError::InvalidDocumentId(format!(
            "'{document_id}': _local/ ids are reserved for local documents"
        )));
    }
    check_document_id(document_id, &["design/"])
}

/// Local document ids follow the same rules, plus the `_local/` namespace.
pub fn validate_local_document_id(document_id: &str) -> Result<(), StoreError> {
    check_document_id(document_id, &["design/", "local/"])
}

fn check_document_id(document_id: &str, namespaces: &[&str]) -> Result<(), StoreError> {
    let invalid = |reason: &str| Err(StoreError::InvalidDocumentId(format!("'{document_id}': {reason}")));
    if document_id.is_empty() {
        return invalid("empty");
    }
    if let Some(rest) = document_id.strip_prefix('_') {
        match namespaces.iter().find_map(|ns| rest.strip_prefix(ns)) {
            Some(name) if !name.is_empty() => {}
            _ => return invalid("leading underscore is reserved"),
        }
    }
    Ok(())
}

/// A document that is never replicated.
///
/// Only the latest body is kept. The revision (`<n>-local`) just counts
/// updates so writers can detect they raced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDocument {
    pub document_id: String,
    pub revision: RevisionId,
    pub body: DocumentBody,
}

/// Writes and reads inside one transaction.
pub struct UnitOfWork<'db> {
    txn: Transaction<'db, Db>,
    cf: Families<'db>,
    /// Savepoints set and not yet rolled back
    savepoints: usize,
    events: Vec<DocumentEvent>,
}

impl<'db> UnitOfWork<'db> {
    pub(crate) fn begin(db: &'db Db, sync_writes: bool) -> Result<Self, StoreError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(sync_writes);
        let mut txn_opts = TransactionOptions::default();
        txn_opts.set_deadlock_detect(true);

        Ok(Self {
            txn: db.transaction_opt(&write_opts, &txn_opts),
            cf: Families::of(db)?,
            savepoints: 0,
            events: Vec::new(),
        })
    }

    /// Commit and hand back every event produced by surviving scopes.
    pub(crate) fn commit(self) -> Result<Vec<DocumentEvent>, StoreError> {
        let Self { txn, events, .. } = self;
        txn.commit()?;
        Ok(events)
    }

    /// Run `f` in a nested scope. On error its writes and events are
    /// discarded and the error is returned; the unit stays usable.
    pub fn scope<T, F>(&mut self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Self) -> Result<T, StoreError>,
    {
        let mark = (self.savepoints, self.events.len());
        self.txn.set_savepoint();
        self.savepoints += 1;

        let result = f(self);
        if result.is_err() {
            // Inner scopes that succeeded left their savepoints behind.
            while self.savepoints > mark.0 {
                self.txn.rollback_to_savepoint()?;
                self.savepoints -= 1;
            }
            self.events.truncate(mark.1);
        }
        result
    }

    /// Events produced so far.
    pub fn events(&self) -> &[DocumentEvent] {
        &self.events
    }

    // ─── Writes ───────────────────────────────────────────────────────

    /// Graft a replicated revision and its history.
    pub fn insert_with_history(&mut self, item: &ReplicatedRevision) -> Result<GraftResult, StoreError> {
        let request = item.to_request()?;
        self.scope(|unit| unit.apply(request, &item.attachments))
    }

    /// Create a document, or revive one whose current revision is a tombstone.
    ///
    /// A missing id is generated.
    pub fn create_document(
        &mut self,
        document_id: Option<&str>,
        body: DocumentBody,
        attachments: &Attachments,
    ) -> Result<GraftResult, StoreError> {
        let document_id = match document_id {
            Some(id) => id.to_owned(),
            None => uuid::Uuid::new_v4().simple().to_string(),
        };
        validate_document_id(&document_id)?;
        body.validate()?;

        self.scope(|unit| {
            let number = unit.register_document(&document_id)?;
            let tree = rows::load_tree(&unit.txn, &unit.cf, &document_id, number)?;
            let ancestors = match tree.as_ref().and_then(|t| t.current_revision()) {
                Some(current) if !current.deleted => {
                    return Err(StoreError::DocumentExists(document_id.clone()));
                }
                Some(tombstone) => vec![tombstone.id.clone(), tombstone.id.next()?],
                None => vec![RevisionId::first()],
            };
            let request = GraftRequest {
                document_id: document_id.clone(),
                revision: ancestors[ancestors.len() - 1].clone(),
                ancestors,
                body,
                deleted: false,
            };
            unit.apply_to(number, tree, request, attachments)
        })
    }

    /// Write a new revision on top of the live leaf `previous`.
    pub fn update_document(
        &mut self,
        document_id: &str,
        previous: &str,
        body: DocumentBody,
        attachments: &Attachments,
    ) -> Result<GraftResult, StoreError> {
        body.validate()?;
        self.extend_leaf(document_id, previous, body, false, attachments)
    }

    /// Append a tombstone to the live leaf `previous`.
    ///
    /// Any live leaf may be deleted, including one that lost a conflict.
    pub fn delete_document(&mut self, document_id: &str, previous: &str) -> Result<GraftResult, StoreError> {
        self.extend_leaf(document_id, previous, DocumentBody::empty(), true, &Attachments::new())
    }

    fn extend_leaf(
        &mut self,
        document_id: &str,
        previous: &str,
        body: DocumentBody,
        deleted: bool,
        attachments: &Attachments,
    ) -> Result<GraftResult, StoreError> {
        let previous = RevisionId::parse(previous)?;
        self.scope(|unit| {
            let number = unit
                .lock_document(document_id)?
                .ok_or_else(|| StoreError::DocumentNotFound(document_id.to_owned()))?;
            let tree = rows::load_tree(&unit.txn, &unit.cf, document_id, number)?
                .ok_or_else(|| StoreError::DocumentNotFound(document_id.to_owned()))?;
            let leaf = graft::extendable_leaf(&tree, &previous)?;
            let next = leaf.id.next()?;
            let request = GraftRequest {
                document_id: document_id.to_owned(),
                revision: next.clone(),
                ancestors: vec![leaf.id.clone(), next],
                body,
                deleted,
            };
            unit.apply_to(number, Some(tree), request, attachments)
        })
    }

    fn apply(&mut self, request: GraftRequest, attachments: &Attachments) -> Result<GraftResult, StoreError> {
        let number = self.register_document(&request.document_id)?;
        let existing = rows::load_tree(&self.txn, &self.cf, &request.document_id, number)?;
        self.apply_to(number, existing, request, attachments)
    }

    fn apply_to(
        &mut self,
        number: u64,
        existing: Option<DocumentTree>,
        request: GraftRequest,
        attachments: &Attachments,
    ) -> Result<GraftResult, StoreError> {
        let document_id = request.document_id.clone();
        let mut sink = DocumentSink {
            unit: &*self,
            document_id: &document_id,
            number,
        };
        let result = graft::graft(&mut sink, request, existing)?;
        if !result.is_noop() {
            self.store_attachments(result.sequence, attachments)?;
        }
        self.events.extend(result.events.iter().cloned());
        Ok(result)
    }

    // ─── Local documents ──────────────────────────────────────────────

    /// Store a new local document (id generated when `None`).
    pub fn create_local_document(
        &mut self,
        document_id: Option<&str>,
        body: DocumentBody,
    ) -> Result<LocalDocument, StoreError> {
        let document_id = match document_id {
            Some(id) => id.to_owned(),
            None => uuid::Uuid::new_v4().simple().to_string(),
        };
        validate_local_document_id(&document_id)?;
        body.to_json()?;

        if self.lock_local(&document_id)?.is_some() {
            return Err(StoreError::DocumentExists(document_id));
        }
        let document = LocalDocument {
            document_id,
            revision: RevisionId::first_local(),
            body,
        };
        self.write_local(&document)?;
        Ok(document)
    }

    /// Replace the body of a local document whose revision is `previous`.
    pub fn update_local_document(
        &mut self,
        document_id: &str,
        previous: &str,
        body: DocumentBody,
    ) -> Result<LocalDocument, StoreError> {
        let previous = RevisionId::parse(previous)?;
        body.to_json()?;

        let stored = self
            .lock_local(document_id)?
            .ok_or_else(|| StoreError::DocumentNotFound(document_id.to_owned()))?;
        if stored.revision != previous {
            return Err(StoreError::NotALeafRevision {
                document_id: document_id.to_owned(),
                revision: previous.to_string(),
            });
        }
        let document = LocalDocument {
            document_id: document_id.to_owned(),
            revision: stored.revision.next_local()?,
            body,
        };
        self.write_local(&document)?;
        Ok(document)
    }

    /// Remove a local document outright.
    pub fn delete_local_document(&mut self, document_id: &str) -> Result<(), StoreError> {
        if self.lock_local(document_id)?.is_none() {
            return Err(StoreError::DocumentNotFound(document_id.to_owned()));
        }
        self.txn.delete_cf(self.cf.local, document_id.as_bytes())?;
        log::trace!("Deleted local document '{document_id}'");
        Ok(())
    }

    pub fn local_document(&self, document_id: &str) -> Result<LocalDocument, StoreError> {
        rows::read_local(&self.txn, &self.cf, document_id)?
            .ok_or_else(|| StoreError::DocumentNotFound(document_id.to_owned()))
    }

    // ─── Reads (see this unit's own writes) ───────────────────────────

    /// The document's current revision, tombstone included.
    pub fn current_revision(&self, document_id: &str) -> Result<Revision, StoreError> {
        let not_found = || StoreError::DocumentNotFound(document_id.to_owned());
        let number = rows::document_number(&self.txn, &self.cf, document_id)?.ok_or_else(not_found)?;
        let sequence = rows::current_sequence(&self.txn, &self.cf, number)?.ok_or_else(not_found)?;
        rows::read_revision(&self.txn, &self.cf, document_id, sequence)?.ok_or_else(not_found)
    }

    pub fn all_revisions(&self, document_id: &str) -> Result<DocumentTree, StoreError> {
        let not_found = || StoreError::DocumentNotFound(document_id.to_owned());
        let number = rows::document_number(&self.txn, &self.cf, document_id)?.ok_or_else(not_found)?;
        rows::load_tree(&self.txn, &self.cf, document_id, number)?.ok_or_else(not_found)
    }

    // ─── Rows ─────────────────────────────────────────────────────────

    /// Lock the document's `docs` row and return its number, if stored.
    fn lock_document(&self, document_id: &str) -> Result<Option<u64>, StoreError> {
        self.txn
            .get_for_update_cf(self.cf.docs, document_id.as_bytes(), true)?
            .map(|bytes| rows::decode_u64(&bytes))
            .transpose()
    }

    fn lock_local(&self, document_id: &str) -> Result<Option<LocalDocument>, StoreError> {
        self.txn
            .get_for_update_cf(self.cf.local, document_id.as_bytes(), true)?
            .map(|bytes| LocalRow::decode(&bytes)?.into_document(document_id))
            .transpose()
    }

    fn write_local(&self, document: &LocalDocument) -> Result<(), StoreError> {
        let row = LocalRow::from_document(document);
        self.txn
            .put_cf(self.cf.local, document.document_id.as_bytes(), row.encode()?)?;
        log::trace!("Local document '{}' at {}", document.document_id, document.revision);
        Ok(())
    }

    /// Lock the document's row, assigning a number if it is new.
    fn register_document(&self, document_id: &str) -> Result<u64, StoreError> {
        if let Some(number) = self.lock_document(document_id)? {
            return Ok(number);
        }
        let number = self.bump(LAST_DOC_NUMBER)?;
        self.txn.put_cf(self.cf.docs, document_id.as_bytes(), rows::u64_key(number))?;
        self.txn.put_cf(self.cf.doc_names, rows::u64_key(number), document_id.as_bytes())?;
        log::trace!("Registered document '{document_id}' as #{number}");
        Ok(number)
    }

    /// Increment a `meta` counter under lock and return the new value.
    fn bump(&self, counter: &[u8]) -> Result<u64, StoreError> {
        let last = self
            .txn
            .get_for_update_cf(self.cf.meta, counter, true)?
            .map(|bytes| rows::decode_u64(&bytes))
            .transpose()?
            .unwrap_or(0);
        let next = last + 1;
        self.txn.put_cf(self.cf.meta, counter, rows::u64_key(next))?;
        Ok(next)
    }

    fn write_revision(&self, number: u64, revision: &Revision) -> Result<(), StoreError> {
        let sequence = revision.sequence;
        let row = RevisionRow::from_revision(number, revision);
        self.txn.put_cf(self.cf.revs, rows::u64_key(sequence), row.encode()?)?;
        self.txn
            .put_cf(self.cf.doc_revs, rows::document_sequence_key(number, sequence), b"")?;
        // Disjoint trees may share an id; the oldest row keeps it, as in the tree.
        let id_key = rows::revision_id_key(number, &row.revision_id);
        if self.txn.get_cf(self.cf.rev_ids, &id_key)?.is_none() {
            self.txn.put_cf(self.cf.rev_ids, id_key, rows::u64_key(sequence))?;
        }
        if revision.current {
            self.txn
                .put_cf(self.cf.current, rows::document_sequence_key(number, sequence), b"")?;
        }
        Ok(())
    }

    fn set_current(&self, number: u64, sequence: u64, current: bool) -> Result<(), StoreError> {
        let key = rows::u64_key(sequence);
        let bytes = self
            .txn
            .get_cf(self.cf.revs, key)?
            .ok_or_else(|| StoreError::StorageFailure(format!("row {sequence} vanished")))?;
        let mut row = RevisionRow::decode(&bytes)?;
        if row.current == current {
            return Ok(());
        }
        row.current = current;
        self.txn.put_cf(self.cf.revs, key, row.encode()?)?;

        let index = rows::document_sequence_key(number, sequence);
        if current {
            self.txn.put_cf(self.cf.current, index, b"")?;
        } else {
            self.txn.delete_cf(self.cf.current, index)?;
        }
        log::trace!("Row {sequence} current = {current}");
        Ok(())
    }

    /// Record attachment stubs for `sequence`, writing unsaved bytes.
    fn store_attachments(&self, sequence: u64, attachments: &Attachments) -> Result<(), StoreError> {
        for (name, attachment) in attachments {
            let stub = attachment.stub();
            match attachment {
                Attachment::Unsaved { data, .. } => {
                    if self.txn.get_cf(self.cf.blobs, stub.digest.as_bytes())?.is_none() {
                        self.txn
                            .put_cf(self.cf.blobs, stub.digest.as_bytes(), rows::compress(data))?;
                    }
                }
                Attachment::Saved(saved) => {
                    if self.txn.get_cf(self.cf.blobs, saved.digest.as_bytes())?.is_none() {
                        return Err(StoreError::MissingAttachment(saved.digest.clone()));
                    }
                }
            }
            self.txn.put_cf(
                self.cf.attachments,
                rows::attachment_key(sequence, name),
                rows::encode_stub(&stub)?,
            )?;
        }
        Ok(())
    }
}

/// Graft writes for one document, backed by the unit's transaction.
struct DocumentSink<'u, 'db> {
    unit: &'u UnitOfWork<'db>,
    document_id: &'u str,
    number: u64,
}

impl RevisionSink for DocumentSink<'_, '_> {
    type Error = StoreError;

    fn insert_revision(&mut self, revision: NewRevision) -> Result<Revision, StoreError> {
        let sequence = self.unit.bump(LAST_SEQUENCE)?;
        let revision = Revision {
            document_id: self.document_id.to_owned(),
            id: revision.id,
            sequence,
            parent_sequence: revision.parent_sequence,
            body: revision.body,
            deleted: revision.deleted,
            current: revision.current,
            available: revision.available,
        };
        self.unit.write_revision(self.number, &revision)?;
        Ok(revision)
    }

    fn demote(&mut self, sequence: u64) -> Result<(), StoreError> {
        self.unit.set_current(self.number, sequence, false)
    }

    fn promote(&mut self, sequence: u64) -> Result<(), StoreError> {
        self.unit.set_current(self.number, sequence, true)
    }

    fn reload(&mut self, sequence: u64) -> Result<Option<Revision>, StoreError> {
        rows::read_revision(&self.unit.txn, &self.unit.cf, self.document_id, sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::rocks::{RevisionStore, StoreConfig};
    use tempfile::tempdir;

    fn body(json: &str) -> DocumentBody {
        DocumentBody::from_bytes(json.as_bytes().to_vec())
    }

    #[test]
    fn test_document_id_rules() {
        assert!(validate_document_id("doc1").is_ok());
        assert!(validate_document_id("_design/views").is_ok());
        for bad in ["", "_secret", "_design/", "_local/", "_local/checkpoint"] {
            assert!(
                matches!(validate_document_id(bad), Err(StoreError::InvalidDocumentId(_))),
                "{bad:?}"
            );
        }

        assert!(validate_local_document_id("_local/checkpoint").is_ok());
        assert!(validate_local_document_id("settings").is_ok());
        for bad in ["", "_local/", "_secret"] {
            assert!(validate_local_document_id(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn test_local_id_is_not_replicated() {
        let item = ReplicatedRevision::new("_local/checkpoint", ["1-a"], body("{}"));
        assert!(matches!(item.to_request(), Err(StoreError::InvalidDocumentId(_))));
    }

    #[test]
    fn test_request_parsing() {
        let item = ReplicatedRevision::new("doc", ["1-a", "2-b"], body("{}"));
        let request = item.to_request().unwrap();
        assert_eq!(request.revision.to_string(), "2-b");
        assert_eq!(request.ancestors.len(), 2);

        let bad = ReplicatedRevision::new("doc", ["1-a", "2-"], body("{}"));
        assert!(matches!(bad.to_request(), Err(StoreError::MalformedRevisionId(_))));

        let bad = ReplicatedRevision::new("doc", ["1-a"], body(r#"{"_id":"x"}"#));
        assert!(matches!(bad.to_request(), Err(StoreError::InvalidBody(_))));

        // Tombstone bodies are not checked.
        let tombstone = ReplicatedRevision::new("doc", ["1-a"], body("not json")).deleted();
        assert!(tombstone.to_request().is_ok());
    }

    #[test]
    fn test_failed_scope_rolls_back_only_itself() {
        let dir = tempdir().unwrap();
        let store = RevisionStore::open(StoreConfig::for_testing(dir.path())).unwrap();

        let (inner_failed, events) = store
            .transaction(|unit| {
                unit.insert_with_history(&ReplicatedRevision::new("a", ["1-a"], body("{}")))?;
                let inner = unit.scope(|unit| {
                    unit.insert_with_history(&ReplicatedRevision::new("b", ["1-b"], body("{}")))?;
                    Err::<(), _>(StoreError::DocumentExists("b".into()))
                });
                assert_eq!(unit.events().len(), 1);
                Ok(inner.is_err())
            })
            .unwrap();

        assert!(inner_failed);
        assert_eq!(events.len(), 1);
        assert!(store.contains_document("a").unwrap());
        assert!(!store.contains_document("b").unwrap());
        // Sequences of the rolled-back scope were never committed.
        assert_eq!(store.last_sequence().unwrap(), 1);
    }

    #[test]
    fn test_nested_success_then_outer_failure() {
        let dir = tempdir().unwrap();
        let store = RevisionStore::open(StoreConfig::for_testing(dir.path())).unwrap();

        let result = store.transaction(|unit| {
            unit.scope(|unit| {
                unit.scope(|unit| unit.insert_with_history(&ReplicatedRevision::new("a", ["1-a"], body("{}"))))?;
                unit.insert_with_history(&ReplicatedRevision::new("b", ["1-b"], body("{}")))?;
                Err::<(), _>(StoreError::DocumentExists("b".into()))
            })?;
            Ok(())
        });

        assert!(matches!(result, Err(StoreError::DocumentExists(_))));
        assert!(!store.contains_document("a").unwrap());
        assert!(!store.contains_document("b").unwrap());
        assert_eq!(store.last_sequence().unwrap(), 0);
    }

    #[test]
    fn test_reads_see_own_writes() {
        let dir = tempdir().unwrap();
        let store = RevisionStore::open(StoreConfig::for_testing(dir.path())).unwrap();

        store
            .transaction(|unit| {
                let created = unit.create_document(Some("doc"), body(r#"{"n":1}"#), &Attachments::new())?;
                let current = unit.current_revision("doc")?;
                assert_eq!(current.id, created.revision.id);

                let rev = current.id.to_string();
                let updated = unit.update_document("doc", &rev, body(r#"{"n":2}"#), &Attachments::new())?;
                assert_eq!(unit.all_revisions("doc")?.len(), 2);
                assert_eq!(unit.current_revision("doc")?.id, updated.revision.id);
                Ok(())
            })
            .unwrap();

        assert_eq!(store.current_revision("doc").unwrap().generation(), 2);
    }

    #[test]
    fn test_local_document_in_rolled_back_scope() {
        let dir = tempdir().unwrap();
        let store = RevisionStore::open(StoreConfig::for_testing(dir.path())).unwrap();

        store
            .transaction(|unit| {
                let created = unit.create_local_document(None, body(r#"{"n":1}"#))?;
                assert_eq!(created.document_id.len(), 32);
                assert_eq!(unit.local_document(&created.document_id)?, created);

                let inner = unit.scope(|unit| {
                    unit.create_local_document(Some("_local/scratch"), body("{}"))?;
                    Err::<(), _>(StoreError::DocumentExists("_local/scratch".into()))
                });
                assert!(inner.is_err());
                assert!(matches!(
                    unit.local_document("_local/scratch"),
                    Err(StoreError::DocumentNotFound(_))
                ));
                Ok(())
            })
            .unwrap();

        assert!(store.get_local_document("_local/scratch").is_err());
        assert_eq!(store.last_sequence().unwrap(), 0);
    }

    #[test]
    fn test_saved_attachment_must_exist() {
        let dir = tempdir().unwrap();
        let store = RevisionStore::open(StoreConfig::for_testing(dir.path())).unwrap();

        let dangling = Attachment::Saved(Attachment::unsaved("text/plain", b"nowhere".to_vec()).stub());
        let item = ReplicatedRevision::new("doc", ["1-a"], body("{}")).with_attachment("a.txt", dangling);
        let err = store.insert_with_history(&item).unwrap_err();
        assert!(matches!(err, StoreError::MissingAttachment(_)));
        assert!(!store.contains_document("doc").unwrap());
    }
}

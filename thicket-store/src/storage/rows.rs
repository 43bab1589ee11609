//! Persisted row formats and key layout.
//!
//! ```text
//!  docs         "<document id>"              -> number (u64 BE)
//!  doc_names    number                       -> "<document id>"
//!  revs         sequence                     -> RevisionRow (bincode)
//!  doc_revs     number ‖ sequence            -> ()
//!  current      number ‖ sequence            -> ()
//!  rev_ids      number ‖ "<revision id>"     -> sequence
//!  attachments  sequence ‖ "<name>"          -> AttachmentStub (bincode)
//!  blobs        "sha256-<hex>"               -> LZ4 bytes
//!  meta         "last_sequence" | "last_doc_number" -> u64 BE
//!  local        "<document id>"              -> LocalRow (bincode)
//! ```
//!
//! All integers are big-endian so lexicographic key order matches numeric
//! order and a document's rows are contiguous under its number prefix.

use rocksdb::{
    ColumnFamily, Direction, IteratorMode, SingleThreaded, SnapshotWithThreadMode, Transaction,
    TransactionDB,
};
use serde::{Deserialize, Serialize};

use super::rocks::StoreError;
use super::unit::LocalDocument;
use crate::attachment::AttachmentStub;
use crate::body::DocumentBody;
use crate::revision::{Revision, RevisionId};
use crate::tree::DocumentTree;

pub(crate) type Db = TransactionDB<SingleThreaded>;

pub(crate) const CF_DOCS: &str = "docs";
pub(crate) const CF_DOC_NAMES: &str = "doc_names";
pub(crate) const CF_REVS: &str = "revs";
pub(crate) const CF_DOC_REVS: &str = "doc_revs";
pub(crate) const CF_CURRENT: &str = "current";
pub(crate) const CF_REV_IDS: &str = "rev_ids";
pub(crate) const CF_ATTACHMENTS: &str = "attachments";
pub(crate) const CF_BLOBS: &str = "blobs";
pub(crate) const CF_META: &str = "meta";
pub(crate) const CF_LOCAL: &str = "local";

/// All column family names for initialization.
pub(crate) const COLUMN_FAMILIES: &[&str] = &[
    CF_DOCS,
    CF_DOC_NAMES,
    CF_REVS,
    CF_DOC_REVS,
    CF_CURRENT,
    CF_REV_IDS,
    CF_ATTACHMENTS,
    CF_BLOBS,
    CF_META,
    CF_LOCAL,
];

pub(crate) const LAST_SEQUENCE: &[u8] = b"last_sequence";
pub(crate) const LAST_DOC_NUMBER: &[u8] = b"last_doc_number";

/// Handles to every column family, resolved once per operation.
pub(crate) struct Families<'db> {
    pub docs: &'db ColumnFamily,
    pub doc_names: &'db ColumnFamily,
    pub revs: &'db ColumnFamily,
    pub doc_revs: &'db ColumnFamily,
    pub current: &'db ColumnFamily,
    pub rev_ids: &'db ColumnFamily,
    pub attachments: &'db ColumnFamily,
    pub blobs: &'db ColumnFamily,
    pub meta: &'db ColumnFamily,
    pub local: &'db ColumnFamily,
}

impl<'db> Families<'db> {
    pub fn of(db: &'db Db) -> Result<Self, StoreError> {
        let cf = |name: &str| {
            db.cf_handle(name)
                .ok_or_else(|| StoreError::StorageFailure(format!("Column family '{name}' not found")))
        };
        Ok(Self {
            docs: cf(CF_DOCS)?,
            doc_names: cf(CF_DOC_NAMES)?,
            revs: cf(CF_REVS)?,
            doc_revs: cf(CF_DOC_REVS)?,
            current: cf(CF_CURRENT)?,
            rev_ids: cf(CF_REV_IDS)?,
            attachments: cf(CF_ATTACHMENTS)?,
            blobs: cf(CF_BLOBS)?,
            meta: cf(CF_META)?,
            local: cf(CF_LOCAL)?,
        })
    }
}

/// One revision as stored in `revs`. The sequence is the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RevisionRow {
    pub document: u64,
    pub parent: Option<u64>,
    pub revision_id: String,
    pub current: bool,
    pub deleted: bool,
    pub available: bool,
    /// LZ4 block with prepended size, `None` for an empty body
    pub body: Option<Vec<u8>>,
}

impl RevisionRow {
    pub fn from_revision(document: u64, revision: &Revision) -> Self {
        let body = (!revision.body.is_empty()).then(|| compress(revision.body.as_bytes()));
        Self {
            document,
            parent: revision.parent_sequence,
            revision_id: revision.id.to_string(),
            current: revision.current,
            deleted: revision.deleted,
            available: revision.available,
            body,
        }
    }

    pub fn into_revision(self, document_id: &str, sequence: u64) -> Result<Revision, StoreError> {
        let id = RevisionId::parse(&self.revision_id)
            .map_err(|e| StoreError::Deserialization(format!("row {sequence}: {e}")))?;
        let body = match self.body {
            Some(bytes) => DocumentBody::from_bytes(decompress(&bytes)?),
            None => DocumentBody::empty(),
        };
        Ok(Revision {
            document_id: document_id.to_owned(),
            id,
            sequence,
            parent_sequence: self.parent,
            body,
            deleted: self.deleted,
            current: self.current,
            available: self.available,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        decode(bytes)
    }
}

/// A local document as stored in `local`. The document id is the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct LocalRow {
    pub revision: String,
    pub body: Option<Vec<u8>>,
}

impl LocalRow {
    pub fn from_document(document: &LocalDocument) -> Self {
        Self {
            revision: document.revision.to_string(),
            body: (!document.body.is_empty()).then(|| compress(document.body.as_bytes())),
        }
    }

    pub fn into_document(self, document_id: &str) -> Result<LocalDocument, StoreError> {
        let revision = RevisionId::parse(&self.revision)
            .map_err(|e| StoreError::Deserialization(format!("local '{document_id}': {e}")))?;
        let body = match self.body {
            Some(bytes) => DocumentBody::from_bytes(decompress(&bytes)?),
            None => DocumentBody::empty(),
        };
        Ok(LocalDocument {
            document_id: document_id.to_owned(),
            revision,
            body,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        decode(bytes)
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

pub(crate) fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::Deserialization(e.to_string()))?;
    Ok(value)
}

pub(crate) fn encode_stub(stub: &AttachmentStub) -> Result<Vec<u8>, StoreError> {
    encode(stub)
}

pub(crate) fn decode_stub(bytes: &[u8]) -> Result<AttachmentStub, StoreError> {
    decode(bytes)
}

/// LZ4 compress with the uncompressed size prepended.
pub(crate) fn compress(data: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(data)
}

pub(crate) fn decompress(bytes: &[u8]) -> Result<Vec<u8>, StoreError> {
    lz4_flex::decompress_size_prepended(bytes).map_err(|e| StoreError::Compression(e.to_string()))
}

// ─── Keys ─────────────────────────────────────────────────────────────

pub(crate) fn u64_key(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

pub(crate) fn decode_u64(bytes: &[u8]) -> Result<u64, StoreError> {
    let buf: [u8; 8] = bytes
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| StoreError::Deserialization(format!("expected 8 bytes, found {}", bytes.len())))?;
    Ok(u64::from_be_bytes(buf))
}

/// `number ‖ sequence`, used by `doc_revs` and `current`.
pub(crate) fn document_sequence_key(document: u64, sequence: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&document.to_be_bytes());
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

/// `number ‖ revision id`, used by `rev_ids`.
pub(crate) fn revision_id_key(document: u64, revision_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + revision_id.len());
    key.extend_from_slice(&document.to_be_bytes());
    key.extend_from_slice(revision_id.as_bytes());
    key
}

/// `sequence ‖ name`, used by `attachments`.
pub(crate) fn attachment_key(sequence: u64, name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + name.len());
    key.extend_from_slice(&sequence.to_be_bytes());
    key.extend_from_slice(name.as_bytes());
    key
}

// ─── Reads ────────────────────────────────────────────────────────────

/// Point reads and prefix scans, either inside a transaction (seeing its
/// own writes) or against a snapshot.
pub(crate) trait RowRead {
    fn read(&self, cf: &ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Every `(key, value)` whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, cf: &ColumnFamily, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, StoreError>;
}

impl RowRead for Transaction<'_, Db> {
    fn read(&self, cf: &ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.get_cf(cf, key)?)
    }

    fn scan_prefix(&self, cf: &ColumnFamily, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, StoreError> {
        collect_prefix(self.iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward)), prefix)
    }
}

impl RowRead for SnapshotWithThreadMode<'_, Db> {
    fn read(&self, cf: &ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.get_cf(cf, key)?)
    }

    fn scan_prefix(&self, cf: &ColumnFamily, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, StoreError> {
        collect_prefix(self.iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward)), prefix)
    }
}

fn collect_prefix<I>(iter: I, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, StoreError>
where
    I: Iterator<Item = Result<(Box<[u8]>, Box<[u8]>), rocksdb::Error>>,
{
    let mut rows = Vec::new();
    for item in iter {
        let (key, value) = item?;
        // Stop once we've passed the prefix
        if !key.starts_with(prefix) {
            break;
        }
        rows.push((key, value));
    }
    Ok(rows)
}

/// Numeric id of a document, if it is stored.
pub(crate) fn document_number<R: RowRead>(
    reader: &R,
    cf: &Families<'_>,
    document_id: &str,
) -> Result<Option<u64>, StoreError> {
    reader
        .read(cf.docs, document_id.as_bytes())?
        .map(|bytes| decode_u64(&bytes))
        .transpose()
}

/// Read one revision row by sequence.
pub(crate) fn read_revision<R: RowRead>(
    reader: &R,
    cf: &Families<'_>,
    document_id: &str,
    sequence: u64,
) -> Result<Option<Revision>, StoreError> {
    match reader.read(cf.revs, &u64_key(sequence))? {
        Some(bytes) => Ok(Some(RevisionRow::decode(&bytes)?.into_revision(document_id, sequence)?)),
        None => Ok(None),
    }
}

/// The document's current revision via the `current` index.
pub(crate) fn current_revision<R: RowRead>(
    reader: &R,
    cf: &Families<'_>,
    document_id: &str,
    document: u64,
) -> Result<Option<Revision>, StoreError> {
    match current_sequence(reader, cf, document)? {
        Some(sequence) => read_revision(reader, cf, document_id, sequence),
        None => Ok(None),
    }
}

/// A local document, if stored.
pub(crate) fn read_local<R: RowRead>(
    reader: &R,
    cf: &Families<'_>,
    document_id: &str,
) -> Result<Option<LocalDocument>, StoreError> {
    reader
        .read(cf.local, document_id.as_bytes())?
        .map(|bytes| LocalRow::decode(&bytes)?.into_document(document_id))
        .transpose()
}

/// Materialize a document's tree from its rows. `None` when it has none.
pub(crate) fn load_tree<R: RowRead>(
    reader: &R,
    cf: &Families<'_>,
    document_id: &str,
    document: u64,
) -> Result<Option<DocumentTree>, StoreError> {
    let mut revisions = Vec::new();
    for (key, _) in reader.scan_prefix(cf.doc_revs, &u64_key(document))? {
        let sequence = decode_u64(&key[8..])?;
        let revision = read_revision(reader, cf, document_id, sequence)?.ok_or_else(|| {
            StoreError::StorageFailure(format!("index points at missing row {sequence} of '{document_id}'"))
        })?;
        revisions.push(revision);
    }
    if revisions.is_empty() {
        return Ok(None);
    }
    log::trace!("Loaded {} row(s) of '{document_id}'", revisions.len());
    Ok(Some(DocumentTree::from_revisions(document_id, revisions)?))
}

/// Sequence of the document's current revision via the `current` index.
pub(crate) fn current_sequence<R: RowRead>(
    reader: &R,
    cf: &Families<'_>,
    document: u64,
) -> Result<Option<u64>, StoreError> {
    reader
        .scan_prefix(cf.current, &u64_key(document))?
        .first()
        .map(|(key, _)| decode_u64(&key[8..]))
        .transpose()
}

/// Attachment stubs recorded for a revision, by name.
pub(crate) fn read_attachments<R: RowRead>(
    reader: &R,
    cf: &Families<'_>,
    sequence: u64,
) -> Result<Vec<(String, AttachmentStub)>, StoreError> {
    reader
        .scan_prefix(cf.attachments, &u64_key(sequence))?
        .into_iter()
        .map(|(key, value)| {
            let name = String::from_utf8(key[8..].to_vec())
                .map_err(|e| StoreError::Deserialization(format!("attachment name: {e}")))?;
            Ok((name, decode_stub(&value)?))
        })
        .collect()
}

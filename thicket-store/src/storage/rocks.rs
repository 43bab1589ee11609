//! RocksDB-backed revision store.
//!
//! Column families (key layout in `storage::rows`):
//! - `docs` / `doc_names`: document id <-> document number
//! - `revs`: one row per revision, keyed by sequence
//! - `doc_revs`: per-document index used to rebuild trees
//! - `current`: per-document index of the current revision
//! - `rev_ids`: revision id lookup for diff and reads
//! - `attachments`: attachment stubs per revision
//! - `blobs`: content-addressed attachment bytes (LZ4)
//! - `meta`: sequence and document-number counters
//! - `local`: local documents, outside any revision tree
//!
//! Every write runs inside a pessimistic `TransactionDB` transaction. The
//! document's `docs` row is locked first, so mutations of one document are
//! serialized; the `last_sequence` counter is read under lock too, so
//! sequence order is commit order.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, Direction, ErrorKind,
    IteratorMode, Options, SingleThreaded, TransactionDB, TransactionDBOptions,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::rows::{
    self, Db, Families, RevisionRow, CF_BLOBS, CF_CURRENT, CF_DOCS, CF_DOC_REVS, CF_META,
    CF_REVS, CF_REV_IDS, COLUMN_FAMILIES, LAST_SEQUENCE,
};
use super::unit::{LocalDocument, ReplicatedRevision, UnitOfWork};
use crate::attachment::{AttachmentStub, Attachments};
use crate::body::{DocumentBody, InvalidBody};
use crate::event::DocumentEvent;
use crate::graft::{GraftError, GraftResult};
use crate::revision::{MalformedRevisionId, Revision, RevisionId};
use crate::tree::{DocumentTree, TreeError};

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes, shared by all column families (default: 256MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Fsync every commit (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 64MB)
    pub write_buffer_size: usize,
    /// How long a transaction waits for a row lock (default: 1000ms)
    pub lock_timeout_ms: i64,
    /// Retries of a transaction that hit a concurrent modification (default: 3)
    pub max_retries: u32,
    /// Keys per lookup batch in [`RevisionStore::revisions_diff`] (default: 500)
    pub diff_batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("thicket_data"),
            block_cache_size: 256 * 1024 * 1024, // 256MB
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 64 * 1024 * 1024, // 64MB
            lock_timeout_ms: 1000,
            max_retries: 3,
            diff_batch_size: 500,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024, // 8MB
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024, // 4MB
            lock_timeout_ms: 5000,
            max_retries: 10,
            ..Self::default()
        }
    }
}

/// Storage errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A revision id did not parse
    MalformedRevisionId(MalformedRevisionId),
    /// Ancestor chain empty, out of order, or for another document
    InvalidGraftInput(String),
    /// Update or delete of a revision that is not a live leaf
    NotALeafRevision { document_id: String, revision: String },
    /// RocksDB could not read or commit, or stored rows are corrupt
    StorageFailure(String),
    /// Lock contention or a stale current revision; safe to retry
    ConcurrentModification { document_id: Option<String> },
    InvalidDocumentId(String),
    InvalidBody(InvalidBody),
    DocumentNotFound(String),
    RevisionNotFound { document_id: String, revision: String },
    /// Create over a document whose current revision is live
    DocumentExists(String),
    /// A saved attachment references bytes the store does not hold
    MissingAttachment(String),
    Serialization(String),
    Deserialization(String),
    Compression(String),
}

impl StoreError {
    /// Conflicts the caller may retry after re-reading.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::ConcurrentModification { .. } | StoreError::NotALeafRevision { .. }
        )
    }

    /// Failures of the persistence layer itself, as opposed to bad input.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            StoreError::StorageFailure(_)
                | StoreError::Serialization(_)
                | StoreError::Deserialization(_)
                | StoreError::Compression(_)
        )
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::MalformedRevisionId(e) => write!(f, "{e}"),
            StoreError::InvalidGraftInput(e) => write!(f, "Invalid graft input: {e}"),
            StoreError::NotALeafRevision { document_id, revision } => {
                write!(f, "Revision {revision} of document '{document_id}' is not a live leaf")
            }
            StoreError::StorageFailure(e) => write!(f, "Storage failure: {e}"),
            StoreError::ConcurrentModification { document_id: Some(id) } => {
                write!(f, "Document '{id}' was modified concurrently")
            }
            StoreError::ConcurrentModification { document_id: None } => {
                write!(f, "Transaction conflicted with a concurrent writer")
            }
            StoreError::InvalidDocumentId(e) => write!(f, "Invalid document id {e}"),
            StoreError::InvalidBody(e) => write!(f, "{e}"),
            StoreError::DocumentNotFound(id) => write!(f, "Document not found: {id}"),
            StoreError::RevisionNotFound { document_id, revision } => {
                write!(f, "Revision not found: {document_id}@{revision}")
            }
            StoreError::DocumentExists(id) => write!(f, "Document already exists: {id}"),
            StoreError::MissingAttachment(digest) => write!(f, "Attachment not stored: {digest}"),
            StoreError::Serialization(e) => write!(f, "Serialization error: {e}"),
            StoreError::Deserialization(e) => write!(f, "Deserialization error: {e}"),
            StoreError::Compression(e) => write!(f, "Compression error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        match e.kind() {
            ErrorKind::Busy | ErrorKind::TimedOut | ErrorKind::TryAgain => {
                StoreError::ConcurrentModification { document_id: None }
            }
            _ => StoreError::StorageFailure(e.to_string()),
        }
    }
}

impl From<GraftError> for StoreError {
    fn from(e: GraftError) -> Self {
        match e {
            GraftError::InvalidGraftInput(reason) => StoreError::InvalidGraftInput(reason),
            GraftError::NotALeafRevision { document_id, revision } => {
                StoreError::NotALeafRevision { document_id, revision }
            }
            GraftError::ConcurrentModification { document_id } => StoreError::ConcurrentModification {
                document_id: Some(document_id),
            },
            GraftError::Tree(e) => e.into(),
        }
    }
}

impl From<TreeError> for StoreError {
    fn from(e: TreeError) -> Self {
        StoreError::StorageFailure(format!("corrupt revision tree: {e}"))
    }
}

impl From<MalformedRevisionId> for StoreError {
    fn from(e: MalformedRevisionId) -> Self {
        StoreError::MalformedRevisionId(e)
    }
}

impl From<InvalidBody> for StoreError {
    fn from(e: InvalidBody) -> Self {
        StoreError::InvalidBody(e)
    }
}

/// Documents touched in a window of sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changes {
    /// Highest sequence examined, or the requested start when none was
    pub last_sequence: u64,
    /// Current revision of every touched document, by sequence
    pub results: Vec<Revision>,
}

/// What happened to one item of [`RevisionStore::insert_batch`].
#[derive(Debug, Clone)]
pub enum BatchOutcome {
    Applied(GraftResult),
    Rejected(StoreError),
    /// Not attempted: the deadline passed or storage failed earlier
    Abandoned,
}

/// Per-item outcomes, in input order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<BatchOutcome>,
}

impl BatchReport {
    pub fn applied(&self) -> usize {
        self.count(|o| matches!(o, BatchOutcome::Applied(_)))
    }

    pub fn rejected(&self) -> usize {
        self.count(|o| matches!(o, BatchOutcome::Rejected(_)))
    }

    pub fn abandoned(&self) -> usize {
        self.count(|o| matches!(o, BatchOutcome::Abandoned))
    }

    /// Events of every committed item, in commit order.
    pub fn events(&self) -> impl Iterator<Item = &DocumentEvent> {
        self.outcomes.iter().flat_map(|o| match o {
            BatchOutcome::Applied(result) => result.events.as_slice(),
            _ => &[][..],
        })
    }

    fn count(&self, f: impl Fn(&BatchOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| f(o)).count()
    }
}

/// RocksDB-backed store of document revision trees.
///
/// Safe to share between threads (`Arc<RevisionStore>`); every operation
/// runs in its own transaction or snapshot.
pub struct RevisionStore {
    db: Db,
    config: StoreConfig,
}

impl RevisionStore {
    /// Open the store at the configured path.
    ///
    /// Creates the database and column families if they don't exist.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.set_max_total_wal_size(128 * 1024 * 1024); // 128MB WAL limit
        db_opts.increase_parallelism(num_cpus());

        let mut txn_db_opts = TransactionDBOptions::default();
        txn_db_opts.set_txn_lock_timeout(config.lock_timeout_ms);

        let cache = Cache::new_lru_cache(config.block_cache_size);
        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config, &cache)))
            .collect();

        let db = TransactionDB::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &txn_db_opts,
            &config.path,
            cf_descriptors,
        )?;

        let store = Self { db, config };
        log::info!(
            "Opened revision store at {} (last sequence {})",
            store.config.path.display(),
            store.last_sequence()?
        );
        Ok(store)
    }

    /// Build column-family-specific options.
    fn cf_options(name: &str, config: &StoreConfig, cache: &Cache) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_block_cache(cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024); // 16KB blocks
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_REVS => {
                // Append-mostly, bodies already LZ4 compressed
                opts.set_max_write_buffer_number(4);
                opts.set_compression_type(DBCompressionType::None);
            }
            CF_DOC_REVS | CF_CURRENT => {
                // Tiny keys, prefix-scanned by document number
                opts.set_max_write_buffer_number(4);
            }
            CF_DOCS | CF_REV_IDS | CF_META => {
                // Point lookups on every graft and diff
                opts.set_max_write_buffer_number(2);
                opts.optimize_for_point_lookup(config.block_cache_size as u64 / 1024 / 1024);
            }
            CF_BLOBS => {
                opts.set_max_write_buffer_number(2);
                opts.set_compression_type(DBCompressionType::None);
            }
            _ => {}
        }

        opts
    }

    // ─── Writes ───────────────────────────────────────────────────────

    /// Run `f` as one unit of work and commit it.
    ///
    /// A [`StoreError::ConcurrentModification`] discards the attempt and
    /// reruns `f` on a fresh transaction, up to `max_retries` times.
    /// Returns `f`'s value and the events of everything committed.
    pub fn transaction<T, F>(&self, mut f: F) -> Result<(T, Vec<DocumentEvent>), StoreError>
    where
        F: FnMut(&mut UnitOfWork<'_>) -> Result<T, StoreError>,
    {
        let mut attempt = 0;
        loop {
            let mut unit = UnitOfWork::begin(&self.db, self.config.sync_writes)?;
            let outcome = f(&mut unit).and_then(|value| Ok((value, unit.commit()?)));
            match outcome {
                Err(e @ StoreError::ConcurrentModification { .. }) if attempt < self.config.max_retries => {
                    attempt += 1;
                    log::warn!("{e}; retrying (attempt {attempt} of {})", self.config.max_retries);
                }
                other => return other,
            }
        }
    }

    /// Graft a replicated revision and its ancestor chain.
    ///
    /// Re-delivering a known history writes nothing and returns the
    /// existing sequence with no events.
    pub fn insert_with_history(&self, item: &ReplicatedRevision) -> Result<GraftResult, StoreError> {
        self.transaction(|unit| unit.insert_with_history(item))
            .map(|(result, _)| result)
    }

    /// Apply replicated items, one transaction each.
    ///
    /// Invalid items are recorded and skipped. A storage failure stops the
    /// batch. Once `deadline` passes the remaining items are abandoned;
    /// items already applied stay committed.
    pub fn insert_batch(&self, items: &[ReplicatedRevision], deadline: Option<Instant>) -> BatchReport {
        let mut report = BatchReport {
            outcomes: Vec::with_capacity(items.len()),
        };
        let mut stopped = false;

        for (index, item) in items.iter().enumerate() {
            if !stopped && deadline.is_some_and(|d| Instant::now() >= d) {
                log::warn!("Batch deadline passed, abandoning {} item(s)", items.len() - index);
                stopped = true;
            }
            if stopped {
                report.outcomes.push(BatchOutcome::Abandoned);
                continue;
            }
            match self.insert_with_history(item) {
                Ok(result) => report.outcomes.push(BatchOutcome::Applied(result)),
                Err(e) => {
                    if e.is_storage_failure() {
                        log::warn!("Stopping batch at item {index}: {e}");
                        stopped = true;
                    } else {
                        log::debug!("Rejected {}@{}: {e}", item.document_id, item.revision_id);
                    }
                    report.outcomes.push(BatchOutcome::Rejected(e));
                }
            }
        }
        report
    }

    /// Create a document (id generated when `None`).
    pub fn create_document(
        &self,
        document_id: Option<&str>,
        body: DocumentBody,
        attachments: &Attachments,
    ) -> Result<GraftResult, StoreError> {
        self.transaction(|unit| unit.create_document(document_id, body.clone(), attachments))
            .map(|(result, _)| result)
    }

    /// Write a new revision on top of the live leaf `previous`.
    pub fn update_document(
        &self,
        document_id: &str,
        previous: &str,
        body: DocumentBody,
        attachments: &Attachments,
    ) -> Result<GraftResult, StoreError> {
        self.transaction(|unit| unit.update_document(document_id, previous, body.clone(), attachments))
            .map(|(result, _)| result)
    }

    /// Tombstone the live leaf `previous`.
    pub fn delete_document(&self, document_id: &str, previous: &str) -> Result<GraftResult, StoreError> {
        self.transaction(|unit| unit.delete_document(document_id, previous))
            .map(|(result, _)| result)
    }

    /// Store a new local document (id generated when `None`).
    pub fn create_local_document(
        &self,
        document_id: Option<&str>,
        body: DocumentBody,
    ) -> Result<LocalDocument, StoreError> {
        self.transaction(|unit| unit.create_local_document(document_id, body.clone()))
            .map(|(document, _)| document)
    }

    /// Replace a local document's body; `previous` must be its revision.
    pub fn update_local_document(
        &self,
        document_id: &str,
        previous: &str,
        body: DocumentBody,
    ) -> Result<LocalDocument, StoreError> {
        self.transaction(|unit| unit.update_local_document(document_id, previous, body.clone()))
            .map(|(document, _)| document)
    }

    pub fn delete_local_document(&self, document_id: &str) -> Result<(), StoreError> {
        self.transaction(|unit| unit.delete_local_document(document_id))
            .map(|_| ())
    }

    // ─── Reads ────────────────────────────────────────────────────────

    pub fn get_local_document(&self, document_id: &str) -> Result<LocalDocument, StoreError> {
        let snapshot = self.db.snapshot();
        let cf = self.families()?;
        rows::read_local(&snapshot, &cf, document_id)?
            .ok_or_else(|| StoreError::DocumentNotFound(document_id.to_owned()))
    }

    /// The document's current revision, even if it is a tombstone.
    pub fn current_revision(&self, document_id: &str) -> Result<Revision, StoreError> {
        let snapshot = self.db.snapshot();
        let cf = self.families()?;
        let not_found = || StoreError::DocumentNotFound(document_id.to_owned());

        let number = rows::document_number(&snapshot, &cf, document_id)?.ok_or_else(not_found)?;
        rows::current_revision(&snapshot, &cf, document_id, number)?.ok_or_else(not_found)
    }

    /// The document's current revision; a deleted document is not found.
    pub fn get_document(&self, document_id: &str) -> Result<Revision, StoreError> {
        let revision = self.current_revision(document_id)?;
        if revision.deleted {
            return Err(StoreError::DocumentNotFound(document_id.to_owned()));
        }
        Ok(revision)
    }

    /// A specific revision of a document, on any branch.
    pub fn get_revision(&self, document_id: &str, revision: &str) -> Result<Revision, StoreError> {
        RevisionId::parse(revision)?;
        let snapshot = self.db.snapshot();
        let cf = self.families()?;
        let not_found = || StoreError::RevisionNotFound {
            document_id: document_id.to_owned(),
            revision: revision.to_owned(),
        };

        let number = rows::document_number(&snapshot, &cf, document_id)?.ok_or_else(not_found)?;
        let sequence = match snapshot.get_cf(cf.rev_ids, rows::revision_id_key(number, revision))? {
            Some(bytes) => rows::decode_u64(&bytes)?,
            None => return Err(not_found()),
        };
        rows::read_revision(&snapshot, &cf, document_id, sequence)?.ok_or_else(not_found)
    }

    pub fn contains_document(&self, document_id: &str) -> Result<bool, StoreError> {
        let cf = self.families()?;
        Ok(self.db.get_cf(cf.docs, document_id.as_bytes())?.is_some())
    }

    pub fn contains_revision(&self, document_id: &str, revision: &str) -> Result<bool, StoreError> {
        match self.get_revision(document_id, revision) {
            Ok(_) => Ok(true),
            Err(StoreError::RevisionNotFound { .. } | StoreError::MalformedRevisionId(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Every revision of the document, all branches.
    pub fn all_revisions(&self, document_id: &str) -> Result<DocumentTree, StoreError> {
        let snapshot = self.db.snapshot();
        let cf = self.families()?;
        let not_found = || StoreError::DocumentNotFound(document_id.to_owned());

        let number = rows::document_number(&snapshot, &cf, document_id)?.ok_or_else(not_found)?;
        rows::load_tree(&snapshot, &cf, document_id, number)?.ok_or_else(not_found)
    }

    /// Ancestor chain of a revision, oldest first, ending in the revision.
    ///
    /// This is the chain a peer needs to graft the revision.
    pub fn revision_history(&self, document_id: &str, revision: &str) -> Result<Vec<RevisionId>, StoreError> {
        let id = RevisionId::parse(revision)?;
        let tree = self.all_revisions(document_id)?;
        let target = tree.lookup(&id).ok_or_else(|| StoreError::RevisionNotFound {
            document_id: document_id.to_owned(),
            revision: revision.to_owned(),
        })?;
        Ok(tree.history_ids(target.sequence))
    }

    /// Attachment stubs recorded with a revision, by name.
    pub fn attachments(&self, revision: &Revision) -> Result<BTreeMap<String, AttachmentStub>, StoreError> {
        let snapshot = self.db.snapshot();
        let cf = self.families()?;
        Ok(rows::read_attachments(&snapshot, &cf, revision.sequence)?
            .into_iter()
            .collect())
    }

    /// Attachment bytes by digest.
    pub fn attachment_data(&self, digest: &str) -> Result<Vec<u8>, StoreError> {
        let cf = self.families()?;
        match self.db.get_cf(cf.blobs, digest.as_bytes())? {
            Some(compressed) => rows::decompress(&compressed),
            None => Err(StoreError::MissingAttachment(digest.to_owned())),
        }
    }

    /// Of the candidate revision ids per document, those not stored here.
    ///
    /// Documents with nothing missing are left out. Lookups go to RocksDB
    /// in batches of `diff_batch_size` keys.
    pub fn revisions_diff(
        &self,
        candidates: &BTreeMap<String, BTreeSet<String>>,
    ) -> Result<BTreeMap<String, BTreeSet<String>>, StoreError> {
        let cf = self.families()?;
        let batch = self.config.diff_batch_size.max(1);

        let documents: Vec<&String> = candidates.keys().collect();
        let mut numbers: HashMap<&str, u64> = HashMap::with_capacity(documents.len());
        for chunk in documents.chunks(batch) {
            let values = self
                .db
                .multi_get_cf(chunk.iter().map(|id| (cf.docs, id.as_bytes())));
            for (id, value) in chunk.iter().zip(values) {
                if let Some(bytes) = value? {
                    numbers.insert(id.as_str(), rows::decode_u64(&bytes)?);
                }
            }
        }

        let mut missing: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut lookups: Vec<(&str, &str, Vec<u8>)> = Vec::new();
        for (document_id, revisions) in candidates {
            match numbers.get(document_id.as_str()) {
                Some(&number) => lookups.extend(
                    revisions
                        .iter()
                        .map(|rev| (document_id.as_str(), rev.as_str(), rows::revision_id_key(number, rev))),
                ),
                None if !revisions.is_empty() => {
                    missing.insert(document_id.clone(), revisions.clone());
                }
                None => {}
            }
        }

        for chunk in lookups.chunks(batch) {
            let values = self
                .db
                .multi_get_cf(chunk.iter().map(|(_, _, key)| (cf.rev_ids, key.as_slice())));
            for ((document_id, revision, _), value) in chunk.iter().zip(values) {
                if value?.is_none() {
                    missing
                        .entry((*document_id).to_owned())
                        .or_default()
                        .insert((*revision).to_owned());
                }
            }
        }

        log::debug!(
            "Diff of {} document(s): {} with missing revisions",
            candidates.len(),
            missing.len()
        );
        Ok(missing)
    }

    /// Documents with any row written in `(since, since + limit]`, each
    /// reported once with its current revision.
    ///
    /// A document counts as touched even when the new row lost a conflict
    /// or handed `current` back to an older leaf. Feed `last_sequence` into
    /// the next call to continue.
    pub fn changes(&self, since: u64, limit: usize) -> Result<Changes, StoreError> {
        let snapshot = self.db.snapshot();
        let cf = self.families()?;
        let until = since.saturating_add(limit as u64);
        let mut last_sequence = since;
        let mut touched: BTreeSet<u64> = BTreeSet::new();

        let start = rows::u64_key(since.saturating_add(1));
        for item in snapshot.iterator_cf(cf.revs, IteratorMode::From(&start, Direction::Forward)) {
            let (key, value) = item?;
            let sequence = rows::decode_u64(&key)?;
            if sequence > until {
                break;
            }
            touched.insert(RevisionRow::decode(&value)?.document);
            last_sequence = sequence;
        }

        let mut results = Vec::with_capacity(touched.len());
        for number in touched {
            let document_id = self.document_name(&snapshot, &cf, number)?;
            let revision = rows::current_revision(&snapshot, &cf, &document_id, number)?
                .ok_or_else(|| StoreError::StorageFailure(format!("'{document_id}' has no current revision")))?;
            results.push(revision);
        }
        results.sort_by_key(|r| r.sequence);

        log::debug!("Changes ({since}, {until}]: {} document(s)", results.len());
        Ok(Changes { last_sequence, results })
    }

    /// Live documents ordered by id, skipping `offset` and returning at
    /// most `limit`.
    pub fn all_documents(&self, offset: usize, limit: usize, descending: bool) -> Result<Vec<Revision>, StoreError> {
        let snapshot = self.db.snapshot();
        let cf = self.families()?;
        let mode = if descending { IteratorMode::End } else { IteratorMode::Start };
        let mut skipped = 0;
        let mut documents = Vec::new();

        for item in snapshot.iterator_cf(cf.docs, mode) {
            if documents.len() >= limit {
                break;
            }
            let (key, value) = item?;
            let document_id = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::Deserialization(format!("document id: {e}")))?;
            let number = rows::decode_u64(&value)?;
            let Some(revision) = rows::current_revision(&snapshot, &cf, &document_id, number)? else {
                continue;
            };
            if revision.deleted {
                continue;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            documents.push(revision);
        }
        Ok(documents)
    }

    /// Current revisions of the given documents, in the order asked for.
    ///
    /// Unknown ids are skipped. Tombstoned documents are included.
    pub fn documents_with_ids(&self, document_ids: &[&str]) -> Result<Vec<Revision>, StoreError> {
        let snapshot = self.db.snapshot();
        let cf = self.families()?;
        let mut documents = Vec::with_capacity(document_ids.len());
        for &document_id in document_ids {
            let Some(number) = rows::document_number(&snapshot, &cf, document_id)? else {
                log::debug!("No document found for id '{document_id}'");
                continue;
            };
            if let Some(revision) = rows::current_revision(&snapshot, &cf, document_id, number)? {
                documents.push(revision);
            }
        }
        Ok(documents)
    }

    /// Highest committed sequence, 0 for an empty store.
    pub fn last_sequence(&self) -> Result<u64, StoreError> {
        let cf = self.families()?;
        self.db
            .get_cf(cf.meta, LAST_SEQUENCE)?
            .map(|bytes| rows::decode_u64(&bytes))
            .transpose()
            .map(|sequence| sequence.unwrap_or(0))
    }

    /// Documents whose current revision is not a tombstone.
    pub fn document_count(&self) -> Result<u64, StoreError> {
        let snapshot = self.db.snapshot();
        let cf = self.families()?;
        let mut count = 0;
        for item in snapshot.iterator_cf(cf.current, IteratorMode::Start) {
            let (key, _) = item?;
            let sequence = rows::decode_u64(key.get(8..).unwrap_or_default())?;
            let bytes = snapshot
                .get_cf(cf.revs, rows::u64_key(sequence))?
                .ok_or_else(|| StoreError::StorageFailure(format!("current index points at missing row {sequence}")))?;
            if !RevisionRow::decode(&bytes)?.deleted {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Ids of documents with more than one live leaf.
    pub fn conflicted_document_ids(&self) -> Result<Vec<String>, StoreError> {
        let snapshot = self.db.snapshot();
        let cf = self.families()?;
        let mut conflicted = Vec::new();
        for item in snapshot.iterator_cf(cf.docs, IteratorMode::Start) {
            let (key, value) = item?;
            let document_id = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::Deserialization(format!("document id: {e}")))?;
            let number = rows::decode_u64(&value)?;
            if let Some(tree) = rows::load_tree(&snapshot, &cf, &document_id, number)? {
                if tree.has_conflicts() {
                    conflicted.push(document_id);
                }
            }
        }
        Ok(conflicted)
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn families(&self) -> Result<Families<'_>, StoreError> {
        Families::of(&self.db)
    }

    fn document_name<R: rows::RowRead>(&self, reader: &R, cf: &Families<'_>, number: u64) -> Result<String, StoreError> {
        let bytes = reader
            .read(cf.doc_names, &rows::u64_key(number))?
            .ok_or_else(|| StoreError::StorageFailure(format!("no name for document #{number}")))?;
        String::from_utf8(bytes).map_err(|e| StoreError::Deserialization(format!("document id: {e}")))
    }
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}

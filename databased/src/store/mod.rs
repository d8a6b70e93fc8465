mod lifecycle;

pub use lifecycle::CreateOutcome;

use crate::config::StoreConfig;
use crate::document::{self, DocSnapshot, Document, Fields, StoredDocument};
use crate::error::{DatabasedError, Missing, Result};
use crate::index::{IndexChange, Indexer, PropertyIndex};
use crate::layout::{self, Layout};
use crate::query::Condition;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// The main entry point: an embedded document store rooted at
/// `<project_dir>/databased`.
///
/// Every document is one JSON file. Writes keep a per-property index in step
/// with the document files, and queries scan those indexes instead of the
/// documents.
pub struct Store {
    config: StoreConfig,
    layout: Layout,
    indexer: Indexer,
}

impl Store {
    /// Create a store handle. Nothing is read or created until an operation runs.
    pub fn new(config: StoreConfig) -> Self {
        let layout = Layout::new(config.data_root());
        Store {
            indexer: Indexer::new(layout.clone()),
            layout,
            config,
        }
    }

    /// Shorthand for `Store::new(StoreConfig::new(project_dir))`.
    pub fn open(project_dir: impl Into<PathBuf>) -> Self {
        Store::new(StoreConfig::new(project_dir))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// The `databased` directory this store reads and writes.
    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    // ── Existence checks ─────────────────────────────────────────────

    fn require_database(&self, db: &str) -> Result<()> {
        document::validate_name("Database", db)?;
        if !self.layout.database_dir(db).is_dir() {
            return Err(Missing::Database {
                database: db.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn require_collection(&self, db: &str, col: &str) -> Result<()> {
        self.require_database(db)?;
        document::validate_name("Collection", col)?;
        if !self.layout.collection_dir(db, col).is_dir() {
            return Err(Missing::Collection {
                database: db.to_string(),
                collection: col.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Check the database and collection, then the `documents` directory.
    /// With `create`, a missing documents directory is created instead of failing.
    fn require_documents_dir(&self, db: &str, col: &str, create: bool) -> Result<PathBuf> {
        self.require_collection(db, col)?;
        let dir = self.layout.documents_dir(db, col);
        if !dir.is_dir() {
            if !create {
                return Err(Missing::Documents {
                    database: db.to_string(),
                    collection: col.to_string(),
                }
                .into());
            }
            std::fs::create_dir_all(&dir)?;
            log::debug!("Created documents directory for {db}/{col}");
        }
        Ok(dir)
    }

    fn validate_write(doc_id: &str, doc: &Fields) -> Result<()> {
        document::validate_name("Document", doc_id)?;
        for property in doc.keys() {
            document::validate_name("Property", property)?;
        }
        Ok(())
    }

    // ── Document store ───────────────────────────────────────────────

    /// Replace a document with `doc` and reindex every property in it.
    ///
    /// Properties the previous version carried but `doc` does not lose their
    /// index entries, so no index keeps pointing at a value the document no
    /// longer has.
    pub fn set_doc(&self, db: &str, col: &str, doc_id: &str, doc: Fields) -> Result<()> {
        Self::validate_write(doc_id, &doc)?;
        self.require_documents_dir(db, col, true)?;

        let path = self.layout.document_path(db, col, doc_id);
        let previous = match document::read_document(&path) {
            Ok(previous) => previous,
            Err(e) => {
                log::warn!("Replacing unreadable document {}: {e}", path.display());
                None
            }
        };

        document::write_json(&path, &doc)?;

        let mut changes: Vec<(String, IndexChange)> = doc
            .iter()
            .map(|(property, value)| (property.clone(), IndexChange::Set(value.clone())))
            .collect();
        if let Some(previous) = previous {
            for property in previous.keys() {
                if !doc.contains_key(property) && self.indexer.has_index(db, col, property) {
                    changes.push((property.clone(), IndexChange::Remove));
                }
            }
        }

        self.apply_index_changes(db, col, doc_id, changes)
    }

    /// Shallow-merge `doc` into the stored document, or write it as-is if the
    /// document does not exist yet.
    ///
    /// Only the properties present in `doc` are reindexed. Properties that are
    /// not mentioned keep their value and their existing index entry.
    pub fn update_doc(&self, db: &str, col: &str, doc_id: &str, doc: Fields) -> Result<()> {
        Self::validate_write(doc_id, &doc)?;
        self.require_documents_dir(db, col, true)?;

        let path = self.layout.document_path(db, col, doc_id);
        let merged = match document::read_document(&path)? {
            Some(mut existing) => {
                for (property, value) in &doc {
                    existing.insert(property.clone(), value.clone());
                }
                existing
            }
            None => doc.clone(),
        };

        document::write_json(&path, &merged)?;

        let changes = doc
            .into_iter()
            .map(|(property, value)| (property, IndexChange::Set(value)))
            .collect();
        self.apply_index_changes(db, col, doc_id, changes)
    }

    /// Look up a document. A missing document yields a snapshot whose
    /// `exists()` is false; a missing database or collection is an error.
    pub fn get_doc(&self, db: &str, col: &str, doc_id: &str) -> Result<DocSnapshot> {
        self.require_collection(db, col)?;
        document::validate_name("Document", doc_id)?;

        let path = self.layout.document_path(db, col, doc_id);
        Ok(match document::read_document(&path)? {
            Some(data) => DocSnapshot::found(doc_id, data),
            None => DocSnapshot::missing(doc_id),
        })
    }

    /// Delete a document and every index entry that references it.
    ///
    /// The stored content is needed to know which indexes to clean, so a
    /// document that is absent, blank or unparsable is reported as not found.
    /// An empty object `{}` is a real document: its file is removed and no
    /// index is touched.
    pub fn delete_doc(&self, db: &str, col: &str, doc_id: &str) -> Result<()> {
        self.require_documents_dir(db, col, false)?;
        document::validate_name("Document", doc_id)?;

        let not_found = || Missing::Document {
            collection: col.to_string(),
            id: doc_id.to_string(),
        };

        let path = self.layout.document_path(db, col, doc_id);
        let existing = match document::read_stored(&path) {
            Ok(StoredDocument::Object(fields)) => fields,
            Ok(StoredDocument::Absent | StoredDocument::Blank) => return Err(not_found().into()),
            Err(DatabasedError::Json(_) | DatabasedError::InvalidDocument(_)) => {
                return Err(not_found().into())
            }
            Err(e) => return Err(e),
        };

        document::remove_file(&path)?;

        let changes = existing
            .into_iter()
            .map(|(property, _)| (property, IndexChange::Remove))
            .collect();
        self.apply_index_changes(db, col, doc_id, changes)
    }

    /// Every non-empty document in a collection, up to `limit`.
    /// Enumeration order is whatever the directory listing yields.
    pub fn get_collection(&self, db: &str, col: &str, limit: Option<usize>) -> Result<Vec<Document>> {
        let dir = self.require_documents_dir(db, col, false)?;
        let max = limit.unwrap_or(usize::MAX);

        let mut docs = Vec::new();
        for path in list_json_files(&dir)? {
            if docs.len() >= max {
                break;
            }
            let Some(id) = layout::json_stem(&path) else {
                continue;
            };
            match document::read_document(&path) {
                Ok(Some(data)) if !data.is_empty() => docs.push(Document::new(id, data)),
                Ok(_) => {}
                Err(e) => {
                    log::warn!("Failed to read document {}: {e}", path.display());
                }
            }
        }

        Ok(docs)
    }

    // ── Typed API ────────────────────────────────────────────────────

    /// Replace a document with any value that serializes to a JSON object.
    pub fn set_document<T: Serialize>(&self, db: &str, col: &str, doc_id: &str, value: &T) -> Result<()> {
        self.set_doc(db, col, doc_id, document::to_fields(value)?)
    }

    /// Merge any value that serializes to a JSON object into a document.
    pub fn update_document<T: Serialize>(&self, db: &str, col: &str, doc_id: &str, value: &T) -> Result<()> {
        self.update_doc(db, col, doc_id, document::to_fields(value)?)
    }

    /// Read a document into a typed value, or `None` if it does not exist.
    pub fn get_document<T: DeserializeOwned>(&self, db: &str, col: &str, doc_id: &str) -> Result<Option<T>> {
        self.get_doc(db, col, doc_id)?
            .into_document()
            .map(|doc| doc.parse())
            .transpose()
    }

    // ── Query ────────────────────────────────────────────────────────

    /// Documents whose indexed value satisfies `condition`, at most `limit` of them.
    ///
    /// The property's index is scanned in entry order and matching documents
    /// are loaded from their files. A property that was never indexed matches
    /// nothing.
    pub fn query(
        &self,
        db: &str,
        col: &str,
        condition: &Condition,
        limit: Option<usize>,
    ) -> Result<Vec<Document>> {
        self.require_collection(db, col)?;
        document::validate_name("Property", &condition.property)?;

        let Some(index) = self.indexer.load(db, col, &condition.property)? else {
            return Ok(Vec::new());
        };

        let max = limit.unwrap_or(usize::MAX);
        let mut results = Vec::new();
        for (_, entry) in index.iter() {
            if results.len() >= max {
                break;
            }
            if !condition.matches(entry) {
                continue;
            }

            let path = self.layout.document_path(db, col, &entry.document_id);
            match document::read_document(&path)? {
                Some(data) if !data.is_empty() => {
                    results.push(Document::new(entry.document_id.clone(), data))
                }
                Some(_) => {
                    log::debug!("Skipping empty document '{}'", entry.document_id);
                }
                None => {
                    log::warn!(
                        "Index {col}.{} references missing document '{}'",
                        condition.property,
                        entry.document_id
                    );
                }
            }
        }

        log::debug!("Query {db}/{col} where {condition} matched {}", results.len());
        Ok(results)
    }

    /// Read a property index as it is on disk, or `None` if it was never built.
    pub fn load_index(&self, db: &str, col: &str, property: &str) -> Result<Option<PropertyIndex>> {
        self.require_collection(db, col)?;
        document::validate_name("Property", property)?;
        self.indexer.load(db, col, property)
    }

    /// Regenerate every property index of a collection from its document files.
    /// Returns the number of index entries written.
    pub fn rebuild_indexes(&self, db: &str, col: &str) -> Result<usize> {
        self.require_collection(db, col)?;
        let docs = if self.layout.documents_dir(db, col).is_dir() {
            self.get_collection(db, col, None)?
        } else {
            Vec::new()
        };
        self.indexer.rebuild(db, col, &docs)
    }

    /// Run one reindex per property, concurrently when there is more than one.
    ///
    /// Every change is attempted; the first failure is returned once all have
    /// finished. Changes that succeeded are kept.
    fn apply_index_changes(
        &self,
        db: &str,
        col: &str,
        doc_id: &str,
        changes: Vec<(String, IndexChange)>,
    ) -> Result<()> {
        let results: Vec<Result<()>> = if changes.len() <= 1 {
            changes
                .into_iter()
                .map(|(property, change)| self.indexer.reindex(db, col, &property, change, doc_id))
                .collect()
        } else {
            run_bounded(changes, reindex_workers(), |(property, change)| {
                self.indexer.reindex(db, col, &property, change, doc_id)
            })
        };

        let mut first_error = None;
        for result in results {
            if let Err(e) = result {
                log::warn!("Reindex of {db}/{col}/{doc_id} failed: {e}");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn reindex_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(4)
}

/// Run `task` over `items` on scoped threads, at most `workers` at a time.
///
/// A thread that cannot be spawned or that panics turns into an error for
/// its item; the other items still run.
fn run_bounded<T, F>(items: Vec<T>, workers: usize, task: F) -> Vec<Result<()>>
where
    T: Send,
    F: Fn(T) -> Result<()> + Sync,
{
    let workers = workers.max(1);
    let task = &task;
    let mut results = Vec::with_capacity(items.len());
    let mut pending = items.into_iter().peekable();

    std::thread::scope(|scope| {
        while pending.peek().is_some() {
            let mut handles = Vec::with_capacity(workers);
            for item in pending.by_ref().take(workers) {
                match std::thread::Builder::new().spawn_scoped(scope, move || task(item)) {
                    Ok(handle) => handles.push(handle),
                    Err(e) => results.push(Err(DatabasedError::Io(e))),
                }
            }
            for handle in handles {
                results.push(handle.join().unwrap_or_else(|_| {
                    Err(DatabasedError::Other("Index worker panicked".to_string()))
                }));
            }
        }
    });

    results
}

/// All `*.json` files directly inside a directory.
fn list_json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/*.{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        layout::JSON_EXTENSION
    );
    Ok(glob::glob(&pattern)?.filter_map(|r| r.ok()).collect())
}

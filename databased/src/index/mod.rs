// Per-property secondary indexes, kept in step with document writes.
//
// One index file exists per (collection, property). It maps an opaque unique
// key to `{ "key": <property>, "value": <value>, "document": <id> }`, and holds
// at most one entry per document id.

use crate::document::{self, Document};
use crate::error::{DatabasedError, Missing, Result};
use crate::layout::{self, Layout};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// One index record: the value a property had on a document when it was last written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(rename = "key")]
    pub property: String,
    pub value: serde_json::Value,
    #[serde(rename = "document")]
    pub document_id: String,
}

/// What a write does to one property's index for one document.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexChange {
    /// Replace the document's entry with this value.
    Set(serde_json::Value),
    /// Drop the document's entry.
    Remove,
}

/// An index file loaded into memory. Entries keep file order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertyIndex {
    entries: Vec<(String, IndexEntry)>,
}

impl PropertyIndex {
    /// Parse index file content. Blank content is an empty index.
    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(PropertyIndex::default());
        }

        let raw: serde_json::Map<String, serde_json::Value> = serde_json::from_str(content)?;
        let mut entries = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            let entry: IndexEntry = serde_json::from_value(value)?;
            entries.push((key, entry));
        }
        Ok(PropertyIndex { entries })
    }

    /// Read an index file. Returns `None` if it does not exist.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Some(Self::parse(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the whole mapping, pretty-printed.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut raw = serde_json::Map::with_capacity(self.entries.len());
        for (key, entry) in &self.entries {
            raw.insert(key.clone(), serde_json::to_value(entry)?);
        }
        document::write_json(path, &raw)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries with their keys, in file order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &IndexEntry)> {
        self.entries.iter().map(|(key, entry)| (key.as_str(), entry))
    }

    /// Entries that reference the given document.
    pub fn entries_for<'a>(&'a self, document_id: &'a str) -> impl Iterator<Item = &'a IndexEntry> {
        self.entries
            .iter()
            .map(|(_, entry)| entry)
            .filter(move |entry| entry.document_id == document_id)
    }

    /// Drop every entry referencing the document. Returns how many were dropped.
    pub fn remove_document(&mut self, document_id: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|(_, entry)| entry.document_id != document_id);
        before - self.entries.len()
    }

    pub fn insert(&mut self, key: String, entry: IndexEntry) {
        self.entries.push((key, entry));
    }
}

// ── Entry keys ───────────────────────────────────────────────────

/// Hands out unique, lowercase, monotonically increasing ULIDs.
struct KeyGenerator {
    inner: Mutex<ulid::Generator>,
}

impl KeyGenerator {
    fn new() -> Self {
        KeyGenerator {
            inner: Mutex::new(ulid::Generator::new()),
        }
    }

    fn next_key(&self) -> Result<String> {
        let mut generator = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let ulid = generator
            .generate()
            .map_err(|e| DatabasedError::Other(format!("Index key generation failed: {e}")))?;
        Ok(ulid.to_string().to_lowercase())
    }
}

// ── Per-file locks ───────────────────────────────────────────────

/// One mutex per index file path, created on first use.
///
/// A lock that only the map still holds is idle and is dropped on the next
/// lookup, so the map grows with the number of index files in use at once
/// rather than every file ever touched.
#[derive(Debug, Default)]
struct IndexLocks {
    files: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl IndexLocks {
    fn for_path(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files.retain(|_, lock| Arc::strong_count(lock) > 1);
        files
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

// ── Index maintainer ─────────────────────────────────────────────

/// Keeps property index files consistent with document writes.
///
/// Each reindex holds the file's lock across read, remove, insert and persist,
/// so writers in one process never interleave on the same index file.
pub struct Indexer {
    layout: Layout,
    locks: IndexLocks,
    keys: KeyGenerator,
}

impl Indexer {
    pub fn new(layout: Layout) -> Self {
        Indexer {
            layout,
            locks: IndexLocks::default(),
            keys: KeyGenerator::new(),
        }
    }

    /// Whether an index file exists for this property.
    pub fn has_index(&self, db: &str, col: &str, property: &str) -> bool {
        self.layout.index_path(db, col, property).is_file()
    }

    /// Load a property index, or `None` if the property was never indexed.
    pub fn load(&self, db: &str, col: &str, property: &str) -> Result<Option<PropertyIndex>> {
        PropertyIndex::read(&self.layout.index_path(db, col, property))
    }

    /// Apply one property change for one document.
    ///
    /// `Set` creates the index file if needed. `Remove` on a property with no
    /// index file fails with `Missing::Index`: a document cannot carry a value
    /// its last write never indexed.
    pub fn reindex(
        &self,
        db: &str,
        col: &str,
        property: &str,
        change: IndexChange,
        document_id: &str,
    ) -> Result<()> {
        let path = self.layout.index_path(db, col, property);
        let lock = self.locks.for_path(&path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let existing = PropertyIndex::read(&path)?;

        match change {
            IndexChange::Set(value) => {
                let mut index = match existing {
                    Some(index) => index,
                    None => {
                        if let Some(dir) = path.parent() {
                            std::fs::create_dir_all(dir)?;
                        }
                        PropertyIndex::default()
                    }
                };
                let removed = index.remove_document(document_id);
                if removed > 1 {
                    log::warn!(
                        "Index {col}.{property} held {removed} entries for document '{document_id}'"
                    );
                }
                index.insert(
                    self.keys.next_key()?,
                    IndexEntry {
                        property: property.to_string(),
                        value,
                        document_id: document_id.to_string(),
                    },
                );
                index.write(&path)?;
                log::debug!("Indexed {col}.{property} for document '{document_id}'");
            }
            IndexChange::Remove => {
                let mut index = existing.ok_or_else(|| Missing::Index {
                    collection: col.to_string(),
                    property: property.to_string(),
                })?;
                if index.remove_document(document_id) > 0 {
                    index.write(&path)?;
                    log::debug!("Removed {col}.{property} entry for document '{document_id}'");
                }
            }
        }

        Ok(())
    }

    /// Regenerate every property index of a collection from its documents.
    /// Index files for properties no document carries are removed.
    /// Returns the number of entries written.
    pub fn rebuild(&self, db: &str, col: &str, documents: &[Document]) -> Result<usize> {
        let dir = self.layout.index_dir(db, col);
        std::fs::create_dir_all(&dir)?;

        let mut rebuilt: BTreeMap<&str, PropertyIndex> = BTreeMap::new();
        for doc in documents {
            for (property, value) in &doc.data {
                rebuilt.entry(property.as_str()).or_default().insert(
                    self.keys.next_key()?,
                    IndexEntry {
                        property: property.clone(),
                        value: value.clone(),
                        document_id: doc.id.clone(),
                    },
                );
            }
        }

        for stale in list_index_files(&dir)? {
            let keep = layout::json_stem(&stale)
                .map(|property| rebuilt.contains_key(property))
                .unwrap_or(false);
            if !keep {
                let lock = self.locks.for_path(&stale);
                let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
                document::remove_file(&stale)?;
                log::debug!("Removed unused index {}", stale.display());
            }
        }

        let mut written = 0;
        for (property, index) in &rebuilt {
            let path = self.layout.index_path(db, col, property);
            let lock = self.locks.for_path(&path);
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            index.write(&path)?;
            written += index.len();
        }

        log::info!(
            "Rebuilt {} indexes ({written} entries) for {db}/{col}",
            rebuilt.len()
        );
        Ok(written)
    }
}

/// All `*.json` files directly inside an index directory.
fn list_index_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/*.{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        layout::JSON_EXTENSION
    );
    Ok(glob::glob(&pattern)?.filter_map(|r| r.ok()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Indexer) {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path().join("databased"));
        std::fs::create_dir_all(layout.index_dir("shop", "users")).unwrap();
        (tmp, Indexer::new(layout))
    }

    fn load(indexer: &Indexer, property: &str) -> PropertyIndex {
        indexer.load("shop", "users", property).unwrap().unwrap()
    }

    #[test]
    fn test_parse_legacy_timestamp_keys() {
        let content = r#"{
  "1700000000000": { "key": "age", "value": 31, "document": "alice" },
  "1700000000001": { "key": "age", "value": 25, "document": "bob" }
}"#;
        let index = PropertyIndex::parse(content).unwrap();
        let keys: Vec<&str> = index.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["1700000000000", "1700000000001"]);
        assert_eq!(index.entries_for("bob").next().unwrap().value, json!(25));
    }

    #[test]
    fn test_parse_blank_is_empty() {
        assert!(PropertyIndex::parse("").unwrap().is_empty());
        assert!(PropertyIndex::parse("\n  ").unwrap().is_empty());
    }

    #[test]
    fn test_set_creates_index_file() {
        let (_tmp, indexer) = setup();
        assert!(!indexer.has_index("shop", "users", "age"));

        indexer
            .reindex("shop", "users", "age", IndexChange::Set(json!(31)), "alice")
            .unwrap();

        let index = load(&indexer, "age");
        assert_eq!(index.len(), 1);
        let (_, entry) = index.iter().next().unwrap();
        assert_eq!(
            entry,
            &IndexEntry {
                property: "age".into(),
                value: json!(31),
                document_id: "alice".into(),
            }
        );
    }

    #[test]
    fn test_set_creates_missing_index_directory() {
        let (_tmp, indexer) = setup();
        indexer
            .reindex("shop", "orders", "total", IndexChange::Set(json!(9.5)), "o1")
            .unwrap();
        assert!(indexer.has_index("shop", "orders", "total"));
    }

    #[test]
    fn test_set_replaces_previous_entry_for_document() {
        let (_tmp, indexer) = setup();
        indexer
            .reindex("shop", "users", "age", IndexChange::Set(json!(31)), "alice")
            .unwrap();
        indexer
            .reindex("shop", "users", "age", IndexChange::Set(json!(25)), "bob")
            .unwrap();
        indexer
            .reindex("shop", "users", "age", IndexChange::Set(json!(32)), "alice")
            .unwrap();

        let index = load(&indexer, "age");
        assert_eq!(index.len(), 2);
        let alice: Vec<&IndexEntry> = index.entries_for("alice").collect();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].value, json!(32));
    }

    #[test]
    fn test_keys_are_unique_and_increasing() {
        let (_tmp, indexer) = setup();
        for i in 0..20 {
            indexer
                .reindex(
                    "shop",
                    "users",
                    "n",
                    IndexChange::Set(json!(i)),
                    &format!("doc-{i}"),
                )
                .unwrap();
        }
        let index = load(&indexer, "n");
        let keys: Vec<&str> = index.iter().map(|(k, _)| k).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(keys.len(), 20);
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_set_on_blank_index_file() {
        let (_tmp, indexer) = setup();
        let path = indexer.layout.index_path("shop", "users", "age");
        std::fs::write(&path, "").unwrap();

        indexer
            .reindex("shop", "users", "age", IndexChange::Set(json!(40)), "carol")
            .unwrap();
        assert_eq!(load(&indexer, "age").len(), 1);
    }

    #[test]
    fn test_remove_drops_entry() {
        let (_tmp, indexer) = setup();
        indexer
            .reindex("shop", "users", "age", IndexChange::Set(json!(31)), "alice")
            .unwrap();
        indexer
            .reindex("shop", "users", "age", IndexChange::Remove, "alice")
            .unwrap();

        let index = load(&indexer, "age");
        assert!(index.is_empty());
        assert!(indexer.has_index("shop", "users", "age"));
    }

    #[test]
    fn test_remove_without_index_file_is_not_found() {
        let (_tmp, indexer) = setup();
        let err = indexer
            .reindex("shop", "users", "age", IndexChange::Remove, "alice")
            .unwrap_err();
        assert_eq!(
            err.missing(),
            Some(&Missing::Index {
                collection: "users".into(),
                property: "age".into(),
            })
        );
    }

    #[test]
    fn test_concurrent_sets_on_one_index_lose_nothing() {
        let (_tmp, indexer) = setup();
        std::thread::scope(|scope| {
            for i in 0..16 {
                let indexer = &indexer;
                scope.spawn(move || {
                    indexer
                        .reindex(
                            "shop",
                            "users",
                            "score",
                            IndexChange::Set(json!(i)),
                            &format!("doc-{i}"),
                        )
                        .unwrap();
                });
            }
        });
        assert_eq!(load(&indexer, "score").len(), 16);
    }

    #[test]
    fn test_idle_locks_are_released() {
        let (_tmp, indexer) = setup();
        for i in 0..20 {
            indexer
                .reindex("shop", "users", &format!("p{i}"), IndexChange::Set(json!(i)), "d")
                .unwrap();
        }
        let tracked = indexer.locks.files.lock().unwrap().len();
        assert!(tracked <= 1, "tracked {tracked} locks");

        let held = indexer.locks.for_path(Path::new("a.json"));
        let again = indexer.locks.for_path(Path::new("a.json"));
        assert!(Arc::ptr_eq(&held, &again));
    }

    #[test]
    fn test_rebuild_replaces_contents_and_drops_unused_files() {
        let (_tmp, indexer) = setup();
        indexer
            .reindex("shop", "users", "legacy", IndexChange::Set(json!("x")), "ghost")
            .unwrap();

        let mut a = crate::document::Fields::new();
        a.insert("age".into(), json!(31));
        a.insert("name".into(), json!("Alice"));
        let mut b = crate::document::Fields::new();
        b.insert("age".into(), json!(25));
        let docs = vec![Document::new("alice", a), Document::new("bob", b)];

        let written = indexer.rebuild("shop", "users", &docs).unwrap();
        assert_eq!(written, 3);
        assert!(!indexer.has_index("shop", "users", "legacy"));
        assert_eq!(load(&indexer, "age").len(), 2);
        assert_eq!(load(&indexer, "name").len(), 1);
    }
}

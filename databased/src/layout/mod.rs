// On-disk layout of a data root:
//
//   <root>/databases/<db>/collections/<col>/documents/<doc>.json
//   <root>/indexing/databases/<db>/collections/<col>/<property>.json
//   <root>/settings.json

use std::path::{Path, PathBuf};

pub const DATABASES_DIR: &str = "databases";
pub const COLLECTIONS_DIR: &str = "collections";
pub const DOCUMENTS_DIR: &str = "documents";
pub const INDEXING_DIR: &str = "indexing";
pub const SETTINGS_FILE: &str = "settings.json";
pub const JSON_EXTENSION: &str = "json";

/// Maps database, collection, document and property names to paths.
/// Pure string joining; nothing here touches the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Layout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE)
    }

    // ── Documents tree ───────────────────────────────────────────────

    pub fn databases_dir(&self) -> PathBuf {
        self.root.join(DATABASES_DIR)
    }

    pub fn database_dir(&self, db: &str) -> PathBuf {
        self.databases_dir().join(db)
    }

    pub fn collections_dir(&self, db: &str) -> PathBuf {
        self.database_dir(db).join(COLLECTIONS_DIR)
    }

    pub fn collection_dir(&self, db: &str, col: &str) -> PathBuf {
        self.collections_dir(db).join(col)
    }

    pub fn documents_dir(&self, db: &str, col: &str) -> PathBuf {
        self.collection_dir(db, col).join(DOCUMENTS_DIR)
    }

    pub fn document_path(&self, db: &str, col: &str, doc_id: &str) -> PathBuf {
        self.documents_dir(db, col).join(json_file_name(doc_id))
    }

    // ── Indexing tree ────────────────────────────────────────────────

    /// `indexing/databases/<db>`, the index-side twin of `database_dir`.
    pub fn index_database_dir(&self, db: &str) -> PathBuf {
        self.root.join(INDEXING_DIR).join(DATABASES_DIR).join(db)
    }

    pub fn index_collections_dir(&self, db: &str) -> PathBuf {
        self.index_database_dir(db).join(COLLECTIONS_DIR)
    }

    pub fn index_dir(&self, db: &str, col: &str) -> PathBuf {
        self.index_collections_dir(db).join(col)
    }

    pub fn index_path(&self, db: &str, col: &str, property: &str) -> PathBuf {
        self.index_dir(db, col).join(json_file_name(property))
    }

    /// Resolve any level of the documents tree, or an index file when a property is given.
    pub fn resolve(
        &self,
        db: &str,
        col: &str,
        doc_id: Option<&str>,
        property: Option<&str>,
    ) -> PathBuf {
        match (doc_id, property) {
            (_, Some(property)) => self.index_path(db, col, property),
            (Some(doc_id), None) => self.document_path(db, col, doc_id),
            (None, None) => self.collection_dir(db, col),
        }
    }
}

fn json_file_name(stem: &str) -> String {
    format!("{stem}.{JSON_EXTENSION}")
}

/// Recover a document id or property name from a `<stem>.json` path.
pub fn json_stem(path: &Path) -> Option<&str> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(JSON_EXTENSION) => path.file_stem().and_then(|s| s.to_str()),
        _ => None,
    }
}

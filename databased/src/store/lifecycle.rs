// Database and collection bootstrap, listing, and backup-by-copy.

use super::Store;
use crate::config::Settings;
use crate::document;
use crate::error::{DatabasedError, Result};
use crate::layout::Layout;
use std::path::{Path, PathBuf};

/// Result of a create call. Creating something that already exists is
/// reported, not treated as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

impl CreateOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, CreateOutcome::Created)
    }
}

impl Store {
    /// Create `databases/<name>/collections` and the matching indexing directory.
    pub fn create_database(&self, name: &str) -> Result<CreateOutcome> {
        document::validate_name("Database", name)?;

        let collections = self.layout.collections_dir(name);
        let outcome = if collections.is_dir() {
            log::info!("Database '{name}' already exists");
            CreateOutcome::AlreadyExists
        } else {
            std::fs::create_dir_all(&collections)?;
            log::info!("Created database '{name}' at {}", collections.display());
            CreateOutcome::Created
        };

        std::fs::create_dir_all(self.layout.index_collections_dir(name))?;
        Ok(outcome)
    }

    /// Create a collection's `documents` directory and its index directory.
    /// The database must already exist.
    pub fn create_collection(&self, db: &str, name: &str) -> Result<CreateOutcome> {
        self.require_database(db)?;
        document::validate_name("Collection", name)?;

        let documents = self.layout.documents_dir(db, name);
        let outcome = if documents.is_dir() {
            log::info!("Collection '{name}' already exists in database '{db}'");
            CreateOutcome::AlreadyExists
        } else {
            std::fs::create_dir_all(&documents)?;
            log::info!("Created collection '{name}' at {}", documents.display());
            CreateOutcome::Created
        };

        std::fs::create_dir_all(self.layout.index_dir(db, name))?;
        Ok(outcome)
    }

    /// Names of all databases, sorted.
    pub fn list_databases(&self) -> Result<Vec<String>> {
        let dir = self.layout.databases_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        list_subdirectories(&dir)
    }

    /// Names of all collections in a database, sorted.
    pub fn list_collections(&self, db: &str) -> Result<Vec<String>> {
        self.require_database(db)?;
        let dir = self.layout.collections_dir(db);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        list_subdirectories(&dir)
    }

    /// Copy one database, documents and indexes, into
    /// `<destination_root>/<db>-<unix millis>/`.
    ///
    /// The copy keeps the data-root layout, so the returned directory can be
    /// opened as the `databased` directory of another store.
    pub fn backup_database(&self, db: &str, destination_root: &Path) -> Result<PathBuf> {
        self.require_database(db)?;

        let stamp = chrono::Utc::now().timestamp_millis();
        let destination = destination_root.join(format!("{db}-{stamp}"));
        let target = Layout::new(&destination);

        let copied = copy_tree(&self.layout.database_dir(db), &target.database_dir(db))?;
        let source_index = self.layout.index_database_dir(db);
        let copied_index = if source_index.is_dir() {
            copy_tree(&source_index, &target.index_database_dir(db))?
        } else {
            0
        };

        log::info!(
            "Backed up database '{db}' to {} ({copied} document files, {copied_index} index files)",
            destination.display()
        );
        Ok(destination)
    }

    /// Back up into the `backup_path` configured in `settings.json`.
    pub fn backup_database_with_settings(&self, db: &str) -> Result<PathBuf> {
        let settings = Settings::load(&self.layout)?;
        let backup_root = settings.backup_path.ok_or_else(|| {
            DatabasedError::Config(format!(
                "'backup_path' is not set in {}",
                self.layout.settings_path().display()
            ))
        })?;
        self.backup_database(db, &backup_root)
    }
}

fn list_subdirectories(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Recursively copy `source` into `destination`. Returns the number of files copied.
fn copy_tree(source: &Path, destination: &Path) -> Result<usize> {
    std::fs::create_dir_all(destination)?;

    let pattern = format!("{}/**/*", glob::Pattern::escape(&source.to_string_lossy()));
    let mut copied = 0;
    for path in glob::glob(&pattern)?.filter_map(|r| r.ok()) {
        let relative = path.strip_prefix(source).map_err(|e| {
            DatabasedError::Other(format!("Cannot copy {}: {e}", path.display()))
        })?;
        let target = destination.join(relative);
        if path.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&path, &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

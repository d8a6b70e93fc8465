use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabasedError {
    #[error("{0}")]
    NotFound(Missing),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Glob error: {0}")]
    Glob(#[from] glob::PatternError),

    #[error("{0}")]
    Other(String),
}

/// The path segment that was absent when an operation required it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Missing {
    #[error("Database '{database}' not found")]
    Database { database: String },

    #[error("Collection '{collection}' not found in database '{database}'")]
    Collection { database: String, collection: String },

    #[error("No documents directory in collection '{collection}' (database '{database}')")]
    Documents { database: String, collection: String },

    #[error("Document '{id}' not found in collection '{collection}'")]
    Document { collection: String, id: String },

    #[error("No index found for property '{property}' in collection '{collection}'")]
    Index { collection: String, property: String },
}

impl DatabasedError {
    /// The missing segment, if this is a not-found error.
    pub fn missing(&self) -> Option<&Missing> {
        match self {
            DatabasedError::NotFound(missing) => Some(missing),
            _ => None,
        }
    }
}

impl From<Missing> for DatabasedError {
    fn from(missing: Missing) -> Self {
        DatabasedError::NotFound(missing)
    }
}

pub type Result<T> = std::result::Result<T, DatabasedError>;

pub mod config;
pub mod layout;
pub mod document;
pub mod index;
pub mod query;
pub mod store;
pub mod error;

pub use config::{Settings, StoreConfig};
pub use document::{DocSnapshot, Document, Fields, StoredDocument};
pub use error::{DatabasedError, Missing, Result};
pub use index::{IndexEntry, PropertyIndex};
pub use query::{limit, where_, Condition, Operator};
pub use store::{CreateOutcome, Store};

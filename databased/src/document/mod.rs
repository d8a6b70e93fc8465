// Document I/O - read/write one pretty-printed JSON object per file

use crate::error::{DatabasedError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Property name to value, in the order the properties were written.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// A loaded document: its id (the file stem) and its properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Fields) -> Self {
        Document {
            id: id.into(),
            data,
        }
    }

    /// Deserialize the properties into a typed value.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        let value = serde_json::Value::Object(self.data.clone());
        Ok(serde_json::from_value(value)?)
    }
}

/// Result of a single-document lookup. A missing document is a normal
/// outcome here, not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct DocSnapshot {
    id: String,
    data: Option<Fields>,
}

impl DocSnapshot {
    pub(crate) fn found(id: &str, data: Fields) -> Self {
        DocSnapshot {
            id: id.to_string(),
            data: Some(data),
        }
    }

    pub(crate) fn missing(id: &str) -> Self {
        DocSnapshot {
            id: id.to_string(),
            data: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    pub fn data(&self) -> Option<&Fields> {
        self.data.as_ref()
    }

    pub fn into_document(self) -> Option<Document> {
        let id = self.id;
        self.data.map(|data| Document { id, data })
    }
}

/// Convert any serializable value into document fields.
/// Fails unless the value serializes to a JSON object.
pub fn to_fields<T: Serialize>(value: &T) -> Result<Fields> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(fields) => Ok(fields),
        other => Err(DatabasedError::InvalidDocument(format!(
            "expected a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

/// What a document path holds on disk.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredDocument {
    Absent,
    Blank,
    Object(Fields),
}

/// Read a document file, telling a missing file and a blank file apart from
/// a parsed object. `{}` is an object, not a blank file.
pub fn read_stored(path: &Path) -> Result<StoredDocument> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StoredDocument::Absent),
        Err(e) => return Err(e.into()),
    };

    if content.trim().is_empty() {
        return Ok(StoredDocument::Blank);
    }

    match serde_json::from_str::<serde_json::Value>(&content)? {
        serde_json::Value::Object(fields) => Ok(StoredDocument::Object(fields)),
        other => Err(DatabasedError::InvalidDocument(format!(
            "{} holds a JSON {}, not an object",
            path.display(),
            json_type_name(&other)
        ))),
    }
}

/// Read a document file. Returns `None` if the file does not exist and an
/// empty mapping if the file exists but is blank.
pub fn read_document(path: &Path) -> Result<Option<Fields>> {
    Ok(match read_stored(path)? {
        StoredDocument::Absent => None,
        StoredDocument::Blank => Some(Fields::new()),
        StoredDocument::Object(fields) => Some(fields),
    })
}

/// Serialize a value as pretty-printed JSON and atomically replace `path` with it.
/// The parent directory must already exist.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let dir = path.parent().ok_or_else(|| {
        DatabasedError::Other(format!("No parent directory for {}", path.display()))
    })?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Remove a file. Removing a file that is already gone is not an error.
pub fn remove_file(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Names become path segments, so they must be a single, ordinary segment.
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DatabasedError::InvalidName(format!("{kind} name is empty")));
    }
    if name == "." || name == ".." {
        return Err(DatabasedError::InvalidName(format!(
            "{kind} name '{name}' is reserved"
        )));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(DatabasedError::InvalidName(format!(
            "{kind} name '{name}' contains a path separator or NUL"
        )));
    }
    Ok(())
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read_keeps_property_order() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("alice.json");
        let fields = to_fields(&json!({ "zeta": 1, "alpha": "a", "mid": [true, null] })).unwrap();

        write_json(&path, &fields).unwrap();
        let loaded = read_document(&path).unwrap().unwrap();

        let keys: Vec<&str> = loaded.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
        assert_eq!(loaded, fields);
    }

    #[test]
    fn test_written_file_is_pretty_printed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("doc.json");
        write_json(&path, &json!({ "a": 1 })).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\n  \"a\": 1\n}");
    }

    #[test]
    fn test_read_missing_and_blank() {
        let tmp = TempDir::new().unwrap();
        assert!(read_document(&tmp.path().join("nope.json")).unwrap().is_none());

        let blank = tmp.path().join("blank.json");
        std::fs::write(&blank, "  \n").unwrap();
        assert!(read_document(&blank).unwrap().unwrap().is_empty());
    }

    #[test]
    fn test_read_stored_tells_blank_from_empty_object() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(
            read_stored(&tmp.path().join("nope.json")).unwrap(),
            StoredDocument::Absent
        );

        let blank = tmp.path().join("blank.json");
        std::fs::write(&blank, "\n").unwrap();
        assert_eq!(read_stored(&blank).unwrap(), StoredDocument::Blank);

        let empty = tmp.path().join("empty.json");
        std::fs::write(&empty, "{}").unwrap();
        assert_eq!(
            read_stored(&empty).unwrap(),
            StoredDocument::Object(Fields::new())
        );
    }

    #[test]
    fn test_read_rejects_non_object() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("list.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(
            read_document(&path),
            Err(DatabasedError::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_remove_file_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("gone.json");
        std::fs::write(&path, "{}").unwrap();
        assert!(remove_file(&path).unwrap());
        assert!(!remove_file(&path).unwrap());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("Document", "alice-01").is_ok());
        assert!(validate_name("Document", "").is_err());
        assert!(validate_name("Document", "..").is_err());
        assert!(validate_name("Property", "a/b").is_err());
        assert!(validate_name("Property", "a\\b").is_err());
    }

    #[test]
    fn test_to_fields_requires_object() {
        assert!(to_fields(&json!({ "a": 1 })).is_ok());
        assert!(matches!(
            to_fields(&json!(42)),
            Err(DatabasedError::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_snapshot_accessors() {
        let snap = DocSnapshot::missing("bob");
        assert!(!snap.exists());
        assert!(snap.data().is_none());
        assert_eq!(snap.id(), "bob");

        let mut fields = Fields::new();
        fields.insert("a".into(), json!(1));
        let snap = DocSnapshot::found("bob", fields.clone());
        assert!(snap.exists());
        assert_eq!(snap.into_document(), Some(Document::new("bob", fields)));
    }
}

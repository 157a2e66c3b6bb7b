//! Whole-document JSON persistence.
//!
//! A [`JsonStore`] is a JSON array on disk that acts as the single source of
//! truth for a stage. Every mutation rewrites the complete document into a
//! synced temp file in the same directory, which is then persisted over the
//! previous document, so a crash loses at most the item that was being
//! processed. The file is never held open between operations. Concurrent
//! writers are not coordinated.

use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct JsonStore<T> {
    path: PathBuf,
    _item: PhantomData<fn() -> T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _item: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Reads the document. A missing file is an empty document; malformed
    /// JSON is an error.
    pub fn load(&self) -> Result<Vec<T>, AppError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error("read", e)),
        };
        serde_json::from_str(&raw).map_err(|e| {
            AppError::StoreError(format!("Invalid JSON in {}: {e}", self.path.display()))
        })
    }

    /// Like [`load`](Self::load), but a malformed document is treated as
    /// empty.
    pub fn load_or_default(&self) -> Result<Vec<T>, AppError> {
        match self.load() {
            Ok(items) => Ok(items),
            Err(AppError::StoreError(msg)) if self.exists() && msg.starts_with("Invalid JSON") => {
                tracing::warn!(path = %self.path.display(), "{msg}; starting from an empty document");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Replaces the whole document with `items`.
    ///
    /// A failed write leaves the previous document and no temp file behind.
    pub fn save(&self, items: &[T]) -> Result<(), AppError> {
        let dir = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                fs::create_dir_all(parent)
                    .map_err(|e| self.io_error("create directory for", e))?;
                parent
            }
            None => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| self.io_error("stage", e))?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, items)?;
            writer.flush().map_err(|e| self.io_error("write", e))?;
        }
        tmp.as_file()
            .sync_all()
            .map_err(|e| self.io_error("sync", e))?;
        tmp.persist(&self.path)
            .map_err(|e| self.io_error("replace", e.error))?;
        Ok(())
    }

    /// Creates the document as `[]` if it does not exist yet. Returns true
    /// if it was created.
    pub fn ensure_exists(&self) -> Result<bool, AppError> {
        if self.exists() {
            return Ok(false);
        }
        self.save(&[])?;
        Ok(true)
    }

    /// Read-modify-write append of a single item. Returns the new length.
    pub fn append(&self, item: T) -> Result<usize, AppError> {
        let mut items = self.load_or_default()?;
        items.push(item);
        self.save(&items)?;
        Ok(items.len())
    }

    fn io_error(&self, action: &str, e: std::io::Error) -> AppError {
        AppError::StoreError(format!("Failed to {action} {}: {e}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReplayResult;

    /// Names of every entry in `dir`, sorted.
    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Fails on serialization after the writer has started.
    #[derive(Debug, serde::Deserialize)]
    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("cannot serialize"))
        }
    }

    fn result(old: &str) -> ReplayResult {
        ReplayResult {
            old: old.into(),
            new: format!("https://new.example/{old}"),
        }
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::<ReplayResult>::new(dir.path().join("output.json"));
        assert!(store.load().unwrap().is_empty());
        assert!(!store.exists());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("output.json"));
        store.save(&[result("a"), result("b")]).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, vec![result("a"), result("b")]);
        assert_eq!(dir_entries(dir.path()), vec!["output.json"]);
    }

    #[test]
    fn failed_serialize_keeps_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, "[]").unwrap();
        let store = JsonStore::<Unserializable>::new(&path);

        let err = store.save(&[Unserializable]).unwrap_err();

        assert!(matches!(err, AppError::SerializationError(_)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
        assert_eq!(dir_entries(dir.path()), vec!["data.json"]);
    }

    #[test]
    fn document_is_pretty_printed() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("output.json"));
        store.save(&[result("a")]).unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.starts_with("[\n  {\n    \"old\": \"a\""));
    }

    #[test]
    fn ensure_exists_creates_empty_array_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::<ReplayResult>::new(dir.path().join("output.json"));
        assert!(store.ensure_exists().unwrap());
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "[]");

        store.append(result("a")).unwrap();
        assert!(!store.ensure_exists().unwrap());
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn append_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("nested/failed.json"));
        assert_eq!(store.append(result("a")).unwrap(), 1);
        assert_eq!(store.append(result("b")).unwrap(), 2);
        assert_eq!(store.load().unwrap()[1].old, "b");
    }

    #[test]
    fn malformed_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = JsonStore::<ReplayResult>::new(&path);

        assert!(matches!(store.load(), Err(AppError::StoreError(_))));
        assert!(store.load_or_default().unwrap().is_empty());
        assert_eq!(store.append(result("a")).unwrap(), 1);
    }
}

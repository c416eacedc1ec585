//! Destinations for completed inbound files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::StorageError;
use crate::validation::sanitize_file_name;

/// Keyed storage for assembled files.
///
/// Calls are synchronous; async callers run them on the blocking pool.
/// Keys are transfer ids.
pub trait ByteStore: Send + Sync {
    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
}

/// In-memory store, mostly for tests and short-lived sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ByteStore for MemoryStore {
    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), bytes);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }
}

/// Stores each file as `<root>/<key>`.
///
/// Writes go to a hidden temporary file first and are renamed into place,
/// so a reader never sees a partial file.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Creates the root directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final location of `key`.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(plain_key(key)?))
    }
}

fn plain_key(key: &str) -> Result<String, StorageError> {
    sanitize_file_name(key).map_err(|e| StorageError::InvalidKey(e.to_string()))
}

impl ByteStore for DirectoryStore {
    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let key = plain_key(key)?;
        let target = self.root.join(&key);
        let partial = self.root.join(format!(".{key}.partial"));
        std::fs::write(&partial, &bytes)?;
        if let Err(e) = std::fs::rename(&partial, &target) {
            let _ = std::fs::remove_file(&partial);
            return Err(e.into());
        }
        debug!(key = %key, bytes = bytes.len(), path = %target.display(), "stored file");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(key)?;
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_put_get() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        store.put("a", b"hello".to_vec()).unwrap();
        assert_eq!(store.get("a").unwrap().unwrap(), b"hello");
        assert!(store.get("b").unwrap().is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn memory_store_overwrites() {
        let store = MemoryStore::new();
        store.put("a", b"one".to_vec()).unwrap();
        store.put("a", b"two".to_vec()).unwrap();
        assert_eq!(store.get("a").unwrap().unwrap(), b"two");
    }

    #[test]
    fn directory_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::open(dir.path().join("nested")).unwrap();
        store.put("abc-123", vec![7; 4096]).unwrap();

        assert_eq!(store.get("abc-123").unwrap().unwrap(), vec![7; 4096]);
        assert!(store.path_for("abc-123").unwrap().exists());
        assert!(!store.root().join(".abc-123.partial").exists());
    }

    #[test]
    fn directory_store_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn directory_store_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.put("../escape", b"x".to_vec()),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(store.get("/etc/passwd").is_err());
    }

    #[test]
    fn directory_store_uses_trimmed_key_for_both_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();
        store.put("  padded ", b"data".to_vec()).unwrap();

        assert_eq!(store.get("padded").unwrap().unwrap(), b"data");
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("padded")]);
    }

    #[test]
    fn directory_store_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::open(dir.path()).unwrap();
        store.put("empty", Vec::new()).unwrap();
        assert_eq!(store.get("empty").unwrap().unwrap(), Vec::<u8>::new());
    }
}

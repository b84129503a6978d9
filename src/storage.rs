use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::schema::StorageScope;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid storage key '{0}'")]
    InvalidKey(String),
}

/// String key/value store standing in for browser storage. Values are the
/// JSON documents the synchronizer writes.
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    fn scope(&self) -> StorageScope;
}

/// Session tier: gone when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.lock().remove(key);
        Ok(())
    }

    fn scope(&self) -> StorageScope {
        StorageScope::Session
    }
}

/// Persistent tier: one gzip-compressed file per key under `dir`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(FileStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json.gz", key)))
    }
}

impl LocalStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(GzDecoder::new(file));
        let mut contents = String::new();
        reader.read_to_string(&mut contents)?;
        Ok(Some(contents))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("gz.tmp");
        {
            let file = File::create(&tmp)?;
            let encoder = GzEncoder::new(file, Compression::default());
            let mut writer = BufWriter::new(encoder);
            writer.write_all(value.as_bytes())?;
            let encoder = writer.into_inner().map_err(|e| e.into_error())?;
            encoder.finish()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn scope(&self) -> StorageScope {
        StorageScope::Persistent
    }
}

/// Both local tiers, so a page can be pointed at either by its scope flag.
#[derive(Clone)]
pub struct LocalTiers {
    pub session: Arc<dyn LocalStore>,
    pub persistent: Arc<dyn LocalStore>,
}

impl LocalTiers {
    pub fn new(session: Arc<dyn LocalStore>, persistent: Arc<dyn LocalStore>) -> Self {
        LocalTiers {
            session,
            persistent,
        }
    }

    /// Session tier in memory, persistent tier on disk under `dir`.
    pub fn on_disk(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        Ok(LocalTiers {
            session: Arc::new(MemoryStore::new()),
            persistent: Arc::new(FileStore::open(dir)?),
        })
    }

    pub fn in_memory() -> Self {
        LocalTiers {
            session: Arc::new(MemoryStore::new()),
            persistent: Arc::new(MemoryStore::new()),
        }
    }

    pub fn for_scope(&self, scope: StorageScope) -> &Arc<dyn LocalStore> {
        match scope {
            StorageScope::Session => &self.session,
            StorageScope::Persistent => &self.persistent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        assert_eq!(store.get("epbgData").unwrap(), None);
        store.set("epbgData", r#"[{"sno":"1"}]"#).unwrap();
        assert_eq!(store.get("epbgData").unwrap().as_deref(), Some(r#"[{"sno":"1"}]"#));

        store.set("epbgData", "[]").unwrap();
        assert_eq!(store.get("epbgData").unwrap().as_deref(), Some("[]"));

        store.remove("epbgData").unwrap();
        store.remove("epbgData").unwrap();
        assert_eq!(store.get("epbgData").unwrap(), None);
    }

    #[test]
    fn rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.set("../escape", "x"),
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[test]
    fn memory_store_is_session_scoped() {
        let store = MemoryStore::new();
        store.set("dashboardSessionData", "true").unwrap();
        assert_eq!(store.scope(), StorageScope::Session);
        assert_eq!(store.len(), 1);
    }
}

//! Persistent metadata cache.
//!
//! Entries are JSON documents keyed by short identifiers (`table-names`,
//! `table.<name>`). Stores are consulted on a schema cache miss and wiped by
//! [`super::Schema::refresh`].

use crate::error::DbmlResult;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Key/value store for serialized schema metadata.
pub trait CacheStore: Send + Sync {
    fn fetch(&self, key: &str) -> DbmlResult<Option<serde_json::Value>>;
    fn save(&self, key: &str, value: &serde_json::Value) -> DbmlResult<()>;
    fn delete(&self, key: &str) -> DbmlResult<()>;
    /// Remove every entry.
    fn flush_all(&self) -> DbmlResult<()>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryStore {
    fn fetch(&self, key: &str) -> DbmlResult<Option<serde_json::Value>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn save(&self, key: &str, value: &serde_json::Value) -> DbmlResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> DbmlResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    fn flush_all(&self) -> DbmlResult<()> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
        Ok(())
    }
}

/// One JSON file per entry under a directory (default `./.dbml`).
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl Default for FileStore {
    fn default() -> Self {
        let dir = std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".dbml");
        Self { dir }
    }
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

impl CacheStore for FileStore {
    fn fetch(&self, key: &str) -> DbmlResult<Option<serde_json::Value>> {
        let data = match std::fs::read(self.path_for(key)) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&data)?))
    }

    fn save(&self, key: &str, value: &serde_json::Value) -> DbmlResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, serde_json::to_vec_pretty(value)?)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> DbmlResult<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn flush_all(&self) -> DbmlResult<()> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_store_roundtrip_and_flush() {
        let store = MemoryStore::new();
        store.save("table.t_article", &json!({"name": "t_article"})).unwrap();
        assert_eq!(
            store.fetch("table.t_article").unwrap(),
            Some(json!({"name": "t_article"}))
        );
        store.delete("table.t_article").unwrap();
        assert_eq!(store.fetch("table.t_article").unwrap(), None);

        store.save("table-names", &json!(["a"])).unwrap();
        store.flush_all().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn file_store_writes_one_file_per_key() {
        let dir = std::env::temp_dir().join(format!("dbml-store-{}", std::process::id()));
        let store = FileStore::new(&dir);
        store.save("table.t_comment", &json!({"columns": 3})).unwrap();
        assert!(dir.join("table.t_comment.json").exists());
        assert_eq!(store.fetch("table.t_comment").unwrap(), Some(json!({"columns": 3})));
        assert_eq!(store.fetch("missing").unwrap(), None);

        store.flush_all().unwrap();
        assert_eq!(store.fetch("table.t_comment").unwrap(), None);
        std::fs::remove_dir_all(&dir).ok();
    }
}

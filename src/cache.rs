use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use directories::BaseDirs;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::Row;
use crate::error::ArpError;

const LOCK_FILE: &str = ".lock";

/// A materialized bulk result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub rows: Vec<Row>,
    pub saved_at: DateTime<Utc>,
}

/// Keyword-keyed result sets persisted as one JSON file per key.
///
/// Entries never expire; they live until [`ResultCache::clear_all`] or
/// until the directory is removed.
#[derive(Debug, Clone)]
pub struct ResultCache {
    root: Utf8PathBuf,
}

impl ResultCache {
    pub fn new() -> Result<Self, ArpError> {
        let root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.home_dir()
                        .join(".cache")
                        .join("arp-harvester")
                        .join("results"),
                )
                .ok()
            })
            .ok_or_else(|| ArpError::Cache("unable to resolve cache directory".to_string()))?;
        Ok(Self { root })
    }

    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Keys are hashed so any keyword maps to a valid, bounded file name.
    pub fn entry_path(&self, key: &str) -> Utf8PathBuf {
        let digest = blake3::hash(key.as_bytes());
        self.root.join(format!("{}.json", digest.to_hex()))
    }

    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>, ArpError> {
        if !self.root.as_std_path().exists() {
            return Ok(None);
        }
        // Every put creates the lock file; without it nothing was stored.
        let Some(_handle) = StoreHandle::shared(&self.root)? else {
            return Ok(None);
        };
        let path = self.entry_path(key);
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content =
            fs::read(path.as_std_path()).map_err(|err| ArpError::Cache(err.to_string()))?;
        let entry: CacheEntry = serde_json::from_slice(&content)
            .map_err(|err| ArpError::Cache(format!("corrupt entry {path}: {err}")))?;
        if entry.key != key {
            return Ok(None);
        }
        debug!(key, rows = entry.rows.len(), "cache.hit");
        Ok(Some(entry))
    }

    /// Replaces whatever was stored under `key`.
    pub fn put(&self, key: &str, rows: &[Row]) -> Result<DateTime<Utc>, ArpError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| ArpError::Cache(err.to_string()))?;
        let _handle = StoreHandle::exclusive(&self.root)?;

        let saved_at = Utc::now();
        let entry = EntryRef {
            key,
            rows,
            saved_at,
        };
        let content = serde_json::to_vec(&entry).map_err(|err| ArpError::Cache(err.to_string()))?;

        let mut temp = tempfile::Builder::new()
            .prefix("arp-entry")
            .tempfile_in(self.root.as_std_path())
            .map_err(|err| ArpError::Cache(err.to_string()))?;
        temp.write_all(&content)
            .map_err(|err| ArpError::Cache(err.to_string()))?;
        temp.persist(self.entry_path(key).as_std_path())
            .map_err(|err| ArpError::Cache(err.to_string()))?;

        info!(key, rows = rows.len(), "cache.put");
        Ok(saved_at)
    }

    /// Removes every entry and returns how many were dropped.
    pub fn clear_all(&self) -> Result<usize, ArpError> {
        if !self.root.as_std_path().exists() {
            return Ok(0);
        }
        let _handle = StoreHandle::exclusive(&self.root)?;
        let mut removed = 0usize;
        let entries =
            fs::read_dir(self.root.as_std_path()).map_err(|err| ArpError::Cache(err.to_string()))?;
        for entry in entries {
            let path = entry.map_err(|err| ArpError::Cache(err.to_string()))?.path();
            if path.extension().map(|ext| ext == "json").unwrap_or(false) {
                fs::remove_file(&path).map_err(|err| ArpError::Cache(err.to_string()))?;
                removed += 1;
            }
        }
        info!(removed, "cache.clear");
        Ok(removed)
    }
}

#[derive(Serialize)]
struct EntryRef<'a> {
    key: &'a str,
    rows: &'a [Row],
    saved_at: DateTime<Utc>,
}

/// Advisory lock over the cache directory, released on drop.
struct StoreHandle {
    file: File,
}

impl StoreHandle {
    fn open(root: &Utf8Path) -> Result<File, ArpError> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(root.join(LOCK_FILE).as_std_path())
            .map_err(|err| ArpError::Cache(err.to_string()))
    }

    /// Readers never create the lock file, so a read works on a
    /// read-only directory and leaves it untouched.
    fn shared(root: &Utf8Path) -> Result<Option<Self>, ArpError> {
        let file = match File::open(root.join(LOCK_FILE).as_std_path()) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(ArpError::Cache(err.to_string())),
        };
        FileExt::lock_shared(&file).map_err(|err| ArpError::Cache(err.to_string()))?;
        Ok(Some(Self { file }))
    }

    fn exclusive(root: &Utf8Path) -> Result<Self, ArpError> {
        let file = Self::open(root)?;
        FileExt::lock_exclusive(&file).map_err(|err| ArpError::Cache(err.to_string()))?;
        Ok(Self { file })
    }
}

impl Drop for StoreHandle {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_paths_are_stable_and_distinct() {
        let cache = ResultCache::new_with_root(Utf8PathBuf::from("/tmp/arp-results"));
        assert_eq!(cache.entry_path("cafe"), cache.entry_path("cafe"));
        assert_ne!(cache.entry_path("cafe"), cache.entry_path("cafe "));
        assert!(cache.entry_path("cafe").as_str().ends_with(".json"));
    }

    #[test]
    fn read_does_not_create_the_lock_file() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let cache = ResultCache::new_with_root(root.clone());
        assert!(cache.get("cafe").unwrap().is_none());
        assert!(!root.join(LOCK_FILE).as_std_path().exists());
    }

    #[test]
    fn missing_root_reads_as_empty() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("absent")).unwrap();
        let cache = ResultCache::new_with_root(root);
        assert!(cache.get("cafe").unwrap().is_none());
        assert_eq!(cache.clear_all().unwrap(), 0);
    }
}

//! File-backed cache.
//!
//! All keys live in one JSON object on disk. Writes are buffered until
//! [`LocalCache::flush`], which replaces the file through a temporary
//! sibling.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{CacheError, LocalCache};

/// Cache persisted to a JSON file.
#[derive(Debug)]
pub struct FileCache {
    path: PathBuf,
    data: BTreeMap<String, String>,
    dirty: bool,
}

impl FileCache {
    /// Open a cache file. A missing or corrupt file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(data) => data,
                Err(e) => {
                    warn!("Cache file {} is corrupt, starting empty: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("Cache file {} unreadable, starting empty: {}", path.display(), e);
                BTreeMap::new()
            }
        };

        debug!("Opened cache {} with {} keys", path.display(), data.len());
        Self { path, data, dirty: false }
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LocalCache for FileCache {
    fn get(&self, key: &str) -> Option<String> {
        self.data.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), CacheError> {
        if self.data.get(key) != Some(&value) {
            self.data.insert(key.to_string(), value);
            self.dirty = true;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), CacheError> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&self.data)?)?;
        fs::rename(&tmp, &self.path)?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("room-draw-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn test_values_survive_reopen() {
        let path = temp_path("cache.json");

        let mut cache = FileCache::open(&path);
        cache.set("roomCode", "R1".to_string()).unwrap();
        cache.flush().unwrap();

        let reopened = FileCache::open(&path);
        assert_eq!(reopened.get("roomCode"), Some("R1".to_string()));

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_unflushed_writes_not_on_disk() {
        let path = temp_path("cache.json");

        let mut cache = FileCache::open(&path);
        cache.set("roomCode", "R1".to_string()).unwrap();
        assert_eq!(cache.get("roomCode"), Some("R1".to_string()));
        assert!(!path.exists());
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let path = temp_path("cache.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "[[[").unwrap();

        let cache = FileCache::open(&path);
        assert_eq!(cache.get("roomCode"), None);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}

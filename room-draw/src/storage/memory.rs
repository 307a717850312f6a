//! In-memory cache.

use std::collections::BTreeMap;

use super::{CacheError, LocalCache};

/// Cache backed by a map. Lost on exit.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    data: BTreeMap<String, String>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl LocalCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.data.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), CacheError> {
        self.data.insert(key.to_string(), value);
        Ok(())
    }
}

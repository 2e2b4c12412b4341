//! In-process token cache shared across concurrent invocations

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use super::credentials::Credentials;

/// Cache key: provider name plus the normalised scope set
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    provider: String,
    scopes: Vec<String>,
}

impl CacheKey {
    pub fn new(provider: &str, scopes: &BTreeSet<String>) -> Self {
        Self {
            provider: provider.to_string(),
            scopes: scopes.iter().cloned().collect(),
        }
    }
}

/// Thread-safe token cache. Writers race with last-writer-wins.
#[derive(Debug, Clone, Default)]
pub struct TokenCache {
    entries: Arc<RwLock<HashMap<CacheKey, Credentials>>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return unexpired credentials for the key, if any
    pub fn get(&self, key: &CacheKey) -> Option<Credentials> {
        let entries = self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.get(key).filter(|creds| !creds.is_expired()).cloned()
    }

    pub fn put(&self, key: CacheKey, credentials: Credentials) {
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.insert(key, credentials);
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

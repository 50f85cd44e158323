// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory config store fake for testing without filesystem I/O.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use strand_app_core::config::{ConfigError, ConfigStore};

/// In-memory implementation of [`ConfigStore`] for testing.
///
/// Clones share state. Counters record attempts, including failed ones.
///
/// # Example
///
/// ```
/// use strand_dry_tests::InMemoryConfigStore;
/// use strand_app_core::config::ConfigService;
/// use strand_app_core::prefs::ClientPrefs;
///
/// let store = InMemoryConfigStore::new();
/// let service = ConfigService::new(store.clone());
///
/// let prefs: ClientPrefs = service.load_or_init().unwrap();
/// assert_eq!(prefs, ClientPrefs::default());
/// assert_eq!(store.load_count(), 1);
/// assert_eq!(store.save_count(), 1);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryConfigStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    data: HashMap<String, Vec<u8>>,
    load_count: usize,
    save_count: usize,
    fail_on_load: bool,
    fail_on_save: bool,
}

impl InMemoryConfigStore {
    /// Create a new empty in-memory config store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with the given key-value pairs.
    pub fn with_data(data: HashMap<String, Vec<u8>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                data,
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configure the store to fail on load operations.
    pub fn set_fail_on_load(&self, fail: bool) {
        self.lock().fail_on_load = fail;
    }

    /// Configure the store to fail on save operations.
    pub fn set_fail_on_save(&self, fail: bool) {
        self.lock().fail_on_save = fail;
    }

    /// Number of `load_raw` attempts.
    pub fn load_count(&self) -> usize {
        self.lock().load_count
    }

    /// Number of `save_raw` attempts.
    pub fn save_count(&self) -> usize {
        self.lock().save_count
    }

    /// Raw bytes stored under `key`.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().data.get(key).cloned()
    }

    /// Check if a key exists in the store.
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().data.contains_key(key)
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let mut inner = self.lock();
        inner.load_count += 1;
        if inner.fail_on_load {
            return Err(ConfigError::Io(io::Error::other("simulated load failure")));
        }
        inner.data.get(key).cloned().ok_or(ConfigError::NotFound)
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let mut inner = self.lock();
        inner.save_count += 1;
        if inner.fail_on_save {
            return Err(ConfigError::Io(io::Error::other("simulated save failure")));
        }
        inner.data.insert(key.to_owned(), data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_app_core::config::ConfigService;
    use strand_app_core::prefs::{ClientConfig, CLIENT_CONFIG_KEY};

    fn seeded(doc: &[u8]) -> InMemoryConfigStore {
        let mut data = HashMap::new();
        data.insert(CLIENT_CONFIG_KEY.to_owned(), doc.to_vec());
        InMemoryConfigStore::with_data(data)
    }

    #[test]
    fn load_or_init_keeps_current_documents() {
        let store = seeded(br#"{"version": 1, "base_url": "https://graph.example", "undo_limit": 50}"#);
        let service = ConfigService::new(store.clone());
        let config: ClientConfig = service.load_or_init().unwrap();
        assert_eq!(config.undo_limit, Some(50));
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn load_or_init_rewrites_unversioned_documents() {
        let store = seeded(br#"{"base_url": "https://graph.example", "socket_url": ""}"#);
        let service = ConfigService::new(store.clone());
        let config: ClientConfig = service.load_or_init().unwrap();
        assert_eq!(config.socket_url, None);
        assert_eq!(store.save_count(), 1);
        let saved: serde_json::Value =
            serde_json::from_slice(&store.raw(CLIENT_CONFIG_KEY).unwrap()).unwrap();
        assert_eq!(saved["version"], 1);
        assert!(saved["socket_url"].is_null());
    }

    #[test]
    fn invalid_documents_are_reported_and_left_alone() {
        let store = seeded(br#"{"version": 1, "base_url": "https://graph.example", "request_timeout_ms": 0}"#);
        let service = ConfigService::new(store.clone());
        let err = service.load_or_init::<ClientConfig>().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: CLIENT_CONFIG_KEY, .. }));
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn failures_still_count() {
        let store = InMemoryConfigStore::new();
        store.set_fail_on_save(true);
        assert!(store.save_raw("k", b"v").is_err());
        assert!(!store.contains_key("k"));
        assert_eq!(store.save_count(), 1);

        store.set_fail_on_load(true);
        assert!(matches!(store.load_raw("k"), Err(ConfigError::Io(_))));
        assert_eq!(store.load_count(), 1);
    }

    #[test]
    fn clones_share_state() {
        let a = InMemoryConfigStore::new();
        let b = a.clone();
        a.save_raw("shared", b"1").unwrap();
        assert_eq!(b.raw("shared"), Some(b"1".to_vec()));
    }

    #[test]
    fn missing_key_is_not_found() {
        let store = InMemoryConfigStore::new();
        assert!(matches!(store.load_raw("missing"), Err(ConfigError::NotFound)));
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Trailing-edge debouncer with an explicit window and coalescing key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Debounce window and the key calls coalesce under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebounceConfig {
    /// Quiet period before the last call fires.
    pub window: Duration,
    /// Default coalescing key.
    pub key: String,
}

impl DebounceConfig {
    /// Config with `window` and `key`.
    pub fn new(window: Duration, key: impl Into<String>) -> Self {
        Self {
            window,
            key: key.into(),
        }
    }
}

/// Fires only the last of a burst of calls per key, once the window passes
/// without another call for that key.
#[derive(Debug, Clone)]
pub struct Debouncer {
    config: DebounceConfig,
    generations: Arc<Mutex<HashMap<String, u64>>>,
}

impl Debouncer {
    /// Debouncer for `config`.
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            config,
            generations: Arc::default(),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &DebounceConfig {
        &self.config
    }

    /// Submit under the configured key.
    pub fn submit<T, F>(&self, value: T, fire: F)
    where
        T: Send + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        self.submit_keyed(self.config.key.clone(), value, fire);
    }

    /// Submit under `key`. Must be called inside a tokio runtime.
    pub fn submit_keyed<T, F>(&self, key: String, value: T, fire: F)
    where
        T: Send + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        let generation = {
            let mut generations = self
                .generations
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let slot = generations.entry(key.clone()).or_insert(0);
            *slot += 1;
            *slot
        };
        let generations = Arc::clone(&self.generations);
        let window = self.config.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let latest = {
                let mut generations = generations.lock().unwrap_or_else(PoisonError::into_inner);
                if generations.get(&key) == Some(&generation) {
                    generations.remove(&key);
                    true
                } else {
                    false
                }
            };
            if latest {
                fire(value);
            }
        });
    }
}

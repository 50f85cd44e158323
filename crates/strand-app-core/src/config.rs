// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Versioned settings documents and the storage port behind them.
//!
//! Each [`Setting`] is stored as one JSON object under its own key. The
//! object carries a `version` field next to the setting's fields; documents
//! written by older builds are upgraded field by field through
//! [`Setting::migrate`] before they are deserialized, and every loaded or
//! saved value passes [`Setting::validate`].

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Field holding the schema version inside a stored settings document.
pub const VERSION_FIELD: &str = "version";

/// Storage port for raw settings documents, keyed by [`Setting::KEY`].
pub trait ConfigStore {
    /// Load a raw document. Returns `NotFound` when missing.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Persist a raw document, replacing any previous one.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Error type for settings operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Key not present in store.
    #[error("not found")]
    NotFound,
    /// No per-user config directory on this platform.
    #[error("no config directory available")]
    NoConfigDir,
    /// Key cannot be mapped onto the store.
    #[error("invalid settings key {0:?}")]
    InvalidKey(String),
    /// I/O error while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Document is not JSON or does not match the setting's shape.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Stored document is not a JSON object.
    #[error("{key}: expected a JSON object")]
    NotAnObject {
        /// Setting key.
        key: &'static str,
    },
    /// Stored document was written by a newer build.
    #[error("{key}: version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Setting key.
        key: &'static str,
        /// Version in the document.
        found: u64,
        /// Highest version this build reads.
        supported: u64,
    },
    /// Value parsed but breaks one of the setting's rules.
    #[error("{key}: {reason}")]
    Invalid {
        /// Setting key.
        key: &'static str,
        /// Rule that failed.
        reason: String,
    },
}

/// A settings document persisted under a fixed key.
pub trait Setting: Serialize + DeserializeOwned + Default {
    /// Store key.
    const KEY: &'static str;
    /// Current schema version. Documents without a `version` field are 0.
    const VERSION: u64;

    /// Rewrite `fields` from schema `from` to `from + 1`.
    fn migrate(fields: &mut Map<String, Value>, from: u64) -> Result<(), ConfigError> {
        let _ = (fields, from);
        Ok(())
    }

    /// Check cross-field rules serde cannot express.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Result of reading a setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loaded<T> {
    /// The value, after migration.
    pub value: T,
    /// Schema version the document was stored with.
    pub stored_version: u64,
}

impl<T> Loaded<T> {
    /// Whether the stored document predates the current schema.
    pub const fn is_stale(&self, current: u64) -> bool {
        self.stored_version < current
    }
}

/// Reads and writes [`Setting`]s through a [`ConfigStore`].
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Create a new service using the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Consume the service and return the inner store.
    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S> ConfigService<S>
where
    S: ConfigStore,
{
    /// Load, migrate and validate `T`. Returns `Ok(None)` if missing or empty.
    pub fn load<T: Setting>(&self) -> Result<Option<Loaded<T>>, ConfigError> {
        match self.store.load_raw(T::KEY) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => decode(&bytes).map(Some),
            Err(ConfigError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Validate and persist `value` at the current schema version.
    pub fn save<T: Setting>(&self, value: &T) -> Result<(), ConfigError> {
        check(value)?;
        let mut fields = match serde_json::to_value(value)? {
            Value::Object(fields) => fields,
            _ => return Err(ConfigError::NotAnObject { key: T::KEY }),
        };
        fields.insert(VERSION_FIELD.to_owned(), Value::from(T::VERSION));
        let data = serde_json::to_vec_pretty(&Value::Object(fields))?;
        self.store.save_raw(T::KEY, &data)
    }

    /// Load `T`, persisting `T::default()` when missing and rewriting
    /// documents stored at an older schema version.
    pub fn load_or_init<T: Setting>(&self) -> Result<T, ConfigError> {
        match self.load::<T>()? {
            Some(loaded) if loaded.is_stale(T::VERSION) => {
                self.save(&loaded.value)?;
                Ok(loaded.value)
            }
            Some(loaded) => Ok(loaded.value),
            None => {
                let value = T::default();
                self.save(&value)?;
                Ok(value)
            }
        }
    }
}

fn decode<T: Setting>(bytes: &[u8]) -> Result<Loaded<T>, ConfigError> {
    let mut fields = match serde_json::from_slice(bytes)? {
        Value::Object(fields) => fields,
        _ => return Err(ConfigError::NotAnObject { key: T::KEY }),
    };
    let stored_version = match fields.remove(VERSION_FIELD) {
        None => 0,
        Some(v) => v.as_u64().ok_or_else(|| ConfigError::Invalid {
            key: T::KEY,
            reason: format!("version must be a non-negative integer, got {v}"),
        })?,
    };
    if stored_version > T::VERSION {
        return Err(ConfigError::UnsupportedVersion {
            key: T::KEY,
            found: stored_version,
            supported: T::VERSION,
        });
    }
    for from in stored_version..T::VERSION {
        T::migrate(&mut fields, from)?;
    }
    let value: T = serde_json::from_value(Value::Object(fields))?;
    check(&value)?;
    Ok(Loaded {
        value,
        stored_version,
    })
}

fn check<T: Setting>(value: &T) -> Result<(), ConfigError> {
    value
        .validate()
        .map_err(|reason| ConfigError::Invalid { key: T::KEY, reason })
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persisted client settings: connection/runtime config and user preferences.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::config::{ConfigError, Setting};

/// Config key of [`ClientConfig`].
pub const CLIENT_CONFIG_KEY: &str = "client";
/// Config key of [`ClientPrefs`].
pub const CLIENT_PREFS_KEY: &str = "prefs";

/// Default data-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 4_000;
/// Default focus debounce window.
pub const DEFAULT_FOCUS_DEBOUNCE_MS: u64 = 250;

const LOCALE_FIELDS: [&str; 3] = ["language", "country", "variant"];

/// Where the backend lives and how the worker bridge behaves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend base URL.
    pub base_url: String,
    /// Websocket endpoint for server push, if any.
    pub socket_url: Option<String>,
    /// A data request with no handler response after this long fails.
    pub request_timeout_ms: u64,
    /// Focus changes within this window coalesce.
    pub focus_debounce_ms: u64,
    /// Cap on each undo stack; unbounded when `None`.
    pub undo_limit: Option<usize>,
    /// Ask the backend to trace graph calls.
    pub graph_trace_enable: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_owned(),
            socket_url: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            focus_debounce_ms: DEFAULT_FOCUS_DEBOUNCE_MS,
            undo_limit: None,
            graph_trace_enable: false,
        }
    }
}

impl ClientConfig {
    /// Request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Focus debounce window as a duration.
    pub fn focus_debounce(&self) -> Duration {
        Duration::from_millis(self.focus_debounce_ms)
    }
}

impl Setting for ClientConfig {
    const KEY: &'static str = CLIENT_CONFIG_KEY;
    const VERSION: u64 = 1;

    /// v0 wrote an empty string for "no socket".
    fn migrate(fields: &mut Map<String, Value>, from: u64) -> Result<(), ConfigError> {
        if from == 0 && fields.get("socket_url").and_then(Value::as_str) == Some("") {
            fields.insert("socket_url".to_owned(), Value::Null);
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), String> {
        check_url("base_url", &self.base_url, &["http", "https"])?;
        if let Some(socket) = &self.socket_url {
            check_url("socket_url", socket, &["ws", "wss"])?;
        }
        if self.request_timeout_ms == 0 {
            return Err("request_timeout_ms must be positive".to_owned());
        }
        if self.undo_limit == Some(0) {
            return Err("undo_limit must be positive; omit it for no limit".to_owned());
        }
        Ok(())
    }
}

fn check_url(field: &str, raw: &str, schemes: &[&str]) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|err| format!("{field} {raw:?}: {err}"))?;
    if !schemes.contains(&url.scheme()) {
        return Err(format!(
            "{field} {raw:?}: scheme must be one of {}",
            schemes.join(", ")
        ));
    }
    Ok(())
}

/// Locale triple sent with `config` service requests.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct LocalePrefs {
    /// ISO language code.
    pub language: Option<String>,
    /// ISO country code.
    pub country: Option<String>,
    /// Variant.
    pub variant: Option<String>,
}

impl LocalePrefs {
    fn validate(&self) -> Result<(), String> {
        for (field, value) in [("language", &self.language), ("country", &self.country)] {
            if let Some(code) = value {
                if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphabetic()) {
                    return Err(format!("locale.{field} {code:?} must be ASCII letters"));
                }
            }
        }
        match (&self.language, &self.country, &self.variant) {
            (None, Some(_), _) => Err("locale.country requires locale.language".to_owned()),
            (_, None, Some(_)) => Err("locale.variant requires locale.country".to_owned()),
            _ => Ok(()),
        }
    }
}

/// User preferences carried across sessions.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ClientPrefs {
    /// Locale for configuration messages.
    pub locale: LocalePrefs,
    /// High-contrast rendering.
    pub high_contrast: bool,
    /// Reload front-end resources when they change.
    pub live_reload: bool,
}

impl Setting for ClientPrefs {
    const KEY: &'static str = CLIENT_PREFS_KEY;
    const VERSION: u64 = 1;

    /// v0 kept the locale triple as top-level keys.
    fn migrate(fields: &mut Map<String, Value>, from: u64) -> Result<(), ConfigError> {
        if from != 0 {
            return Ok(());
        }
        let mut locale = match fields.remove("locale") {
            Some(Value::Object(locale)) => locale,
            _ => Map::new(),
        };
        for name in LOCALE_FIELDS {
            if let Some(value) = fields.remove(name) {
                // Blank entries meant "unset".
                let value = match value {
                    Value::String(s) if s.is_empty() => Value::Null,
                    other => other,
                };
                locale.entry(name).or_insert(value);
            }
        }
        fields.insert("locale".to_owned(), Value::Object(locale));
        Ok(())
    }

    fn validate(&self) -> Result<(), String> {
        self.locale.validate()
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Filesystem-backed `ConfigStore` for strand settings documents.
//!
//! Each key lives in `<dir>/<key>.json`. Writes go to a sibling temp file
//! that is renamed over the target, so a crash mid-save leaves the previous
//! document intact.

use directories::ProjectDirs;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use strand_app_core::config::{ConfigError, ConfigStore};

/// Store settings documents as JSON files under a directory.
#[derive(Debug, Clone)]
pub struct FsConfigStore {
    base: PathBuf,
}

impl FsConfigStore {
    /// Create a store rooted at the user config directory (e.g., `~/.config/strand`).
    pub fn new() -> Result<Self, ConfigError> {
        let proj =
            ProjectDirs::from("dev", "flyingrobots", "Strand").ok_or(ConfigError::NoConfigDir)?;
        Self::at(proj.config_dir())
    }

    /// Create a store rooted at `dir`, creating it if needed.
    pub fn at(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let base = dir.as_ref().to_path_buf();
        fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    /// Directory the store writes to.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Keys are single path components of `[A-Za-z0-9_-]`.
    fn path_for(&self, key: &str) -> Result<PathBuf, ConfigError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(ConfigError::InvalidKey(key.to_owned()));
        }
        Ok(self.base.join(format!("{key}.json")))
    }
}

impl ConfigStore for FsConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        match fs::read(self.path_for(key)?) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(ConfigError::NotFound),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let path = self.path_for(key)?;
        let tmp = self.base.join(format!(".{key}.json.tmp"));
        let written = fs::File::create(&tmp).and_then(|mut file| {
            file.write_all(data)?;
            file.sync_all()
        });
        if let Err(err) = written.and_then(|()| fs::rename(&tmp, &path)) {
            let _ = fs::remove_file(&tmp);
            return Err(ConfigError::Io(err));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_app_core::config::ConfigService;
    use strand_app_core::prefs::{ClientConfig, ClientPrefs};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("strand-config-fs-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn keys_map_to_json_files() {
        let dir = scratch_dir("files");
        let store = FsConfigStore::at(&dir).unwrap();
        store.save_raw("client", b"{}").unwrap();
        assert!(dir.join("client.json").exists());
        assert_eq!(store.load_raw("client").unwrap(), b"{}");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_key_is_not_found() {
        let dir = scratch_dir("missing");
        let store = FsConfigStore::at(&dir).unwrap();
        assert!(matches!(store.load_raw("nope"), Err(ConfigError::NotFound)));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn keys_cannot_escape_the_directory() {
        let dir = scratch_dir("escape");
        let store = FsConfigStore::at(&dir).unwrap();
        for key in ["../client", "a/b", "", "prefs.json"] {
            assert!(matches!(store.save_raw(key, b"{}"), Err(ConfigError::InvalidKey(_))));
            assert!(matches!(store.load_raw(key), Err(ConfigError::InvalidKey(_))));
        }
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn saves_replace_the_file_without_leftovers() {
        let dir = scratch_dir("replace");
        let store = FsConfigStore::at(&dir).unwrap();
        store.save_raw("prefs", b"{\"a\":1}").unwrap();
        store.save_raw("prefs", b"{}").unwrap();
        assert_eq!(fs::read(dir.join("prefs.json")).unwrap(), b"{}");
        let names: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("prefs.json")]);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn service_initialises_defaults_once() {
        let dir = scratch_dir("init");
        let service = ConfigService::new(FsConfigStore::at(&dir).unwrap());
        let first: ClientConfig = service.load_or_init().unwrap();
        assert_eq!(first, ClientConfig::default());
        let raw = fs::read_to_string(dir.join("client.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["request_timeout_ms"], 4000);
        assert_eq!(parsed["version"], 1);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn legacy_prefs_file_is_upgraded_in_place() {
        let dir = scratch_dir("legacy");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("prefs.json"),
            r#"{"language": "es", "country": "MX", "live_reload": true}"#,
        )
        .unwrap();
        let service = ConfigService::new(FsConfigStore::at(&dir).unwrap());
        let prefs: ClientPrefs = service.load_or_init().unwrap();
        assert_eq!(prefs.locale.language.as_deref(), Some("es"));
        assert!(prefs.live_reload);

        let raw = fs::read_to_string(dir.join("prefs.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["version"], 1);
        assert_eq!(parsed["locale"]["country"], "MX");
        assert!(parsed.get("language").is_none());
        let _ = fs::remove_dir_all(dir);
    }
}

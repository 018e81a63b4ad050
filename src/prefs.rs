//! Per-file minification settings.
//!
//! Settings live in a flat string key/value store. Each key has the form
//! `<option>//<project-relative-path>`, so every option of a resource can be
//! found (and moved or dropped) by the path part of its key. Matching splits
//! the key at the first `//` and compares the whole path, so `x.js` never
//! collides with `sub/x.js`.
//!
//! Mutations are local until [`ConfigStore::flush`]; the rename and delete
//! operations flush on their own so a following build never reads stale
//! state.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::BuildError;
use crate::resource::ResourcePath;
use crate::strategy::{self, Strategy};

/// Option selecting the strategy
pub const STRATEGY: &str = "strategy";
pub const PRESERVE_SEMICOLONS: &str = "preserveSemicolons";
pub const DISABLE_OPTIMIZATIONS: &str = "disableOptimizations";
pub const OPTIMIZATION: &str = "optimization";
pub const SOURCE_MAP: &str = "sourceMap";
pub const SOURCE_MAP_EMBED: &str = "sourceMapEmbedSources";

/// Every option a resource can carry
pub const ALL_OPTIONS: &[&str] = &[
    STRATEGY,
    PRESERVE_SEMICOLONS,
    DISABLE_OPTIMIZATIONS,
    OPTIMIZATION,
    SOURCE_MAP,
    SOURCE_MAP_EMBED,
];

/// Build the store key for an option of a resource
pub fn preference_key(path: &ResourcePath, option: &str) -> String {
    format!("{option}//{path}")
}

/// Split a store key into (option, path)
fn split_key(key: &str) -> Option<(&str, &str)> {
    key.split_once("//")
}

/// String key/value storage the settings are persisted in
pub trait PreferenceBackend {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&mut self, key: &str, value: &str);
    fn remove(&mut self, key: &str);
    fn keys(&self) -> Vec<String>;
    fn flush(&mut self) -> Result<(), BuildError>;
}

/// Preferences kept as a flat TOML table, or only in memory
#[derive(Debug, Default)]
pub struct TomlPreferences {
    file: Option<PathBuf>,
    values: BTreeMap<String, String>,
    dirty: bool,
}

impl TomlPreferences {
    /// Store without a backing file
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `file`; a missing file is an empty store
    pub fn open(file: &Path) -> Result<Self, BuildError> {
        let values = match fs::read_to_string(file) {
            Ok(content) => toml::from_str(&content).map_err(|e| BuildError::Preferences {
                path: file.to_path_buf(),
                message: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(BuildError::Preferences {
                    path: file.to_path_buf(),
                    message: e.to_string(),
                })
            }
        };
        Ok(Self {
            file: Some(file.to_path_buf()),
            values,
            dirty: false,
        })
    }

    fn write_file(&self, file: &Path) -> Result<(), BuildError> {
        let fail = |message: String| BuildError::Preferences {
            path: file.to_path_buf(),
            message,
        };
        let parent = file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        fs::create_dir_all(parent).map_err(|e| fail(e.to_string()))?;
        let content = toml::to_string(&self.values).map_err(|e| fail(e.to_string()))?;
        let mut staged = NamedTempFile::new_in(parent).map_err(|e| fail(e.to_string()))?;
        staged
            .write_all(content.as_bytes())
            .map_err(|e| fail(e.to_string()))?;
        staged.persist(file).map_err(|e| fail(e.error.to_string()))?;
        Ok(())
    }
}

impl PreferenceBackend for TomlPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
        self.dirty = true;
    }

    fn remove(&mut self, key: &str) {
        if self.values.remove(key).is_some() {
            self.dirty = true;
        }
    }

    fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    fn flush(&mut self) -> Result<(), BuildError> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(file) = &self.file {
            self.write_file(file)?;
        }
        self.dirty = false;
        Ok(())
    }
}

/// Per-resource settings on top of a [`PreferenceBackend`]
#[derive(Debug, Default)]
pub struct ConfigStore<B: PreferenceBackend = TomlPreferences> {
    backend: B,
}

impl<B: PreferenceBackend> ConfigStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Raw option value, if present
    pub fn get_opt(&self, path: &ResourcePath, option: &str) -> Option<String> {
        self.backend.get(&preference_key(path, option))
    }

    /// Option value or `default`; never fails
    pub fn get(&self, path: &ResourcePath, option: &str, default: &str) -> String {
        self.get_opt(path, option)
            .unwrap_or_else(|| default.to_string())
    }

    /// Boolean option; malformed values fall back to `default`
    pub fn get_bool(&self, path: &ResourcePath, option: &str, default: bool) -> bool {
        match self.get_opt(path, option) {
            None => default,
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" => true,
                "false" => false,
                _ => {
                    debug!(%path, option, value = %raw, "malformed boolean, using default");
                    default
                }
            },
        }
    }

    pub fn put(&mut self, path: &ResourcePath, option: &str, value: &str) {
        self.backend.put(&preference_key(path, option), value);
    }

    pub fn remove(&mut self, path: &ResourcePath, option: &str) {
        self.backend.remove(&preference_key(path, option));
    }

    pub fn flush(&mut self) -> Result<(), BuildError> {
        self.backend.flush()
    }

    /// (option, key) pairs stored for exactly `path`
    fn keys_for(&self, path: &ResourcePath) -> Vec<(String, String)> {
        self.backend
            .keys()
            .into_iter()
            .filter_map(|key| {
                let (option, key_path) = split_key(&key)?;
                (key_path == path.as_str()).then(|| (option.to_string(), key.clone()))
            })
            .collect()
    }

    /// All options stored for `path`
    pub fn entries(&self, path: &ResourcePath) -> BTreeMap<String, String> {
        self.keys_for(path)
            .into_iter()
            .filter_map(|(option, key)| Some((option, self.backend.get(&key)?)))
            .collect()
    }

    /// Every path that has at least one option stored
    pub fn paths(&self) -> BTreeSet<ResourcePath> {
        self.backend
            .keys()
            .iter()
            .filter_map(|key| split_key(key).and_then(|(_, path)| ResourcePath::new(path)))
            .collect()
    }

    /// Drop every option of `path` and flush. Returns the number removed.
    pub fn remove_all(&mut self, path: &ResourcePath) -> Result<usize, BuildError> {
        let keys = self.keys_for(path);
        for (_, key) in &keys {
            self.backend.remove(key);
        }
        self.backend.flush()?;
        Ok(keys.len())
    }

    /// Re-key every option of `from` onto `to` and flush. Returns the number moved.
    pub fn move_all(&mut self, from: &ResourcePath, to: &ResourcePath) -> Result<usize, BuildError> {
        let keys = self.keys_for(from);
        if from == to {
            return Ok(keys.len());
        }
        for (option, key) in &keys {
            if let Some(value) = self.backend.get(key) {
                self.backend.put(&preference_key(to, option), &value);
            }
            self.backend.remove(key);
        }
        self.backend.flush()?;
        Ok(keys.len())
    }

    /// The resolved strategy for `path`, with stored options applied
    pub fn settings(&self, path: &ResourcePath) -> Option<Strategy> {
        let configured = self.get(path, STRATEGY, strategy::NONE);
        strategy::resolve(path.extension()?, &configured).map(|s| s.configure(self, path))
    }

    /// Replace the settings of `path`: every option is removed, then the
    /// chosen strategy and its options are written, then flushed.
    pub fn apply(&mut self, path: &ResourcePath, settings: Option<&Strategy>) -> Result<(), BuildError> {
        for option in ALL_OPTIONS {
            self.remove(path, option);
        }
        if let Some(strategy) = settings {
            self.put(path, STRATEGY, strategy.name());
            for (option, value) in strategy.option_values() {
                self.put(path, option, &value);
            }
        }
        self.flush()
    }
}

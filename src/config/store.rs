//! Configuration persistence
//!
//! [`ConfigStore`] is the seam between the controller and wherever settings
//! live. [`YamlFileStore`] writes atomically (temp file, then rename) so a
//! crash mid-write never leaves a truncated config behind.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::config::schema::Settings;
use crate::error::ConfigError;

/// Loads and saves [`Settings`].
pub trait ConfigStore: Send + Sync {
    /// Loads the stored settings.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the stored settings exist but cannot be
    /// read or parsed.
    fn load(&self) -> Result<Settings, ConfigError>;

    /// Replaces the stored settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::PersistFailed`] if the write fails.
    fn save(&self, settings: &Settings) -> Result<(), ConfigError>;

    /// Human-readable location, for logs.
    fn location(&self) -> String;
}

// ============================================================================
// YAML file
// ============================================================================

/// Settings stored in a YAML file.
#[derive(Debug, Clone)]
pub struct YamlFileStore {
    path: PathBuf,
}

impl YamlFileStore {
    /// Creates a store for `path`. Nothing is read until [`ConfigStore::load`].
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the raw YAML text, or `None` when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ReadFailed`] for any I/O error other than
    /// a missing file.
    pub fn read_raw(&self) -> Result<Option<String>, ConfigError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::ReadFailed {
                path: self.path.clone(),
                message: e.to_string(),
            }),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ConfigStore for YamlFileStore {
    fn load(&self) -> Result<Settings, ConfigError> {
        match self.read_raw()? {
            Some(text) => parse_settings(&text, &self.path),
            None => {
                tracing::debug!(path = %self.path.display(), "config file not found, using defaults");
                Ok(Settings::default())
            }
        }
    }

    fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        let persist_err = |message: String| ConfigError::PersistFailed {
            path: self.path.clone(),
            message,
        };

        let yaml = serde_yaml::to_string(settings).map_err(|e| persist_err(e.to_string()))?;
        let temp = self.temp_path();
        std::fs::write(&temp, yaml).map_err(|e| persist_err(e.to_string()))?;
        std::fs::rename(&temp, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&temp);
            persist_err(e.to_string())
        })?;

        tracing::debug!(path = %self.path.display(), "configuration saved");
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Parses YAML text into settings. An empty document yields defaults.
///
/// # Errors
///
/// Returns [`ConfigError::ParseError`] with the failing line when known.
pub fn parse_settings(text: &str, path: &Path) -> Result<Settings, ConfigError> {
    if text.trim().is_empty() {
        return Ok(Settings::default());
    }
    serde_yaml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        line: e.location().map(|l| l.line()),
        message: e.to_string(),
    })
}

/// Lists dotted paths in `text` that do not correspond to any settings field.
///
/// # Errors
///
/// Returns [`ConfigError::ParseError`] if `text` is not valid YAML.
pub fn unknown_keys(text: &str, path: &Path) -> Result<Vec<String>, ConfigError> {
    let raw: serde_yaml::Value = serde_yaml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        line: e.location().map(|l| l.line()),
        message: e.to_string(),
    })?;
    let known = serde_yaml::to_value(Settings::default()).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        line: None,
        message: e.to_string(),
    })?;

    let mut unknown = Vec::new();
    collect_unknown(&raw, &known, "", &mut unknown);
    Ok(unknown)
}

fn collect_unknown(
    raw: &serde_yaml::Value,
    known: &serde_yaml::Value,
    prefix: &str,
    out: &mut Vec<String>,
) {
    let (Some(raw), Some(known)) = (raw.as_mapping(), known.as_mapping()) else {
        return;
    };
    for (key, value) in raw {
        let Some(name) = key.as_str() else {
            out.push(format!("{prefix}{key:?}"));
            continue;
        };
        let path = format!("{prefix}{name}");
        match known.get(name) {
            Some(expected) => collect_unknown(value, expected, &format!("{path}."), out),
            None => out.push(path),
        }
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Settings held in memory. Records saves and can be told to fail.
#[derive(Debug, Default)]
pub struct MemoryStore {
    settings: Mutex<Settings>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    /// Creates a store holding `settings`.
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Mutex::new(settings),
            ..Self::default()
        }
    }

    /// Makes every subsequent save fail when `fail` is `true`.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// The most recently saved settings.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn saved(&self) -> Settings {
        self.settings.lock().expect("memory store lock poisoned").clone()
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self) -> Result<Settings, ConfigError> {
        Ok(self.saved())
    }

    fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(ConfigError::PersistFailed {
                path: PathBuf::from("<memory>"),
                message: "store configured to fail".to_string(),
            });
        }
        *self.settings.lock().expect("memory store lock poisoned") = settings.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn location(&self) -> String {
        "<memory>".to_string()
    }
}

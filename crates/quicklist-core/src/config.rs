use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::constants::DATA_DIR_NAME;

const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub data_dir: PathBuf,
}

impl CoreConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join(DATA_DIR_NAME))
    }
}

/// Named throttling profiles offered by the settings surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Conservative,
    Balanced,
    Aggressive,
    Custom,
}

impl Preset {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Conservative => "Conservative",
            Self::Balanced => "Balanced",
            Self::Aggressive => "Aggressive",
            Self::Custom => "Custom",
        }
    }

    /// Throttling values for the preset. `Custom` has none of its own.
    pub fn settings(&self) -> Option<Settings> {
        let (request_delay_ms, max_lookups_per_window, window_ms) = match self {
            Self::Conservative => (500, 10, 10 * 60 * 1000),
            Self::Balanced => (300, 20, 5 * 60 * 1000),
            Self::Aggressive => (200, 30, 5 * 60 * 1000),
            Self::Custom => return None,
        };
        Some(Settings {
            preset: *self,
            request_delay_ms,
            max_lookups_per_window,
            window_ms,
            skip_membership_check: false,
            request_timeout_ms: default_request_timeout_ms(),
        })
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Preset {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "conservative" => Ok(Self::Conservative),
            "balanced" => Ok(Self::Balanced),
            "aggressive" => Ok(Self::Aggressive),
            "custom" => Ok(Self::Custom),
            other => Err(SettingsError::UnknownPreset(other.to_string())),
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

/// Throttling parameters, read once per session and live-reloaded on change.
///
/// Older settings files used `requestDelay`, `maxLookupsPerPeriod` and
/// `lookupPeriod`; those names are still accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub preset: Preset,
    #[serde(alias = "requestDelay")]
    pub request_delay_ms: u64,
    #[serde(alias = "maxLookupsPerPeriod")]
    pub max_lookups_per_window: u32,
    #[serde(alias = "lookupPeriod")]
    pub window_ms: u64,
    #[serde(default)]
    pub skip_membership_check: bool,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Settings {
    pub fn custom(request_delay_ms: u64, max_lookups_per_window: u32, window_ms: u64) -> Self {
        Self {
            preset: Preset::Custom,
            request_delay_ms,
            max_lookups_per_window,
            window_ms,
            skip_membership_check: false,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }

    pub fn with_skip_membership_check(mut self, skip: bool) -> Self {
        self.skip_membership_check = skip;
        self
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// `None` when the timeout is disabled (0).
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Preset::Balanced
            .settings()
            .unwrap_or_else(|| Settings::custom(300, 20, 5 * 60 * 1000))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Unknown preset: {0}")]
    UnknownPreset(String),
}

/// Persisted settings plus a change feed.
///
/// Every write publishes on a `watch` channel; throttling components hold a
/// receiver and read the latest value on each use.
pub struct SettingsStore {
    path: Option<PathBuf>,
    tx: watch::Sender<Settings>,
}

impl SettingsStore {
    /// Load `settings.json` from `data_dir`. A missing or unreadable file
    /// falls back to the default preset.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, SettingsError> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir).map_err(|source| SettingsError::Io {
            path: data_dir.to_path_buf(),
            source,
        })?;
        let path = data_dir.join(SETTINGS_FILE);
        let settings = read_settings(&path).unwrap_or_default();
        let (tx, _) = watch::channel(settings);
        Ok(Self {
            path: Some(path),
            tx,
        })
    }

    /// Settings that live only for this process.
    pub fn in_memory(settings: Settings) -> Self {
        let (tx, _) = watch::channel(settings);
        Self { path: None, tx }
    }

    pub fn current(&self) -> Settings {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }

    pub fn save(&self, settings: Settings) -> Result<(), SettingsError> {
        if let Some(path) = &self.path {
            write_settings(path, &settings)?;
        }
        tracing::info!(preset = %settings.preset, "settings saved");
        self.tx.send_replace(settings);
        Ok(())
    }

    /// Switch to a named preset, keeping the quick-mode flag.
    pub fn apply_preset(&self, preset: Preset) -> Result<Settings, SettingsError> {
        let current = self.current();
        let next = match preset.settings() {
            Some(values) => values.with_skip_membership_check(current.skip_membership_check),
            None => Settings {
                preset: Preset::Custom,
                ..current
            },
        };
        self.save(next.clone())?;
        Ok(next)
    }

    pub fn set_skip_membership_check(&self, skip: bool) -> Result<Settings, SettingsError> {
        let next = self.current().with_skip_membership_check(skip);
        self.save(next.clone())?;
        Ok(next)
    }

    /// Re-read the file after an external change notification.
    /// Returns true when subscribers saw a new value.
    pub fn reload(&self) -> bool {
        let Some(path) = &self.path else {
            return false;
        };
        let Some(fresh) = read_settings(path) else {
            return false;
        };
        let changed = self.tx.send_if_modified(|current| {
            if *current == fresh {
                false
            } else {
                *current = fresh.clone();
                true
            }
        });
        if changed {
            tracing::info!(preset = %fresh.preset, "settings reloaded");
        }
        changed
    }
}

fn read_settings(path: &Path) -> Option<Settings> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(settings) => Some(settings),
        Err(e) => {
            tracing::warn!(path = %path.display(), "ignoring unreadable settings: {}", e);
            None
        }
    }
}

fn write_settings(path: &Path, settings: &Settings) -> Result<(), SettingsError> {
    let json = serde_json::to_string_pretty(settings)?;
    let temp = path.with_extension("json.tmp");
    std::fs::write(&temp, json).map_err(|source| SettingsError::Io {
        path: temp.clone(),
        source,
    })?;
    std::fs::rename(&temp, path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })
}

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use quicklist_core::remote::Host;
use quicklist_core::CoreConfig;
use serde::{Deserialize, Serialize};

/// Environment fallback for the session cookie.
pub const COOKIE_ENV: &str = "QUICKLIST_COOKIE";

/// CLI configuration that can be loaded from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CliConfig {
    /// `Cookie` header of a signed-in browser session (needs `ct0` and `twid`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,

    /// Where settings and the membership cache live
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// `x.com` (default) or `pro.x.com`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Query id for list deletion; deletion is unavailable without it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_list_query_id: Option<String>,

    /// Talk to a built-in sample graph instead of the network
    #[serde(default)]
    pub offline: bool,
}

impl CliConfig {
    /// Load config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize config")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize config")
    }

    pub fn core_config(&self) -> CoreConfig {
        match &self.data_dir {
            Some(dir) => CoreConfig::new(dir),
            None => CoreConfig::default(),
        }
    }

    /// Cookie from the file, else from `QUICKLIST_COOKIE`.
    pub fn cookie_header(&self) -> Option<String> {
        self.cookie
            .clone()
            .or_else(|| std::env::var(COOKIE_ENV).ok())
            .filter(|c| !c.trim().is_empty())
    }

    /// Unrecognized hostnames fall back to the main web host.
    pub fn host(&self) -> Host {
        self.host
            .as_deref()
            .map(Host::from_hostname)
            .unwrap_or(Host::Web)
    }
}

//! Engine configuration.
//!
//! Settings can be built in code, parsed from TOML or read from
//! `TABLEVIEW_*` environment variables. Missing keys fall back to the
//! defaults below.
//!
//! ```
//! use tableview::EngineConfig;
//!
//! let config = EngineConfig::from_toml_str("auto_index_view_enabled = true").unwrap();
//! assert!(config.auto_index_view_enabled);
//! assert_eq!(config.collation.as_deref(), Some("en-x-icu"));
//! ```

use crate::error::{Result, ViewError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_COLLATION: &str = "en-x-icu";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Schedule index builds automatically when a view's sorts change or
    /// the view is loaded with a stale index.
    pub auto_index_view_enabled: bool,
    /// Text collation used for sorting. Part of every index signature.
    pub collation: Option<String>,
    pub index_build_max_retries: u32,
    pub index_retry_delay_ms: u64,
    /// Maximum number of row changes a table keeps for incremental index
    /// catch-up.
    pub changeset_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_index_view_enabled: false,
            collation: Some(DEFAULT_COLLATION.to_string()),
            index_build_max_retries: 3,
            index_retry_delay_ms: 250,
            changeset_capacity: 10_000,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| ViewError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    /// Defaults overridden by any `TABLEVIEW_*` variables that are set.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(value) = env_var::<bool>("TABLEVIEW_AUTO_INDEX_VIEW_ENABLED")? {
            self.auto_index_view_enabled = value;
        }
        if let Ok(value) = std::env::var("TABLEVIEW_COLLATION") {
            self.collation = if value.is_empty() { None } else { Some(value) };
        }
        if let Some(value) = env_var::<u32>("TABLEVIEW_INDEX_BUILD_MAX_RETRIES")? {
            self.index_build_max_retries = value;
        }
        if let Some(value) = env_var::<u64>("TABLEVIEW_INDEX_RETRY_DELAY_MS")? {
            self.index_retry_delay_ms = value;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.index_retry_delay_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.changeset_capacity == 0 {
            return Err(ViewError::Config(
                "changeset_capacity must be greater than zero".to_string(),
            ));
        }
        if matches!(self.collation.as_deref(), Some(c) if c.trim().is_empty()) {
            return Err(ViewError::Config("collation can not be blank".to_string()));
        }
        Ok(())
    }
}

fn env_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ViewError::Config(format!("invalid value '{}' for {}", raw, name))),
        Err(_) => Ok(None),
    }
}

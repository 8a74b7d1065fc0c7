//! Process-level settings for the resource group manager.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::AppResult;

/// Property key naming the JSON file read by the `file` configuration manager.
pub const CONFIG_FILE_PROPERTY: &str = "resource-groups.config-file";

const ENV_CONFIGURATION_MANAGER: &str = "RESOURCE_GROUPS_CONFIGURATION_MANAGER";
const ENV_CONFIG_FILE: &str = "RESOURCE_GROUPS_CONFIG_FILE";
const ENV_REFRESH_INTERVAL_SECS: &str = "RESOURCE_GROUPS_REFRESH_INTERVAL_SECS";
const ENV_TICK_MS: &str = "RESOURCE_GROUPS_TICK_MS";

/// Which configuration manager to load and how often to refresh it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerSettings {
    /// Name of the registered configuration manager factory.
    pub configuration_manager: String,
    /// Properties handed to the factory.
    #[serde(default)]
    pub properties: HashMap<String, String>,
    /// Seconds between configuration refreshes.
    pub refresh_interval_secs: u64,
    /// Milliseconds between timer-driven scheduling passes.
    pub tick_interval_ms: u64,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            configuration_manager: "file".into(),
            properties: HashMap::new(),
            refresh_interval_secs: 10,
            tick_interval_ms: 1_000,
        }
    }
}

impl ManagerSettings {
    /// Settings pointing at a named factory.
    pub fn new(configuration_manager: impl Into<String>) -> Self {
        Self {
            configuration_manager: configuration_manager.into(),
            ..Self::default()
        }
    }

    /// Add a factory property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Read settings from the environment, loading `.env` first if present.
    ///
    /// # Errors
    ///
    /// Fails when a numeric variable does not parse or the result is invalid.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        let mut settings = Self::default();
        if let Ok(name) = std::env::var(ENV_CONFIGURATION_MANAGER) {
            settings.configuration_manager = name;
        }
        if let Ok(path) = std::env::var(ENV_CONFIG_FILE) {
            settings.properties.insert(CONFIG_FILE_PROPERTY.into(), path);
        }
        if let Ok(raw) = std::env::var(ENV_REFRESH_INTERVAL_SECS) {
            settings.refresh_interval_secs = raw
                .parse()
                .with_context(|| format!("{ENV_REFRESH_INTERVAL_SECS}=`{raw}` is not a number"))?;
        }
        if let Ok(raw) = std::env::var(ENV_TICK_MS) {
            settings.tick_interval_ms = raw
                .parse()
                .with_context(|| format!("{ENV_TICK_MS}=`{raw}` is not a number"))?;
        }
        settings.validate().map_err(anyhow::Error::msg)?;
        Ok(settings)
    }

    /// Validate setting values.
    pub fn validate(&self) -> Result<(), String> {
        if self.configuration_manager.is_empty() {
            return Err("configuration_manager must not be empty".into());
        }
        if self.refresh_interval_secs == 0 {
            return Err("refresh_interval_secs must be greater than 0".into());
        }
        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be greater than 0".into());
        }
        Ok(())
    }

    /// Refresh period as a duration.
    #[must_use]
    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Tick period as a duration.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

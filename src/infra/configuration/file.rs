//! JSON file configuration source.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::config::settings::CONFIG_FILE_PROPERTY;
use crate::config::ResourceGroupsConfig;
use crate::core::SchedulerError;
use crate::infra::configuration::{ConfigurationManager, ConfigurationManagerFactory};

/// Reads a JSON [`ResourceGroupsConfig`] from disk on every load.
#[derive(Debug, Clone)]
pub struct FileConfigurationManager {
    path: PathBuf,
}

impl FileConfigurationManager {
    /// Manager reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File being read.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigurationManager for FileConfigurationManager {
    fn load(&self) -> Result<ResourceGroupsConfig, SchedulerError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            SchedulerError::Configuration(format!("cannot read {}: {e}", self.path.display()))
        })?;
        let config = ResourceGroupsConfig::from_json_str(&raw)
            .map_err(|e| SchedulerError::Configuration(format!("{}: {e}", self.path.display())))?;
        debug!(
            path = %self.path.display(),
            root_groups = config.root_groups.len(),
            selectors = config.selectors.len(),
            "read resource group configuration file"
        );
        Ok(config)
    }
}

/// Factory registered as `file`; needs the `resource-groups.config-file` property.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileConfigurationManagerFactory;

impl ConfigurationManagerFactory for FileConfigurationManagerFactory {
    fn name(&self) -> &str {
        "file"
    }

    fn create(
        &self,
        properties: &HashMap<String, String>,
    ) -> Result<Arc<dyn ConfigurationManager>, SchedulerError> {
        let path = properties.get(CONFIG_FILE_PROPERTY).ok_or_else(|| {
            SchedulerError::Configuration(format!("missing property `{CONFIG_FILE_PROPERTY}`"))
        })?;
        Ok(Arc::new(FileConfigurationManager::new(path)))
    }
}

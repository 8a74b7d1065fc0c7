//! In-memory configuration source, replaceable at runtime.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::ResourceGroupsConfig;
use crate::core::SchedulerError;
use crate::infra::configuration::{ConfigurationManager, ConfigurationManagerFactory};

/// Serves whatever configuration was last stored.
#[derive(Debug, Default)]
pub struct StaticConfigurationManager {
    config: RwLock<ResourceGroupsConfig>,
}

impl StaticConfigurationManager {
    /// Manager serving `config`.
    #[must_use]
    pub fn new(config: ResourceGroupsConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    /// Replace the configuration; picked up by the next refresh.
    pub fn update(&self, config: ResourceGroupsConfig) {
        *self.config.write() = config;
    }
}

impl ConfigurationManager for StaticConfigurationManager {
    fn load(&self) -> Result<ResourceGroupsConfig, SchedulerError> {
        Ok(self.config.read().clone())
    }
}

/// Factory registered as `static`; always hands out the same shared manager.
#[derive(Debug, Clone)]
pub struct StaticConfigurationManagerFactory {
    manager: Arc<StaticConfigurationManager>,
}

impl StaticConfigurationManagerFactory {
    /// Factory serving `config`.
    #[must_use]
    pub fn new(config: ResourceGroupsConfig) -> Self {
        Self {
            manager: Arc::new(StaticConfigurationManager::new(config)),
        }
    }

    /// The shared manager, for updating the configuration in place.
    #[must_use]
    pub fn manager(&self) -> Arc<StaticConfigurationManager> {
        Arc::clone(&self.manager)
    }
}

impl ConfigurationManagerFactory for StaticConfigurationManagerFactory {
    fn name(&self) -> &str {
        "static"
    }

    fn create(
        &self,
        _properties: &HashMap<String, String>,
    ) -> Result<Arc<dyn ConfigurationManager>, SchedulerError> {
        let manager: Arc<dyn ConfigurationManager> = self.manager.clone();
        Ok(manager)
    }
}

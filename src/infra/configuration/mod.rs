//! Configuration managers: sources of resource group configuration.
//!
//! A manager is created by a named factory registered with the resource group
//! manager, then polled on every refresh.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ResourceGroupsConfig;
use crate::core::SchedulerError;

pub mod file;
pub mod memory;

pub use file::{FileConfigurationManager, FileConfigurationManagerFactory};
pub use memory::{StaticConfigurationManager, StaticConfigurationManagerFactory};

/// Source of the current resource group configuration.
pub trait ConfigurationManager: Send + Sync {
    /// Load the configuration as it stands now.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Configuration`] when the source cannot be read
    /// or does not parse.
    fn load(&self) -> Result<ResourceGroupsConfig, SchedulerError>;
}

/// Named constructor for a [`ConfigurationManager`].
pub trait ConfigurationManagerFactory: Send + Sync {
    /// Name used to select this factory in settings.
    fn name(&self) -> &str;

    /// Build a manager from factory properties.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Configuration`] for missing or invalid properties.
    fn create(
        &self,
        properties: &HashMap<String, String>,
    ) -> Result<Arc<dyn ConfigurationManager>, SchedulerError>;
}

//! Infrastructure adapters for configuration sources.

pub mod configuration;

pub use configuration::{
    ConfigurationManager, ConfigurationManagerFactory, FileConfigurationManagerFactory,
    StaticConfigurationManagerFactory,
};

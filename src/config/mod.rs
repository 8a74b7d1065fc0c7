//! Configuration models for resource groups and manager settings.

pub mod groups;
pub mod settings;

pub use groups::{
    ResourceEstimateSpec, ResourceGroupTemplate, ResourceGroupsConfig, SchedulingPolicy,
    SelectorSpec,
};
pub use settings::{ManagerSettings, CONFIG_FILE_PROPERTY};

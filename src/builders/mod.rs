//! Builders to construct resource group managers from settings.

pub mod manager_builder;

pub use manager_builder::{ManagerBuilder, NodeRole};

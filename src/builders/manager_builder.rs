//! Builder selecting and wiring the resource group manager for a node.

use std::sync::Arc;

use crate::config::ManagerSettings;
use crate::core::{
    ActiveResourceGroupManager, AuditSink, DisabledResourceGroupManager, ResourceGroupManager,
    SchedulerError, Scheduler,
};
use crate::infra::configuration::{
    ConfigurationManagerFactory, FileConfigurationManagerFactory,
};

/// Role of the process in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeRole {
    /// Admits queries; runs the active manager.
    #[default]
    Coordinator,
    /// Never admits queries; runs the disabled manager.
    Worker,
}

/// Build a manager from settings, registering the `file` factory by default.
///
/// ```rust,ignore
/// use prometheus_resource_groups::builders::{ManagerBuilder, NodeRole};
/// use prometheus_resource_groups::config::ManagerSettings;
///
/// let manager = ManagerBuilder::new(ManagerSettings::from_env()?)
///     .with_role(NodeRole::Coordinator)
///     .build_and_load()?;
/// ```
pub struct ManagerBuilder {
    settings: ManagerSettings,
    role: NodeRole,
    seed: Option<u64>,
    audit: Option<Arc<dyn AuditSink>>,
    factories: Vec<Arc<dyn ConfigurationManagerFactory>>,
}

impl ManagerBuilder {
    /// Coordinator builder with the `file` factory registered.
    #[must_use]
    pub fn new(settings: ManagerSettings) -> Self {
        Self {
            settings,
            role: NodeRole::Coordinator,
            seed: None,
            audit: None,
            factories: vec![Arc::new(FileConfigurationManagerFactory)],
        }
    }

    /// Set the node role.
    #[must_use]
    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.role = role;
        self
    }

    /// Seed weighted draws for reproducible scheduling.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Mirror admission decisions into `audit`.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Register an additional configuration manager factory.
    #[must_use]
    pub fn with_factory(mut self, factory: Arc<dyn ConfigurationManagerFactory>) -> Self {
        self.factories.push(factory);
        self
    }

    /// Build the active manager regardless of role.
    #[must_use]
    pub fn build_active(self) -> ActiveResourceGroupManager {
        let scheduler = self.seed.map_or_else(Scheduler::from_entropy, Scheduler::seeded);
        let manager = ActiveResourceGroupManager::with_parts(self.settings, scheduler, self.audit);
        for factory in self.factories {
            manager.add_configuration_manager_factory(factory);
        }
        manager
    }

    /// Build the manager matching the role.
    #[must_use]
    pub fn build(self) -> Arc<dyn ResourceGroupManager> {
        match self.role {
            NodeRole::Coordinator => Arc::new(self.build_active()),
            NodeRole::Worker => Arc::new(DisabledResourceGroupManager),
        }
    }

    /// Build the manager and load its configuration manager.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Configuration`] if the configured factory is
    /// missing or its configuration is invalid.
    pub fn build_and_load(self) -> Result<Arc<dyn ResourceGroupManager>, SchedulerError> {
        self.settings
            .validate()
            .map_err(|e| SchedulerError::Configuration(format!("settings invalid: {e}")))?;
        let manager = self.build();
        manager.load_configuration_manager()?;
        Ok(manager)
    }
}

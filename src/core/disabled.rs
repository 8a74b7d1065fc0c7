//! Manager used on nodes that never admit queries.

use std::sync::Arc;

use crate::config::ResourceGroupsConfig;
use crate::core::manager::{ResourceGroupManager, Selection};
use crate::core::{
    QueryHandle, QueryState, ResourceGroupId, ResourceGroupInfo, SchedulerError, SelectionContext,
    SelectionCriteria, Spawn,
};
use crate::infra::configuration::ConfigurationManagerFactory;
use crate::util::serde::QueryId;

/// Accepts configuration calls silently and refuses every scheduling call.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledResourceGroupManager;

fn unsupported(operation: &str) -> SchedulerError {
    SchedulerError::Unsupported(format!("{operation} on a node without resource groups"))
}

impl ResourceGroupManager for DisabledResourceGroupManager {
    fn submit(
        &self,
        _query: QueryHandle,
        _selection: Selection,
        _executor: Arc<dyn Spawn>,
    ) -> Result<QueryState, SchedulerError> {
        Err(unsupported("submit"))
    }

    fn select_group(&self, _criteria: &SelectionCriteria) -> Result<SelectionContext, SchedulerError> {
        Err(unsupported("select_group"))
    }

    fn try_get_resource_group_info(
        &self,
        _id: &ResourceGroupId,
    ) -> Result<Option<ResourceGroupInfo>, SchedulerError> {
        Err(unsupported("try_get_resource_group_info"))
    }

    fn try_get_path_to_root(
        &self,
        _id: &ResourceGroupId,
    ) -> Result<Option<Vec<ResourceGroupInfo>>, SchedulerError> {
        Err(unsupported("try_get_path_to_root"))
    }

    fn cancel_queued(&self, _query_id: &QueryId) -> Result<bool, SchedulerError> {
        Err(unsupported("cancel_queued"))
    }

    fn add_configuration_manager_factory(&self, _factory: Arc<dyn ConfigurationManagerFactory>) {}

    fn load_configuration_manager(&self) -> Result<(), SchedulerError> {
        Ok(())
    }

    fn refresh(&self) -> Result<(), SchedulerError> {
        Ok(())
    }

    fn tick(&self) -> Result<(), SchedulerError> {
        Ok(())
    }

    fn apply_config(&self, _config: &ResourceGroupsConfig) -> Result<(), SchedulerError> {
        Ok(())
    }
}

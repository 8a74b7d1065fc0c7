//! Tests for manager builders

use std::sync::Arc;

use prometheus_resource_groups::builders::{ManagerBuilder, NodeRole};
use prometheus_resource_groups::config::{
    ManagerSettings, ResourceGroupTemplate, ResourceGroupsConfig, SelectorSpec,
    CONFIG_FILE_PROPERTY,
};
use prometheus_resource_groups::core::{
    QueryHandle, QueryLifecycle, ResourceGroupManager, RunningQuery, SchedulerError, Selection,
    SelectionCriteria,
};
use prometheus_resource_groups::infra::configuration::StaticConfigurationManagerFactory;
use prometheus_resource_groups::runtime::InlineSpawner;

struct Noop;

impl QueryLifecycle for Noop {
    fn on_started(&self, running: RunningQuery) {
        running.finish();
    }
}

fn config() -> ResourceGroupsConfig {
    ResourceGroupsConfig {
        root_groups: vec![ResourceGroupTemplate::new("global", 4, 10)
            .with_sub_group(ResourceGroupTemplate::new("${USER}", 1, 2))],
        selectors: vec![SelectorSpec::for_group("global.${USER}")],
        ..ResourceGroupsConfig::default()
    }
}

#[test]
fn test_worker_builds_disabled_manager() {
    let manager = ManagerBuilder::new(ManagerSettings::default())
        .with_role(NodeRole::Worker)
        .build();
    let err = manager
        .submit(
            QueryHandle::new("q1", Arc::new(Noop)),
            Selection::Criteria(SelectionCriteria::new("alice")),
            Arc::new(InlineSpawner),
        )
        .unwrap_err();
    assert!(matches!(err, SchedulerError::Unsupported(_)));
    assert!(manager.apply_config(&config()).is_ok());
    assert!(manager.refresh().is_ok());
}

#[test]
fn test_coordinator_loads_static_configuration() {
    let factory = StaticConfigurationManagerFactory::new(config());
    let manager = ManagerBuilder::new(ManagerSettings::new("static"))
        .with_factory(Arc::new(factory))
        .with_seed(3)
        .build_and_load()
        .unwrap();

    let ctx = manager.select_group(&SelectionCriteria::new("alice")).unwrap();
    assert_eq!(ctx.group_id, "global.alice".parse().unwrap());
    manager
        .submit(QueryHandle::new("q1", Arc::new(Noop)), ctx.into(), Arc::new(InlineSpawner))
        .unwrap();

    let path = manager
        .try_get_path_to_root(&"global.alice".parse().unwrap())
        .unwrap()
        .unwrap();
    let path: Vec<String> = path.iter().map(|info| info.id.to_string()).collect();
    assert_eq!(path, vec!["global".to_string(), "global.alice".to_string()]);
}

#[test]
fn test_unknown_factory_is_configuration_error() {
    let result = ManagerBuilder::new(ManagerSettings::new("zookeeper")).build_and_load();
    assert!(matches!(result, Err(SchedulerError::Configuration(msg)) if msg.contains("zookeeper")));
}

#[test]
fn test_file_factory_requires_path_property() {
    let result = ManagerBuilder::new(ManagerSettings::default()).build_and_load();
    assert!(matches!(result, Err(SchedulerError::Configuration(msg)) if msg.contains(CONFIG_FILE_PROPERTY)));
}

#[test]
fn test_file_factory_reads_json() {
    let path = std::env::temp_dir().join(format!("resource-groups-{}.json", std::process::id()));
    std::fs::write(&path, serde_json::to_string(&config()).unwrap()).unwrap();

    let settings = ManagerSettings::default().with_property(CONFIG_FILE_PROPERTY, path.display().to_string());
    let manager = ManagerBuilder::new(settings).build_and_load().unwrap();
    assert!(manager.select_group(&SelectionCriteria::new("bob")).is_ok());

    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(manager.refresh(), Err(SchedulerError::Configuration(_))));
    // The previous configuration stays in effect.
    assert!(manager.select_group(&SelectionCriteria::new("bob")).is_ok());
    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_invalid_settings_are_rejected_before_loading() {
    let mut settings = ManagerSettings::new("static");
    settings.refresh_interval_secs = 0;
    let result = ManagerBuilder::new(settings)
        .with_factory(Arc::new(StaticConfigurationManagerFactory::new(config())))
        .build_and_load();
    assert!(matches!(result, Err(SchedulerError::Configuration(_))));
}

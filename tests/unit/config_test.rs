//! Tests for configuration validation

use prometheus_resource_groups::config::{
    ManagerSettings, ResourceGroupTemplate, ResourceGroupsConfig, SchedulingPolicy, SelectorSpec,
};
use prometheus_resource_groups::util::MemorySize;

const SAMPLE: &str = r#"{
    "root_groups": [
        {
            "name": "global",
            "hard_concurrency_limit": 100,
            "max_queued": 1000,
            "soft_memory_limit": "1TB",
            "scheduling_policy": "weighted_fair",
            "sub_groups": [
                { "name": "adhoc", "hard_concurrency_limit": 10, "max_queued": 100, "scheduling_weight": 1,
                  "sub_groups": [ { "name": "${USER}", "hard_concurrency_limit": 2, "max_queued": 10 } ] },
                { "name": "pipeline", "hard_concurrency_limit": 50, "max_queued": 500, "scheduling_weight": 4 }
            ]
        }
    ],
    "selectors": [
        { "source": "airflow", "group": "global.pipeline" },
        { "user": "(?<USER>[a-z]+)", "client_tags": ["interactive"], "group": "global.adhoc.${USER}" }
    ],
    "root_scheduling_policy": "fifo"
}"#;

#[test]
fn test_parse_full_configuration() {
    let cfg = ResourceGroupsConfig::from_json_str(SAMPLE).unwrap();
    assert_eq!(cfg.root_groups.len(), 1);
    let global = &cfg.root_groups[0];
    assert_eq!(global.scheduling_policy, SchedulingPolicy::WeightedFair);
    assert_eq!(global.soft_memory_limit, Some(MemorySize::Text("1TB".into())));
    assert_eq!(global.sub_groups[0].scheduling_weight, 1);
    assert_eq!(global.sub_groups[1].scheduling_weight, 4);
    assert_eq!(global.sub_groups[0].sub_groups[0].scheduling_policy, SchedulingPolicy::Fifo);
    assert_eq!(cfg.selectors[1].client_tags, vec!["interactive".to_string()]);
}

#[test]
fn test_defaults_when_fields_absent() {
    let cfg = ResourceGroupsConfig::from_json_str(
        r#"{ "root_groups": [ { "name": "solo", "hard_concurrency_limit": 1, "max_queued": 0 } ] }"#,
    )
    .unwrap();
    let solo = &cfg.root_groups[0];
    assert_eq!(solo.scheduling_weight, 1);
    assert_eq!(solo.scheduling_policy, SchedulingPolicy::Fifo);
    assert!(solo.sub_groups.is_empty());
    assert!(cfg.selectors.is_empty());
}

#[test]
fn test_rejects_duplicate_siblings() {
    let cfg = ResourceGroupsConfig {
        root_groups: vec![ResourceGroupTemplate::new("a", 1, 1)
            .with_sub_group(ResourceGroupTemplate::new("x", 1, 1))
            .with_sub_group(ResourceGroupTemplate::new("x", 1, 1))],
        ..ResourceGroupsConfig::default()
    };
    assert!(cfg.validate().unwrap_err().contains("duplicate"));
}

#[test]
fn test_rejects_zero_weight_and_dotted_names() {
    let zero = ResourceGroupTemplate::new("a", 1, 1).with_weight(0);
    assert!(zero.validate().is_err());
    let dotted = ResourceGroupTemplate::new("a.b", 1, 1);
    assert!(dotted.validate().is_err());
}

#[test]
fn test_query_priority_requires_matching_children() {
    let mixed = ResourceGroupTemplate::new("p", 1, 1)
        .with_policy(SchedulingPolicy::QueryPriority)
        .with_sub_group(ResourceGroupTemplate::new("c", 1, 1));
    assert!(mixed.validate().is_err());

    let cfg = ResourceGroupsConfig {
        root_groups: vec![ResourceGroupTemplate::new("p", 1, 1)],
        root_scheduling_policy: SchedulingPolicy::QueryPriority,
        ..ResourceGroupsConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_rejects_bad_memory_limit() {
    let cfg = r#"{ "root_groups": [ { "name": "a", "hard_concurrency_limit": 1, "max_queued": 1, "soft_memory_limit": "ten" } ] }"#;
    assert!(ResourceGroupsConfig::from_json_str(cfg).is_err());
}

#[test]
fn test_rejects_empty_selector_group() {
    let cfg = ResourceGroupsConfig {
        selectors: vec![SelectorSpec::default()],
        ..ResourceGroupsConfig::default()
    };
    assert!(cfg.validate().unwrap_err().contains("selector #0"));
}

#[test]
fn test_manager_settings_validation() {
    let settings = ManagerSettings::new("static").with_property("k", "v");
    assert!(settings.validate().is_ok());
    assert_eq!(settings.properties.get("k").map(String::as_str), Some("v"));
    assert_eq!(settings.refresh_interval().as_secs(), 10);

    let mut invalid = ManagerSettings::default();
    invalid.tick_interval_ms = 0;
    assert!(invalid.validate().is_err());
    invalid = ManagerSettings::new("");
    assert!(invalid.validate().is_err());
}

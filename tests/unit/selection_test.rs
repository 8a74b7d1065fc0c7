//! Tests for selection rules

use std::sync::Arc;

use prometheus_resource_groups::builders::ManagerBuilder;
use prometheus_resource_groups::config::{
    ManagerSettings, ResourceEstimateSpec, ResourceGroupTemplate, ResourceGroupsConfig,
    SelectorSpec,
};
use prometheus_resource_groups::core::{
    QueryHandle, QueryLifecycle, ResourceEstimate, ResourceGroupId, ResourceGroupManager,
    RunningQuery, SchedulerError, SelectionContext, SelectionCriteria, SelectionEngine,
    TemplateForest,
};
use prometheus_resource_groups::runtime::InlineSpawner;
use prometheus_resource_groups::util::MemorySize;

fn forest() -> TemplateForest {
    let global = ResourceGroupTemplate::new("global", 10, 100)
        .with_sub_group(
            ResourceGroupTemplate::new("adhoc", 5, 50)
                .with_sub_group(ResourceGroupTemplate::new("${USER}", 1, 10)),
        )
        .with_sub_group(ResourceGroupTemplate::new("pipeline", 5, 50))
        .with_sub_group(ResourceGroupTemplate::new("big", 1, 5));
    TemplateForest::compile(&[global]).unwrap()
}

fn rules() -> Vec<SelectorSpec> {
    vec![
        SelectorSpec::for_group("global.pipeline").with_source("airflow"),
        SelectorSpec::for_group("global.adhoc.${TEAM}").with_user("(?<TEAM>[a-z]+)-svc"),
        SelectorSpec {
            resource_estimate: Some(ResourceEstimateSpec {
                min_peak_memory: Some(MemorySize::Text("1GB".into())),
                ..ResourceEstimateSpec::default()
            }),
            ..SelectorSpec::for_group("global.big").with_client_tag("big")
        },
        SelectorSpec::for_group("global.pipeline").with_query_type("INSERT"),
        SelectorSpec::for_group("global.adhoc.${USER}"),
    ]
}

fn engine() -> SelectionEngine {
    SelectionEngine::compile(&rules(), &forest()).unwrap()
}

fn id(path: &str) -> ResourceGroupId {
    path.parse().unwrap()
}

#[test]
fn test_first_matching_rule_wins() {
    let engine = engine();
    assert_eq!(engine.len(), 5);

    let ctx = engine
        .select(&SelectionCriteria::new("alice").with_source("airflow").with_query_type("INSERT"))
        .unwrap();
    assert_eq!(ctx.group_id, id("global.pipeline"));
    assert_eq!(ctx.rule_index, 0);

    let ctx = engine
        .select(&SelectionCriteria::new("alice").with_query_type("INSERT"))
        .unwrap();
    assert_eq!(ctx.rule_index, 3);
}

#[test]
fn test_source_rule_skipped_when_source_absent() {
    let ctx = engine().select(&SelectionCriteria::new("alice")).unwrap();
    assert_eq!(ctx.group_id, id("global.adhoc.alice"));
    assert_eq!(ctx.rule_index, 4);
    assert_eq!(ctx.variables.get("USER").map(String::as_str), Some("alice"));
    assert!(!ctx.variables.contains_key("SOURCE"));
}

#[test]
fn test_named_capture_feeds_group_template() {
    let ctx = engine().select(&SelectionCriteria::new("etl-svc")).unwrap();
    assert_eq!(ctx.group_id, id("global.adhoc.etl"));
    assert_eq!(ctx.rule_index, 1);
    assert_eq!(ctx.variables.get("TEAM").map(String::as_str), Some("etl"));
}

#[test]
fn test_user_pattern_is_anchored() {
    // `x-etl-svc-y` would match an unanchored pattern.
    let ctx = engine().select(&SelectionCriteria::new("x-etl-svc-y")).unwrap();
    assert_eq!(ctx.rule_index, 4);
}

#[test]
fn test_client_tags_and_estimate_range() {
    let engine = engine();
    let big = SelectionCriteria::new("bob")
        .with_client_tag("big")
        .with_client_tag("nightly")
        .with_resource_estimate(ResourceEstimate {
            peak_memory_bytes: Some(2 << 30),
            execution_time_ms: None,
        });
    assert_eq!(engine.select(&big).unwrap().group_id, id("global.big"));

    let small = SelectionCriteria::new("bob")
        .with_client_tag("big")
        .with_resource_estimate(ResourceEstimate {
            peak_memory_bytes: Some(1 << 20),
            execution_time_ms: None,
        });
    assert_eq!(engine.select(&small).unwrap().group_id, id("global.adhoc.bob"));

    // A bounded range never matches a query without an estimate.
    let unknown = SelectionCriteria::new("bob").with_client_tag("big");
    assert_eq!(engine.select(&unknown).unwrap().rule_index, 4);
}

#[test]
fn test_selection_is_deterministic() {
    let engine = engine();
    let criteria = SelectionCriteria::new("carol").with_source("cli");
    let first = engine.select(&criteria).unwrap();
    for _ in 0..10 {
        assert_eq!(engine.select(&criteria).unwrap(), first);
    }
}

#[test]
fn test_no_match_is_selection_failure() {
    let engine = SelectionEngine::compile(&rules()[..1], &forest()).unwrap();
    let err = engine.select(&SelectionCriteria::new("alice")).unwrap_err();
    assert!(matches!(err, SchedulerError::SelectionFailure(_)));
}

#[test]
fn test_compile_rejects_unknown_placeholder() {
    let rules = vec![SelectorSpec::for_group("global.adhoc.${TEAM}")];
    let err = SelectionEngine::compile(&rules, &forest()).unwrap_err();
    assert!(matches!(err, SchedulerError::Configuration(msg) if msg.contains("TEAM")));
}

#[test]
fn test_compile_rejects_non_leaf_target() {
    let rules = vec![SelectorSpec::for_group("global.adhoc")];
    let err = SelectionEngine::compile(&rules, &forest()).unwrap_err();
    assert!(matches!(err, SchedulerError::Configuration(msg) if msg.contains("not a leaf")));
}

#[test]
fn test_compile_rejects_unknown_group_and_bad_pattern() {
    let missing = vec![SelectorSpec::for_group("global.nowhere")];
    assert!(SelectionEngine::compile(&missing, &forest()).is_err());

    let bad = vec![SelectorSpec::for_group("global.pipeline").with_user("(")];
    let err = SelectionEngine::compile(&bad, &forest()).unwrap_err();
    assert!(matches!(err, SchedulerError::Configuration(msg) if msg.contains("user pattern")));
}

#[test]
fn test_dotted_user_does_not_split_group_path() {
    let rules = vec![
        SelectorSpec::for_group("global.adhoc.${USER}"),
        SelectorSpec::for_group("global.pipeline"),
    ];
    let engine = SelectionEngine::compile(&rules, &forest()).unwrap();

    let ctx = engine.select(&SelectionCriteria::new("john.doe")).unwrap();
    assert_eq!(ctx.group_id, id("global.pipeline"));
    assert_eq!(ctx.rule_index, 1);

    let ctx = engine.select(&SelectionCriteria::new("john")).unwrap();
    assert_eq!(ctx.group_id.to_string().parse::<ResourceGroupId>().unwrap(), ctx.group_id);
}

#[test]
fn test_dotted_segment_is_not_a_group() {
    let manager = ManagerBuilder::new(ManagerSettings::default()).build_active();
    manager
        .apply_config(&ResourceGroupsConfig {
            root_groups: vec![ResourceGroupTemplate::new("adhoc", 1, 1)
                .with_sub_group(ResourceGroupTemplate::new("${USER}", 1, 1))],
            ..ResourceGroupsConfig::default()
        })
        .unwrap();
    let dotted = ResourceGroupId::from_segments(["adhoc", "john.doe"]);
    let err = manager
        .submit(
            QueryHandle::new("q1", Arc::new(Idle)),
            SelectionContext::for_group(dotted).into(),
            Arc::new(InlineSpawner),
        )
        .unwrap_err();
    assert!(matches!(err, SchedulerError::UnknownGroup(_)));
}

struct Idle;

impl QueryLifecycle for Idle {
    fn on_started(&self, running: RunningQuery) {
        running.finish();
    }
}

#[test]
fn test_submit_uses_handle_estimate_when_criteria_have_none() {
    let manager = ManagerBuilder::new(ManagerSettings::default()).build_active();
    manager
        .apply_config(&ResourceGroupsConfig {
            root_groups: vec![ResourceGroupTemplate::new("global", 10, 10)
                .with_sub_group(ResourceGroupTemplate::new("big", 1, 1))
                .with_sub_group(ResourceGroupTemplate::new("pipeline", 1, 1))],
            selectors: vec![
                SelectorSpec {
                    resource_estimate: Some(ResourceEstimateSpec {
                        min_peak_memory: Some(MemorySize::Text("1GB".into())),
                        ..ResourceEstimateSpec::default()
                    }),
                    ..SelectorSpec::for_group("global.big")
                },
                SelectorSpec::for_group("global.pipeline"),
            ],
            ..ResourceGroupsConfig::default()
        })
        .unwrap();

    let heavy = QueryHandle::new("heavy", Arc::new(Idle)).with_estimate(ResourceEstimate {
        peak_memory_bytes: Some(2 << 30),
        execution_time_ms: None,
    });
    let light = QueryHandle::new("light", Arc::new(Idle));
    for handle in [heavy, light] {
        manager
            .submit(handle, SelectionCriteria::new("alice").into(), Arc::new(InlineSpawner))
            .unwrap();
    }

    let admitted = |path: &str| {
        manager
            .try_get_resource_group_info(&id(path))
            .unwrap()
            .map(|info| info.total_admitted)
    };
    assert_eq!(admitted("global.big"), Some(1));
    assert_eq!(admitted("global.pipeline"), Some(1));
}

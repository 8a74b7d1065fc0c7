//! Tests for error types

use prometheus_resource_groups::core::{ResourceGroupId, SchedulerError};
use prometheus_resource_groups::util::serde::QueryId;

#[test]
fn test_rejection_error() {
    let err = SchedulerError::Rejection {
        group: "global.adhoc".parse::<ResourceGroupId>().unwrap(),
        max_queued: 10,
    };
    assert_eq!(
        format!("{}", err),
        "queue full for resource group global.adhoc (max_queued=10)"
    );
}

#[test]
fn test_unknown_group_error() {
    let err = SchedulerError::UnknownGroup(ResourceGroupId::from_segments(["a", "b"]));
    assert_eq!(format!("{}", err), "unknown resource group: a.b");
}

#[test]
fn test_unknown_template_error() {
    let err = SchedulerError::UnknownTemplate {
        parent: ResourceGroupId::from_segments(["global"]),
        segment: "etl".into(),
    };
    assert_eq!(
        format!("{}", err),
        "no template matches `etl` under resource group `global`"
    );
}

#[test]
fn test_duplicate_query_error() {
    let err = SchedulerError::DuplicateQuery(QueryId::from("q-7"));
    assert_eq!(format!("{}", err), "query q-7 is already registered");
}

#[test]
fn test_configuration_error() {
    let err = SchedulerError::Configuration("bad selector".to_string());
    assert_eq!(
        format!("{}", err),
        "invalid resource group configuration: bad selector"
    );
}

#[test]
fn test_errors_compare_by_value() {
    let a = SchedulerError::InvariantViolation("running count underflow".into());
    assert_eq!(a.clone(), a);
    assert_ne!(a, SchedulerError::Unsupported("submit".into()));
}

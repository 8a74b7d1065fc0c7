//! Tests for audit sink

use std::sync::Arc;

use prometheus_resource_groups::builders::ManagerBuilder;
use prometheus_resource_groups::config::{ManagerSettings, ResourceGroupTemplate, ResourceGroupsConfig};
use prometheus_resource_groups::core::{
    build_admission_event, AdmissionAction, AuditSink, InMemoryAuditSink, QueryHandle,
    QueryLifecycle, ResourceGroupId, ResourceGroupManager, RunningQuery, Selection,
    SelectionContext,
};
use prometheus_resource_groups::runtime::InlineSpawner;
use prometheus_resource_groups::util::QueryId;

#[test]
fn test_in_memory_audit_sink() {
    let sink = InMemoryAuditSink::new(10);
    let group = ResourceGroupId::from_segments(["etl"]);
    let event = build_admission_event(
        &QueryId::from("q1"),
        &group,
        AdmissionAction::Queued,
        Some("waiting".to_string()),
    );

    sink.record(event.clone());
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0].query_id.as_str(), "q1");
    assert_eq!(events[0].group, group);
    assert_eq!(events[0].action, AdmissionAction::Queued);
    assert_eq!(events[0].action.to_string(), "queued");
}

#[test]
fn test_audit_sink_overflow() {
    let sink = InMemoryAuditSink::new(2);
    let group = ResourceGroupId::from_segments(["etl"]);

    for id in ["q1", "q2", "q3"] {
        sink.record(build_admission_event(&QueryId::from(id), &group, AdmissionAction::Started, None));
    }

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].query_id.as_str(), "q2"); // First one popped
    assert_eq!(events[1].query_id.as_str(), "q3");
}

/// Drops its token as soon as it starts: the slot is released as cancelled.
struct DropImmediately;

impl QueryLifecycle for DropImmediately {
    fn on_started(&self, running: RunningQuery) {
        drop(running);
    }
}

/// Finishes right away.
struct FinishImmediately;

impl QueryLifecycle for FinishImmediately {
    fn on_started(&self, running: RunningQuery) {
        running.finish();
    }
}

#[test]
fn test_manager_records_admission_lifecycle() {
    let sink = Arc::new(InMemoryAuditSink::new(64));
    let manager = ManagerBuilder::new(ManagerSettings::default())
        .with_seed(1)
        .with_audit(sink.clone())
        .build_active();
    manager
        .apply_config(&ResourceGroupsConfig {
            root_groups: vec![ResourceGroupTemplate::new("etl", 1, 0)],
            ..ResourceGroupsConfig::default()
        })
        .unwrap();
    let target = || Selection::Context(SelectionContext::for_group(ResourceGroupId::from_segments(["etl"])));

    manager
        .submit(QueryHandle::new("done", Arc::new(FinishImmediately)), target(), Arc::new(InlineSpawner))
        .unwrap();
    manager
        .submit(QueryHandle::new("dropped", Arc::new(DropImmediately)), target(), Arc::new(InlineSpawner))
        .unwrap();

    assert_eq!(
        sink.events_for(&QueryId::from("done")),
        vec![AdmissionAction::Started, AdmissionAction::Finished]
    );
    assert_eq!(
        sink.events_for(&QueryId::from("dropped")),
        vec![AdmissionAction::Started, AdmissionAction::Cancelled]
    );
}

//! Tests for utility functions

use prometheus_resource_groups::core::ResourceGroupId;
use prometheus_resource_groups::util::{init_tracing, MemorySize, Priority, QueryId, DEFAULT_LOG_FILTER};

#[test]
fn test_priority_ordering() {
    assert!(Priority::Critical > Priority::High);
    assert!(Priority::High > Priority::Normal);
    assert!(Priority::Normal > Priority::Low);
    assert_eq!(Priority::default(), Priority::Normal);
}

#[test]
fn test_query_id_roundtrip() {
    let id = QueryId::new("20240101_000001_00001");
    assert_eq!(id.as_str(), "20240101_000001_00001");
    assert_eq!(id.to_string(), "20240101_000001_00001");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"20240101_000001_00001\"");
}

#[test]
fn test_memory_size_units() {
    assert_eq!(MemorySize::Text("1KB".into()).to_bytes().unwrap(), 1024);
    assert_eq!(MemorySize::Text("3GB".into()).to_bytes().unwrap(), 3 << 30);
    assert_eq!(MemorySize::from(42).to_bytes().unwrap(), 42);
    assert!(MemorySize::Text("-1MB".into()).to_bytes().is_err());
}

#[test]
fn test_group_id_paths() {
    let id: ResourceGroupId = "global.adhoc.alice".parse().unwrap();
    assert_eq!(id.depth(), 3);
    assert_eq!(id.name(), Some("alice"));
    assert_eq!(id.parent(), Some("global.adhoc".parse().unwrap()));
    assert!(id.is_descendant_of(&"global".parse().unwrap()));
    assert!(!"global".parse::<ResourceGroupId>().unwrap().is_descendant_of(&id));
    assert!("global..adhoc".parse::<ResourceGroupId>().is_err());
    assert!("".parse::<ResourceGroupId>().unwrap().is_root());
}

#[test]
fn test_group_id_serializes_as_segments() {
    let id: ResourceGroupId = "a.b".parse().unwrap();
    assert_eq!(serde_json::to_string(&id).unwrap(), r#"["a","b"]"#);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    tracing::info!(component = "util_test", "tracing initialized");
    assert!(DEFAULT_LOG_FILTER.contains("prometheus_resource_groups"));
}

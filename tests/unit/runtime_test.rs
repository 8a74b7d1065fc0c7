//! Tests for runtime adapters

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use prometheus_resource_groups::builders::ManagerBuilder;
use prometheus_resource_groups::config::{ManagerSettings, ResourceGroupTemplate, ResourceGroupsConfig};
use prometheus_resource_groups::core::{
    boxed, QueryHandle, QueryLifecycle, ResourceGroupId, ResourceGroupManager, RunningQuery,
    SelectionContext, Spawn,
};
use prometheus_resource_groups::infra::configuration::StaticConfigurationManagerFactory;
use prometheus_resource_groups::runtime::{spawn_refresh_loop, InlineSpawner, TokioSpawner};

#[test]
fn test_inline_spawner_runs_before_returning() {
    let counter = Arc::new(AtomicUsize::new(0));
    let c = counter.clone();
    InlineSpawner.spawn(boxed(async move {
        c.fetch_add(1, Ordering::SeqCst);
    }));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_tokio_spawner() {
    let spawner = TokioSpawner::current();
    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner.spawn(boxed(async move {
        let _ = tx.send(42);
    }));
    assert_eq!(rx.await.unwrap(), 42);
}

fn config(limit: u32) -> ResourceGroupsConfig {
    ResourceGroupsConfig {
        root_groups: vec![ResourceGroupTemplate::new("etl", limit, 10)],
        ..ResourceGroupsConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_refresh_loop_picks_up_updates() {
    let factory = StaticConfigurationManagerFactory::new(config(3));
    let source = factory.manager();
    let mut settings = ManagerSettings::new("static");
    settings.refresh_interval_secs = 1;
    settings.tick_interval_ms = 5;
    let manager = ManagerBuilder::new(settings.clone())
        .with_factory(Arc::new(factory))
        .build_and_load()
        .unwrap();

    let etl: ResourceGroupId = "etl".parse().unwrap();
    let limit = |m: &Arc<dyn ResourceGroupManager>| {
        m.try_get_resource_group_info(&etl)
            .unwrap()
            .map(|info| info.hard_concurrency_limit)
    };
    // Groups materialize on first use.
    assert_eq!(limit(&manager), None);
    manager
        .submit(
            QueryHandle::new("q1", Arc::new(Hold)),
            SelectionContext::for_group("etl".parse().unwrap()).into(),
            Arc::new(InlineSpawner),
        )
        .unwrap();
    assert_eq!(limit(&manager), Some(3));

    let handle = spawn_refresh_loop(manager.clone(), &settings);
    source.update(config(7));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while limit(&manager) != Some(7) {
        assert!(tokio::time::Instant::now() < deadline, "refresh never applied");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.shutdown().await;
}

/// Keeps its slot until the process exits.
struct Hold;

impl QueryLifecycle for Hold {
    fn on_started(&self, running: RunningQuery) {
        std::mem::forget(running);
    }
}

//! Connector behavior over the mock runtime: discovery, refresh, removal
//! and the registry contract.

use super::*;
use crate::collector::testing::{eventually, InstrumentedCollector};
use crate::collector::Collector;
use crate::entity::{Entity, DESTROYED, RUNNING, STATE_KEY};
use crate::health::{components, ComponentStatus};
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

type Collectors = Arc<StdMutex<HashMap<String, Arc<InstrumentedCollector>>>>;

struct Harness {
    runtime: MockRuntime,
    collectors: Collectors,
    health: HealthRegistry,
    connector: Arc<RuntimeConnector<MockRuntime>>,
}

impl Harness {
    fn new(queue: usize) -> Self {
        let collectors: Collectors = Arc::default();
        let made = Arc::clone(&collectors);
        let runtime = MockRuntime::new(Arc::new(move |id: &str| {
            let collector = InstrumentedCollector::new();
            made.lock()
                .unwrap()
                .insert(id.to_string(), Arc::clone(&collector));
            collector as Arc<dyn Collector>
        }));

        let config = ConnectorConfig {
            refresh_queue_size: queue,
            ..ConnectorConfig::default()
        };
        let health = HealthRegistry::new();
        let connector = RuntimeConnector::new(runtime.clone(), config, health.clone());
        Self {
            runtime,
            collectors,
            health,
            connector,
        }
    }

    /// One discovery pass followed by refreshing everything it queued
    async fn pass(&self) {
        self.connector.discover().await;
        self.connector.drain_refresh_queue().await;
    }

    fn collector(&self, id: &str) -> Arc<InstrumentedCollector> {
        Arc::clone(&self.collectors.lock().unwrap()[id])
    }

    async fn state(&self, id: &str) -> Option<String> {
        let container = self.connector.get_container(id).await?;
        Some(container.get_meta(STATE_KEY))
    }
}

#[tokio::test]
async fn test_discovery_then_vanished_container() {
    let h = Harness::new(60);
    h.runtime.add("a", RUNNING);
    h.runtime.add("b", RUNNING);

    h.pass().await;
    assert!(h.collector("a").running());
    assert!(h.collector("b").running());
    let visible = h.connector.all_containers().await;
    assert_eq!(visible.len(), 2);
    assert!(visible.iter().all(|c| c.display()));

    h.runtime.remove("a");
    h.pass().await;
    assert!(h.connector.get_container("a").await.is_none());
    assert!(!h.collector("a").running());
    assert_eq!(h.state("b").await.as_deref(), Some(RUNNING));
    assert!(h.collector("b").running());
}

#[tokio::test]
async fn test_running_stopped_running_starts_one_reader_per_entry() {
    let h = Harness::new(60);
    h.runtime.add("c", RUNNING);
    h.pass().await;
    let container = h.connector.get_container("c").await.unwrap();

    h.runtime.set_status("c", "stopped");
    h.pass().await;
    assert!(!h.collector("c").running());
    eventually("reader exits", || container.core().active_readers() == 0).await;

    h.runtime.set_status("c", RUNNING);
    h.pass().await;
    h.pass().await;

    let collector = h.collector("c");
    assert_eq!(collector.starts(), 2);
    assert_eq!(collector.streams(), 2);
    assert!(collector.running());
    assert_eq!(container.core().active_readers(), 1);
}

#[tokio::test]
async fn test_full_refresh_queue_blocks_discovery() {
    let h = Harness::new(2);
    let ids = ["q1", "q2", "q3", "q4", "q5"];
    for id in ids {
        h.runtime.add(id, RUNNING);
    }

    let connector = Arc::clone(&h.connector);
    let discovery = tokio::spawn(async move { connector.discover().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!discovery.is_finished());
    assert_eq!(h.connector.pending_refreshes(), 2);

    let mut containers = Vec::new();
    for id in ids {
        containers.push(h.connector.get_container(id).await.unwrap());
    }
    assert!(containers.iter().all(|c| c.get_meta(STATE_KEY).is_empty()));

    let refresh = h.connector.spawn_refresh_loop().unwrap();
    discovery.await.unwrap();
    eventually("every queued id refreshed", || {
        containers.iter().all(|c| c.get_meta(STATE_KEY) == RUNNING)
    })
    .await;
    assert_eq!(h.connector.all_containers().await.len(), ids.len());

    h.connector.shutdown();
    refresh.await.unwrap();
}

#[tokio::test]
async fn test_refresh_loop_has_a_single_consumer() {
    let h = Harness::new(4);
    assert!(h.connector.spawn_refresh_loop().is_some());
    assert!(h.connector.spawn_refresh_loop().is_none());
    h.connector.shutdown();
}

#[tokio::test]
async fn test_destroyed_container_survives_exactly_one_pass() {
    let h = Harness::new(60);
    h.runtime.add("d", RUNNING);
    h.pass().await;

    h.runtime.set_status("d", DESTROYED);
    h.pass().await;
    assert_eq!(h.state("d").await.as_deref(), Some(DESTROYED));
    assert!(!h.collector("d").running());

    h.pass().await;
    assert!(h.connector.get_container("d").await.is_none());
}

#[tokio::test]
async fn test_transient_errors_keep_last_known_state() {
    let h = Harness::new(60);
    h.runtime.add("e", RUNNING);
    h.pass().await;

    h.runtime.set_status("e", "stopped");
    h.runtime.set_fail_status("e", true);
    h.pass().await;
    assert_eq!(h.state("e").await.as_deref(), Some(RUNNING));
    assert!(h.collector("e").running());
    let refresh = h.health.component(components::REFRESH).await.unwrap();
    assert_eq!(refresh.status, ComponentStatus::Degraded);

    h.runtime.set_fail_status("e", false);
    h.runtime.set_fail_load("e", true);
    h.pass().await;
    assert_eq!(h.state("e").await.as_deref(), Some(RUNNING));

    h.runtime.set_fail_load("e", false);
    h.pass().await;
    assert_eq!(h.state("e").await.as_deref(), Some("stopped"));
    let refresh = h.health.component(components::REFRESH).await.unwrap();
    assert_eq!(refresh.status, ComponentStatus::Healthy);
}

#[tokio::test]
async fn test_enumeration_failure_still_refreshes_known_containers() {
    let h = Harness::new(60);
    h.runtime.add("f", RUNNING);
    h.pass().await;

    h.runtime.set_list_error(true);
    h.runtime.set_status("f", "paused");
    h.runtime.add("g", RUNNING);
    h.pass().await;

    assert_eq!(h.state("f").await.as_deref(), Some("paused"));
    assert!(h.connector.get_container("g").await.is_none());
    let discovery = h.health.component(components::DISCOVERY).await.unwrap();
    assert_eq!(discovery.status, ComponentStatus::Degraded);

    h.runtime.set_list_error(false);
    h.pass().await;
    assert_eq!(h.state("g").await.as_deref(), Some(RUNNING));
    let discovery = h.health.component(components::DISCOVERY).await.unwrap();
    assert_eq!(discovery.status, ComponentStatus::Healthy);
}

#[tokio::test]
async fn test_metadata_written_on_refresh() {
    let h = Harness::new(60);
    h.runtime.add("0123456789abcdef0123", RUNNING);
    h.pass().await;

    let container = h.connector.get_container("0123456789abcdef0123").await.unwrap();
    assert_eq!(container.get_meta("name"), "0123456789ab");
    assert_eq!(
        container.get_meta("rootfs"),
        "/var/lib/mock/0123456789abcdef0123/rootfs"
    );
    assert!(!container.get_meta("created").is_empty());
}

#[tokio::test]
async fn test_lookups_return_the_same_entity() {
    let h = Harness::new(60);
    h.runtime.add("h", RUNNING);
    h.pass().await;
    let first = h.connector.get_container("h").await.unwrap();

    h.pass().await;
    h.pass().await;
    let second = h.connector.get_container("h").await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(h.collector("h").starts(), 1);
    assert!(h.connector.get_container("nope").await.is_none());
}

#[tokio::test]
async fn test_set_metrics_routes_by_id() {
    let h = Harness::new(60);
    h.runtime.add("m", "stopped");
    h.pass().await;

    let metrics = Metrics {
        cpu_util: 12.5,
        mem_usage: 4096,
        ..Metrics::for_id("m")
    };
    h.connector.set_metrics(metrics.clone()).await;
    let container = h.connector.get_container("m").await.unwrap();
    assert_eq!(container.get_metrics(), metrics);

    // unknown ids are dropped
    h.connector.set_metrics(Metrics::for_id("ghost")).await;
    assert!(h.connector.get_container("ghost").await.is_none());
}

#[tokio::test]
async fn test_display_filter_applies_to_snapshots() {
    let collectors = |_: &str| InstrumentedCollector::new() as Arc<dyn Collector>;
    let runtime = MockRuntime::new(Arc::new(collectors));
    runtime.add("web", RUNNING);
    runtime.add("db", "stopped");
    let config = ConnectorConfig {
        filter: DisplayFilter {
            pattern: String::new(),
            show_all: false,
        },
        ..ConnectorConfig::default()
    };
    let connector = RuntimeConnector::new(runtime, config, HealthRegistry::new());
    connector.discover().await;
    connector.drain_refresh_queue().await;

    let visible = connector.all_containers().await;
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id(), "web");
    let hidden = connector.get_container("db").await.unwrap();
    assert!(!hidden.display());
}

#[tokio::test]
async fn test_manager_changes_are_observed_on_refresh() {
    let h = Harness::new(60);
    h.runtime.add("n", RUNNING);
    h.pass().await;

    let container = h.connector.get_container("n").await.unwrap();
    container.manager().pause().await.unwrap();
    h.pass().await;
    assert_eq!(container.get_meta(STATE_KEY), "paused");
    assert!(!h.collector("n").running());

    container.manager().remove().await.unwrap();
    h.pass().await;
    assert!(h.connector.get_container("n").await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_snapshots_during_churn() {
    let h = Harness::new(8);
    let refresh = h.connector.spawn_refresh_loop().unwrap();

    let connector = Arc::clone(&h.connector);
    let reader = tokio::spawn(async move {
        let mut reads = 0usize;
        for _ in 0..500 {
            for container in connector.all_containers().await {
                assert_eq!(container.get_meta("id"), container.id());
                reads += 1;
            }
            tokio::task::yield_now().await;
        }
        reads
    });

    for round in 0..40 {
        let id = format!("churn-{}", round % 7);
        if h.runtime.status(&id).is_some() {
            h.runtime.remove(&id);
        } else {
            h.runtime.add(&id, RUNNING);
        }
        if round % 5 == 0 {
            h.runtime.set_status("churn-0", DESTROYED);
        }
        h.connector.discover().await;
    }

    reader.await.unwrap();
    h.connector.shutdown();
    refresh.await.unwrap();

    let ids: Vec<String> = h
        .connector
        .all_containers()
        .await
        .iter()
        .map(|c| c.id().to_string())
        .collect();
    let mut deduped = ids.clone();
    deduped.dedup();
    assert_eq!(ids, deduped);
}

#[tokio::test]
async fn test_background_loops_mark_ready() {
    let h = Harness::new(60);
    h.runtime.add("bg", RUNNING);
    h.connector.start();

    let mut ready = false;
    for _ in 0..200 {
        if h.health.readiness().await.ready && h.state("bg").await.as_deref() == Some(RUNNING) {
            ready = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(ready);
    h.connector.shutdown();
}

#[test]
fn test_by_name_lists_valid_keys() {
    let err = by_name("docker", &ConnectorConfig::default(), &HealthRegistry::new())
        .err()
        .unwrap();
    assert_eq!(
        err.to_string(),
        "invalid connector type \"docker\"\nconnector must be one of:\n  runc\n  mock"
    );
    assert_eq!(enabled(), vec!["runc", "mock"]);
}

#[tokio::test]
async fn test_mock_connector_by_name() {
    let connector = by_name("mock", &ConnectorConfig::default(), &HealthRegistry::new())
        .ok()
        .unwrap();

    let mut containers = Vec::new();
    for _ in 0..200 {
        containers = connector.all_containers().await;
        if !containers.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!containers.is_empty());
    assert_eq!(connector.all_nodes().await.len(), 1);
    assert!(connector.all_services().await.is_empty());
    assert!(connector.all_tasks().await.is_empty());
    assert!(connector.get_task("t").await.is_none());

    connector.down().await;
}

#[tokio::test]
async fn test_mock_connector_routes_host_metrics() {
    let runtime = MockRuntime::new(Arc::new(|_: &str| {
        InstrumentedCollector::new() as Arc<dyn Collector>
    }));
    let connector = MockConnector::new(runtime, ConnectorConfig::default(), HealthRegistry::new());

    let metrics = Metrics {
        pids: 300,
        ..Metrics::for_id("host")
    };
    connector.set_metrics(metrics.clone()).await;
    assert_eq!(connector.host().get_metrics(), metrics);
}

#[tokio::test]
async fn test_refresh_health_is_tracked_per_container() {
    let h = Harness::new(60);
    h.runtime.add("h1", RUNNING);
    h.runtime.add("h2", RUNNING);
    h.pass().await;

    h.runtime.set_fail_status("h1", true);
    h.pass().await;

    // h2 refreshed fine in the same pass without clearing h1
    let refresh = h.health.component(components::REFRESH).await.unwrap();
    assert_eq!(refresh.status, ComponentStatus::Degraded);
    assert_eq!(refresh.failing, vec!["h1"]);

    h.runtime.remove("h1");
    h.pass().await;
    assert!(h.connector.get_container("h1").await.is_none());
    let refresh = h.health.component(components::REFRESH).await.unwrap();
    assert_eq!(refresh.status, ComponentStatus::Healthy);
}

#[tokio::test]
async fn test_removed_container_cannot_be_restarted() {
    let h = Harness::new(60);
    h.runtime.add("r", RUNNING);
    h.pass().await;
    let container = h.connector.get_container("r").await.unwrap();
    assert_eq!(h.collector("r").starts(), 1);

    h.runtime.remove("r");
    h.pass().await;
    assert!(h.connector.get_container("r").await.is_none());
    assert!(container.core().retired());
    assert_eq!(container.get_meta(STATE_KEY), DESTROYED);
    assert!(!h.collector("r").running());
    assert_eq!(container.core().active_readers(), 0);

    // a refresh that still holds the entity cannot revive it
    container.set_state(RUNNING).await;
    assert!(!h.collector("r").running());
    assert_eq!(h.collector("r").starts(), 1);
    assert_eq!(container.get_meta(STATE_KEY), DESTROYED);
}

#[tokio::test]
async fn test_mock_connector_down_stops_every_collector() {
    let collectors: Collectors = Arc::default();
    let made = Arc::clone(&collectors);
    let runtime = MockRuntime::new(Arc::new(move |id: &str| {
        let collector = InstrumentedCollector::new();
        made.lock()
            .unwrap()
            .insert(id.to_string(), Arc::clone(&collector));
        collector as Arc<dyn Collector>
    }));
    runtime.add("web", RUNNING);
    runtime.add("db", RUNNING);
    runtime.add("job", "stopped");

    let connector = MockConnector::new(runtime, ConnectorConfig::default(), HealthRegistry::new());
    connector.inner().discover().await;
    connector.inner().drain_refresh_queue().await;
    connector.host().set_state(RUNNING).await;
    assert!(collectors.lock().unwrap()["web"].running());
    assert!(collectors.lock().unwrap()["db"].running());

    connector.down().await;

    let collectors = collectors.lock().unwrap();
    assert!(collectors.values().all(|c| !c.running()));
    assert_eq!(connector.host().get_meta(STATE_KEY), "stopped");
}

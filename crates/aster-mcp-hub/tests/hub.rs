//! End-to-end behavior of the hub through its public API

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use aster_mcp_hub::sync::{Lock, TaskGroup, TaskGroupOptions};
use aster_mcp_hub::{
    AggregatorOptions, ConnectionManager, HealthEvent, HealthMonitor, HealthMonitorOptions,
    HealthTarget, HubConfig, McpAggregator, McpError, McpResult, ServerRegistry, SharedFactory,
};
use common::{http_server, StaticFactory};

fn aggregator(factory: Arc<StaticFactory>, servers: &[&str]) -> McpAggregator {
    let registry = Arc::new(ServerRegistry::new());
    for name in servers {
        assert!(registry.add_server(http_server(name)).valid);
    }
    McpAggregator::with_options(
        registry,
        factory as SharedFactory,
        AggregatorOptions {
            monitor_health: false,
            ..AggregatorOptions::default()
        },
    )
}

#[tokio::test]
async fn unreachable_server_is_left_out_of_listings() {
    let factory = Arc::new(
        StaticFactory::new()
            .unreachable("fs")
            .server("web", &["search", "fetch"]),
    );
    let hub = aggregator(Arc::clone(&factory), &["fs", "web"]);

    let summary = hub.initialize().await.unwrap();
    assert_eq!(summary.connected, vec!["web".to_string()]);
    assert!(summary.failed.contains_key("fs"));

    let tools = hub.get_all_tools().await;
    assert!(!tools.is_empty());
    assert!(tools.keys().all(|name| name.starts_with("web_")));

    let statuses = hub.get_server_statuses();
    assert!(!statuses["fs"].connected);
    assert!(statuses["fs"].last_error.is_some());
    assert!(statuses["web"].connected);

    let result = hub.execute_tool("web_fetch", None, None).await.unwrap();
    assert_eq!(result.text(), "ran fetch");
    hub.shutdown().await;
}

#[tokio::test]
async fn colliding_tools_are_namespaced_per_server() {
    let factory = Arc::new(
        StaticFactory::new()
            .server("serverA", &["search"])
            .server("serverB", &["search"]),
    );
    let hub = aggregator(factory, &["serverA", "serverB"]);
    hub.initialize().await.unwrap();

    let tools = hub.get_all_tools().await;
    let names: Vec<_> = tools.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["serverA_search", "serverB_search"]);
    assert!(matches!(
        hub.execute_tool("search", None, None).await,
        Err(McpError::Ambiguous { .. })
    ));
}

#[tokio::test]
async fn config_file_drives_the_hub() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hub.yaml");
    std::fs::write(
        &path,
        r#"
mcpServers:
  web:
    type: http
    url: https://web.example.com/mcp
    retries: 1
namespace:
  fallbackPolicy: first_match
"#,
    )
    .unwrap();

    let config = HubConfig::from_path(&path).unwrap();
    let mut options = config.aggregator_options();
    options.monitor_health = false;
    let (registry, validation) = config.into_registry();
    assert!(validation.iter().all(|(_, result)| result.valid));

    let factory = Arc::new(StaticFactory::new().server("web", &["search"]));
    let hub = McpAggregator::with_options(registry, factory as SharedFactory, options);
    hub.initialize().await.unwrap();
    assert!(hub.execute_tool("search", None, None).await.is_ok());
}

#[tokio::test]
async fn concurrent_persistent_acquires_create_one_transport() {
    let registry = Arc::new(ServerRegistry::new());
    registry.add_server(http_server("web"));
    let factory = Arc::new(
        StaticFactory::new()
            .server("web", &["search"])
            .delayed(Duration::from_millis(50)),
    );
    let manager = ConnectionManager::new(registry, Arc::clone(&factory) as SharedFactory);

    let acquires = (0..10).map(|_| manager.acquire("web", None));
    let handles = futures::future::join_all(acquires).await;
    assert!(handles.iter().all(|h| h.is_ok()));
    assert_eq!(factory.calls("web"), 1);
}

#[tokio::test]
async fn lock_timeout_fires_on_time() {
    let lock = Arc::new(Lock::new("resource"));
    let guard = lock.acquire().await.unwrap();
    let holder = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(guard);
    });

    let started = Instant::now();
    let err = lock
        .acquire_with_timeout(Duration::from_millis(50))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();
    assert!(err.is_timeout());
    assert!(elapsed >= Duration::from_millis(45), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(180), "returned after {elapsed:?}");
    holder.await.unwrap();
}

#[tokio::test]
async fn task_group_settles_every_unit() {
    let group: TaskGroup<usize> = TaskGroup::new(TaskGroupOptions::default());
    for i in 0..5usize {
        group.start_in_background(move |_| async move {
            if i == 3 {
                Err(McpError::transport("unit 3 failed"))
            } else {
                Ok(i)
            }
        });
    }
    let settled = group.wait_for_all().await;
    assert_eq!(settled.len(), 5);
    assert_eq!(settled.iter().filter(|s| s.is_rejected()).count(), 1);
}

/// Fails until `heal_after` recovery resets have happened
struct FlakyTarget {
    resets: AtomicU32,
    heal_after: u32,
}

#[async_trait::async_trait]
impl HealthTarget for FlakyTarget {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn perform_health_check(&self) -> Option<McpResult<()>> {
        Some(if self.resets.load(Ordering::SeqCst) >= self.heal_after {
            Ok(())
        } else {
            Err(McpError::transport("still down"))
        })
    }

    fn is_healthy(&self) -> bool {
        false
    }

    async fn reset_error_state(&self) -> McpResult<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn repeated_failures_trigger_a_single_recovery() {
    let target = Arc::new(FlakyTarget {
        resets: AtomicU32::new(0),
        heal_after: 3,
    });
    let monitor = HealthMonitor::new(
        target,
        HealthMonitorOptions {
            check_interval: Duration::from_millis(5),
            max_consecutive_failures: 3,
            max_recovery_attempts: 3,
            recovery_delay: Duration::from_millis(1),
            ..HealthMonitorOptions::default()
        },
    );
    let mut events = monitor.subscribe();
    monitor.start().unwrap();

    let mut started = 0;
    let recovered = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await.unwrap() {
                HealthEvent::RecoveryStarted { .. } => started += 1,
                HealthEvent::Recovered { attempts, .. } => return attempts,
                _ => {}
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(started, 1);
    assert_eq!(recovered, 3);
    monitor.stop().await;
}

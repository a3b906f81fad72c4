//! Tests for the MCP aggregator
//!
//! Every server here is backed by [`MockTransportFactory`], so connection
//! failures, listings and health are fully scripted.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::aggregator::{AggregatorOptions, McpAggregator};
use crate::connection::SharedFactory;
use crate::error::McpError;
use crate::health::{HealthMonitorOptions, HealthStatus};
use crate::registry::ServerRegistry;
use crate::testing::{MockTransport, MockTransportFactory};
use crate::transport::RetryOptions;
use crate::types::{ConnectionMode, ServerConfig};

fn server(name: &str) -> ServerConfig {
    let mut config = ServerConfig::http(name, format!("https://{}.example.com/mcp", name));
    config.retries = 1;
    config
}

fn quiet_options() -> AggregatorOptions {
    AggregatorOptions {
        monitor_health: false,
        retry: RetryOptions::default().with_max_attempts(1),
        ..AggregatorOptions::default()
    }
}

fn build(
    factory: MockTransportFactory,
    servers: Vec<ServerConfig>,
    options: AggregatorOptions,
) -> (Arc<MockTransportFactory>, McpAggregator) {
    let registry = Arc::new(ServerRegistry::new());
    for config in servers {
        assert!(registry.add_server(config).valid);
    }
    let factory = Arc::new(factory);
    let aggregator =
        McpAggregator::with_options(registry, Arc::clone(&factory) as SharedFactory, options);
    (factory, aggregator)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_failed_server_is_isolated() {
    let (_, aggregator) = build(
        MockTransportFactory::new()
            .with_failing_server("fs", "spawn failed")
            .with_server("web", vec!["search", "fetch"]),
        vec![server("fs"), server("web")],
        quiet_options(),
    );

    let summary = aggregator.initialize().await.unwrap();
    assert_eq!(summary.connected, vec!["web".to_string()]);
    assert!(summary.failed["fs"].contains("spawn failed"));

    let tools = aggregator.get_all_tools().await;
    let names: Vec<_> = tools.keys().cloned().collect();
    assert_eq!(names, vec!["web_fetch".to_string(), "web_search".to_string()]);
    assert!(tools.values().all(|t| t.server_name == "web"));

    let statuses = aggregator.get_server_statuses();
    assert!(!statuses["fs"].connected);
    assert!(statuses["fs"].last_error.as_deref().unwrap().contains("spawn failed"));
    assert_eq!(statuses["fs"].health, HealthStatus::Unhealthy);
    assert!(statuses["web"].connected);
    assert_eq!(statuses["web"].health, HealthStatus::Healthy);

    let stats = aggregator.get_statistics();
    assert_eq!(stats.server_count, 2);
    assert_eq!(stats.connected_servers, 1);
    assert_eq!(stats.failed_connections, 1);
    assert!(stats.initialized);
    assert!(stats.started_at.is_some());
}

#[tokio::test]
async fn test_never_connected_server_is_unavailable() {
    let (_, aggregator) = build(
        MockTransportFactory::new()
            .with_failing_server("fs", "spawn failed")
            .with_server("web", vec!["search"]),
        vec![server("fs"), server("web")],
        quiet_options(),
    );
    aggregator.initialize().await.unwrap();

    let err = aggregator
        .execute_tool("fs_read_file", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, McpError::ServerUnavailable { .. }), "got {err:?}");
    assert!(matches!(
        aggregator.read_resource("fs_file:///etc/hosts").await,
        Err(McpError::ServerUnavailable { .. })
    ));
    assert!(aggregator.execute_tool("web_search", None, None).await.is_ok());
}

#[tokio::test]
async fn test_same_tool_on_two_servers() {
    let (_, aggregator) = build(
        MockTransportFactory::new()
            .with_server("serverA", vec!["search"])
            .with_server("serverB", vec!["search"]),
        vec![server("serverA"), server("serverB")],
        quiet_options(),
    );
    aggregator.initialize().await.unwrap();

    let tools = aggregator.get_all_tools().await;
    assert_eq!(tools.len(), 2);
    assert_eq!(tools["serverA_search"].server_name, "serverA");
    assert_eq!(tools["serverB_search"].server_name, "serverB");

    let result = aggregator
        .execute_tool("serverB_search", None, None)
        .await
        .unwrap();
    assert!(result.text().starts_with("search"));

    let err = aggregator.execute_tool("search", None, None).await.unwrap_err();
    match err {
        McpError::Ambiguous { candidates, .. } => {
            assert_eq!(candidates, vec!["serverA".to_string(), "serverB".to_string()])
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let stats = aggregator.get_statistics();
    assert_eq!(stats.total_operations, 2);
    assert_eq!(stats.successful_operations, 1);
    assert_eq!(stats.failed_operations, 1);

    aggregator.reset_statistics();
    assert_eq!(aggregator.get_statistics().total_operations, 0);
}

#[tokio::test]
async fn test_bare_name_falls_back_to_owning_server() {
    let (_, aggregator) = build(
        MockTransportFactory::new()
            .with_server("fs", vec!["read_file"])
            .with_server("web", vec!["search"]),
        vec![server("fs"), server("web")],
        quiet_options(),
    );
    aggregator.initialize().await.unwrap();

    // No listing yet: the lookup lists servers on a miss.
    let arguments = serde_json::json!({ "path": "/tmp/a" });
    let result = aggregator
        .execute_tool("read_file", arguments.as_object().cloned(), None)
        .await
        .unwrap();
    assert!(result.text().contains("/tmp/a"));

    assert!(matches!(
        aggregator.execute_tool("web_missing", None, None).await,
        Err(McpError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_down_server_is_unavailable() {
    let (factory, aggregator) = build(
        MockTransportFactory::new().with_server("web", vec!["search"]),
        vec![server("web")],
        quiet_options(),
    );
    aggregator.initialize().await.unwrap();
    assert_eq!(aggregator.get_all_tools().await.len(), 1);

    factory.last_transport("web").unwrap().drop_connection();
    assert!(matches!(
        aggregator.execute_tool("web_search", None, None).await,
        Err(McpError::ServerUnavailable { .. })
    ));
    assert!(aggregator.get_all_tools().await.is_empty());

    aggregator.reconnect_server("web").await.unwrap();
    assert_eq!(factory.creations("web"), 2);
    assert!(aggregator
        .execute_tool("web_search", None, None)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_resources_and_prompts_are_routed() {
    let (_, aggregator) = build(
        MockTransportFactory::new().with_builder("docs", || {
            MockTransport::new()
                .with_resources(vec!["file:///guide.md"])
                .with_prompts(vec!["summarize"])
        }),
        vec![server("docs")],
        quiet_options(),
    );
    aggregator.initialize().await.unwrap();

    let resources = aggregator.get_all_resources().await;
    assert!(resources.contains_key("docs_file:///guide.md"));
    let read = aggregator
        .read_resource("docs_file:///guide.md")
        .await
        .unwrap();
    assert_eq!(read.contents[0].text.as_deref(), Some("contents of file:///guide.md"));

    let prompts = aggregator.get_all_prompts().await;
    assert_eq!(prompts["docs_summarize"].prompt.name, "summarize");
    let prompt = aggregator.get_prompt("docs_summarize", None).await.unwrap();
    assert_eq!(prompt.messages[0].role, "user");
}

#[tokio::test]
async fn test_temporary_server_round_trip() {
    let (factory, aggregator) = build(
        MockTransportFactory::new().with_server("calc", vec!["add"]),
        vec![server("calc").with_connection_mode(ConnectionMode::Temporary)],
        quiet_options(),
    );
    aggregator.initialize().await.unwrap();
    assert!(aggregator.get_server_statuses()["calc"].connected);
    assert!(!factory.last_transport("calc").unwrap().is_open());

    aggregator.execute_tool("calc_add", None, None).await.unwrap();
    assert!(!factory.last_transport("calc").unwrap().is_open());
    assert!(factory.creations("calc") >= 2);
}

#[tokio::test]
async fn test_servers_added_and_removed_at_run_time() {
    let (factory, aggregator) = build(
        MockTransportFactory::new()
            .with_server("web", vec!["search"])
            .with_server("late", vec!["echo"]),
        vec![server("web")],
        quiet_options(),
    );
    aggregator.initialize().await.unwrap();

    let validation = aggregator.add_server(server("late")).await.unwrap();
    assert!(validation.valid);
    assert!(aggregator.server_status("late").unwrap().connected);
    assert!(aggregator.health_metrics("late").is_some());
    assert!(aggregator.get_all_tools().await.contains_key("late_echo"));

    assert!(matches!(
        aggregator.add_server(server("system")).await,
        Err(McpError::Validation { .. })
    ));

    assert!(aggregator.remove_server("late").await);
    assert!(!aggregator.remove_server("late").await);
    assert!(aggregator.server_status("late").is_none());
    assert!(aggregator.health_metrics("late").is_none());
    assert!(!factory.last_transport("late").unwrap().is_open());
    assert!(!aggregator.get_all_tools().await.contains_key("late_echo"));
}

#[tokio::test]
async fn test_server_notifications_are_replayable() {
    let (factory, aggregator) = build(
        MockTransportFactory::new().with_server("web", vec!["search"]),
        vec![server("web")],
        quiet_options(),
    );
    aggregator.initialize().await.unwrap();

    let transport = factory.last_transport("web").unwrap();
    assert_eq!(
        transport.emit_notification("notifications/tools/list_changed", serde_json::json!({})),
        1
    );
    transport.emit_notification("notifications/message", serde_json::json!({ "level": "info" }));
    wait_until(|| aggregator.event_store().stream_len("web") == 2).await;

    let replay = aggregator.replay_events_after("web_1").unwrap();
    assert_eq!(replay.len(), 1);
    assert_eq!(replay[0].id, "web_2");
    assert_eq!(replay[0].message.method(), Some("notifications/message"));
}

#[tokio::test]
async fn test_shutdown_stops_everything() {
    let (factory, aggregator) = build(
        MockTransportFactory::new().with_server("web", vec!["search"]),
        vec![server("web")],
        AggregatorOptions {
            health: HealthMonitorOptions {
                check_interval: Duration::from_millis(10),
                ..HealthMonitorOptions::default()
            },
            ..quiet_options()
        },
    );
    aggregator.initialize().await.unwrap();

    aggregator.shutdown().await;
    assert!(!factory.last_transport("web").unwrap().is_open());
    assert!(!aggregator.get_statistics().initialized);
    assert!(aggregator.health_metrics("web").is_none());

    let err = aggregator.execute_tool("web_search", None, None).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(aggregator.initialize().await.unwrap_err().is_cancelled());
}

#[tokio::test]
async fn test_health_checks_run_for_connected_servers() {
    let (factory, aggregator) = build(
        MockTransportFactory::new().with_server("web", vec!["search"]),
        vec![server("web")],
        AggregatorOptions {
            monitor_health: true,
            health: HealthMonitorOptions {
                check_interval: Duration::from_millis(10),
                check_timeout: Duration::from_millis(200),
                ..HealthMonitorOptions::default()
            },
            ..quiet_options()
        },
    );
    aggregator.initialize().await.unwrap();

    wait_until(|| {
        aggregator
            .health_metrics("web")
            .is_some_and(|m| m.successful_checks >= 2)
    })
    .await;
    let transport = factory.last_transport("web").unwrap();
    assert!(transport.requests().iter().any(|m| m == "ping"));
    assert_eq!(aggregator.check_health("web").await, Some(true));
    aggregator.shutdown().await;
}

#[tokio::test]
async fn test_recovery_failure_disconnects_server() {
    let builds = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&builds);
    let (factory, aggregator) = build(
        MockTransportFactory::new().with_builder("web", move || {
            let transport = MockTransport::new().with_tools(vec!["search"]);
            // Only the first transport ever answers.
            if counter.fetch_add(1, Ordering::SeqCst) > 0 {
                transport.set_failing(true);
            }
            transport
        }),
        vec![server("web")],
        AggregatorOptions {
            monitor_health: true,
            health: HealthMonitorOptions {
                check_interval: Duration::from_millis(10),
                check_timeout: Duration::from_millis(200),
                max_consecutive_failures: 2,
                max_recovery_attempts: 2,
                recovery_delay: Duration::from_millis(5),
                ..HealthMonitorOptions::default()
            },
            ..quiet_options()
        },
    );
    aggregator.initialize().await.unwrap();
    factory.last_transport("web").unwrap().set_failing(true);

    wait_until(|| {
        aggregator
            .server_status("web")
            .is_some_and(|s| s.last_error.as_deref() == Some("health recovery failed"))
    })
    .await;
    let status = aggregator.server_status("web").unwrap();
    assert!(!status.connected);
    assert!(builds.load(Ordering::SeqCst) >= 3);
    aggregator.shutdown().await;
}

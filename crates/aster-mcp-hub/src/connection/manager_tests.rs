//! Tests for the connection manager

use std::sync::Arc;

use super::{ConnectionManager, SharedFactory};
use crate::error::McpError;
use crate::registry::ServerRegistry;
use crate::testing::MockTransportFactory;
use crate::transport::RetryOptions;
use crate::types::{ConnectionMode, ServerConfig};

fn setup(factory: MockTransportFactory) -> (Arc<MockTransportFactory>, ConnectionManager) {
    let mut registry = ServerRegistry::new();
    registry.set_validate_commands(false);
    let registry = Arc::new(registry);
    registry.add_server(ServerConfig::http("web", "https://example.com/mcp"));
    registry.add_server(
        ServerConfig::http("temp", "https://example.com/t")
            .with_connection_mode(ConnectionMode::Temporary),
    );
    let factory = Arc::new(factory);
    let manager = ConnectionManager::with_retry(
        registry,
        Arc::clone(&factory) as SharedFactory,
        RetryOptions::default().with_max_attempts(1),
    );
    (factory, manager)
}

#[tokio::test]
async fn test_with_connection_dispatches_on_mode() {
    let (factory, manager) = setup(
        MockTransportFactory::new()
            .with_server("web", vec!["search"])
            .with_server("temp", vec!["ping"]),
    );

    for _ in 0..3 {
        let tools = manager
            .with_connection("web", None, |instance| async move { instance.list_tools().await })
            .await
            .unwrap();
        assert_eq!(tools[0].name, "search");
        manager
            .with_connection("temp", None, |instance| async move { instance.ping(None).await })
            .await
            .unwrap();
    }
    assert_eq!(factory.creations("web"), 1);
    assert_eq!(factory.creations("temp"), 3);
    assert!(!factory.last_transport("temp").unwrap().is_open());
}

#[tokio::test]
async fn test_with_connection_releases_on_error() {
    let (factory, manager) = setup(MockTransportFactory::new().with_server("temp", vec![]));
    let err = manager
        .with_connection("temp", None, |_| async { Err::<(), _>(McpError::protocol("boom")) })
        .await
        .unwrap_err();
    assert_eq!(err.message(), "boom");
    assert!(!factory.last_transport("temp").unwrap().is_open());
}

#[tokio::test]
async fn test_with_connection_releases_on_panic() {
    let (factory, manager) = setup(MockTransportFactory::new().with_server("temp", vec![]));
    let manager = Arc::new(manager);
    let task = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .with_connection("temp", None, |_| async {
                    if true {
                        panic!("inside connection");
                    }
                    Ok::<(), McpError>(())
                })
                .await
        })
    };
    assert!(task.await.unwrap_err().is_panic());
    assert!(!factory.last_transport("temp").unwrap().is_open());
}

#[tokio::test]
async fn test_unknown_server() {
    let (_, manager) = setup(MockTransportFactory::new());
    assert!(matches!(
        manager.acquire("nope", None).await,
        Err(McpError::NotFound { .. })
    ));
    assert!(!manager.is_connected("nope"));
}

#[tokio::test]
async fn test_handle_keeps_mode_after_switch() {
    let (factory, manager) = setup(MockTransportFactory::new().with_server("web", vec![]));
    let handle = manager.acquire("web", None).await.unwrap();
    assert_eq!(handle.mode(), ConnectionMode::Persistent);

    let switched = ServerConfig::http("web", "https://example.com/mcp")
        .with_connection_mode(ConnectionMode::Temporary);
    assert!(manager.registry().update_server(switched).valid);

    // Released as persistent: the shared transport stays open.
    manager.release(handle).await;
    assert!(factory.last_transport("web").unwrap().is_open());

    let handle = manager.acquire("web", None).await.unwrap();
    assert_eq!(handle.mode(), ConnectionMode::Temporary);
    assert_eq!(factory.creations("web"), 2);
}

#[tokio::test]
async fn test_temporary_connection_for_unregistered_config() {
    let (factory, manager) = setup(MockTransportFactory::new().with_server("adhoc", vec!["x"]));
    let config = ServerConfig::http("adhoc", "https://example.com/adhoc");
    let count = manager
        .with_temporary_connection(&config, |instance| async move {
            Ok(instance.list_tools().await?.len())
        })
        .await
        .unwrap();
    assert_eq!(count, 1);
    assert!(!factory.last_transport("adhoc").unwrap().is_open());
}

#[tokio::test]
async fn test_disconnect_all() {
    let (factory, manager) = setup(MockTransportFactory::new().with_server("web", vec![]));
    manager.acquire("web", None).await.unwrap();
    assert!(manager.is_connected("web"));
    manager.disconnect_all().await;
    assert!(!manager.is_connected("web"));
    assert!(!factory.last_transport("web").unwrap().is_open());
}

use pretty_assertions::assert_eq;
use std::sync::Arc;
use tasksync_host::{
    DatabaseHub, HandlerError, HostConfig, HostError, MessageHandler, MessageHandlers, SyncContext,
};
use tasksync_protocol::MAX_TASKS_PER_REQUEST;
use tasksync_storage::MemoryContainer;

// ── DatabaseHub ──────────────────────────────────────────────────

#[tokio::test]
async fn hub_registers_containers() {
    let hub = DatabaseHub::new("shop");
    hub.add_container(Arc::new(MemoryContainer::new("orders")))
        .await
        .unwrap();
    hub.add_container(Arc::new(MemoryContainer::new("articles")))
        .await
        .unwrap();

    assert_eq!(hub.name(), "shop");
    assert_eq!(hub.container_names().await, vec!["articles", "orders"]);
    assert!(hub.container("orders").await.is_some());
    assert!(hub.container("customers").await.is_none());
}

#[tokio::test]
async fn hub_rejects_duplicate_container() {
    let hub = DatabaseHub::new("shop");
    hub.add_container(Arc::new(MemoryContainer::new("orders")))
        .await
        .unwrap();
    let err = hub
        .add_container(Arc::new(MemoryContainer::new("orders")))
        .await
        .unwrap_err();
    assert!(matches!(err, HostError::ContainerExists(name) if name == "orders"));
}

// ── HostConfig ───────────────────────────────────────────────────

#[test]
fn config_defaults() {
    let config = HostConfig::default();
    assert_eq!(config.database_name, "main");
    assert_eq!(config.max_tasks_per_request, MAX_TASKS_PER_REQUEST);
    assert!(config.catch_panics);
}

#[test]
fn config_from_partial_json() {
    let config = HostConfig::from_json(r#"{"max_tasks_per_request": 10}"#).unwrap();
    assert_eq!(config.max_tasks_per_request, 10);
    assert_eq!(config.database_name, "main");
    assert!(config.catch_panics);
}

#[test]
fn config_rejects_malformed_json() {
    let err = HostConfig::from_json("{max_tasks").unwrap_err();
    assert!(matches!(err, HostError::Config(_)));
}

// ── MessageHandlers ──────────────────────────────────────────────

#[test]
fn std_handlers_include_echo() {
    let handlers = MessageHandlers::with_std();
    assert_eq!(handlers.names(), vec!["std.echo"]);
    assert!(MessageHandlers::new().names().is_empty());
}

#[test]
fn duplicate_handler_is_rejected() {
    let mut handlers = MessageHandlers::with_std();
    let err = handlers
        .register_fn("std.echo", |_, _| Err(HandlerError::InvalidParams("unused".into())))
        .unwrap_err();
    assert!(matches!(err, HostError::HandlerExists(name) if name == "std.echo"));
}

#[tokio::test]
async fn registered_handler_sees_context() {
    let mut handlers = MessageHandlers::new();
    handlers
        .register_fn("whoami", |_, ctx| {
            Ok(serde_json::json!(ctx.user_id().unwrap_or("anonymous")))
        })
        .unwrap();

    let handler = handlers.get("whoami").unwrap();
    let ctx = SyncContext::new(None, Some("carol".into()));
    let value = handler.handle(&serde_json::Value::Null, &ctx).await.unwrap();
    assert_eq!(value, serde_json::json!("carol"));
}

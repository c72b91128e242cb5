//! Tests for the sync cycle: transports, messages, failures and
//! concurrency.

mod common;

use common::{
    article, loopback_client, seeded_executor, Archived, Article, Hanging, Producer, Truncating,
    Unreachable,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tasksync_client::{ClientConfig, SyncClient, TaskState};
use tasksync_protocol::TaskCommand;
use tasksync_types::TaskErrorKind;
use tokio_util::sync::CancellationToken;

// ── Cycle ────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_sync_sends_nothing() {
    let (client, transport) = loopback_client().await;
    let result = client.sync().await.unwrap();
    assert!(result.tasks.is_empty());
    assert!(result.success());
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn request_carries_identity() {
    let executor = seeded_executor().await;
    let transport = Arc::new(common::Loopback::new(executor));
    let config = ClientConfig {
        client_id: Some("client-1".into()),
        ..ClientConfig::default()
    }
    .with_user_id("alice");
    let client = SyncClient::new(transport.clone(), config);
    assert_eq!(client.client_id(), "client-1");

    client.entity_set::<Article>().unwrap().read("a1");
    client.sync().await.unwrap();

    let request = transport.last_request();
    assert_eq!(request.client_id.as_deref(), Some("client-1"));
    assert_eq!(request.user_id.as_deref(), Some("alice"));
}

#[tokio::test]
async fn result_lists_tasks_in_submission_order() {
    let (client, _) = loopback_client().await;
    let articles = client.entity_set::<Article>().unwrap();
    let producers = client.entity_set::<Producer>().unwrap();

    let read = producers.read("p1");
    let create = articles.create(article("n1", "Fig", 1)).unwrap();
    let message = client.send_message("std.echo", json!(1));
    let result = client.sync().await.unwrap();

    let ids: Vec<_> = result.tasks.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![read.id(), create.id(), message.id()]);
}

// ── Messages ─────────────────────────────────────────────────────

#[tokio::test]
async fn message_returns_handler_value() {
    let (client, transport) = loopback_client().await;
    let articles = client.entity_set::<Article>().unwrap();

    let message = client.send_message("std.echo", json!({"ping": 1}));
    articles.read("a1");
    assert_eq!(message.label(), "MessageTask std.echo");
    client.sync().await.unwrap();

    assert_eq!(message.result().unwrap(), json!({"ping": 1}));
    let request = transport.last_request();
    assert!(matches!(request.tasks.last(), Some(TaskCommand::Message { .. })));
}

#[tokio::test]
async fn unknown_message_fails() {
    let (client, _) = loopback_client().await;
    let message = client.send_message("nope", json!(null));
    client.sync().await.unwrap_err();
    assert_eq!(message.error().unwrap().kind, TaskErrorKind::InvalidTask);
}

// ── Failures ─────────────────────────────────────────────────────

#[tokio::test]
async fn aggregate_error_lists_failed_tasks() {
    let (client, _) = loopback_client().await;
    let articles = client.entity_set::<Article>().unwrap();

    articles.create(article("a1", "Apple again", 1)).unwrap();
    articles.read("a2");
    let failed = client.sync().await.unwrap_err();

    assert_eq!(failed.result.tasks.len(), 2);
    let text = failed.to_string();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("Sync() failed with task errors. Count: 1"));
    assert_eq!(
        lines.next(),
        Some("|- CreateTask (articles) key: a1 # EntityErrors ~ count: 1")
    );
}

#[tokio::test]
async fn try_sync_returns_failures_in_result() {
    let (client, _) = loopback_client().await;
    let articles = client.entity_set::<Article>().unwrap();
    articles.create(article("a1", "Apple again", 1)).unwrap();

    let result = client.try_sync().await;
    assert!(!result.success());
    assert_eq!(result.failed.len(), 1);
}

#[tokio::test]
async fn storage_failure_is_database_error() {
    let (client, _) = loopback_client().await;
    let archive = client.entity_set::<Archived>().unwrap();

    let read = archive.read("x1");
    client.sync().await.unwrap_err();
    let error = read.error().unwrap();
    assert_eq!(error.kind, TaskErrorKind::DatabaseError);
    assert!(error.message.contains("archive offline"));
}

#[tokio::test]
async fn transport_failure_fails_every_task() {
    let client = SyncClient::new(Arc::new(Unreachable), ClientConfig::default());
    let articles = client.entity_set::<Article>().unwrap();

    let create = articles.create(article("n1", "Fig", 1)).unwrap();
    let read = articles.read("a1");
    let message = client.send_message("std.echo", json!(1));
    let failed = client.sync().await.unwrap_err();

    assert_eq!(failed.failed().len(), 3);
    for error in [create.error(), read.error(), message.error()] {
        let error = error.unwrap();
        assert_eq!(error.kind, TaskErrorKind::SyncError);
        assert!(error.message.contains("connection refused"));
    }
    // The create never reached the host.
    assert!(!articles.contains("n1"));
    assert!(articles.peer_info("a1").unwrap().read_task.is_none());
}

#[tokio::test]
async fn result_count_mismatch_is_sync_error() {
    let client = SyncClient::new(
        Arc::new(Truncating(seeded_executor().await)),
        ClientConfig::default(),
    );
    let read = client.entity_set::<Article>().unwrap().read("a1");
    client.sync().await.unwrap_err();
    assert_eq!(read.error().unwrap().kind, TaskErrorKind::SyncError);
}

#[tokio::test(start_paused = true)]
async fn sync_times_out() {
    let config = ClientConfig::default().with_timeout_ms(50);
    let client = SyncClient::new(Arc::new(Hanging), config);
    let read = client.entity_set::<Article>().unwrap().read("a1");

    let failed = client.sync().await.unwrap_err();
    assert_eq!(failed.failed().len(), 1);
    let error = read.error().unwrap();
    assert_eq!(error.kind, TaskErrorKind::SyncError);
    assert_eq!(error.message, "sync timed out after 50 ms");
}

#[tokio::test]
async fn sync_can_be_cancelled() {
    let client = Arc::new(SyncClient::new(Arc::new(Hanging), ClientConfig::default()));
    let read = client.entity_set::<Article>().unwrap().read("a1");
    let token = CancellationToken::new();

    let handle = {
        let client = Arc::clone(&client);
        let token = token.clone();
        tokio::spawn(async move { client.sync_with_cancel(&token).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    token.cancel();

    let failed = handle.await.unwrap().unwrap_err();
    assert_eq!(failed.failed().len(), 1);
    assert_eq!(read.error().unwrap().message, "sync cancelled");

    // Later cycles are unaffected.
    let again = client.entity_set::<Article>().unwrap().read("a1");
    assert_eq!(again.state(), TaskState::Pending);
    assert!(!again.same_task(&read));
}

#[tokio::test(start_paused = true)]
async fn dropped_sync_fails_its_tasks() {
    let client = SyncClient::new(Arc::new(Hanging), ClientConfig::default());
    let articles = client.entity_set::<Article>().unwrap();
    let read = articles.read("a1");
    let create = articles.create(article("n1", "Fig", 1)).unwrap();
    let message = client.send_message("std.echo", json!(1));

    let outcome = tokio::time::timeout(Duration::from_millis(20), client.sync()).await;
    assert!(outcome.is_err());

    assert_eq!(read.state(), TaskState::Failed);
    assert_eq!(read.error().unwrap().message, "sync cancelled");
    assert_eq!(create.error().unwrap().kind, TaskErrorKind::SyncError);
    assert_eq!(message.state(), TaskState::Failed);
    let peer = articles.peer_info("n1").unwrap();
    assert!(peer.create_task.is_none());
    assert!(!peer.assigned);
    assert!(articles.peer_info("a1").unwrap().read_task.is_none());
}

// ── Concurrency ──────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cycles_complete_their_own_tasks() {
    let (client, transport) = loopback_client().await;
    let client = Arc::new(client);
    let articles = client.entity_set::<Article>().unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let client = Arc::clone(&client);
        let articles = articles.clone();
        handles.push(tokio::spawn(async move {
            let key = format!("n{i}");
            let create = articles.create(article(&key, "Fig", i)).unwrap();
            let read = articles.read("a1");
            client.sync().await.unwrap();
            (create, read)
        }));
    }
    // A task may be carried by another task's cycle; check after all joined.
    let mut tasks = Vec::new();
    for handle in handles {
        tasks.push(handle.await.unwrap());
    }
    for (create, read) in tasks {
        create.result().unwrap();
        assert_eq!(read.result().unwrap().unwrap().name, "Apple");
    }

    for i in 0..8 {
        assert!(articles.peer_info(&format!("n{i}")).unwrap().synced);
    }
    let created: usize = transport
        .requests()
        .iter()
        .flat_map(|r| &r.tasks)
        .map(|t| match t {
            TaskCommand::Create { entities, .. } => entities.len(),
            _ => 0,
        })
        .sum();
    assert_eq!(created, 8);
}

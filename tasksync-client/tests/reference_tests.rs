//! Tests for reference sub-tasks.

mod common;

use common::{article, loopback_client, producer, Article, Country, Order, Producer};
use pretty_assertions::assert_eq;
use tasksync_client::{TaskAccessError, TaskState};
use tasksync_model::{Filter, ModelError, Ref};
use tasksync_protocol::TaskCommand;
use tasksync_types::TaskErrorKind;

#[tokio::test]
async fn read_ref_resolves_single_reference() {
    let (client, transport) = loopback_client().await;
    let articles = client.entity_set::<Article>().unwrap();
    let producers = client.entity_set::<Producer>().unwrap();

    let read = articles.read("a1");
    let producer = read.read_ref(&producers, ".producer").unwrap();
    assert_eq!(producer.label(), "ReadTask (articles) key: a1 -> ReadRef .producer");
    assert!(producer.id() > read.id());

    client.sync().await.unwrap();

    assert_eq!(producer.key().as_deref(), Some("p1"));
    assert_eq!(producer.result().unwrap().name, "Orchard");
    // Resolved entities are tracked by their own set.
    assert!(producers.contains("p1"));

    // One round trip, one command.
    let request = transport.last_request();
    assert_eq!(request.tasks.len(), 1);
    match &request.tasks[0] {
        TaskCommand::Read { references, .. } => {
            assert_eq!(references.len(), 1);
            assert_eq!(references[0].selector, "producer");
            assert_eq!(references[0].container, "producers");
        }
        other => panic!("expected read, got {other:?}"),
    }
}

#[tokio::test]
async fn read_ref_is_deduplicated() {
    let (client, transport) = loopback_client().await;
    let articles = client.entity_set::<Article>().unwrap();
    let producers = client.entity_set::<Producer>().unwrap();

    let read = articles.read("a1");
    let first = read.read_ref(&producers, ".producer").unwrap();
    let second = read.read_ref(&producers, "producer").unwrap();
    assert!(first.same_task(&second));

    // Two reads asking for the same reference share one wire selector.
    articles.read("a2").read_ref(&producers, ".producer").unwrap();
    let result = client.sync().await.unwrap();
    assert_eq!(result.tasks.len(), 4);

    match &transport.last_request().tasks[0] {
        TaskCommand::Read { references, .. } => assert_eq!(references.len(), 1),
        other => panic!("expected read, got {other:?}"),
    }
}

#[tokio::test]
async fn nested_references() {
    let (client, _) = loopback_client().await;
    let articles = client.entity_set::<Article>().unwrap();
    let producers = client.entity_set::<Producer>().unwrap();
    let countries = client.entity_set::<Country>().unwrap();

    let read = articles.read("a2");
    let producer = read.read_ref(&producers, ".producer").unwrap();
    let country = producer.read_ref(&countries, ".country").unwrap();
    client.sync().await.unwrap();

    assert_eq!(producer.result().unwrap().name, "Grove");
    assert_eq!(country.result().unwrap().name, "Freedonia");
    assert!(countries.contains("c1"));
}

#[tokio::test]
async fn read_ref_without_target_key_fails() {
    let (client, _) = loopback_client().await;
    let articles = client.entity_set::<Article>().unwrap();
    let producers = client.entity_set::<Producer>().unwrap();

    let read = articles.read("a3");
    let producer = read.read_ref(&producers, ".producer").unwrap();
    let failed = client.sync().await.unwrap_err();

    assert!(read.result().unwrap().is_some());
    assert_eq!(failed.failed().len(), 1);
    assert_eq!(producer.error().unwrap().kind, TaskErrorKind::InvalidOperation);
}

#[tokio::test]
async fn query_read_ref_needs_exactly_one_key() {
    let (client, _) = loopback_client().await;
    let articles = client.entity_set::<Article>().unwrap();
    let producers = client.entity_set::<Producer>().unwrap();

    let all = articles.query(Filter::All);
    let single = all.read_ref(&producers, ".producer").unwrap();
    let many = all.read_refs(&producers, ".producer").unwrap();
    let apple = articles.query(Filter::eq("name", "Apple".into()));
    let apple_producer = apple.read_ref(&producers, ".producer").unwrap();
    assert!(client.sync().await.is_err());

    let error = single.error().unwrap();
    assert_eq!(error.kind, TaskErrorKind::InvalidOperation);
    assert!(error.message.contains("resolved 2 keys"));
    assert_eq!(many.keys().unwrap(), vec!["p1", "p2"]);
    assert_eq!(apple_producer.result().unwrap().name, "Orchard");
}

#[tokio::test]
async fn read_refs_skips_missing_targets() {
    let (client, _) = loopback_client().await;
    let orders = client.entity_set::<Order>().unwrap();
    let articles = client.entity_set::<Article>().unwrap();

    let order = orders.read("o1");
    let items = order.read_refs(&articles, "articles[*]").unwrap();
    assert_eq!(items.label(), "ReadTask (orders) key: o1 -> ReadRefs .articles[*]");
    client.sync().await.unwrap();

    assert_eq!(items.keys().unwrap(), vec!["a1", "a2"]);
    let names: Vec<String> = items.result().unwrap().into_iter().map(|a| a.name).collect();
    assert_eq!(names, vec!["Apple", "Pear"]);
}

#[tokio::test]
async fn cardinality_must_match_accessor() {
    let (client, _) = loopback_client().await;
    let orders = client.entity_set::<Order>().unwrap();
    let articles = client.entity_set::<Article>().unwrap();
    let producers = client.entity_set::<Producer>().unwrap();

    let order = orders.read("o1");
    let err = order.read_ref(&articles, "articles[*]").err().unwrap();
    assert!(matches!(err, TaskAccessError::InvalidSelector { .. }));

    let read = articles.read("a1");
    let err = read.read_refs(&producers, ".producer").err().unwrap();
    assert!(err.to_string().contains("use read_ref"));

    let err = read.read_ref(&producers, "a..b").err().unwrap();
    assert!(matches!(err, TaskAccessError::InvalidSelector { .. }));
}

#[tokio::test]
async fn sub_task_after_sync_is_rejected() {
    let (client, _) = loopback_client().await;
    let articles = client.entity_set::<Article>().unwrap();
    let producers = client.entity_set::<Producer>().unwrap();

    let read = articles.read("a1");
    client.sync().await.unwrap();

    let err = read.read_ref(&producers, ".producer").err().unwrap();
    assert_eq!(
        err,
        TaskAccessError::AlreadySynced {
            label: "ReadTask (articles) key: a1".into()
        }
    );
}

#[tokio::test]
async fn sub_tasks_fail_with_their_parent() {
    let (client, _) = loopback_client().await;
    let articles = client.entity_set::<Article>().unwrap();
    let producers = client.entity_set::<Producer>().unwrap();
    let ghosts = client.entity_set::<common::Ghost>().unwrap();

    let ghost = ghosts.read("g1");
    let producer = ghost.read_ref(&producers, ".producer").unwrap();
    let ok = articles.read("a1");
    let failed = client.sync().await.unwrap_err();

    assert_eq!(failed.failed().len(), 2);
    assert_eq!(producer.state(), TaskState::Failed);
    assert_eq!(producer.error().unwrap().kind, TaskErrorKind::InvalidTask);
    assert!(ok.is_synced());
}

// ── Same-cycle writes ────────────────────────────────────────────

async fn create_and_resolve_in_one_cycle(articles_first: bool) {
    let (client, transport) = loopback_client().await;
    let (articles, producers) = if articles_first {
        let articles = client.entity_set::<Article>().unwrap();
        (articles, client.entity_set::<Producer>().unwrap())
    } else {
        let producers = client.entity_set::<Producer>().unwrap();
        (client.entity_set::<Article>().unwrap(), producers)
    };

    producers.create(producer("x1", "Meadow")).unwrap();
    let mut quince = article("b1", "Quince", 7);
    quince.producer = Ref::from_key("x1");
    articles.create(quince).unwrap();
    let read = articles.read("b1");
    let resolved = read.read_ref(&producers, ".producer").unwrap();

    client.sync().await.unwrap();

    assert_eq!(read.result().unwrap().unwrap().name, "Quince");
    assert_eq!(resolved.result().unwrap().name, "Meadow");
    let request = transport.last_request();
    let kinds: Vec<&str> = request.tasks.iter().map(TaskCommand::kind).collect();
    assert_eq!(kinds, vec!["create", "create", "read"]);
}

#[tokio::test]
async fn reference_to_entity_created_in_same_cycle_resolves() {
    create_and_resolve_in_one_cycle(false).await;
}

#[tokio::test]
async fn reference_resolves_when_referencing_set_registered_first() {
    create_and_resolve_in_one_cycle(true).await;
}

// ── Bound references ─────────────────────────────────────────────

#[tokio::test]
async fn fetched_refs_are_bound_to_peers() {
    let (client, _) = loopback_client().await;
    let articles = client.entity_set::<Article>().unwrap();
    let producers = client.entity_set::<Producer>().unwrap();

    let read = articles.read("a1");
    read.read_ref(&producers, ".producer").unwrap();
    client.sync().await.unwrap();

    let apple = read.result().unwrap().unwrap();
    assert!(matches!(apple.producer, Ref::Peer { .. }));
    assert_eq!(apple.producer.get().unwrap().unwrap().name, "Orchard");
    // The tracked entity is bound as well.
    let tracked = articles.get("a1").unwrap();
    assert_eq!(tracked.producer.get().unwrap().unwrap().name, "Orchard");
}

#[tokio::test]
async fn bound_ref_fails_until_target_is_synced() {
    let (client, _) = loopback_client().await;
    let articles = client.entity_set::<Article>().unwrap();
    let producers = client.entity_set::<Producer>().unwrap();

    let read = articles.read("a2");
    client.sync().await.unwrap();
    let pear = read.result().unwrap().unwrap();
    assert!(matches!(
        pear.producer.get(),
        Err(ModelError::UnresolvedReference { .. })
    ));

    producers.read("p2");
    client.sync().await.unwrap();
    assert_eq!(pear.producer.get().unwrap().unwrap().name, "Grove");
}

#[tokio::test]
async fn query_results_bind_refs() {
    let (client, _) = loopback_client().await;
    let articles = client.entity_set::<Article>().unwrap();
    let producers = client.entity_set::<Producer>().unwrap();

    let query = articles.query(Filter::eq("name", serde_json::json!("Pear")));
    let resolved = query.read_refs(&producers, ".producer").unwrap();
    client.sync().await.unwrap();

    assert_eq!(resolved.keys().unwrap(), vec!["p2"]);
    let pear = query.result().unwrap().remove(0);
    assert_eq!(pear.producer.get().unwrap().unwrap().name, "Grove");
}

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use tasksync_model::{assign_key, Entity, ModelError, PeerHandle, Ref, RefField};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Producer {
    id: Option<String>,
    name: String,
}

impl Entity for Producer {
    const CONTAINER: &'static str = "producers";

    fn key(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_key(&mut self, key: &str) {
        self.id = Some(key.to_string());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Article {
    id: Option<String>,
    producer: Ref<Producer>,
}

impl Entity for Article {
    const CONTAINER: &'static str = "articles";

    fn key(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_key(&mut self, key: &str) {
        self.id = Some(key.to_string());
    }

    fn visit_refs<'a>(&'a self, visitor: &mut dyn FnMut(&'a dyn RefField)) {
        visitor(&self.producer);
    }

    fn visit_refs_mut(&mut self, visitor: &mut dyn FnMut(&mut dyn RefField)) {
        visitor(&mut self.producer);
    }
}

struct FixedHandle(Option<Producer>);

impl PeerHandle<Producer> for FixedHandle {
    fn assigned_entity(&self, _key: &str) -> Option<Producer> {
        self.0.clone()
    }
}

fn producer(id: &str) -> Producer {
    Producer {
        id: Some(id.to_string()),
        name: format!("producer {id}"),
    }
}

// ── Key assignment ───────────────────────────────────────────────

#[test]
fn assign_key_to_unkeyed_entity() {
    let mut p = Producer::default();
    assign_key(&mut p, "p1").unwrap();
    assert_eq!(p.key(), Some("p1"));
}

#[test]
fn assign_same_key_is_noop() {
    let mut p = producer("p1");
    assign_key(&mut p, "p1").unwrap();
    assert_eq!(p.key(), Some("p1"));
}

#[test]
fn assign_different_key_is_conflict() {
    let mut p = producer("p1");
    let err = assign_key(&mut p, "p2").unwrap_err();
    assert!(matches!(err, ModelError::KeyConflict { .. }));
    assert_eq!(p.key(), Some("p1"));
}

// ── Ref states ───────────────────────────────────────────────────

#[test]
fn unset_ref() {
    let r: Ref<Producer> = Ref::default();
    assert!(r.is_unset());
    assert_eq!(r.key(), None);
    assert_eq!(r.get().unwrap(), None);
}

#[test]
fn key_only_ref_has_no_target() {
    let r: Ref<Producer> = Ref::from_key("p1");
    assert_eq!(r.key(), Some("p1"));
    assert_eq!(r.get().unwrap(), None);
}

#[test]
fn value_ref_returns_instance() {
    let r = Ref::from_entity(producer("p1")).unwrap();
    assert_eq!(r.key(), Some("p1"));
    assert_eq!(r.get().unwrap(), Some(producer("p1")));
}

#[test]
fn value_ref_requires_key() {
    let err = Ref::from_entity(Producer::default()).unwrap_err();
    assert!(matches!(err, ModelError::MissingKey { .. }));
}

#[test]
fn bound_ref_before_assignment_is_error() {
    let r: Ref<Producer> = Ref::bound("p1", Arc::new(FixedHandle(None)));
    let err = r.get().unwrap_err();
    assert_eq!(err.to_string(), "unresolved reference producers [p1]");
}

#[test]
fn bound_ref_after_assignment() {
    let r: Ref<Producer> = Ref::bound("p1", Arc::new(FixedHandle(Some(producer("p1")))));
    assert_eq!(r.get().unwrap(), Some(producer("p1")));
}

// ── Serialization ────────────────────────────────────────────────

#[test]
fn ref_serializes_as_key() {
    let article = Article {
        id: Some("a1".into()),
        producer: Ref::from_entity(producer("p1")).unwrap(),
    };
    let json = serde_json::to_value(&article).unwrap();
    assert_eq!(json, serde_json::json!({"id": "a1", "producer": "p1"}));

    let back: Article = serde_json::from_value(json).unwrap();
    assert_eq!(back.producer, Ref::from_key("p1"));
    assert!(matches!(back.producer, Ref::Key(_)));
}

#[test]
fn null_deserializes_to_unset() {
    let back: Article = serde_json::from_str(r#"{"id":"a1","producer":null}"#).unwrap();
    assert!(back.producer.is_unset());
}

// ── RefField ─────────────────────────────────────────────────────

#[test]
fn visit_refs_exposes_embedded_value() {
    let article = Article {
        id: Some("a1".into()),
        producer: Ref::from_entity(producer("p1")).unwrap(),
    };
    let mut seen = Vec::new();
    article.visit_refs(&mut |field| {
        let embedded = field.embedded_value().map(|v| v.unwrap());
        seen.push((field.container(), field.ref_key().map(str::to_string), embedded));
    });

    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "producers");
    assert_eq!(seen[0].1.as_deref(), Some("p1"));
    assert_eq!(
        seen[0].2,
        Some(serde_json::json!({"id": "p1", "name": "producer p1"}))
    );
}

#[test]
fn key_only_ref_has_no_embedded_value() {
    let r: Ref<Producer> = Ref::from_key("p1");
    assert!(r.embedded_value().is_none());
}

// ── Peer binding ─────────────────────────────────────────────────

fn producer_handle(entity: Option<Producer>) -> Box<dyn Any + Send + Sync> {
    let handle: Arc<dyn PeerHandle<Producer>> = Arc::new(FixedHandle(entity));
    Box::new(handle)
}

#[test]
fn bind_peer_turns_key_into_bound_ref() {
    let mut article: Article =
        serde_json::from_str(r#"{"id":"a1","producer":"p1"}"#).unwrap();
    let handle = producer_handle(Some(producer("p1")));
    let mut bound = 0;
    article.visit_refs_mut(&mut |field| {
        if field.bind_peer(&*handle) {
            bound += 1;
        }
    });

    assert_eq!(bound, 1);
    assert!(matches!(article.producer, Ref::Peer { .. }));
    assert_eq!(article.producer.get().unwrap(), Some(producer("p1")));
}

#[test]
fn bound_ref_without_assigned_peer_is_error() {
    let mut r: Ref<Producer> = Ref::from_key("p1");
    assert!(r.bind_peer(&*producer_handle(None)));
    assert!(matches!(
        r.get(),
        Err(ModelError::UnresolvedReference { .. })
    ));
}

#[test]
fn bind_peer_ignores_handle_of_other_type() {
    let mut r: Ref<Producer> = Ref::from_key("p1");
    let other: Arc<dyn PeerHandle<Article>> = Arc::new(NoArticles);
    assert!(!r.bind_peer(&other));
    assert!(matches!(r, Ref::Key(_)));
}

#[test]
fn bind_peer_leaves_unset_and_value_refs_alone() {
    let handle = producer_handle(Some(producer("p1")));
    let mut unset: Ref<Producer> = Ref::Unset;
    assert!(!unset.bind_peer(&*handle));
    assert!(unset.is_unset());

    let mut value = Ref::from_entity(producer("p2")).unwrap();
    assert!(!value.bind_peer(&*handle));
    assert_eq!(value.get().unwrap(), Some(producer("p2")));
}

struct NoArticles;

impl PeerHandle<Article> for NoArticles {
    fn assigned_entity(&self, _key: &str) -> Option<Article> {
        None
    }
}

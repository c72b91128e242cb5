use std::sync::atomic::AtomicU64;
use tasksync_types::{ClientId, TaskId};

// ── TaskId ───────────────────────────────────────────────────────

#[test]
fn task_ids_follow_submission_order() {
    let counter = AtomicU64::new(1);
    let first = TaskId::next(&counter);
    let second = TaskId::next(&counter);

    assert!(first < second);
    assert_eq!(first.as_u64(), 1);
    assert_eq!(second.as_u64(), 2);
}

#[test]
fn task_id_display_and_parse() {
    let id = TaskId::from_raw(42);
    assert_eq!(id.to_string(), "#42");
    assert_eq!("#42".parse::<TaskId>().unwrap(), id);
    assert_eq!("42".parse::<TaskId>().unwrap(), id);
}

#[test]
fn task_id_parse_rejects_garbage() {
    assert!("#x".parse::<TaskId>().is_err());
    assert!("".parse::<TaskId>().is_err());
}

#[test]
fn task_id_serializes_as_number() {
    let json = serde_json::to_string(&TaskId::from_raw(7)).unwrap();
    assert_eq!(json, "7");
}

// ── ClientId ─────────────────────────────────────────────────────

#[test]
fn client_ids_are_unique() {
    assert_ne!(ClientId::new(), ClientId::new());
}

#[test]
fn client_id_display_roundtrip() {
    let id = ClientId::new();
    let parsed: ClientId = id.to_string().parse().unwrap();
    assert_eq!(parsed, id);
}

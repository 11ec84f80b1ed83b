use super::*;
use chrono::{DateTime, TimeZone, Utc};
use shared::domain::UserId;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().expect("timestamp")
}

fn message(id: &str, created_at: i64) -> Message {
    Message::new(id, "room-1", "alice", format!("body of {id}"), at(created_at))
}

fn ids(store: &MessageStore) -> Vec<&str> {
    store.iter().map(|message| message.id.as_str()).collect()
}

#[test]
fn new_message_is_prepended_and_idempotent() {
    let store = MessageStore::initialize(vec![message("m2", 10), message("m1", 5)]);

    let once = store.apply_new_message(message("m3", 20));
    assert_eq!(ids(&once), vec!["m3", "m2", "m1"]);

    let twice = once.apply_new_message(message("m3", 20));
    assert_eq!(ids(&twice), vec!["m3", "m2", "m1"]);
    assert!(twice.same_snapshot(&once));
}

#[test]
fn new_message_never_reorders_existing_entries() {
    let store = MessageStore::initialize(vec![message("m2", 10), message("m1", 5)]);
    let late = store.apply_new_message(message("m0", 1));
    assert_eq!(ids(&late), vec!["m0", "m2", "m1"]);
}

#[test]
fn initialize_normalizes_oldest_first_history() {
    let store = MessageStore::initialize(vec![message("m1", 5), message("m2", 10), message("m3", 15)]);
    assert_eq!(ids(&store), vec!["m3", "m2", "m1"]);
}

#[test]
fn initialize_drops_duplicate_ids() {
    let store = MessageStore::initialize(vec![message("m2", 10), message("m2", 10), message("m1", 5)]);
    assert_eq!(ids(&store), vec!["m2", "m1"]);
}

#[test]
fn status_update_is_last_write_wins_per_user() {
    let store = MessageStore::initialize(vec![message("m1", 5)]);

    let store = store.apply_status_update(MessageStatus::new("m1", "a").delivered(at(6)));
    let store = store.apply_status_update(MessageStatus::new("m1", "a").delivered(at(6)).read(at(7)));

    let stored = store.get(&MessageId::from("m1")).expect("message");
    assert_eq!(stored.status.len(), 1);
    assert_eq!(stored.status[0].read_at, Some(at(7)));
}

#[test]
fn later_update_replaces_rather_than_merges() {
    let store = MessageStore::initialize(vec![message("m1", 5)]);
    let store = store.apply_status_update(MessageStatus::new("m1", "a").read(at(7)));
    let store = store.apply_status_update(MessageStatus::new("m1", "a").delivered(at(8)));

    let stored = store.get(&MessageId::from("m1")).expect("message");
    assert_eq!(stored.status[0].read_at, None);
    assert_eq!(stored.status[0].delivered_at, Some(at(8)));
}

#[test]
fn status_for_unknown_message_returns_unchanged_snapshot() {
    let store = MessageStore::initialize(vec![message("m1", 5)]);
    let next = store.apply_status_update(MessageStatus::new("missing", "a").read(at(7)));
    assert!(next.same_snapshot(&store));
}

#[test]
fn status_update_leaves_other_entries_shared() {
    let store = MessageStore::initialize(vec![message("m2", 10), message("m1", 5)]);
    let next = store.apply_status_update(MessageStatus::new("m2", "a").delivered(at(11)));

    let before = store.get(&MessageId::from("m1")).expect("m1") as *const Message;
    let after = next.get(&MessageId::from("m1")).expect("m1") as *const Message;
    assert_eq!(before, after);

    assert!(store
        .get(&MessageId::from("m2"))
        .expect("m2")
        .status
        .is_empty());
}

#[test]
fn bulk_update_applies_each_entry_independently() {
    let store = MessageStore::initialize(vec![message("m2", 10), message("m1", 5)]);
    let next = store.apply_bulk_status_update(vec![
        MessageStatus::new("m1", "a").read(at(12)),
        MessageStatus::new("gone", "a").read(at(12)),
        MessageStatus::new("m2", "b").delivered(at(13)),
        MessageStatus::new("m1", "b").delivered(at(14)),
    ]);

    let m1 = next.get(&MessageId::from("m1")).expect("m1");
    assert_eq!(m1.status.len(), 2);
    assert_eq!(m1.status_for(&UserId::from("b")).and_then(|s| s.delivered_at), Some(at(14)));
    let m2 = next.get(&MessageId::from("m2")).expect("m2");
    assert_eq!(m2.status.len(), 1);
    assert_eq!(ids(&next), vec!["m2", "m1"]);
}

#[test]
fn bulk_update_with_no_matching_messages_is_a_no_op() {
    let store = MessageStore::initialize(vec![message("m1", 5)]);
    let next = store.apply_bulk_status_update(vec![
        MessageStatus::new("x", "a").read(at(1)),
        MessageStatus::new("y", "b").read(at(2)),
    ]);
    assert!(next.same_snapshot(&store));
}

#[test]
fn repeating_an_identical_status_keeps_the_snapshot() {
    let store = MessageStore::initialize(vec![message("m1", 5)]);
    let status = MessageStatus::new("m1", "a").delivered(at(6));
    let once = store.apply_status_update(status.clone());
    let twice = once.apply_status_update(status);
    assert!(twice.same_snapshot(&once));
}

#[test]
fn live_store_publishes_only_changed_snapshots() {
    let live = LiveStore::new();
    let mut rx = live.subscribe();
    live.initialize(vec![message("m1", 5)]);
    assert!(rx.has_changed().expect("sender alive"));
    rx.borrow_and_update();

    assert!(!live.apply_new_message(message("m1", 5)));
    assert!(!rx.has_changed().expect("sender alive"));

    assert!(live.apply_event(RoomEvent::MessagesRead(vec![
        MessageStatus::new("m1", "a").read(at(6)),
        MessageStatus::new("m1", "b").read(at(7)),
    ])));
    assert!(rx.has_changed().expect("sender alive"));
    let snapshot = rx.borrow_and_update().clone();
    assert_eq!(snapshot.get(&MessageId::from("m1")).expect("m1").status.len(), 2);
}

#[test]
fn live_store_clear_discards_messages() {
    let live = LiveStore::new();
    live.initialize(vec![message("m1", 5)]);
    live.clear();
    assert!(live.snapshot().is_empty());
}

use std::collections::HashMap;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use super::{Snapshot, WatchableMap};

#[derive(Debug, Clone, PartialEq)]
struct Intercept {
    name: String,
    ports: Vec<u16>,
}

fn value(name: &str) -> Intercept {
    Intercept {
        name: name.to_owned(),
        ports: vec![80],
    }
}

fn snapshot(entries: &[(&str, &str)]) -> Snapshot<Intercept> {
    entries
        .iter()
        .map(|(key, name)| (key.to_string(), value(name)))
        .collect()
}

#[test]
fn delete_on_empty_and_repeated() {
    let m = WatchableMap::<Intercept>::new();
    m.delete("a");
    assert_eq!(m.load_all(), HashMap::new());

    m.store("a", value("a"));
    assert_eq!(m.load_all(), snapshot(&[("a", "a")]));
    m.delete("a");
    assert_eq!(m.load_all(), HashMap::new());
    m.delete("a");
    assert_eq!(m.load_all(), HashMap::new());
}

#[test]
fn load_returns_independent_copies() {
    let m = WatchableMap::new();
    m.store("k", value("value"));

    let mut first = m.load("k").unwrap();
    first.ports.push(443);
    first.name.push_str("-changed");
    assert_eq!(m.load("k"), Some(value("value")));

    let mut all = m.load_all();
    all.get_mut("k").unwrap().ports.clear();
    assert_eq!(m.load("k"), Some(value("value")));

    m.delete("k");
    assert_eq!(m.load("k"), None);
}

#[test]
fn load_and_delete() {
    let m = WatchableMap::new();
    m.store("k", value("value"));

    assert_eq!(m.load_and_delete("k"), Some(value("value")));
    assert_eq!(m.load("k"), None);
    assert_eq!(m.load_and_delete("k"), None);
}

#[test]
fn load_or_store() {
    let m = WatchableMap::new();
    m.store("k", value("value"));

    let (existing, loaded) = m.load_or_store("k", value("other"));
    assert!(loaded);
    assert_eq!(existing, value("value"));
    assert_eq!(m.load("k"), Some(value("value")));

    let (mut stored, loaded) = m.load_or_store("x", value("x"));
    assert!(!loaded);
    assert_eq!(stored, value("x"));
    stored.ports.push(1);
    assert_eq!(m.load("x"), Some(value("x")));
}

#[test]
fn load_all_folds_writes() {
    let m = WatchableMap::new();
    m.store("a", 1);
    m.store("b", 2);
    m.store("a", 3);
    m.delete("b");
    m.store("c", 4);
    m.load_and_delete("c");
    m.load_or_store("d", 5);
    m.load_or_store("d", 6);

    assert_eq!(
        m.load_all(),
        HashMap::from([("a".to_string(), 3), ("d".to_string(), 5)])
    );
}

#[tokio::test]
async fn subscribe_coalesces_and_closes_on_cancel() {
    let lifetime = CancellationToken::new();
    let m = WatchableMap::new();
    m.store("a", value("A"));
    m.store("b", value("B"));
    m.store("c", value("C"));

    let mut sub = m.subscribe(lifetime.clone());

    // the complete snapshot is immediately available
    assert_eq!(
        sub.recv().now_or_never().flatten(),
        Some(snapshot(&[("a", "A"), ("b", "B"), ("c", "C")]))
    );
    assert!(sub.recv().now_or_never().is_none());

    // writes don't block on the subscriber, and coalesce into one snapshot
    m.store("d", value("D"));
    m.store("e", value("E"));
    m.store("f", value("F"));
    assert_eq!(
        sub.recv().await,
        Some(snapshot(&[
            ("a", "A"),
            ("b", "B"),
            ("c", "C"),
            ("d", "D"),
            ("e", "E"),
            ("f", "F"),
        ]))
    );
    assert!(sub.recv().now_or_never().is_none());

    m.delete("a");
    assert_eq!(
        sub.recv().await,
        Some(snapshot(&[("b", "B"), ("c", "C"), ("d", "D"), ("e", "E"), ("f", "F")]))
    );

    m.load_and_delete("b");
    assert_eq!(
        sub.recv().await,
        Some(snapshot(&[("c", "C"), ("d", "D"), ("e", "E"), ("f", "F")]))
    );

    // a store followed by a delete of the same key is one snapshot
    m.store("c", value("c"));
    m.delete("c");
    assert_eq!(
        sub.recv().await,
        Some(snapshot(&[("d", "D"), ("e", "E"), ("f", "F")]))
    );
    assert!(sub.recv().now_or_never().is_none());

    // pending writes coalesce into the close
    m.store("g", value("G"));
    m.store("h", value("H"));
    lifetime.cancel();
    assert_eq!(sub.recv().await, None);
    assert_eq!(sub.recv().await, None);
    assert_eq!(sub.recv().await, None);

    // the map itself is unaffected
    assert_eq!(m.load("h"), Some(value("H")));
}

#[tokio::test]
async fn subscribe_subset_filters_and_closes_with_map() {
    let lifetime = CancellationToken::new();
    let m = WatchableMap::new();
    m.store("a", value("A"));
    m.store("b", value("B"));
    m.store("c", value("C"));

    let ignore = |_: &str, v: &Intercept| v.name != "ignoreme";
    let mut sub = m.subscribe_subset(lifetime.clone(), ignore);

    assert_eq!(
        sub.recv().await,
        Some(snapshot(&[("a", "A"), ("b", "B"), ("c", "C")]))
    );

    // a no-op write doesn't trigger a snapshot
    m.store("a", value("A"));
    assert!(sub.recv().now_or_never().is_none());

    // an ignored entry never shows up and doesn't wake the subscriber
    m.store("z", value("ignoreme"));
    assert!(sub.recv().now_or_never().is_none());

    m.store("a", value("a"));
    assert_eq!(
        sub.recv().await,
        Some(snapshot(&[("a", "a"), ("b", "B"), ("c", "C")]))
    );

    // an entry that stops matching is dropped from the snapshot
    m.store("a", value("ignoreme"));
    assert_eq!(sub.recv().await, Some(snapshot(&[("b", "B"), ("c", "C")])));

    m.close();
    assert_eq!(sub.recv().await, None);

    // subscriptions to a closed map are closed from the start
    let mut late = m.subscribe_subset(lifetime, ignore);
    assert_eq!(late.recv().await, None);

    m.store("b", value("b"));
    assert_eq!(m.load("b"), Some(value("B")));
}

#[tokio::test]
async fn close_drops_pending_snapshots() {
    let m = WatchableMap::new();
    m.store("a", 1);
    let mut one = m.subscribe(CancellationToken::new());
    let mut two = m.subscribe_subset(CancellationToken::new(), |k, _| k == "a");
    assert!(one.recv().await.is_some());

    m.store("a", 2);
    m.close();
    assert_eq!(one.recv().await, None);
    assert_eq!(two.recv().await, None);
}

#[tokio::test]
async fn slow_subscriber_sees_latest_state() {
    let m = WatchableMap::new();
    let mut sub = m.subscribe(CancellationToken::new());
    assert_eq!(sub.recv().await, Some(HashMap::new()));

    let writer = {
        let m = m.clone();
        tokio::spawn(async move {
            for i in 0..100 {
                m.store("counter", i);
            }
        })
    };
    writer.await.unwrap();

    let latest = tokio::time::timeout(Duration::from_secs(1), sub.recv())
        .await
        .unwrap();
    assert_eq!(latest, Some(HashMap::from([("counter".to_string(), 99)])));
    assert!(sub.recv().now_or_never().is_none());
}

#[tokio::test]
async fn dropped_subscription_is_pruned() {
    let m = WatchableMap::new();
    let sub = m.subscribe(CancellationToken::new());
    drop(sub);
    m.store("a", 1);
    assert!(m.state.lock().subscribers.is_empty());
}

#[tokio::test]
async fn cancelled_subscription_is_pruned_while_held() {
    let m = WatchableMap::new();
    let lifetime = CancellationToken::new();
    let mut sub = m.subscribe(lifetime.clone());
    let _live = m.subscribe(CancellationToken::new());
    lifetime.cancel();

    m.store("a", 1);
    assert_eq!(m.state.lock().subscribers.len(), 1);
    assert_eq!(sub.recv().await, None);
}

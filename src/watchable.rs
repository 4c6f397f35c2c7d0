//! A concurrent string-keyed map whose readers can subscribe to snapshots.
//!
//! Every value goes in and comes out by clone, so nothing handed out by the map
//! aliases what it stores. Subscribers receive full snapshots, never diffs:
//! any number of writes between two reads of a [`Subscription`] coalesce into a
//! single snapshot of the state after the last of them, and writers never wait
//! on slow subscribers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

mod subscription;
pub use subscription::Subscription;

#[cfg(test)]
mod tests;

/// A full copy of the (possibly filtered) map content.
pub type Snapshot<V> = HashMap<String, V>;

type Predicate<V> = Arc<dyn Fn(&str, &V) -> bool + Send + Sync>;

pub struct WatchableMap<V> {
    state: Arc<Mutex<State<V>>>,
}

struct State<V> {
    values: HashMap<String, V>,
    subscribers: Vec<Subscriber<V>>,
    closed: bool,
}

struct Subscriber<V> {
    predicate: Option<Predicate<V>>,
    dirty: watch::Sender<()>,
    lifetime: CancellationToken,
}

fn matches<V>(predicate: Option<&Predicate<V>>, key: &str, value: &V) -> bool {
    predicate.map_or(true, |predicate| (**predicate)(key, value))
}

impl<V> State<V> {
    /// Marks every subscriber that could see `key` before or after the write.
    /// Subscribers that were dropped or whose lifetime ended are removed here.
    fn touch(&mut self, key: &str, old: Option<&V>) {
        let new = self.values.get(key);
        self.subscribers.retain(|sub| {
            if sub.dirty.is_closed() || sub.lifetime.is_cancelled() {
                return false;
            }
            let predicate = sub.predicate.as_ref();
            let visible = old.is_some_and(|v| matches(predicate, key, v))
                || new.is_some_and(|v| matches(predicate, key, v));
            !visible || sub.dirty.send(()).is_ok()
        });
    }

    fn snapshot(&self, predicate: Option<&Predicate<V>>) -> Snapshot<V>
    where
        V: Clone,
    {
        self.values
            .iter()
            .filter(|(key, value)| matches(predicate, key.as_str(), *value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

impl<V> Default for WatchableMap<V> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                values: HashMap::new(),
                subscribers: Vec::new(),
                closed: false,
            })),
        }
    }
}

impl<V> Clone for WatchableMap<V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<V> WatchableMap<V>
where
    V: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, key: &str) -> Option<V> {
        self.state.lock().values.get(key).cloned()
    }

    pub fn load_all(&self) -> Snapshot<V> {
        self.state.lock().snapshot(None)
    }

    /// Inserts or replaces `key`. Storing a value equal to the current one
    /// notifies nobody.
    pub fn store(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let mut state = self.state.lock();
        if state.closed {
            log::debug!("ignoring store of {key:?} into a closed map");
            return;
        }
        if state.values.get(&key) == Some(&value) {
            return;
        }
        let old = state.values.insert(key.clone(), value);
        state.touch(&key, old.as_ref());
    }

    /// Returns the stored value if `key` exists, otherwise stores `value`.
    /// The flag is true when the value was already present.
    pub fn load_or_store(&self, key: impl Into<String>, value: V) -> (V, bool) {
        let key = key.into();
        let mut state = self.state.lock();
        if let Some(existing) = state.values.get(&key) {
            return (existing.clone(), true);
        }
        if state.closed {
            log::debug!("ignoring store of {key:?} into a closed map");
            return (value, false);
        }
        state.values.insert(key.clone(), value.clone());
        state.touch(&key, None);
        (value, false)
    }

    pub fn load_and_delete(&self, key: &str) -> Option<V> {
        let mut state = self.state.lock();
        if state.closed {
            log::debug!("ignoring delete of {key:?} from a closed map");
            return None;
        }
        let old = state.values.remove(key)?;
        state.touch(key, Some(&old));
        Some(old)
    }

    pub fn delete(&self, key: &str) {
        self.load_and_delete(key);
    }

    /// Subscribes to every entry. The first snapshot is available immediately.
    /// The subscription ends when `lifetime` is cancelled or the map is closed.
    pub fn subscribe(&self, lifetime: CancellationToken) -> Subscription<V> {
        self.subscribe_with(lifetime, None)
    }

    /// Subscribes to the entries accepted by `predicate`. An entry that stops
    /// matching disappears from later snapshots as if it had been deleted.
    pub fn subscribe_subset<F>(&self, lifetime: CancellationToken, predicate: F) -> Subscription<V>
    where
        F: Fn(&str, &V) -> bool + Send + Sync + 'static,
    {
        self.subscribe_with(lifetime, Some(Arc::new(predicate)))
    }

    fn subscribe_with(
        &self,
        lifetime: CancellationToken,
        predicate: Option<Predicate<V>>,
    ) -> Subscription<V> {
        let (dirty, dirty_rx) = watch::channel(());
        let mut state = self.state.lock();
        if !state.closed {
            state.subscribers.push(Subscriber {
                predicate: predicate.clone(),
                dirty,
                lifetime: lifetime.clone(),
            });
        }
        drop(state);
        Subscription::new(Arc::clone(&self.state), dirty_rx, predicate, lifetime)
    }

    /// Closes the map for good. Every subscription ends, including ones created later,
    /// and further writes are ignored.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.subscribers.clear();
    }
}

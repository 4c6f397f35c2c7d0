use std::collections::{BTreeMap, HashMap};

/// One key of a namespace's agents ConfigMap, as carried by a diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub namespace: String,
    pub value: String,
}

impl Entry {
    fn new(name: &str, namespace: &str, value: &str) -> Self {
        Self {
            name: name.to_owned(),
            namespace: namespace.to_owned(),
            value: value.to_owned(),
        }
    }
}

/// Entry-level changes between the cached and the observed content of one namespace.
/// A key never shows up in both lists.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Diff {
    pub deleted: Vec<Entry>,
    pub modified: Vec<Entry>,
}

/// Last seen content of the agents ConfigMap, per namespace.
#[derive(Debug, Default)]
pub(crate) struct NamespaceCache {
    namespaces: HashMap<String, BTreeMap<String, String>>,
}

impl NamespaceCache {
    pub fn get(&self, namespace: &str, key: &str) -> Option<&str> {
        self.namespaces.get(namespace)?.get(key).map(String::as_str)
    }

    /// Replaces the content of `namespace` with `observed` and returns what changed.
    /// `None` means the ConfigMap is gone, which deletes every cached key.
    pub fn update(&mut self, namespace: &str, observed: Option<&BTreeMap<String, String>>) -> Diff {
        let empty = BTreeMap::new();
        let observed = observed.unwrap_or(&empty);
        let cached = self.namespaces.entry(namespace.to_owned()).or_default();

        let mut diff = Diff::default();
        cached.retain(|key, value| {
            let keep = observed.contains_key(key);
            if !keep {
                diff.deleted.push(Entry::new(key, namespace, value));
            }
            keep
        });
        for (key, value) in observed {
            if cached.get(key) != Some(value) {
                diff.modified.push(Entry::new(key, namespace, value));
                cached.insert(key.clone(), value.clone());
            }
        }
        diff
    }

    /// True when the cache already holds exactly `value` for `key`.
    pub fn holds(&self, namespace: &str, key: &str, value: &str) -> bool {
        self.get(namespace, key) == Some(value)
    }

    /// Records `value` for `key` and returns what it replaced.
    pub fn record(&mut self, namespace: &str, key: &str, value: &str) -> Option<String> {
        self.namespaces
            .entry(namespace.to_owned())
            .or_default()
            .insert(key.to_owned(), value.to_owned())
    }

    /// Undoes [`record`](Self::record) unless the key has been overwritten since.
    pub fn restore(
        &mut self,
        namespace: &str,
        key: &str,
        recorded: &str,
        previous: Option<String>,
    ) {
        let Some(cached) = self.namespaces.get_mut(namespace) else {
            return;
        };
        if cached.get(key).map(String::as_str) != Some(recorded) {
            return;
        }
        match previous {
            Some(previous) => cached.insert(key.to_owned(), previous),
            None => cached.remove(key),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn diff_against_cache() {
        let mut cache = NamespaceCache::default();
        let first = cache.update("ns", Some(&data(&[("a", "1"), ("b", "2")])));
        assert!(first.deleted.is_empty());
        assert_eq!(first.modified.len(), 2);

        let diff = cache.update("ns", Some(&data(&[("b", "2"), ("c", "3")])));
        assert_eq!(
            diff,
            Diff {
                deleted: vec![Entry::new("a", "ns", "1")],
                modified: vec![Entry::new("c", "ns", "3")],
            }
        );
        assert_eq!(cache.get("ns", "a"), None);
        assert_eq!(cache.get("ns", "c"), Some("3"));
    }

    #[test]
    fn changed_value_is_modified() {
        let mut cache = NamespaceCache::default();
        cache.update("ns", Some(&data(&[("a", "1")])));
        let diff = cache.update("ns", Some(&data(&[("a", "2")])));
        assert!(diff.deleted.is_empty());
        assert_eq!(diff.modified, vec![Entry::new("a", "ns", "2")]);
    }

    #[test]
    fn removed_config_map_deletes_everything() {
        let mut cache = NamespaceCache::default();
        cache.update("ns", Some(&data(&[("a", "1"), ("b", "2")])));
        cache.update("other", Some(&data(&[("a", "9")])));

        let diff = cache.update("ns", None);
        assert_eq!(
            diff.deleted,
            vec![Entry::new("a", "ns", "1"), Entry::new("b", "ns", "2")]
        );
        assert!(diff.modified.is_empty());
        assert_eq!(cache.get("other", "a"), Some("9"));
        assert_eq!(cache.update("ns", None), Diff::default());
    }

    #[test]
    fn recorded_value_suppresses_next_diff() {
        let mut cache = NamespaceCache::default();
        assert!(!cache.holds("ns", "a", "1"));
        assert_eq!(cache.record("ns", "a", "1"), None);
        assert!(cache.holds("ns", "a", "1"));
        assert!(cache.update("ns", Some(&data(&[("a", "1")]))).modified.is_empty());
    }

    #[test]
    fn restore_reverts_only_its_own_record() {
        let mut cache = NamespaceCache::default();
        cache.update("ns", Some(&data(&[("a", "1")])));

        let previous = cache.record("ns", "a", "2");
        assert_eq!(previous.as_deref(), Some("1"));
        cache.restore("ns", "a", "2", previous);
        assert_eq!(cache.get("ns", "a"), Some("1"));

        let previous = cache.record("ns", "b", "1");
        cache.restore("ns", "b", "1", previous);
        assert_eq!(cache.get("ns", "b"), None);

        // a newer observation wins over the rollback
        let previous = cache.record("ns", "a", "2");
        cache.update("ns", Some(&data(&[("a", "3")])));
        cache.restore("ns", "a", "2", previous);
        assert_eq!(cache.get("ns", "a"), Some("3"));
    }
}

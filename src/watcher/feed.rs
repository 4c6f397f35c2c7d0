use std::collections::BTreeMap;

use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube_core::WatchEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ConfigWatcher, Entry};
use crate::cluster::ConfigMapFeed;

/// Where the watch tasks deliver their diffs.
#[derive(Clone)]
pub(super) struct Dispatch {
    pub deleted: mpsc::Sender<Entry>,
    pub modified: mpsc::Sender<Entry>,
    pub lifetime: CancellationToken,
}

impl ConfigWatcher {
    /// Follows the agents ConfigMap of `namespace` until the lifetime ends.
    ///
    /// The apiserver closes watches routinely, so a feed that ends is simply
    /// reopened. Failing to open one ends the task and leaves the namespace unwatched.
    pub(super) async fn watch_namespace(self, namespace: String, dispatch: Dispatch) {
        let name = self.inner.config.config_map.clone();
        log::info!("Started watcher for ConfigMap {name}.{namespace}");

        while !dispatch.lifetime.is_cancelled() {
            let feed = match self.inner.config_maps.watch(&namespace, &name).await {
                Ok(feed) => feed,
                Err(err) => {
                    log::error!("unable to create watcher for ConfigMap {name}.{namespace}: {err}");
                    break;
                }
            };
            if !self.follow(feed, &namespace, &dispatch).await {
                break;
            }
        }

        log::info!("Ended watcher for ConfigMap {name}.{namespace}");
    }

    /// Handles events until the feed ends. Returns false if the lifetime ended instead.
    async fn follow(&self, mut feed: ConfigMapFeed, watched: &str, dispatch: &Dispatch) -> bool {
        let name = self.inner.config.config_map.as_str();
        loop {
            let event = tokio::select! {
                biased;
                _ = dispatch.lifetime.cancelled() => return false,
                event = feed.next() => event,
            };
            match event {
                None => return true,
                Some(Err(err)) => {
                    log::warn!("watch of ConfigMap {name}.{watched} interrupted: {err}");
                    return true;
                }
                Some(Ok(WatchEvent::Error(err))) => {
                    log::warn!("watch of ConfigMap {name}.{watched} failed: {err}");
                    return true;
                }
                Some(Ok(WatchEvent::Bookmark(_))) => {}
                Some(Ok(WatchEvent::Deleted(cm))) => {
                    if cm.metadata.name.as_deref() != Some(name) {
                        continue;
                    }
                    let namespace = namespace_of(&cm, watched);
                    log::info!("ConfigMap {name}.{namespace} deleted");
                    self.dispatch(&namespace, None, dispatch).await;
                }
                Some(Ok(WatchEvent::Added(cm) | WatchEvent::Modified(cm))) => {
                    if cm.metadata.name.as_deref() != Some(name) {
                        continue;
                    }
                    let namespace = namespace_of(&cm, watched);
                    log::info!("ConfigMap {name}.{namespace} changed");
                    self.dispatch(&namespace, cm.data.as_ref(), dispatch).await;
                }
            }
        }
    }

    /// Diffs the observed content against the cache and hands the changed entries
    /// to the dispatch loop, deletions first.
    async fn dispatch(
        &self,
        namespace: &str,
        observed: Option<&BTreeMap<String, String>>,
        dispatch: &Dispatch,
    ) {
        let diff = self.inner.cache.lock().update(namespace, observed);
        let injector_key = self.inner.config.injector_key.as_str();
        deliver(diff.deleted, injector_key, &dispatch.deleted, &dispatch.lifetime).await;
        deliver(diff.modified, injector_key, &dispatch.modified, &dispatch.lifetime).await;
    }
}

fn namespace_of(cm: &ConfigMap, watched: &str) -> String {
    cm.metadata
        .namespace
        .clone()
        .unwrap_or_else(|| watched.to_owned())
}

/// Blocks until the dispatch loop has accepted every entry, or the lifetime ends.
async fn deliver(
    entries: Vec<Entry>,
    skip: &str,
    tx: &mpsc::Sender<Entry>,
    lifetime: &CancellationToken,
) {
    for entry in entries.into_iter().filter(|entry| entry.name != skip) {
        tokio::select! {
            biased;
            _ = lifetime.cancelled() => return,
            sent = tx.send(entry) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

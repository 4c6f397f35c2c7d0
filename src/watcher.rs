//! Keeps workloads consistent with the agent configs stored in ConfigMaps.
//!
//! One task per watched namespace follows the agents ConfigMap and turns every
//! observed change into entry-level deletions and modifications. A single
//! dispatch loop in [`ConfigWatcher::run`] consumes those one at a time and
//! either generates a missing config or rolls out the affected workload.

use std::collections::BTreeMap;
use std::panic;
use std::sync::Arc;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::agent::{self, AgentConfig, InjectorConfig};
use crate::cluster::{ConfigMaps, Workloads};
use crate::generator::Generator;
use crate::{Config, Error, Result};

mod cache;
mod feed;
mod reconcile;

pub use cache::Entry;
use cache::NamespaceCache;
use feed::Dispatch;

/// Capacity of each of the deletion and modification channels.
const DISPATCH_BUFFER: usize = 16;

#[derive(Clone)]
pub struct ConfigWatcher {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    config_maps: Arc<dyn ConfigMaps>,
    workloads: Arc<dyn Workloads>,
    generator: Arc<dyn Generator>,
    cache: Mutex<NamespaceCache>,
}

impl ConfigWatcher {
    pub fn new(
        config: Config,
        config_maps: Arc<dyn ConfigMaps>,
        workloads: Arc<dyn Workloads>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                config_maps,
                workloads,
                generator,
                cache: Mutex::new(NamespaceCache::default()),
            }),
        }
    }

    /// Creates a watcher whose namespaces come from the injector settings stored in
    /// the agents ConfigMap of `manager_namespace`, if there are any.
    pub async fn load(
        mut config: Config,
        config_maps: Arc<dyn ConfigMaps>,
        workloads: Arc<dyn Workloads>,
        generator: Arc<dyn Generator>,
        manager_namespace: &str,
    ) -> Result<Self> {
        match config_maps.get(manager_namespace, &config.config_map).await {
            Ok(Some(cm)) => {
                if let Some(value) = cm.data.as_ref().and_then(|d| d.get(&config.injector_key)) {
                    let injector: InjectorConfig = agent::decode(value)?;
                    log::info!(
                        "using {:?} entry from ConfigMap {}",
                        config.injector_key,
                        config.config_map
                    );
                    config.namespaces = injector.namespaces;
                }
            }
            Ok(None) => {}
            Err(err) => log::warn!(
                "unable to read ConfigMap {}.{manager_namespace}: {err}",
                config.config_map
            ),
        }
        log::info!("Loading ConfigMaps from {:?}", config.namespaces);
        Ok(Self::new(config, config_maps, workloads, generator))
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Decodes the cached entry `key` of `namespace`.
    pub fn get_into<T: DeserializeOwned>(&self, key: &str, namespace: &str) -> Result<Option<T>> {
        let value = match self.inner.cache.lock().get(namespace, key) {
            Some(value) => value.to_owned(),
            None => return Ok(None),
        };
        Ok(Some(agent::decode(&value)?))
    }

    /// Writes `ac` into the agents ConfigMap of its namespace.
    ///
    /// Nothing is written when the cache already holds the same config. With
    /// `update_cache`, the cache is updated right before the write, so the change
    /// the write causes is not dispatched again. A failed write rolls that back.
    pub async fn store(&self, ac: &AgentConfig, update_cache: bool) -> Result<()> {
        let yml = agent::encode(ac)?;
        let ns = ac.namespace.as_str();
        let key = ac.agent_name.as_str();
        let name = self.inner.config.config_map.as_str();

        if self.inner.cache.lock().holds(ns, key, &yml) {
            log::debug!("agent config {key}.{ns} is unchanged");
            return Ok(());
        }

        let existing = self
            .inner
            .config_maps
            .get(ns, name)
            .await
            .map_err(|source| Error::GetConfigMap {
                name: name.to_owned(),
                source,
            })?;

        let recorded = if update_cache {
            let mut cache = self.inner.cache.lock();
            if cache.holds(ns, key, &yml) {
                log::debug!("agent config {key}.{ns} is unchanged");
                return Ok(());
            }
            Some(cache.record(ns, key, &yml))
        } else {
            None
        };

        let written = match existing {
            None => {
                let cm = ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(name.to_owned()),
                        namespace: Some(ns.to_owned()),
                        ..ObjectMeta::default()
                    },
                    data: Some(BTreeMap::from([(key.to_owned(), yml.clone())])),
                    ..ConfigMap::default()
                };
                log::info!("creating new ConfigMap {name}.{ns}");
                self.inner.config_maps.create(ns, &cm).await
            }
            Some(mut cm) => {
                log::info!("updating ConfigMap {name}.{ns}");
                cm.data
                    .get_or_insert_with(BTreeMap::new)
                    .insert(key.to_owned(), yml.clone());
                self.inner.config_maps.update(ns, &cm).await
            }
        };
        if let Err(err) = written {
            if let Some(previous) = recorded {
                self.inner.cache.lock().restore(ns, key, &yml, previous);
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Watches every configured namespace and reconciles changes until `lifetime`
    /// is cancelled. Returns after all watch tasks have stopped.
    pub async fn run(&self, lifetime: CancellationToken) {
        let lifetime = lifetime.child_token();
        let (deleted_tx, mut deleted) = mpsc::channel(DISPATCH_BUFFER);
        let (modified_tx, mut modified) = mpsc::channel(DISPATCH_BUFFER);
        let dispatch = Dispatch {
            deleted: deleted_tx,
            modified: modified_tx,
            lifetime: lifetime.clone(),
        };

        let mut watchers = JoinSet::new();
        for namespace in self.inner.config.watched_namespaces() {
            watchers.spawn(self.clone().watch_namespace(namespace, dispatch.clone()));
        }
        drop(dispatch);

        // Pending deletions always go before pending modifications. Once every
        // watch task has given up both channels close, and only cancellation remains.
        loop {
            tokio::select! {
                biased;
                _ = lifetime.cancelled() => break,
                Some(entry) = deleted.recv() => self.on_delete(entry).await,
                Some(entry) = modified.recv() => self.on_modify(entry).await,
            }
        }

        lifetime.cancel();
        while let Some(joined) = watchers.join_next().await {
            if let Err(err) = joined {
                if let Ok(panic) = err.try_into_panic() {
                    panic::resume_unwind(panic)
                }
            }
        }
    }
}

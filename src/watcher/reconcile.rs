use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;

use super::{ConfigWatcher, Entry};
use crate::agent::{self, AgentConfig};
use crate::cluster::Workload;
use crate::{Error, Result};

impl ConfigWatcher {
    pub(super) async fn on_delete(&self, entry: Entry) {
        log::info!("del {}.{}: {}", entry.name, entry.namespace, entry.value);
        let (ac, workload) = match self.resolve(&entry).await {
            Ok(resolved) => resolved,
            Err(err) => {
                log::error!("{err}");
                return;
            }
        };
        if ac.create {
            log::debug!("{}.{} was deleted before it was generated", entry.name, entry.namespace);
            return;
        }
        self.trigger_rollout(&workload).await;
    }

    pub(super) async fn on_modify(&self, entry: Entry) {
        log::info!("add {}.{}: {}", entry.name, entry.namespace, entry.value);
        let (ac, workload) = match self.resolve(&entry).await {
            Ok(resolved) => resolved,
            Err(err) => {
                log::error!("{err}");
                return;
            }
        };
        if !ac.create {
            self.trigger_rollout(&workload).await;
            return;
        }

        // The generated config goes into the cache before it is written, so the
        // resulting ConfigMap change is not dispatched again. The rollout happens
        // once the stored config itself changes.
        let generated = match self
            .inner
            .generator
            .generate(&workload, &workload.pod_template)
            .await
        {
            Ok(generated) => generated,
            Err(err) => {
                log::error!("{err}");
                return;
            }
        };
        if let Err(err) = self.store(&generated, true).await {
            log::error!("{err}");
        }
    }

    async fn resolve(&self, entry: &Entry) -> Result<(AgentConfig, Workload)> {
        let ac: AgentConfig = agent::decode(&entry.value).map_err(|source| Error::Decode {
            key: entry.name.clone(),
            source,
        })?;
        let workload = self
            .inner
            .workloads
            .get(&ac.workload_kind, &ac.workload_name, &ac.namespace)
            .await
            .map_err(|err| Error::Workload {
                kind: ac.workload_kind.clone(),
                name: ac.workload_name.clone(),
                namespace: ac.namespace.clone(),
                source: Box::new(err),
            })?;
        Ok((ac, workload))
    }

    /// Bumps the restart annotation of the pod template. Failures are only logged.
    async fn trigger_rollout(&self, workload: &Workload) {
        let patch = restart_patch(&self.inner.config.restart_annotation, Utc::now());
        match self.inner.workloads.patch(workload, &patch).await {
            Ok(()) => log::info!(
                "Successfully rolled out {}.{}",
                workload.name,
                workload.namespace
            ),
            Err(err) => log::error!(
                "unable to patch {} {}.{}: {err}",
                workload.kind,
                workload.name,
                workload.namespace
            ),
        }
    }
}

pub(crate) fn restart_patch(annotation: &str, now: DateTime<Utc>) -> serde_json::Value {
    let annotations = BTreeMap::from([(
        annotation.to_owned(),
        now.to_rfc3339_opts(SecondsFormat::Secs, true),
    )]);
    json!({ "spec": { "template": { "metadata": { "annotations": annotations } } } })
}

use std::fmt::Debug;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::NamespaceResourceScope;
use kube_client::api::{Patch, PatchParams, PostParams, WatchParams};
use kube_client::{Api, Client};
use kube_core::Resource;
use serde::de::DeserializeOwned;

use super::{ConfigMapFeed, ConfigMaps, Workload, WorkloadKind, Workloads};
use crate::Error;

/// [`ConfigMaps`] and [`Workloads`] backed by the apiserver.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        }
    }
}

#[async_trait]
impl ConfigMaps for KubeCluster {
    async fn get(&self, namespace: &str, name: &str) -> kube_client::Result<Option<ConfigMap>> {
        self.config_maps(namespace).get_opt(name).await
    }

    async fn create(&self, namespace: &str, config_map: &ConfigMap) -> kube_client::Result<()> {
        self.config_maps(namespace)
            .create(&PostParams::default(), config_map)
            .await?;
        Ok(())
    }

    async fn update(&self, namespace: &str, config_map: &ConfigMap) -> kube_client::Result<()> {
        let name = config_map.metadata.name.as_deref().unwrap_or_default();
        self.config_maps(namespace)
            .replace(name, &PostParams::default(), config_map)
            .await?;
        Ok(())
    }

    async fn watch(&self, namespace: &str, name: &str) -> kube_client::Result<ConfigMapFeed> {
        let params = WatchParams::default().fields(&format!("metadata.name={name}"));
        let feed = self.config_maps(namespace).watch(&params, "0").await?;
        Ok(feed.boxed())
    }
}

#[async_trait]
impl Workloads for KubeCluster {
    async fn get(&self, kind: &str, name: &str, namespace: &str) -> crate::Result<Workload> {
        let kind: WorkloadKind = kind.parse()?;
        let client = self.client.clone();
        let pod_template = match kind {
            WorkloadKind::Deployment => Api::<Deployment>::namespaced(client, namespace)
                .get(name)
                .await?
                .spec
                .map(|spec| spec.template),
            WorkloadKind::ReplicaSet => Api::<ReplicaSet>::namespaced(client, namespace)
                .get(name)
                .await?
                .spec
                .and_then(|spec| spec.template),
            WorkloadKind::StatefulSet => Api::<StatefulSet>::namespaced(client, namespace)
                .get(name)
                .await?
                .spec
                .map(|spec| spec.template),
        };
        let pod_template = pod_template.ok_or_else(|| Error::MissingTemplate {
            kind: kind.to_string(),
            name: name.to_owned(),
            namespace: namespace.to_owned(),
        })?;
        Ok(Workload {
            kind,
            name: name.to_owned(),
            namespace: namespace.to_owned(),
            pod_template,
        })
    }

    async fn patch(&self, workload: &Workload, patch: &serde_json::Value) -> crate::Result<()> {
        let client = self.client.clone();
        match workload.kind {
            WorkloadKind::Deployment => patch_as::<Deployment>(client, workload, patch).await,
            WorkloadKind::ReplicaSet => patch_as::<ReplicaSet>(client, workload, patch).await,
            WorkloadKind::StatefulSet => patch_as::<StatefulSet>(client, workload, patch).await,
        }
    }
}

async fn patch_as<K>(
    client: Client,
    workload: &Workload,
    patch: &serde_json::Value,
) -> crate::Result<()>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    K::DynamicType: Default,
{
    Api::<K>::namespaced(client, &workload.namespace)
        .patch(&workload.name, &PatchParams::default(), &Patch::Strategic(patch))
        .await?;
    Ok(())
}

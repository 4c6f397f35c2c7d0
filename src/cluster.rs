//! The parts of the cluster API the watcher talks to.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::{ConfigMap, PodTemplateSpec};
use kube_core::WatchEvent;

use crate::Error;

mod client;
pub use client::KubeCluster;

/// Raw change feed of a single ConfigMap. It ends whenever the server closes the watch.
pub type ConfigMapFeed = BoxStream<'static, kube_client::Result<WatchEvent<ConfigMap>>>;

/// Namespaced ConfigMap access. An empty namespace addresses all namespaces.
#[async_trait]
pub trait ConfigMaps: Send + Sync {
    /// Returns `None` if the ConfigMap does not exist.
    async fn get(&self, namespace: &str, name: &str) -> kube_client::Result<Option<ConfigMap>>;

    async fn create(&self, namespace: &str, config_map: &ConfigMap) -> kube_client::Result<()>;

    async fn update(&self, namespace: &str, config_map: &ConfigMap) -> kube_client::Result<()>;

    async fn watch(&self, namespace: &str, name: &str) -> kube_client::Result<ConfigMapFeed>;
}

/// Lookup and patching of the workloads that agents are injected into.
#[async_trait]
pub trait Workloads: Send + Sync {
    async fn get(&self, kind: &str, name: &str, namespace: &str) -> crate::Result<Workload>;

    /// Applies `patch` as a strategic merge patch.
    async fn patch(&self, workload: &Workload, patch: &serde_json::Value) -> crate::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    Deployment,
    ReplicaSet,
    StatefulSet,
}

impl WorkloadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::ReplicaSet => "ReplicaSet",
            Self::StatefulSet => "StatefulSet",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Deployment" => Ok(Self::Deployment),
            "ReplicaSet" => Ok(Self::ReplicaSet),
            "StatefulSet" => Ok(Self::StatefulSet),
            _ => Err(Error::UnsupportedKind(s.to_owned())),
        }
    }
}

/// A resolved workload together with its pod template at lookup time.
#[derive(Debug, Clone, PartialEq)]
pub struct Workload {
    pub kind: WorkloadKind,
    pub name: String,
    pub namespace: String,
    pub pod_template: PodTemplateSpec,
}

//! The per-workload agent configuration stored in the agents ConfigMap.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Name of the ConfigMap that holds one entry per workload.
pub const CONFIG_MAP: &str = "telepresence-agents";

/// Reserved ConfigMap key holding the injector-wide [`InjectorConfig`].
pub const INJECTOR_KEY: &str = "agent-injector";

/// Prefix of the annotations written by this crate.
pub const DOMAIN_PREFIX: &str = "telepresence.getambassador.io/";

/// Sidecar configuration for one workload.
///
/// `create` marks a placeholder: nothing has been generated for the workload yet,
/// so the watcher must generate the real config before anything can be rolled out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub agent_name: String,
    pub namespace: String,
    pub workload_name: String,
    pub workload_kind: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub create: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub agent_image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub manager_host: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub manager_port: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_level: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<AgentContainer>,
}

/// An app container that the agent intercepts traffic for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentContainer {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub env_prefix: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mount_point: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub intercepts: Vec<Intercept>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intercept {
    pub service_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_port_name: String,
    pub service_port: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container_port_name: String,
    pub container_port: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub protocol: String,
}

/// Injector-wide settings stored under [`INJECTOR_KEY`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectorConfig {
    #[serde(default)]
    pub namespaced: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
}

fn is_zero(port: &u16) -> bool {
    *port == 0
}

pub fn decode<T: DeserializeOwned>(value: &str) -> Result<T, serde_yaml::Error> {
    serde_yaml::from_str(value)
}

pub fn encode<T: Serialize>(value: &T) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(value)
}

impl AgentConfig {
    /// A placeholder asking the watcher to generate the config for a workload.
    pub fn placeholder(
        workload_kind: impl Into<String>,
        workload_name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        let workload_name = workload_name.into();
        Self {
            agent_name: workload_name.clone(),
            namespace: namespace.into(),
            workload_name,
            workload_kind: workload_kind.into(),
            create: true,
            ..Self::default()
        }
    }
}

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PodTemplateSpec;

use crate::agent::AgentConfig;
use crate::cluster::Workload;
use crate::Result;

/// Produces the agent config for a workload that only has a placeholder entry.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, workload: &Workload, pod_template: &PodTemplateSpec)
        -> Result<AgentConfig>;
}

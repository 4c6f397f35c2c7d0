use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("kube error: {0}")]
    Kube(#[from] kube_client::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to decode ConfigMap entry {key:?} into an agent config: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("unable to get ConfigMap {name}: {source}")]
    GetConfigMap {
        name: String,
        #[source]
        source: kube_client::Error,
    },

    #[error("unable to get {kind} {name}.{namespace}: {source}")]
    Workload {
        kind: String,
        name: String,
        namespace: String,
        #[source]
        source: Box<Error>,
    },

    #[error("unsupported workload kind {0:?}")]
    UnsupportedKind(String),

    #[error("{kind} {name}.{namespace} has no pod template")]
    MissingTemplate {
        kind: String,
        name: String,
        namespace: String,
    },

    #[error("failed to generate agent config: {0}")]
    Generate(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

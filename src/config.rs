use crate::agent::{CONFIG_MAP, DOMAIN_PREFIX, INJECTOR_KEY};

/// Parameters for [`ConfigWatcher`](crate::ConfigWatcher).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Name of the ConfigMap holding the agent configs in each namespace.
    pub config_map: String,
    /// ConfigMap key reserved for injector-wide settings. Never dispatched.
    pub injector_key: String,
    /// Pod template annotation bumped to force a rollout.
    pub restart_annotation: String,
    /// Namespaces to watch. Empty means one cluster-wide watch.
    pub namespaces: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_map: CONFIG_MAP.to_owned(),
            injector_key: INJECTOR_KEY.to_owned(),
            restart_annotation: format!("{DOMAIN_PREFIX}restartedAt"),
            namespaces: Vec::new(),
        }
    }
}

impl Config {
    pub fn with_namespaces<I>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.namespaces = namespaces.into_iter().map(Into::into).collect();
        self
    }

    /// The namespaces that get their own watch task; `""` stands for all of them.
    pub(crate) fn watched_namespaces(&self) -> Vec<String> {
        if self.namespaces.is_empty() {
            vec![String::new()]
        } else {
            self.namespaces.clone()
        }
    }
}

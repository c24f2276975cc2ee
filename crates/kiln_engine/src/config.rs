//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Settings that shape the system overlay and the pod-bearing transforms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Prefix for bookkeeping labels and annotations, e.g. `kiln.io/managed-by`.
    pub label_domain: String,
    /// Registry hosts whose images are rewritten to the project's registry.
    pub internal_registries: Vec<String>,
    /// Directory under which non-standard log collection configs are mounted.
    pub log_config_mount_path: String,
    /// Pull secret added to pod specs when the namespace has one.
    pub image_pull_secret: String,
    /// Upper bound on namespaces compiled at once.
    pub max_parallel_namespaces: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            label_domain: "kiln.io".to_string(),
            internal_registries: vec!["registry.internal".to_string()],
            log_config_mount_path: "/etc/kiln/log-collection".to_string(),
            image_pull_secret: "kiln-registry-secret".to_string(),
            max_parallel_namespaces: 4,
        }
    }
}

impl EngineConfig {
    /// Read engine settings from the `engine` section of a workspace file.
    pub fn from_yaml(value: Option<serde_yaml::Value>) -> Result<Self, serde_yaml::Error> {
        match value {
            Some(v) => serde_yaml::from_value(v),
            None => Ok(Self::default()),
        }
    }

    pub fn label(&self, name: &str) -> String {
        format!("{}/{}", self.label_domain, name)
    }

    pub fn with_internal_registry(mut self, host: impl Into<String>) -> Self {
        self.internal_registries.push(host.into());
        self
    }

    pub fn is_internal_registry(&self, host: &str) -> bool {
        self.internal_registries.iter().any(|r| r == host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml: serde_yaml::Value =
            serde_yaml::from_str("label_domain: acme.dev\nmax_parallel_namespaces: 2").unwrap();
        let config = EngineConfig::from_yaml(Some(yaml)).unwrap();
        assert_eq!(config.label("managed-by"), "acme.dev/managed-by");
        assert_eq!(config.max_parallel_namespaces, 2);
        assert!(config.is_internal_registry("registry.internal"));
    }
}

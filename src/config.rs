//! Provisioner configuration.
//!
//! Settings come from an optional YAML file, with every field defaulted, and
//! from command-line flags layered on top in `main.rs`. Operator channels are
//! read from the environment once, when the config is built:
//!
//! | Variable | Default |
//! |---|---|
//! | `DBAAS_VM_OP_CHANNEL` | `stable-v0` |
//! | `DBAAS_PXC_OP_CHANNEL` | `stable-v1` |
//! | `DBAAS_PSMDB_OP_CHANNEL` | `stable-v1` |
//! | `DBAAS_DBAAS_OP_CHANNEL` | `stable-v0` |
//!
//! An empty variable counts as unset.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::poll::PollConfig;
use crate::retry::RetryConfig;
use crate::Error;

/// Environment variable overriding the VictoriaMetrics operator channel
pub const VM_CHANNEL_ENV: &str = "DBAAS_VM_OP_CHANNEL";
/// Environment variable overriding the PXC operator channel
pub const PXC_CHANNEL_ENV: &str = "DBAAS_PXC_OP_CHANNEL";
/// Environment variable overriding the PSMDB operator channel
pub const PSMDB_CHANNEL_ENV: &str = "DBAAS_PSMDB_OP_CHANNEL";
/// Environment variable overriding the DBaaS operator channel
pub const DBAAS_CHANNEL_ENV: &str = "DBAAS_DBAAS_OP_CHANNEL";

/// Default location of the bundled manifests
pub const DEFAULT_MANIFESTS_DIR: &str = "/manifests";

/// Top-level provisioner configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    /// Kubeconfig path; `None` uses the kube client defaults
    pub kubeconfig: Option<PathBuf>,
    /// Install OLM before the operators
    pub install_olm: bool,
    /// Directory holding the OLM and monitoring manifests
    pub manifests_dir: PathBuf,
    /// Namespace the operators are installed into
    pub namespace: String,
    /// Operator group created in `namespace`
    pub operator_group: String,
    /// Catalog source the subscriptions point at
    pub catalog_source: String,
    /// Namespace of the catalog source (also the OLM namespace)
    pub catalog_source_namespace: String,
    /// Wait for each operator's CSV to succeed after approval
    pub wait_for_completion: bool,
    /// Subscription channels per operator
    pub channels: ChannelConfig,
    /// Monitoring settings
    pub monitoring: MonitoringConfig,
    /// Poll interval and deadline for install waits
    pub poll: PollConfig,
    /// Retry policy for monitoring manifests
    pub retry: RetryConfig,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            install_olm: true,
            manifests_dir: PathBuf::from(DEFAULT_MANIFESTS_DIR),
            namespace: "default".to_string(),
            operator_group: "percona-operators-group".to_string(),
            catalog_source: "percona-dbaas-catalog".to_string(),
            catalog_source_namespace: crate::OLM_NAMESPACE.to_string(),
            wait_for_completion: false,
            channels: ChannelConfig::default(),
            monitoring: MonitoringConfig::default(),
            poll: PollConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl ProvisionerConfig {
    /// Parse a YAML config document; missing fields take their defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        serde_yaml::from_str(yaml).map_err(|e| Error::config(format!("invalid config: {}", e)))
    }

    /// Load a config file, then apply channel overrides from the environment.
    pub async fn load(path: &Path) -> Result<Self, Error> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_yaml(&content)?;
        config.channels = config.channels.with_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Defaults plus channel overrides from the environment
    pub fn from_env() -> Self {
        Self {
            channels: ChannelConfig::from_env(),
            ..Self::default()
        }
    }
}

/// Subscription channel for each provisioned operator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// VictoriaMetrics operator channel
    pub victoria_metrics: String,
    /// Percona XtraDB Cluster operator channel
    pub pxc: String,
    /// Percona Server for MongoDB operator channel
    pub psmdb: String,
    /// DBaaS operator channel
    pub dbaas: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            victoria_metrics: "stable-v0".to_string(),
            pxc: "stable-v1".to_string(),
            psmdb: "stable-v1".to_string(),
            dbaas: "stable-v0".to_string(),
        }
    }
}

impl ChannelConfig {
    /// Defaults overridden by the `DBAAS_*_OP_CHANNEL` environment variables
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Override channels from `lookup`; empty values are ignored.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let fields = [
            (VM_CHANNEL_ENV, &mut self.victoria_metrics),
            (PXC_CHANNEL_ENV, &mut self.pxc),
            (PSMDB_CHANNEL_ENV, &mut self.psmdb),
            (DBAAS_CHANNEL_ENV, &mut self.dbaas),
        ];
        for (key, field) in fields {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *field = value;
            }
        }
        self
    }
}

/// Monitoring provisioning settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Provision the monitoring stack after the operators
    pub enabled: bool,
    /// PMM server connection
    pub pmm: PmmConfig,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pmm: PmmConfig::default(),
        }
    }
}

/// PMM server endpoint and admin credentials.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PmmConfig {
    /// Base URL, e.g. `https://pmm.example.com`
    pub endpoint: String,
    /// Admin user name
    pub username: String,
    /// Admin password
    pub password: String,
}

/// Serialize a `Duration` as whole seconds.
pub mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as seconds
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    /// Deserialize from seconds
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    #[test]
    fn defaults_match_the_percona_catalog_layout() {
        let config = ProvisionerConfig::default();
        assert!(config.install_olm);
        assert!(config.monitoring.enabled);
        assert!(!config.wait_for_completion);
        assert_eq!(config.namespace, "default");
        assert_eq!(config.operator_group, "percona-operators-group");
        assert_eq!(config.catalog_source, "percona-dbaas-catalog");
        assert_eq!(config.catalog_source_namespace, "olm");
        assert_eq!(config.manifests_dir, PathBuf::from("/manifests"));
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = r#"
install_olm: false
monitoring:
  pmm:
    endpoint: https://pmm.local
    username: admin
poll:
  timeout: 60
retry:
  max_attempts: 5
"#;
        let config = ProvisionerConfig::from_yaml(yaml).unwrap();
        assert!(!config.install_olm);
        assert!(config.monitoring.enabled);
        assert_eq!(config.monitoring.pmm.endpoint, "https://pmm.local");
        assert_eq!(config.monitoring.pmm.password, "");
        assert_eq!(config.poll.timeout, Duration::from_secs(60));
        assert_eq!(config.poll.interval, Duration::from_secs(1));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.delay, Duration::from_secs(10));
        assert_eq!(config.channels, ChannelConfig::default());
    }

    #[test]
    fn invalid_yaml_is_a_config_error() {
        let err = ProvisionerConfig::from_yaml("install_olm: [").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    // ==========================================================================
    // Story: channel overrides come from the environment, empty means unset
    // ==========================================================================

    #[test]
    fn channel_overrides_replace_defaults() {
        let env: HashMap<&str, &str> = [
            (PXC_CHANNEL_ENV, "fast-v1"),
            (DBAAS_CHANNEL_ENV, "candidate"),
        ]
        .into_iter()
        .collect();

        let channels =
            ChannelConfig::default().with_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(channels.pxc, "fast-v1");
        assert_eq!(channels.dbaas, "candidate");
        assert_eq!(channels.victoria_metrics, "stable-v0");
        assert_eq!(channels.psmdb, "stable-v1");
    }

    #[test]
    fn empty_channel_override_is_ignored() {
        let channels = ChannelConfig::default().with_overrides(|k| {
            (k == VM_CHANNEL_ENV).then(String::new)
        });
        assert_eq!(channels.victoria_metrics, "stable-v0");
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let yaml = serde_yaml::to_string(&PollConfig::default()).unwrap();
        assert!(yaml.contains("interval: 1"));
        assert!(yaml.contains("timeout: 300"));
    }
}

//! Top-level provisioning sequence
//!
//! One pass, no reconciliation: OLM (optional), the VictoriaMetrics, PXC,
//! PSMDB and DBaaS operators in that order, then monitoring (optional). The
//! first failing step aborts the run; nothing already applied is rolled back.

use std::sync::Arc;

use tracing::{error, info};

use crate::config::ProvisionerConfig;
use crate::connector::Connector;
use crate::install::{InstallOperatorRequest, OperatorInstaller};
use crate::manifests::ManifestSource;
use crate::monitoring::{MonitoringProvisioner, PmmClient};
use crate::Error;

/// VictoriaMetrics operator package
pub const VICTORIA_METRICS_OPERATOR: &str = "victoriametrics-operator";
/// Percona XtraDB Cluster operator package
pub const PXC_OPERATOR: &str = "percona-xtradb-cluster-operator";
/// Percona Server for MongoDB operator package
pub const PSMDB_OPERATOR: &str = "percona-server-mongodb-operator";
/// DBaaS operator package
pub const DBAAS_OPERATOR: &str = "dbaas-operator";

/// Runs the provisioning sequence against one cluster.
pub struct Provisioner {
    config: ProvisionerConfig,
    installer: OperatorInstaller,
    monitoring: MonitoringProvisioner,
    manifests: Arc<dyn ManifestSource>,
}

impl Provisioner {
    /// Create a provisioner sharing `connector` between all steps
    pub fn new(
        config: ProvisionerConfig,
        connector: Arc<Connector>,
        manifests: Arc<dyn ManifestSource>,
    ) -> Self {
        let installer = OperatorInstaller::new(connector.clone(), config.poll);
        let monitoring = MonitoringProvisioner::new(
            connector,
            manifests.clone(),
            &config.namespace,
            config.retry.clone(),
        );
        Self {
            config,
            installer,
            monitoring,
            manifests,
        }
    }

    /// The four operator installs, in provisioning order
    pub fn operator_requests(&self) -> Vec<InstallOperatorRequest> {
        let channels = &self.config.channels;
        [
            (VICTORIA_METRICS_OPERATOR, &channels.victoria_metrics),
            (PXC_OPERATOR, &channels.pxc),
            (PSMDB_OPERATOR, &channels.psmdb),
            (DBAAS_OPERATOR, &channels.dbaas),
        ]
        .into_iter()
        .map(|(name, channel)| InstallOperatorRequest {
            namespace: self.config.namespace.clone(),
            name: name.to_string(),
            operator_group: self.config.operator_group.clone(),
            catalog_source: self.config.catalog_source.clone(),
            catalog_source_namespace: self.config.catalog_source_namespace.clone(),
            channel: channel.clone(),
            starting_csv: None,
            wait_for_completion: self.config.wait_for_completion,
        })
        .collect()
    }

    /// Provision OLM, the operators and monitoring.
    pub async fn provision_cluster(&self) -> Result<(), Error> {
        info!("started provisioning the cluster");

        if self.config.install_olm {
            info!("installing Operator Lifecycle Manager");
            self.installer
                .install_olm(self.manifests.as_ref(), &self.config.catalog_source_namespace)
                .await
                .inspect_err(|e| error!(error = %e, "failed installing OLM"))?;
        }

        for request in self.operator_requests() {
            info!(operator = %request.name, channel = %request.channel, "installing operator");
            self.installer
                .install_operator(&request)
                .await
                .inspect_err(|e| error!(operator = %request.name, error = %e, "failed installing operator"))?;
            info!(operator = %request.name, "operator installed");
        }

        if self.config.monitoring.enabled {
            info!("setting up monitoring");
            self.provision_pmm().await?;
        }

        info!("cluster provisioned");
        Ok(())
    }

    /// Mint a PMM service account key and provision monitoring with it.
    ///
    /// Returns the name of the credentials secret.
    pub async fn provision_pmm(&self) -> Result<String, Error> {
        let pmm = &self.config.monitoring.pmm;
        if pmm.endpoint.is_empty() {
            return Err(Error::config("monitoring.pmm.endpoint is required"));
        }

        let account = format!("dbaas-service-account-{}", rand::random::<u32>());
        let token = PmmClient::new(pmm.clone())?
            .create_admin_token(&account, None)
            .await?;
        self.monitoring
            .provision_monitoring(&account, &token, &pmm.endpoint)
            .await
    }

    /// Remove the monitoring manifests
    pub async fn cleanup_monitoring(&self) -> Result<(), Error> {
        self.monitoring.cleanup_monitoring().await
    }

    /// Approve the pending install plan of one of the provisioned operators
    pub async fn upgrade_operator(&self, name: &str) -> Result<(), Error> {
        self.installer
            .upgrade_operator(&self.config.namespace, name)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use crate::connector::MockPlatformClient;
    use crate::crd::{OperatorGroup, OperatorGroupSpec};
    use crate::install::tests::{install_plan, subscription_with, CallLog};
    use crate::manifests::MemoryManifestSource;

    fn config() -> ProvisionerConfig {
        let mut config = ProvisionerConfig {
            install_olm: false,
            ..Default::default()
        };
        config.monitoring.enabled = false;
        config
    }

    fn provisioner(config: ProvisionerConfig, mock: MockPlatformClient) -> Provisioner {
        Provisioner::new(
            config,
            Arc::new(Connector::new(Arc::new(mock))),
            Arc::new(MemoryManifestSource::new()),
        )
    }

    /// Every operator resolves to a pending plan at once; subscription
    /// creations are logged, and `fail_on` makes that one fail.
    fn operators_mock(log: &CallLog, fail_on: Option<&'static str>) -> MockPlatformClient {
        let mut mock = MockPlatformClient::new();
        mock.expect_get_operator_group().returning(|ns, name| {
            let mut group = OperatorGroup::new(name, OperatorGroupSpec::default());
            group.metadata.namespace = Some(ns.to_string());
            Ok(Some(group))
        });
        let l = log.clone();
        mock.expect_create_subscription().returning(move |sub| {
            let name = sub.spec.name.clone();
            l.push(format!(
                "{} {}",
                name,
                sub.spec.channel.as_deref().unwrap_or_default()
            ));
            if fail_on == Some(name.as_str()) {
                return Err(Error::internal_with_context("apply", "conflict"));
            }
            Ok(sub.clone())
        });
        mock.expect_get_subscription().returning(|ns, name| {
            Ok(Some(subscription_with(ns, name, Some("install-1"), None)))
        });
        mock.expect_get_install_plan()
            .returning(|ns, name| Ok(install_plan(ns, name, false)));
        mock.expect_update_install_plan()
            .returning(|_, plan| Ok(plan.clone()));
        mock
    }

    // ==========================================================================
    // Story: the four operators are installed in order on their own channels
    // ==========================================================================

    #[tokio::test(start_paused = true)]
    async fn operators_install_in_order_with_configured_channels() {
        let log = CallLog::default();
        let mut config = config();
        config.channels = ChannelConfig::default().with_overrides(|key| {
            (key == crate::config::PXC_CHANNEL_ENV).then(|| "fast-v1".to_string())
        });

        provisioner(config, operators_mock(&log, None))
            .provision_cluster()
            .await
            .unwrap();

        assert_eq!(
            log.entries(),
            [
                "victoriametrics-operator stable-v0",
                "percona-xtradb-cluster-operator fast-v1",
                "percona-server-mongodb-operator stable-v1",
                "dbaas-operator stable-v0",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn first_failure_aborts_the_sequence() {
        let log = CallLog::default();
        let err = provisioner(config(), operators_mock(&log, Some(PXC_OPERATOR)))
            .provision_cluster()
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Install { .. }));
        assert!(err.to_string().contains(PXC_OPERATOR));
        assert_eq!(log.entries().len(), 2);
    }

    #[tokio::test]
    async fn monitoring_without_endpoint_is_a_config_error() {
        let mut config = config();
        config.monitoring.enabled = true;

        let err = provisioner(config, MockPlatformClient::new())
            .provision_pmm()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn requests_carry_shared_settings() {
        let mut config = config();
        config.namespace = "dbaas".to_string();
        config.wait_for_completion = true;

        let requests = provisioner(config, MockPlatformClient::new()).operator_requests();
        assert_eq!(requests.len(), 4);
        assert!(requests.iter().all(|r| r.namespace == "dbaas"
            && r.operator_group == "percona-operators-group"
            && r.catalog_source == "percona-dbaas-catalog"
            && r.catalog_source_namespace == "olm"
            && r.wait_for_completion));
        assert_eq!(requests[3].name, DBAAS_OPERATOR);
    }
}

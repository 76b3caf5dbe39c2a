//! OLM bootstrap
//!
//! Installs OLM itself from the bundled manifests when the cluster does not
//! have it yet, then walks every subscription those manifests declare through
//! the install state machine so OLM's own components come up.

use tracing::info;

use super::{InstallRun, InstallState, ObjectKey, OperatorInstaller};
use crate::crd::{Approval, OLM_GROUP};
use crate::manifest::{decode_resources, filter_resources, is_kind, ManifestResource};
use crate::manifests::{ManifestSource, OLM_CRDS, OLM_MANIFEST, PERCONA_CATALOG};
use crate::Error;

/// Deployment whose presence means OLM is installed
pub const OLM_OPERATOR_DEPLOYMENT: &str = "olm-operator";

/// OLM catalog operator deployment
pub const CATALOG_OPERATOR_DEPLOYMENT: &str = "catalog-operator";

/// Package server deployment, last to come up
pub const PACKAGESERVER_DEPLOYMENT: &str = "packageserver";

impl OperatorInstaller {
    /// Install OLM into `olm_namespace` unless it is already present.
    ///
    /// Presence is decided by the `olm-operator` deployment existing; its
    /// health is not checked.
    pub async fn install_olm(
        &self,
        manifests: &dyn ManifestSource,
        olm_namespace: &str,
    ) -> Result<(), Error> {
        if self
            .connector
            .get_deployment(olm_namespace, OLM_OPERATOR_DEPLOYMENT)
            .await?
            .is_some()
        {
            info!(namespace = olm_namespace, "OLM already installed");
            return Ok(());
        }

        info!(namespace = olm_namespace, "installing OLM");
        let crds = manifests.read(OLM_CRDS).await?;
        let olm = manifests.read(OLM_MANIFEST).await?;
        let catalog = manifests.read(PERCONA_CATALOG).await?;

        for (path, bytes) in [
            (OLM_CRDS, &crds),
            (OLM_MANIFEST, &olm),
            (PERCONA_CATALOG, &catalog),
        ] {
            self.connector.apply_manifest(bytes).await.map_err(|e| {
                Error::internal_with_context("install_olm", format!("cannot apply {}: {}", path, e))
            })?;
            info!(manifest = path, "applied");
        }

        for deployment in [OLM_OPERATOR_DEPLOYMENT, CATALOG_OPERATOR_DEPLOYMENT] {
            self.wait_for_rollout(&ObjectKey::new(olm_namespace, deployment))
                .await?;
        }

        let mut resources = decode_resources(&crds)?;
        resources.extend(decode_resources(&olm)?);
        let subscriptions = filter_resources(&resources, is_kind(OLM_GROUP, "v1alpha1", "Subscription"));

        for subscription in &subscriptions {
            let key = ObjectKey::new(
                subscription.namespace.as_deref().ok_or_else(|| {
                    Error::precondition(
                        "install_olm",
                        format!("subscription {} has no namespace", subscription.name),
                    )
                })?,
                &subscription.name,
            );
            self.run(&InstallRun::bootstrap(key), bootstrap_start(subscription)?)
                .await?;
        }

        self.wait_for_rollout(&ObjectKey::new(olm_namespace, PACKAGESERVER_DEPLOYMENT))
            .await?;
        info!(namespace = olm_namespace, "OLM installed");
        Ok(())
    }
}

/// Manual subscriptions need their plan approved; automatic ones only need
/// the CSV watched. An absent `installPlanApproval` means Automatic.
fn bootstrap_start(subscription: &ManifestResource) -> Result<InstallState, Error> {
    let approval = match subscription.value.pointer("/spec/installPlanApproval") {
        None => Approval::default(),
        Some(value) => serde_json::from_value::<Approval>(value.clone()).map_err(|_| {
            Error::manifest(format!(
                "subscription {} has invalid installPlanApproval {}",
                subscription.name, value
            ))
        })?,
    };

    Ok(match approval {
        Approval::Manual => InstallState::SubscriptionCreated,
        Approval::Automatic => InstallState::InstallPlanApproved,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::MockPlatformClient;
    use crate::install::tests::{
        csv_in_phase, install_plan, installer, rolled_out, subscription_with, CallLog,
    };
    use crate::manifests::MemoryManifestSource;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const CRDS: &str = r#"
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: subscriptions.operators.coreos.com
"#;

    const OLM: &str = r#"
apiVersion: v1
kind: Namespace
metadata:
  name: olm
---
apiVersion: operators.coreos.com/v1alpha1
kind: Subscription
metadata:
  name: packageserver-manual
  namespace: olm
spec:
  source: operatorhubio-catalog
  sourceNamespace: olm
  name: packageserver
  installPlanApproval: Manual
---
apiVersion: operators.coreos.com/v1alpha1
kind: Subscription
metadata:
  name: packageserver-auto
  namespace: olm
spec:
  source: operatorhubio-catalog
  sourceNamespace: olm
  name: packageserver
"#;

    const CATALOG: &str = r#"
apiVersion: operators.coreos.com/v1alpha1
kind: CatalogSource
metadata:
  name: percona-dbaas-catalog
  namespace: olm
"#;

    fn bundled() -> MemoryManifestSource {
        MemoryManifestSource::new()
            .with_file(OLM_CRDS, CRDS)
            .with_file(OLM_MANIFEST, OLM)
            .with_file(PERCONA_CATALOG, CATALOG)
    }

    // ==========================================================================
    // Story: a cluster without OLM gets it installed and its subscriptions
    // driven to completion
    // ==========================================================================

    #[tokio::test(start_paused = true)]
    async fn bootstrap_applies_waits_and_drives_subscriptions_in_order() {
        let log = CallLog::default();
        let mut mock = MockPlatformClient::new();

        let probed = Arc::new(AtomicU32::new(0));
        let l = log.clone();
        mock.expect_get_deployment().returning(move |ns, name| {
            // First lookup is the presence probe for olm-operator.
            if probed.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(None);
            }
            l.push(format!("rollout {}/{}", ns, name));
            Ok(Some(rolled_out(name)))
        });

        let l = log.clone();
        mock.expect_apply_manifest().returning(move |bytes| {
            let text = String::from_utf8_lossy(bytes);
            let which = if text.contains("CustomResourceDefinition") {
                "crds"
            } else if text.contains("CatalogSource") {
                "catalog"
            } else {
                "olm"
            };
            l.push(format!("apply {}", which));
            Ok(())
        });

        mock.expect_get_subscription().returning(|ns, name| {
            let plan = format!("plan-{}", name);
            let csv = format!("csv-{}", name);
            Ok(Some(subscription_with(ns, name, Some(&plan), Some(&csv))))
        });
        mock.expect_get_install_plan()
            .returning(|ns, name| Ok(install_plan(ns, name, false)));
        let l = log.clone();
        mock.expect_update_install_plan().returning(move |ns, plan| {
            l.push(format!(
                "approve {}/{}",
                ns,
                plan.metadata.name.as_deref().unwrap_or_default()
            ));
            Ok(plan.clone())
        });
        let l = log.clone();
        mock.expect_get_cluster_service_version()
            .returning(move |ns, name| {
                l.push(format!("csv {}/{}", ns, name));
                Ok(Some(csv_in_phase(name, "Succeeded")))
            });

        installer(mock).install_olm(&bundled(), "olm").await.unwrap();

        assert_eq!(
            log.entries(),
            [
                "apply crds",
                "apply olm",
                "apply catalog",
                "rollout olm/olm-operator",
                "rollout olm/catalog-operator",
                "approve olm/plan-packageserver-manual",
                "csv olm/csv-packageserver-manual",
                "csv olm/csv-packageserver-auto",
                "rollout olm/packageserver",
            ]
        );
    }

    // ==========================================================================
    // Story: an existing OLM install is left alone
    // ==========================================================================

    #[tokio::test]
    async fn existing_olm_operator_short_circuits() {
        let mut mock = MockPlatformClient::new();
        mock.expect_get_deployment()
            .times(1)
            .returning(|_, name| Ok(Some(rolled_out(name))));
        mock.expect_apply_manifest().never();

        installer(mock)
            .install_olm(&MemoryManifestSource::new(), "olm")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_manifest_fails_before_any_apply() {
        let mut mock = MockPlatformClient::new();
        mock.expect_get_deployment().returning(|_, _| Ok(None));
        mock.expect_apply_manifest().never();

        let source = MemoryManifestSource::new().with_file(OLM_CRDS, CRDS);
        let err = installer(mock).install_olm(&source, "olm").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn approval_mode_picks_starting_state() {
        let resources = decode_resources(OLM.as_bytes()).unwrap();
        let subs = filter_resources(&resources, is_kind(OLM_GROUP, "v1alpha1", "Subscription"));
        assert_eq!(
            bootstrap_start(&subs[0]).unwrap(),
            InstallState::SubscriptionCreated
        );
        assert_eq!(
            bootstrap_start(&subs[1]).unwrap(),
            InstallState::InstallPlanApproved
        );
    }

    #[test]
    fn unknown_approval_mode_is_a_manifest_error() {
        let subscription = ManifestResource::from_value(serde_json::json!({
            "apiVersion": "operators.coreos.com/v1alpha1",
            "kind": "Subscription",
            "metadata": { "name": "packageserver", "namespace": "olm" },
            "spec": { "installPlanApproval": "manual" },
        }))
        .unwrap();

        let err = bootstrap_start(&subscription).unwrap_err();
        assert!(matches!(err, Error::Manifest { .. }));
        assert!(err.to_string().contains("manual"));
    }
}

//! Shared handle over the Kubernetes API
//!
//! [`PlatformClient`] is the raw API surface: one method per read or write the
//! provisioner needs, implemented on kube-rs by [`KubePlatformClient`] and
//! mocked in tests. [`Connector`] wraps a client with a single coarse write
//! lock: every write holds it for the duration of one call, reads never wait
//! on it. Nothing here retries; retry policy belongs to the caller.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    ContainerStatus, Event, Node, PersistentVolume, Pod, Secret,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::version::Info;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, LogParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::Scope;
use kube::{Client, Config, Resource};
use tokio::sync::Mutex;
use tracing::{debug, info, trace};

#[cfg(test)]
use mockall::automock;

use crate::capability::{classify_storage_classes, filter_worker_nodes, ClusterType};
use crate::crd::{
    ClusterServiceVersion, DatabaseCluster, InstallPlan, OperatorGroup, OperatorGroupSpec,
    Subscription, MANAGED_BY_ANNOTATION, MANAGED_BY_VALUE, RESTART_ANNOTATION,
};
use crate::manifest::{decode_resources, ManifestResource};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{Error, FIELD_MANAGER};

/// Default connection timeout for the kube client
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for the kube client
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Deployment and container of the PXC operator
pub const PXC_OPERATOR: (&str, &str) = (
    "percona-xtradb-cluster-operator",
    "percona-xtradb-cluster-operator",
);
/// Deployment and container of the PSMDB operator
pub const PSMDB_OPERATOR: (&str, &str) = (
    "percona-server-mongodb-operator",
    "percona-server-mongodb-operator",
);
/// Deployment and container of the DBaaS operator
pub const DBAAS_OPERATOR: (&str, &str) = ("dbaas-operator-controller-manager", "manager");

/// Raw Kubernetes operations used by the provisioner.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Get a deployment, `None` if it does not exist
    async fn get_deployment(&self, namespace: &str, name: &str)
        -> Result<Option<Deployment>, Error>;

    /// List all nodes
    async fn list_nodes(&self) -> Result<Vec<Node>, Error>;

    /// List all storage classes
    async fn list_storage_classes(&self) -> Result<Vec<StorageClass>, Error>;

    /// Get an operator group, `None` if it does not exist
    async fn get_operator_group(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<OperatorGroup>, Error>;

    /// Create an operator group targeting its own namespace
    async fn create_operator_group(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<OperatorGroup, Error>;

    /// Create (or re-declare) a subscription
    async fn create_subscription(&self, subscription: &Subscription)
        -> Result<Subscription, Error>;

    /// Get a subscription, `None` if it does not exist
    async fn get_subscription(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Subscription>, Error>;

    /// List subscriptions in a namespace
    async fn list_subscriptions(&self, namespace: &str) -> Result<Vec<Subscription>, Error>;

    /// Get an install plan
    async fn get_install_plan(&self, namespace: &str, name: &str) -> Result<InstallPlan, Error>;

    /// Write back an install plan's approval
    async fn update_install_plan(
        &self,
        namespace: &str,
        plan: &InstallPlan,
    ) -> Result<InstallPlan, Error>;

    /// Get a CSV, `None` if it does not exist
    async fn get_cluster_service_version(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ClusterServiceVersion>, Error>;

    /// List CSVs in a namespace
    async fn list_cluster_service_versions(
        &self,
        namespace: &str,
    ) -> Result<Vec<ClusterServiceVersion>, Error>;

    /// Get a secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, Error>;

    /// List secrets in a namespace
    async fn list_secrets(&self, namespace: &str) -> Result<Vec<Secret>, Error>;

    /// List pods, optionally filtered by a label selector
    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: Option<String>,
    ) -> Result<Vec<Pod>, Error>;

    /// List persistent volumes
    async fn list_persistent_volumes(&self) -> Result<Vec<PersistentVolume>, Error>;

    /// List events whose involved object is `pod`
    async fn list_events(&self, namespace: &str, pod: &str) -> Result<Vec<Event>, Error>;

    /// Fetch one container's logs
    async fn get_logs(&self, namespace: &str, pod: &str, container: &str)
        -> Result<String, Error>;

    /// List database clusters in a namespace
    async fn list_database_clusters(&self, namespace: &str)
        -> Result<Vec<DatabaseCluster>, Error>;

    /// Get a database cluster
    async fn get_database_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DatabaseCluster, Error>;

    /// API server version
    async fn server_version(&self) -> Result<Info, Error>;

    /// Server-side apply a single resource
    async fn apply_resource(&self, resource: &ManifestResource) -> Result<(), Error>;

    /// Server-side apply every document of a raw manifest, in order
    async fn apply_manifest(&self, manifest: &[u8]) -> Result<(), Error>;

    /// Delete a single resource; deleting a missing resource succeeds
    async fn delete_resource(&self, resource: &ManifestResource) -> Result<(), Error>;

    /// Delete every document of a raw manifest, in order
    async fn delete_manifest(&self, manifest: &[u8]) -> Result<(), Error>;
}

/// Create a kube client from an optional kubeconfig path
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// [`PlatformClient`] backed by a kube-rs client
#[derive(Clone)]
pub struct KubePlatformClient {
    client: Client,
}

impl KubePlatformClient {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Resolve the API for a decoded resource via discovery.
    ///
    /// Namespaced kinds without a namespace land in `default`.
    async fn dynamic_api(&self, resource: &ManifestResource) -> Result<Api<DynamicObject>, Error> {
        let (ar, caps) = kube::discovery::pinned_kind(&self.client, &resource.gvk)
            .await
            .map_err(|e| {
                Error::internal_with_context(
                    "discovery",
                    format!(
                        "unknown resource type {}/{}: {}",
                        resource.api_version(),
                        resource.gvk.kind,
                        e
                    ),
                )
            })?;

        Ok(match caps.scope {
            Scope::Namespaced => {
                let ns = resource.namespace.as_deref().unwrap_or("default");
                Api::namespaced_with(self.client.clone(), ns, &ar)
            }
            Scope::Cluster => Api::all_with(self.client.clone(), &ar),
        })
    }
}

#[async_trait]
impl PlatformClient for KubePlatformClient {
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_storage_classes(&self) -> Result<Vec<StorageClass>, Error> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_operator_group(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<OperatorGroup>, Error> {
        let api: Api<OperatorGroup> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_operator_group(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<OperatorGroup, Error> {
        let api: Api<OperatorGroup> = Api::namespaced(self.client.clone(), namespace);
        let mut group = OperatorGroup::new(
            name,
            OperatorGroupSpec {
                target_namespaces: vec![namespace.to_string()],
            },
        );
        group.metadata.namespace = Some(namespace.to_string());
        Ok(api.create(&Default::default(), &group).await?)
    }

    async fn create_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<Subscription, Error> {
        let namespace = subscription.metadata.namespace.as_deref().unwrap_or("default");
        let name = subscription
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::precondition("create_subscription", "subscription has no name"))?;
        let api: Api<Subscription> = Api::namespaced(self.client.clone(), namespace);
        Ok(api
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(subscription),
            )
            .await?)
    }

    async fn get_subscription(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Subscription>, Error> {
        let api: Api<Subscription> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_subscriptions(&self, namespace: &str) -> Result<Vec<Subscription>, Error> {
        let api: Api<Subscription> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_install_plan(&self, namespace: &str, name: &str) -> Result<InstallPlan, Error> {
        let api: Api<InstallPlan> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn update_install_plan(
        &self,
        namespace: &str,
        plan: &InstallPlan,
    ) -> Result<InstallPlan, Error> {
        let name = plan
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::precondition("update_install_plan", "install plan has no name"))?;
        let api: Api<InstallPlan> = Api::namespaced(self.client.clone(), namespace);
        // Merge patch: only spec.approved is written.
        let patch = serde_json::json!({ "spec": { "approved": plan.spec.approved } });
        Ok(api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn get_cluster_service_version(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ClusterServiceVersion>, Error> {
        let api: Api<ClusterServiceVersion> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_cluster_service_versions(
        &self,
        namespace: &str,
    ) -> Result<Vec<ClusterServiceVersion>, Error> {
        let api: Api<ClusterServiceVersion> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn list_secrets(&self, namespace: &str) -> Result<Vec<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: Option<String>,
    ) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let mut params = ListParams::default();
        if let Some(selector) = label_selector.as_deref() {
            params = params.labels(selector);
        }
        Ok(api.list(&params).await?.items)
    }

    async fn list_persistent_volumes(&self) -> Result<Vec<PersistentVolume>, Error> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_events(&self, namespace: &str, pod: &str) -> Result<Vec<Event>, Error> {
        let api: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().fields(&format!("involvedObject.name={}", pod));
        Ok(api.list(&params).await?.items)
    }

    async fn get_logs(&self, namespace: &str, pod: &str, container: &str) -> Result<String, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: Some(container.to_string()),
            ..Default::default()
        };
        Ok(api.logs(pod, &params).await?)
    }

    async fn list_database_clusters(
        &self,
        namespace: &str,
    ) -> Result<Vec<DatabaseCluster>, Error> {
        let api: Api<DatabaseCluster> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_database_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DatabaseCluster, Error> {
        let api: Api<DatabaseCluster> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn server_version(&self) -> Result<Info, Error> {
        Ok(self.client.apiserver_version().await?)
    }

    async fn apply_resource(&self, resource: &ManifestResource) -> Result<(), Error> {
        let api = self.dynamic_api(resource).await?;
        api.patch(
            &resource.name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&resource.value),
        )
        .await
        .map_err(|e| {
            Error::internal_with_context(
                "apply_resource",
                format!("failed to apply {}: {}", resource.display_name(), e),
            )
        })?;
        trace!(resource = %resource.display_name(), "applied resource");
        Ok(())
    }

    async fn apply_manifest(&self, manifest: &[u8]) -> Result<(), Error> {
        for resource in decode_resources(manifest)? {
            self.apply_resource(&resource).await?;
        }
        Ok(())
    }

    async fn delete_resource(&self, resource: &ManifestResource) -> Result<(), Error> {
        let api = self.dynamic_api(resource).await?;
        match api.delete(&resource.name, &DeleteParams::default()).await {
            Ok(_) => {
                trace!(resource = %resource.display_name(), "deleted resource");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                trace!(resource = %resource.display_name(), "resource already gone");
                Ok(())
            }
            Err(e) => Err(Error::internal_with_context(
                "delete_resource",
                format!("failed to delete {}: {}", resource.display_name(), e),
            )),
        }
    }

    async fn delete_manifest(&self, manifest: &[u8]) -> Result<(), Error> {
        for resource in decode_resources(manifest)? {
            self.delete_resource(&resource).await?;
        }
        Ok(())
    }
}

/// Container states a status can be checked against
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerState {
    /// Waiting for start-up work to finish
    Waiting,
    /// Running
    Running,
    /// Ran to completion or failed
    Terminated,
}

/// Whether any of the container statuses is in `state`
pub fn is_container_in_state(statuses: &[ContainerStatus], state: ContainerState) -> bool {
    statuses.iter().any(|status| {
        status.state.as_ref().is_some_and(|s| match state {
            ContainerState::Waiting => s.waiting.is_some(),
            ContainerState::Running => s.running.is_some(),
            ContainerState::Terminated => s.terminated.is_some(),
        })
    })
}

/// Whether the node reports `condition_type` with status `True`
pub fn is_node_in_condition(node: &Node, condition_type: &str) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == condition_type && c.status == "True")
        })
}

/// Single shared handle over a [`PlatformClient`].
///
/// Writes are serialized by one lock held per call. The lock covers the
/// whole connector, so unrelated writes serialize. Reads take no lock and
/// run alongside each other and alongside writes.
pub struct Connector {
    client: Arc<dyn PlatformClient>,
    writes: Mutex<()>,
}

impl Connector {
    /// Wrap a platform client
    pub fn new(client: Arc<dyn PlatformClient>) -> Self {
        Self {
            client,
            writes: Mutex::new(()),
        }
    }

    /// Connect to the cluster named by `kubeconfig`, or the inferred one
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self, Error> {
        let client = create_client(kubeconfig).await?;
        Ok(Self::new(Arc::new(KubePlatformClient::new(client))))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a deployment, `None` if absent
    pub async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, Error> {
        self.client.get_deployment(namespace, name).await
    }

    /// List all nodes
    pub async fn list_nodes(&self) -> Result<Vec<Node>, Error> {
        self.client.list_nodes().await
    }

    /// List all storage classes
    pub async fn list_storage_classes(&self) -> Result<Vec<StorageClass>, Error> {
        self.client.list_storage_classes().await
    }

    /// Get an operator group, `None` if absent
    pub async fn get_operator_group(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<OperatorGroup>, Error> {
        self.client.get_operator_group(namespace, name).await
    }

    /// Get a subscription, `None` if absent
    pub async fn get_subscription(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Subscription>, Error> {
        self.client.get_subscription(namespace, name).await
    }

    /// List subscriptions in a namespace
    pub async fn list_subscriptions(&self, namespace: &str) -> Result<Vec<Subscription>, Error> {
        self.client.list_subscriptions(namespace).await
    }

    /// Get an install plan
    pub async fn get_install_plan(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<InstallPlan, Error> {
        self.client.get_install_plan(namespace, name).await
    }

    /// Get a CSV, `None` if absent
    pub async fn get_cluster_service_version(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ClusterServiceVersion>, Error> {
        self.client.get_cluster_service_version(namespace, name).await
    }

    /// List CSVs in a namespace
    pub async fn list_cluster_service_versions(
        &self,
        namespace: &str,
    ) -> Result<Vec<ClusterServiceVersion>, Error> {
        self.client.list_cluster_service_versions(namespace).await
    }

    /// Get a secret
    pub async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, Error> {
        self.client.get_secret(namespace, name).await
    }

    /// List secrets in a namespace
    pub async fn list_secrets(&self, namespace: &str) -> Result<Vec<Secret>, Error> {
        self.client.list_secrets(namespace).await
    }

    /// List pods matching an optional label selector
    pub async fn list_pods(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<Pod>, Error> {
        self.client
            .list_pods(namespace, label_selector.map(str::to_string))
            .await
    }

    /// List persistent volumes
    pub async fn list_persistent_volumes(&self) -> Result<Vec<PersistentVolume>, Error> {
        self.client.list_persistent_volumes().await
    }

    /// API server version
    pub async fn server_version(&self) -> Result<Info, Error> {
        self.client.server_version().await
    }

    /// Log lines of one container.
    ///
    /// Returns nothing when any of `statuses` is still waiting, since such a
    /// container has no logs yet.
    pub async fn get_logs(
        &self,
        namespace: &str,
        statuses: &[ContainerStatus],
        pod: &str,
        container: &str,
    ) -> Result<Vec<String>, Error> {
        if is_container_in_state(statuses, ContainerState::Waiting) {
            return Ok(Vec::new());
        }

        let stdout = self
            .client
            .get_logs(namespace, pod, container)
            .await
            .map_err(|e| {
                Error::internal_with_context("get_logs", format!("couldn't get logs: {}", e))
            })?;

        if stdout.is_empty() {
            return Ok(Vec::new());
        }
        Ok(stdout.split('\n').map(str::to_string).collect())
    }

    /// A pod's events, one formatted line each
    pub async fn get_events(&self, namespace: &str, pod: &str) -> Result<Vec<String>, Error> {
        let events = self.client.list_events(namespace, pod).await.map_err(|e| {
            Error::internal_with_context("get_events", format!("couldn't describe pod: {}", e))
        })?;

        Ok(events
            .iter()
            .map(|event| {
                format!(
                    "{} {}: {}",
                    event.type_.as_deref().unwrap_or("Normal"),
                    event.reason.as_deref().unwrap_or_default(),
                    event.message.as_deref().unwrap_or_default()
                )
            })
            .collect())
    }

    /// Image tag of `container` in an operator deployment
    pub async fn operator_version(
        &self,
        namespace: &str,
        deployment: &str,
        container: &str,
    ) -> Result<String, Error> {
        let found = self
            .client
            .get_deployment(namespace, deployment)
            .await?
            .ok_or_else(|| Error::not_found(format!("deployment {}/{}", namespace, deployment)))?;

        let image = found
            .spec
            .and_then(|s| s.template.spec)
            .and_then(|p| p.containers.into_iter().find(|c| c.name == container))
            .and_then(|c| c.image)
            .ok_or_else(|| {
                Error::not_found(format!("version of operator {}/{}", deployment, container))
            })?;

        image
            .rsplit_once(':')
            .map(|(_, tag)| tag.to_string())
            .ok_or_else(|| {
                Error::precondition(
                    "operator_version",
                    format!("image {} carries no version tag", image),
                )
            })
    }

    /// Version of the installed PXC operator
    pub async fn pxc_operator_version(&self, namespace: &str) -> Result<String, Error> {
        self.operator_version(namespace, PXC_OPERATOR.0, PXC_OPERATOR.1)
            .await
    }

    /// Version of the installed PSMDB operator
    pub async fn psmdb_operator_version(&self, namespace: &str) -> Result<String, Error> {
        self.operator_version(namespace, PSMDB_OPERATOR.0, PSMDB_OPERATOR.1)
            .await
    }

    /// Version of the installed DBaaS operator
    pub async fn dbaas_operator_version(&self, namespace: &str) -> Result<String, Error> {
        self.operator_version(namespace, DBAAS_OPERATOR.0, DBAAS_OPERATOR.1)
            .await
    }

    /// Name of the first storage class, [`Error::NotFound`] if there is none
    pub async fn default_storage_class_name(&self) -> Result<String, Error> {
        self.client
            .list_storage_classes()
            .await?
            .into_iter()
            .find_map(|sc| sc.metadata.name)
            .ok_or_else(|| Error::not_found("storage classes"))
    }

    /// Guess the cluster flavour from its storage classes.
    ///
    /// An empty cluster classifies as generic; only a failed listing is an
    /// error, which callers report as [`ClusterType::Unknown`].
    pub async fn cluster_type(&self) -> Result<ClusterType, Error> {
        let classes = self.client.list_storage_classes().await?;
        Ok(classify_storage_classes(&classes))
    }

    /// Nodes usable for workloads, each listed once
    pub async fn worker_nodes(&self) -> Result<Vec<Node>, Error> {
        let nodes = self.client.list_nodes().await.map_err(|e| {
            Error::internal_with_context(
                "worker_nodes",
                format!("could not get nodes of Kubernetes cluster: {}", e),
            )
        })?;
        Ok(filter_worker_nodes(nodes))
    }

    /// List database clusters
    pub async fn list_database_clusters(
        &self,
        namespace: &str,
    ) -> Result<Vec<DatabaseCluster>, Error> {
        self.client.list_database_clusters(namespace).await
    }

    /// Get a database cluster
    pub async fn get_database_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DatabaseCluster, Error> {
        self.client.get_database_cluster(namespace, name).await
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Create an operator group
    pub async fn create_operator_group(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<OperatorGroup, Error> {
        let _guard = self.writes.lock().await;
        self.client.create_operator_group(namespace, name).await
    }

    /// Create a subscription
    pub async fn create_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<Subscription, Error> {
        let _guard = self.writes.lock().await;
        self.client.create_subscription(subscription).await
    }

    /// Write back an install plan
    pub async fn update_install_plan(
        &self,
        namespace: &str,
        plan: &InstallPlan,
    ) -> Result<InstallPlan, Error> {
        let _guard = self.writes.lock().await;
        self.client.update_install_plan(namespace, plan).await
    }

    /// Declare a resource present, creating or updating it
    pub async fn apply_resource(&self, resource: &ManifestResource) -> Result<(), Error> {
        let _guard = self.writes.lock().await;
        self.client.apply_resource(resource).await
    }

    /// Declare every document of a raw manifest present
    pub async fn apply_manifest(&self, manifest: &[u8]) -> Result<(), Error> {
        let _guard = self.writes.lock().await;
        self.client.apply_manifest(manifest).await
    }

    /// Apply a raw manifest, retrying with a fixed delay.
    ///
    /// Each attempt takes the write lock on its own; the lock is not held
    /// while sleeping.
    pub async fn apply_manifest_with_retry(
        &self,
        manifest: &[u8],
        retry: &RetryConfig,
    ) -> Result<(), Error> {
        retry_with_backoff(retry, "apply manifest", || self.apply_manifest(manifest)).await
    }

    /// Delete a resource
    pub async fn delete_resource(&self, resource: &ManifestResource) -> Result<(), Error> {
        let _guard = self.writes.lock().await;
        self.client.delete_resource(resource).await
    }

    /// Delete every document of a raw manifest
    pub async fn delete_manifest(&self, manifest: &[u8]) -> Result<(), Error> {
        let _guard = self.writes.lock().await;
        self.client.delete_manifest(manifest).await
    }

    /// Create a database cluster marked as managed by PMM
    pub async fn create_database_cluster(&self, mut cluster: DatabaseCluster) -> Result<(), Error> {
        cluster.set_annotation(MANAGED_BY_ANNOTATION, MANAGED_BY_VALUE);
        let resource = ManifestResource::from_object(&cluster.for_apply())?;
        let _guard = self.writes.lock().await;
        self.client.apply_resource(&resource).await?;
        info!(cluster = %resource.name, "created database cluster");
        Ok(())
    }

    /// Apply changes to a database cluster
    pub async fn patch_database_cluster(&self, cluster: &DatabaseCluster) -> Result<(), Error> {
        let resource = ManifestResource::from_object(&cluster.for_apply())?;
        let _guard = self.writes.lock().await;
        self.client.apply_resource(&resource).await
    }

    /// Ask the DBaaS operator to restart a database cluster.
    ///
    /// The cluster must exist. Only the restart annotation is applied, so
    /// no other field changes owner.
    pub async fn restart_database_cluster(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let _guard = self.writes.lock().await;
        self.client.get_database_cluster(namespace, name).await?;
        let resource = ManifestResource::from_value(serde_json::json!({
            "apiVersion": DatabaseCluster::api_version(&()),
            "kind": DatabaseCluster::kind(&()),
            "metadata": {
                "name": name,
                "namespace": namespace,
                "annotations": { RESTART_ANNOTATION: "true" },
            },
        }))?;
        self.client.apply_resource(&resource).await?;
        debug!(namespace, cluster = name, "requested database cluster restart");
        Ok(())
    }

    /// Delete a database cluster
    pub async fn delete_database_cluster(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let _guard = self.writes.lock().await;
        let cluster = self.client.get_database_cluster(namespace, name).await?;
        let resource = ManifestResource::from_object(&cluster)?;
        self.client.delete_resource(&resource).await
    }
}

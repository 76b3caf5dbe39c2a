//! DatabaseCluster custom resource managed by the DBaaS operator

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Annotation marking clusters created through the provisioner
pub const MANAGED_BY_ANNOTATION: &str = "dbaas.percona.com/managed-by";

/// Value of [`MANAGED_BY_ANNOTATION`]
pub const MANAGED_BY_VALUE: &str = "pmm";

/// Annotation that asks the DBaaS operator to restart a cluster
pub const RESTART_ANNOTATION: &str = "dbaas.percona.com/restart";

/// Database cluster spec
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "dbaas.percona.com",
    version = "v1",
    kind = "DatabaseCluster",
    plural = "databaseclusters",
    shortname = "db",
    status = "DatabaseClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseClusterSpec {
    /// Engine: `pxc` or `psmdb`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_type: Option<String>,
    /// Engine image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_image: Option<String>,
    /// Raw engine configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_config: Option<String>,
    /// Secret holding the system users
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets_name: Option<String>,
    /// Suspend the cluster
    #[serde(default)]
    pub pause: bool,
    /// Number of database instances
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_size: Option<i32>,
    /// Per-instance resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_instance: Option<DbInstanceSpec>,
    /// Monitoring wiring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<MonitoringSpec>,
}

/// Resources for one database instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DbInstanceSpec {
    /// CPU quantity, e.g. `1`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    /// Memory quantity, e.g. `2G`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// Volume size, e.g. `25G`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size: Option<String>,
}

/// PMM monitoring settings for a cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringSpec {
    /// PMM client image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// PMM server address the client reports to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_host: Option<String>,
}

/// Observed database cluster state
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseClusterStatus {
    /// Cluster state (`initializing`, `ready`, `error`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Ready instances
    #[serde(default)]
    pub ready: i32,
    /// Desired instances
    #[serde(default)]
    pub size: i32,
    /// Connection host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Operator message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DatabaseCluster {
    /// Set an annotation, creating the map when absent
    pub fn set_annotation(&mut self, key: &str, value: &str) {
        self.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(key.to_string(), value.to_string());
    }

    /// Copy fit for a server-side apply body.
    ///
    /// The API server rejects apply bodies carrying `managedFields`, so a
    /// fetched object loses its server-populated metadata and status here.
    pub fn for_apply(&self) -> Self {
        let mut cluster = self.clone();
        let meta = &mut cluster.metadata;
        meta.managed_fields = None;
        meta.resource_version = None;
        meta.uid = None;
        meta.creation_timestamp = None;
        meta.generation = None;
        cluster.status = None;
        cluster
    }
}

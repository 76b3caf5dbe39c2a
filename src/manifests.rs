//! Bundled manifest files
//!
//! The provisioner ships its manifests as files under a root directory
//! (`/manifests` in the container image). Paths below are relative to it.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::Error;

/// OLM custom resource definitions
pub const OLM_CRDS: &str = "crds/olm/crds.yaml";

/// OLM deployments, RBAC and the packageserver subscription
pub const OLM_MANIFEST: &str = "crds/olm/olm.yaml";

/// Catalog source serving the Percona operator packages
pub const PERCONA_CATALOG: &str = "crds/olm/percona-dbaas-catalog.yaml";

/// Monitoring stack, in apply order. RBAC and scrape objects first, then
/// kube-state-metrics, then the scrape config that points at it.
pub const MONITORING_MANIFESTS: &[&str] = &[
    "crds/victoriametrics/crs/vmagent_rbac.yaml",
    "crds/victoriametrics/crs/vmnodescrape.yaml",
    "crds/victoriametrics/crs/vmpodscrape.yaml",
    "crds/victoriametrics/kube-state-metrics/service-account.yaml",
    "crds/victoriametrics/kube-state-metrics/cluster-role.yaml",
    "crds/victoriametrics/kube-state-metrics/cluster-role-binding.yaml",
    "crds/victoriametrics/kube-state-metrics/deployment.yaml",
    "crds/victoriametrics/kube-state-metrics/service.yaml",
    "crds/victoriametrics/kube-state-metrics.yaml",
];

/// Monitoring stack, in delete order
pub const MONITORING_CLEANUP_MANIFESTS: &[&str] = &[
    "crds/victoriametrics/kube-state-metrics.yaml",
    "crds/victoriametrics/kube-state-metrics/cluster-role-binding.yaml",
    "crds/victoriametrics/kube-state-metrics/cluster-role.yaml",
    "crds/victoriametrics/kube-state-metrics/deployment.yaml",
    "crds/victoriametrics/kube-state-metrics/service-account.yaml",
    "crds/victoriametrics/kube-state-metrics/service.yaml",
    "crds/victoriametrics/crs/vmagent_rbac.yaml",
    "crds/victoriametrics/crs/vmnodescrape.yaml",
    "crds/victoriametrics/crs/vmpodscrape.yaml",
];

/// Source of raw manifest bytes by relative path
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Read one manifest file
    async fn read(&self, path: &str) -> Result<Vec<u8>, Error>;
}

/// Manifests read from a directory on disk
#[derive(Clone, Debug)]
pub struct DirManifestSource {
    root: PathBuf,
}

impl DirManifestSource {
    /// Read manifests relative to `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ManifestSource for DirManifestSource {
    async fn read(&self, path: &str) -> Result<Vec<u8>, Error> {
        let full = self.root.join(path);
        tokio::fs::read(&full).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::not_found(format!("manifest {}", full.display()))
            } else {
                Error::from(e)
            }
        })
    }
}

/// Manifests held in memory, keyed by relative path
#[derive(Clone, Debug, Default)]
pub struct MemoryManifestSource {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryManifestSource {
    /// Empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file
    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }
}

#[async_trait]
impl ManifestSource for MemoryManifestSource {
    async fn read(&self, path: &str) -> Result<Vec<u8>, Error> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("manifest {}", path)))
    }
}

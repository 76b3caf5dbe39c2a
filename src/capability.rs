//! Cluster capability detection
//!
//! Two pure classifiers over API snapshots: the cluster flavour guessed from
//! storage class provisioners, and the subset of nodes that can run
//! workloads. The [`Connector`](crate::connector::Connector) feeds them.

use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::storage::v1::StorageClass;

/// Taints that keep a node out of the worker pool, with the effect that must
/// match. A taint with the same key but another effect does not count.
const FORBIDDEN_TAINTS: &[(&str, &str)] = &[
    ("node.cloudprovider.kubernetes.io/uninitialized", "NoSchedule"),
    ("node.kubernetes.io/unschedulable", "NoSchedule"),
    ("node-role.kubernetes.io/master", "NoSchedule"),
];

/// Provisioner substrings that identify a local/minikube-style cluster
const LOCAL_PROVISIONERS: &[&str] = &["minikube", "kubevirt.io/hostpath-provisioner", "standard"];

/// Provisioner substring that identifies EKS
const EKS_PROVISIONER: &str = "aws";

/// Coarse cluster flavour
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClusterType {
    /// Detection failed
    #[default]
    Unknown,
    /// Local single-node cluster (minikube, kind, kubevirt hostpath)
    Minikube,
    /// Amazon EKS
    Eks,
    /// Anything else
    Generic,
}

impl std::fmt::Display for ClusterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Minikube => write!(f, "minikube"),
            Self::Eks => write!(f, "eks"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

/// Classify a cluster by its storage classes.
///
/// Classes are scanned in order. For each class the EKS rule is tested first,
/// then the local rule; the first class matching either decides. No match,
/// including an empty list, is [`ClusterType::Generic`].
pub fn classify_storage_classes(classes: &[StorageClass]) -> ClusterType {
    for class in classes {
        let provisioner = class.provisioner.as_str();
        if provisioner.contains(EKS_PROVISIONER) {
            return ClusterType::Eks;
        }
        if LOCAL_PROVISIONERS.iter().any(|p| provisioner.contains(p)) {
            return ClusterType::Minikube;
        }
    }
    ClusterType::Generic
}

/// Keep the nodes that can run workloads.
///
/// An untainted node is a worker. A tainted node is a worker when at least
/// one of its taints is not in the forbidden set. Each node appears at most
/// once, in input order.
pub fn filter_worker_nodes(nodes: Vec<Node>) -> Vec<Node> {
    nodes.into_iter().filter(is_worker).collect()
}

fn is_worker(node: &Node) -> bool {
    let taints = node
        .spec
        .as_ref()
        .and_then(|s| s.taints.as_deref())
        .unwrap_or_default();

    taints.is_empty()
        || taints.iter().any(|taint| {
            !FORBIDDEN_TAINTS
                .iter()
                .any(|(key, effect)| taint.key == *key && taint.effect == *effect)
        })
}

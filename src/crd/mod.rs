//! Custom resource types the provisioner talks to
//!
//! None of these CRDs are owned by this crate: OLM registers the
//! `operators.coreos.com` kinds and the DBaaS operator registers
//! `DatabaseCluster`. The types exist so the API calls are typed.

mod database_cluster;
mod olm;

pub use database_cluster::{
    DatabaseCluster, DatabaseClusterSpec, DatabaseClusterStatus, DbInstanceSpec, MonitoringSpec,
    MANAGED_BY_ANNOTATION, MANAGED_BY_VALUE, RESTART_ANNOTATION,
};
pub use olm::{
    Approval, ClusterServiceVersion, ClusterServiceVersionSpec, ClusterServiceVersionStatus,
    InstallPlan, InstallPlanReference, InstallPlanSpec, InstallPlanStatus, OperatorGroup,
    OperatorGroupSpec, Subscription, SubscriptionSpec, SubscriptionStatus, CSV_PHASE_FAILED,
    CSV_PHASE_SUCCEEDED, OLM_GROUP,
};

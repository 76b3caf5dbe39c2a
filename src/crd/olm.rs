//! Operator Lifecycle Manager resource types
//!
//! Only the fields the provisioner reads or writes are modelled. The objects
//! are owned by OLM; we create subscriptions and operator groups, approve
//! install plans, and watch CSV phases.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group of all OLM resources
pub const OLM_GROUP: &str = "operators.coreos.com";

/// CSV phase OLM reports once an operator is installed
pub const CSV_PHASE_SUCCEEDED: &str = "Succeeded";

/// CSV phase OLM reports when an install cannot proceed
pub const CSV_PHASE_FAILED: &str = "Failed";

/// Install plan approval mode
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum Approval {
    /// OLM approves plans on its own
    #[default]
    Automatic,
    /// Plans wait until someone sets `spec.approved`
    Manual,
}

impl std::fmt::Display for Approval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Automatic => write!(f, "Automatic"),
            Self::Manual => write!(f, "Manual"),
        }
    }
}

/// Subscription to an operator package channel
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "Subscription",
    plural = "subscriptions",
    shortname = "sub",
    status = "SubscriptionStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSpec {
    /// Catalog source name
    pub source: String,
    /// Namespace of the catalog source
    pub source_namespace: String,
    /// Package name
    pub name: String,
    /// Channel to track
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// CSV to start from
    #[serde(
        default,
        rename = "startingCSV",
        skip_serializing_if = "Option::is_none"
    )]
    pub starting_csv: Option<String>,
    /// Whether OLM may approve install plans without us
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_plan_approval: Option<Approval>,
}

/// Reference OLM writes into a subscription once a plan exists
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallPlanReference {
    /// Install plan name
    #[serde(default)]
    pub name: String,
    /// API version of the referenced plan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    /// Kind of the referenced object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Observed subscription state
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    /// Plan currently resolving this subscription
    #[serde(default, rename = "installplan", skip_serializing_if = "Option::is_none")]
    pub install: Option<InstallPlanReference>,
    /// Object reference to the same plan, set by newer OLM releases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_plan_ref: Option<InstallPlanReference>,
    /// CSV that has been installed
    #[serde(default, rename = "installedCSV", skip_serializing_if = "Option::is_none")]
    pub installed_csv: Option<String>,
    /// Latest CSV known to the subscription
    #[serde(default, rename = "currentCSV", skip_serializing_if = "Option::is_none")]
    pub current_csv: Option<String>,
    /// Subscription state (`UpgradePending`, `AtLatestKnown`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl Subscription {
    /// Name of the install plan OLM assigned, if any.
    ///
    /// Prefers `status.installplan` and falls back to `status.installPlanRef`.
    /// An empty name counts as no reference.
    pub fn install_plan_name(&self) -> Option<&str> {
        let status = self.status.as_ref()?;
        [status.install.as_ref(), status.install_plan_ref.as_ref()]
            .into_iter()
            .flatten()
            .map(|r| r.name.as_str())
            .find(|name| !name.is_empty())
    }

    /// Installed CSV name, if OLM reported one
    pub fn installed_csv(&self) -> Option<&str> {
        self.status
            .as_ref()?
            .installed_csv
            .as_deref()
            .filter(|name| !name.is_empty())
    }
}

/// Install plan: the set of changes resolving a subscription
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "InstallPlan",
    plural = "installplans",
    shortname = "ip",
    status = "InstallPlanStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct InstallPlanSpec {
    /// Approval mode inherited from the subscription
    #[serde(default)]
    pub approval: Approval,
    /// Set to let OLM execute the plan
    #[serde(default)]
    pub approved: bool,
    /// CSVs this plan installs
    #[serde(default)]
    pub cluster_service_version_names: Vec<String>,
}

/// Observed install plan state
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct InstallPlanStatus {
    /// Plan phase (`RequiresApproval`, `Installing`, `Complete`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// Installed operator version record
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "ClusterServiceVersion",
    plural = "clusterserviceversions",
    shortname = "csv",
    status = "ClusterServiceVersionStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterServiceVersionSpec {
    /// Human readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Semantic version of the operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// CSV this one replaces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces: Option<String>,
}

/// Observed CSV state
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ClusterServiceVersionStatus {
    /// Install phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Machine readable reason for the phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ClusterServiceVersion {
    /// Current phase, empty when OLM has not reported one
    pub fn phase(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .unwrap_or_default()
    }

    /// Whether the CSV finished installing
    pub fn is_succeeded(&self) -> bool {
        self.phase() == CSV_PHASE_SUCCEEDED
    }

    /// Whether the CSV reached the failed phase
    pub fn is_failed(&self) -> bool {
        self.phase() == CSV_PHASE_FAILED
    }

    /// Reason and message from the status, for error reporting
    pub fn failure_detail(&self) -> String {
        let status = self.status.clone().unwrap_or_default();
        format!(
            "{}: {}",
            status.reason.unwrap_or_else(|| "Unknown".to_string()),
            status.message.unwrap_or_default()
        )
    }
}

/// Namespace scoping for subscriptions
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "operators.coreos.com",
    version = "v1",
    kind = "OperatorGroup",
    plural = "operatorgroups",
    shortname = "og",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct OperatorGroupSpec {
    /// Namespaces the member operators watch
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_namespaces: Vec<String>,
}

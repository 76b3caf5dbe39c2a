//! Operator install and upgrade through OLM
//!
//! Installing an operator walks a fixed state machine:
//!
//! ```text
//! Start -> SubscriptionCreated -> AwaitingInstallPlan -> InstallPlanApproved
//!       -> AwaitingCompletion -> Succeeded
//! ```
//!
//! Any state can end in `Failed`. Each arrow is one call to
//! [`OperatorInstaller::step`], so a run can begin at any state: installs
//! start at `Start`, upgrades at `SubscriptionCreated`, and the OLM bootstrap
//! at `SubscriptionCreated` or `InstallPlanApproved` depending on the
//! subscription's approval mode.
//!
//! The waits use the bounded poller: a subscription that never gets an install
//! plan, or a CSV that never succeeds, fails the run once the deadline passes.

mod olm;

pub use olm::{CATALOG_OPERATOR_DEPLOYMENT, OLM_OPERATOR_DEPLOYMENT, PACKAGESERVER_DEPLOYMENT};

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use tracing::{debug, error, info};

use crate::connector::Connector;
use crate::crd::{Approval, Subscription, SubscriptionSpec};
use crate::poll::{wait_for, wait_until, PollConfig};
use crate::Error;

/// Namespace and name of an object
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl ObjectKey {
    /// Create a key
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Where an install attempt stands
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstallState {
    /// Nothing created yet
    Start,
    /// Subscription exists; OLM has not resolved it yet
    SubscriptionCreated,
    /// OLM produced an install plan awaiting approval
    AwaitingInstallPlan {
        /// Name of the plan, in the subscription's namespace
        install_plan: String,
    },
    /// Plan approved (or approved automatically)
    InstallPlanApproved,
    /// Waiting for the installed CSV to succeed
    AwaitingCompletion {
        /// The CSV being watched
        csv: ObjectKey,
    },
    /// Operator installed
    Succeeded,
    /// Run aborted
    Failed,
}

impl InstallState {
    /// State name without payload
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::SubscriptionCreated => "SubscriptionCreated",
            Self::AwaitingInstallPlan { .. } => "AwaitingInstallPlan",
            Self::InstallPlanApproved => "InstallPlanApproved",
            Self::AwaitingCompletion { .. } => "AwaitingCompletion",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        }
    }

    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for InstallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What kind of run is driving the state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstallMode {
    /// Fresh install: the plan is always approved
    Install,
    /// Upgrade: an already-approved plan means there is nothing to do
    Upgrade,
    /// OLM bootstrap: like upgrade, always waits for the CSV
    Bootstrap,
}

/// Everything needed to install one operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstallOperatorRequest {
    /// Namespace of the subscription and operator group
    pub namespace: String,
    /// Package name; also used as the subscription name
    pub name: String,
    /// Operator group ensured in `namespace`
    pub operator_group: String,
    /// Catalog source providing the package
    pub catalog_source: String,
    /// Namespace of the catalog source
    pub catalog_source_namespace: String,
    /// Channel to subscribe to
    pub channel: String,
    /// Optional CSV to start from
    pub starting_csv: Option<String>,
    /// Also wait for the installed CSV to reach `Succeeded`
    pub wait_for_completion: bool,
}

impl InstallOperatorRequest {
    /// Key of the subscription this request creates
    pub fn subscription_key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    /// The subscription object, with manual approval
    pub fn to_subscription(&self) -> Subscription {
        let mut subscription = Subscription::new(
            &self.name,
            SubscriptionSpec {
                source: self.catalog_source.clone(),
                source_namespace: self.catalog_source_namespace.clone(),
                name: self.name.clone(),
                channel: Some(self.channel.clone()),
                starting_csv: self.starting_csv.clone(),
                install_plan_approval: Some(Approval::Manual),
            },
        );
        subscription.metadata.namespace = Some(self.namespace.clone());
        subscription
    }
}

/// Parameters of one state machine run
#[derive(Clone, Debug)]
pub struct InstallRun {
    /// Subscription being driven
    pub subscription: ObjectKey,
    /// Kind of run
    pub mode: InstallMode,
    /// Needed only when starting from [`InstallState::Start`]
    pub request: Option<InstallOperatorRequest>,
    /// Continue past approval into `AwaitingCompletion`
    pub wait_for_completion: bool,
}

impl InstallRun {
    /// A fresh install from `request`
    pub fn install(request: InstallOperatorRequest) -> Self {
        Self {
            subscription: request.subscription_key(),
            mode: InstallMode::Install,
            wait_for_completion: request.wait_for_completion,
            request: Some(request),
        }
    }

    /// An upgrade of an existing subscription
    pub fn upgrade(subscription: ObjectKey) -> Self {
        Self {
            subscription,
            mode: InstallMode::Upgrade,
            request: None,
            wait_for_completion: false,
        }
    }

    /// A subscription shipped in the OLM manifests
    pub fn bootstrap(subscription: ObjectKey) -> Self {
        Self {
            subscription,
            mode: InstallMode::Bootstrap,
            request: None,
            wait_for_completion: true,
        }
    }
}

/// Whether a deployment finished rolling out.
///
/// The controller must have observed the latest generation, and the updated,
/// ready and available replica counts must all equal the desired count
/// (default 1).
pub fn is_rollout_complete(deployment: &Deployment) -> bool {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let generation = deployment.metadata.generation.unwrap_or(0);
    let Some(status) = deployment.status.as_ref() else {
        return false;
    };

    status.observed_generation.unwrap_or(0) >= generation
        && status.updated_replicas.unwrap_or(0) == desired
        && status.ready_replicas.unwrap_or(0) == desired
        && status.available_replicas.unwrap_or(0) == desired
}

/// Drives operator installs against a shared [`Connector`].
pub struct OperatorInstaller {
    connector: Arc<Connector>,
    poll: PollConfig,
}

impl OperatorInstaller {
    /// Create an installer polling with `poll`
    pub fn new(connector: Arc<Connector>, poll: PollConfig) -> Self {
        Self { connector, poll }
    }

    /// The connector this installer writes through
    pub fn connector(&self) -> &Arc<Connector> {
        &self.connector
    }

    /// Install an operator from scratch
    pub async fn install_operator(&self, request: &InstallOperatorRequest) -> Result<(), Error> {
        self.run(&InstallRun::install(request.clone()), InstallState::Start)
            .await
    }

    /// Approve the pending install plan of an existing subscription.
    ///
    /// Succeeds without writing when the plan is already approved.
    pub async fn upgrade_operator(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.run(
            &InstallRun::upgrade(ObjectKey::new(namespace, name)),
            InstallState::SubscriptionCreated,
        )
        .await
    }

    /// Step the state machine from `start` until it succeeds or fails.
    ///
    /// Failures are reported as [`Error::Install`] naming the operator and the
    /// state the run was in.
    pub async fn run(&self, run: &InstallRun, start: InstallState) -> Result<(), Error> {
        let operator = run.subscription.to_string();
        let mut state = start;

        while !state.is_terminal() {
            let phase = state.name();
            match self.step(run, state).await {
                Ok(next) => {
                    info!(operator = %operator, from = phase, to = next.name(), "install transition");
                    state = next;
                }
                Err(e) => {
                    error!(
                        operator = %operator,
                        from = phase,
                        to = InstallState::Failed.name(),
                        error = %e,
                        "install transition failed"
                    );
                    return Err(match e {
                        e @ Error::Install { .. } => e,
                        e => Error::install(&run.subscription.name, phase, e.to_string()),
                    });
                }
            }
        }

        match state {
            InstallState::Succeeded => Ok(()),
            _ => Err(Error::install(
                &run.subscription.name,
                state.name(),
                "run started in a terminal failure state",
            )),
        }
    }

    /// Perform the single transition out of `state`.
    pub async fn step(&self, run: &InstallRun, state: InstallState) -> Result<InstallState, Error> {
        match state {
            InstallState::Start => {
                let request = run.request.as_ref().ok_or_else(|| {
                    Error::precondition("Start", "creating a subscription needs an install request")
                })?;
                self.create_subscription(request).await?;
                Ok(InstallState::SubscriptionCreated)
            }
            InstallState::SubscriptionCreated => {
                let install_plan = self.await_install_plan(&run.subscription).await?;
                Ok(InstallState::AwaitingInstallPlan { install_plan })
            }
            InstallState::AwaitingInstallPlan { install_plan } => {
                let skip_if_approved = run.mode != InstallMode::Install;
                self.approve_install_plan(&run.subscription.namespace, &install_plan, skip_if_approved)
                    .await?;
                Ok(InstallState::InstallPlanApproved)
            }
            InstallState::InstallPlanApproved if run.wait_for_completion => {
                let csv = self.await_installed_csv(&run.subscription).await?;
                Ok(InstallState::AwaitingCompletion { csv })
            }
            InstallState::InstallPlanApproved => Ok(InstallState::Succeeded),
            InstallState::AwaitingCompletion { csv } => {
                self.await_csv_succeeded(&csv).await?;
                Ok(InstallState::Succeeded)
            }
            terminal => Ok(terminal),
        }
    }

    /// Create the operator group when absent. An existing group is left alone.
    pub async fn ensure_operator_group(&self, namespace: &str, name: &str) -> Result<(), Error> {
        if self
            .connector
            .get_operator_group(namespace, name)
            .await?
            .is_some()
        {
            debug!(namespace, operator_group = name, "operator group already exists");
            return Ok(());
        }

        self.connector.create_operator_group(namespace, name).await?;
        info!(namespace, operator_group = name, "created operator group");
        Ok(())
    }

    /// `Start -> SubscriptionCreated`
    pub async fn create_subscription(&self, request: &InstallOperatorRequest) -> Result<(), Error> {
        self.ensure_operator_group(&request.namespace, &request.operator_group)
            .await?;

        self.connector
            .create_subscription(&request.to_subscription())
            .await
            .map_err(|e| {
                Error::install(
                    &request.name,
                    InstallState::Start.name(),
                    format!("cannot create a subscription to install the operator: {}", e),
                )
            })?;

        info!(
            subscription = %request.subscription_key(),
            channel = %request.channel,
            catalog = %request.catalog_source,
            "created subscription"
        );
        Ok(())
    }

    /// `SubscriptionCreated -> AwaitingInstallPlan`: wait for OLM to name a plan.
    pub async fn await_install_plan(&self, subscription: &ObjectKey) -> Result<String, Error> {
        let connector = &self.connector;
        let description = format!("install plan of subscription {}", subscription);

        wait_for(self.poll, &description, move || async move {
            let found = connector
                .get_subscription(&subscription.namespace, &subscription.name)
                .await?;
            Ok(found.and_then(|s| s.install_plan_name().map(str::to_string)))
        })
        .await
        .map_err(|e| match e {
            e if e.is_timeout() => Error::install(
                &subscription.name,
                InstallState::SubscriptionCreated.name(),
                format!("cannot resolve install plan: {}", e),
            ),
            e => e,
        })
    }

    /// `AwaitingInstallPlan -> InstallPlanApproved`.
    ///
    /// Returns whether the plan was written. With `skip_if_approved`, an
    /// already approved plan is left untouched.
    pub async fn approve_install_plan(
        &self,
        namespace: &str,
        name: &str,
        skip_if_approved: bool,
    ) -> Result<bool, Error> {
        let mut plan = self
            .connector
            .get_install_plan(namespace, name)
            .await
            .map_err(|e| {
                Error::internal_with_context(
                    "approve_install_plan",
                    format!("cannot get install plan {}/{}: {}", namespace, name, e),
                )
            })?;

        if skip_if_approved && plan.spec.approved {
            debug!(namespace, install_plan = name, "install plan already approved");
            return Ok(false);
        }

        plan.spec.approved = true;
        self.connector.update_install_plan(namespace, &plan).await?;
        info!(namespace, install_plan = name, "approved install plan");
        Ok(true)
    }

    /// `InstallPlanApproved -> AwaitingCompletion`: wait for the installed CSV name.
    pub async fn await_installed_csv(&self, subscription: &ObjectKey) -> Result<ObjectKey, Error> {
        let connector = &self.connector;
        let description = format!("subscription {} to install a CSV", subscription);
        info!(subscription = %subscription, "waiting for subscription to install CSV");

        let csv = wait_for(self.poll, &description, move || async move {
            let found = connector
                .get_subscription(&subscription.namespace, &subscription.name)
                .await?;
            Ok(found.and_then(|s| s.installed_csv().map(str::to_string)))
        })
        .await?;

        Ok(ObjectKey::new(&subscription.namespace, csv))
    }

    /// `AwaitingCompletion -> Succeeded`: wait for the CSV phase.
    ///
    /// A `Failed` phase ends the wait at once.
    pub async fn await_csv_succeeded(&self, csv: &ObjectKey) -> Result<(), Error> {
        let connector = &self.connector;
        let description = format!("clusterserviceversion {} to reach Succeeded", csv);
        info!(csv = %csv, "waiting for CSV to reach Succeeded phase");

        wait_until(self.poll, &description, move || async move {
            let Some(found) = connector
                .get_cluster_service_version(&csv.namespace, &csv.name)
                .await?
            else {
                return Ok(false);
            };
            if found.is_failed() {
                return Err(Error::install(
                    &csv.name,
                    InstallState::AwaitingCompletion { csv: csv.clone() }.name(),
                    format!("clusterserviceversion failed: {}", found.failure_detail()),
                ));
            }
            Ok(found.is_succeeded())
        })
        .await
    }

    /// Wait for a deployment rollout; a missing deployment counts as not ready.
    pub async fn wait_for_rollout(&self, deployment: &ObjectKey) -> Result<(), Error> {
        let connector = &self.connector;
        let description = format!("rollout of deployment {}", deployment);

        wait_until(self.poll, &description, move || async move {
            Ok(connector
                .get_deployment(&deployment.namespace, &deployment.name)
                .await?
                .as_ref()
                .is_some_and(is_rollout_complete))
        })
        .await?;

        info!(deployment = %deployment, "deployment rolled out");
        Ok(())
    }
}

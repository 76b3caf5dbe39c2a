//! Everest provisioner - installs OLM and the Percona database operators
//!
//! The provisioner drives the Operator Lifecycle Manager through its
//! subscription, install plan and CSV workflow to put a fixed set of operators
//! on a cluster, then wires the cluster into PMM monitoring. It runs once and
//! exits; every wait is bounded.
//!
//! # Modules
//!
//! - [`manifest`] - Decode YAML/JSON manifests into resources and filter them
//! - [`poll`] - Bounded fixed-interval polling
//! - [`retry`] - Fixed-count retry for flaky applies
//! - [`connector`] - Locked handle over the Kubernetes API
//! - [`capability`] - Cluster type and worker node detection
//! - [`install`] - Operator install/upgrade state machine and OLM bootstrap
//! - [`monitoring`] - VMAgent, scrape manifests and the PMM API client
//! - [`provision`] - The top-level provisioning sequence
//! - [`crd`] - OLM and DBaaS custom resource types
//! - [`config`] - Provisioner configuration
//! - [`manifests`] - Bundled manifest files
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod capability;
pub mod config;
pub mod connector;
pub mod crd;
pub mod error;
pub mod install;
pub mod manifest;
pub mod manifests;
pub mod monitoring;
pub mod poll;
pub mod provision;
pub mod retry;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager for server-side apply
pub const FIELD_MANAGER: &str = "everest-provisioner";

/// Namespace OLM is installed into, also home of the Percona catalog source
pub const OLM_NAMESPACE: &str = "olm";

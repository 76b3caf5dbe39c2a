//! Error types for the provisioner
//!
//! Errors carry the context needed to tell which operator, which install
//! phase, or which resource a failure belongs to. Every orchestration step
//! wraps the underlying cause instead of swallowing it.

use std::time::Duration;

use thiserror::Error;

/// Main error type for provisioning operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A manifest could not be decoded into resources
    #[error("manifest error: {message}")]
    Manifest {
        /// Description of what failed to decode
        message: String,
    },

    /// A bounded wait ran out of time
    #[error("timed out after {timeout:?} waiting for {description}")]
    Timeout {
        /// What was being waited for
        description: String,
        /// The deadline that elapsed
        timeout: Duration,
    },

    /// An operator install or upgrade failed in a given phase
    #[error("install of {operator} failed in {phase}: {message}")]
    Install {
        /// Operator (subscription) name
        operator: String,
        /// Install state the failure happened in
        phase: String,
        /// Description of what failed, including the cause
        message: String,
    },

    /// Something that a completed step guarantees turned out to be missing
    #[error("precondition failed [{context}]: {message}")]
    Precondition {
        /// Where the check happened
        context: String,
        /// What was missing
        message: String,
    },

    /// A required resource does not exist
    #[error("not found: {resource}")]
    NotFound {
        /// Description of the missing resource
        resource: String,
    },

    /// Monitoring provisioning error
    #[error("monitoring error: {message}")]
    Monitoring {
        /// Description of what failed
        message: String,
    },

    /// HTTP error talking to the PMM API
    #[error("http error: {message}")]
    Http {
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Invalid configuration
    #[error("config error: {message}")]
    Config {
        /// Description of what is invalid
        message: String,
    },

    /// I/O error
    #[error("io error: {source}")]
    Io {
        /// The underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

impl Error {
    /// Create a manifest decode error
    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::Manifest {
            message: msg.into(),
        }
    }

    /// Create a timeout error for a bounded wait
    pub fn timeout(description: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            description: description.into(),
            timeout,
        }
    }

    /// Create an install error for an operator in a given phase
    pub fn install(
        operator: impl Into<String>,
        phase: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Install {
            operator: operator.into(),
            phase: phase.into(),
            message: msg.into(),
        }
    }

    /// Create a precondition error
    pub fn precondition(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Precondition {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a monitoring error
    pub fn monitoring(msg: impl Into<String>) -> Self {
        Self::Monitoring {
            message: msg.into(),
        }
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http {
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether this error is a bounded-wait timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether this error means the resource does not exist
    ///
    /// Covers both our own not-found variant and a 404 from the API server.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Kube {
                source: kube::Error::Api(e),
            } => e.code == 404,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

//! Error types for the cluster curator operator.

use thiserror::Error;

/// Errors that can occur during operator operations.
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Resource not found.
    #[error("Resource not found: {kind}/{name} in namespace {namespace}")]
    NotFound {
        /// Resource kind.
        kind: String,
        /// Resource name.
        name: String,
        /// Resource namespace.
        namespace: String,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// ClusterCurator spec validation error.
    #[error("ClusterCurator validation failed: {0}")]
    ValidationError(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A monitored resource did not reach the expected state in time.
    #[error("Timed out after {minutes} minute(s) waiting for {what}")]
    Timeout {
        /// What was being waited on.
        what: String,
        /// Timeout that elapsed, in minutes.
        minutes: u64,
    },

    /// An automation hook finished unsuccessfully.
    #[error("Hook {hook} failed: {reason}")]
    HookFailed {
        /// Job or workflow template name.
        hook: String,
        /// Failure reason reported by the AnsibleJob.
        reason: String,
    },

    /// Cluster provisioning stopped without installing the cluster.
    #[error("Provisioning of cluster {cluster} failed: {reason}")]
    ProvisionFailed {
        /// Cluster name.
        cluster: String,
        /// Reason reported by the provisioner.
        reason: String,
    },

    /// The requested upgrade target is not acceptable.
    #[error("Upgrade rejected: {0}")]
    UpgradeRejected(String),

    /// Writing ClusterCurator status failed after retries.
    #[error("Status update failed for {name}: {cause}")]
    StatusUpdate {
        /// ClusterCurator name.
        name: String,
        /// Error cause.
        cause: String,
    },
}

/// Result type for operator operations.
pub type OperatorResult<T> = Result<T, OperatorError>;

impl OperatorError {
    /// Whether this error comes from a 404 response of the Kubernetes API.
    pub fn is_not_found(&self) -> bool {
        match self {
            OperatorError::NotFound { .. } => true,
            OperatorError::KubeError(kube::Error::Api(err)) => err.code == 404,
            _ => false,
        }
    }

    /// Whether a wait should keep polling after this error.
    ///
    /// Server-side failures, throttling, conflicts and transport errors are
    /// transient. Missing objects, rejected requests and every curation
    /// failure are not.
    pub fn is_transient(&self) -> bool {
        match self {
            OperatorError::KubeError(kube::Error::Api(err)) => {
                err.code >= 500 || matches!(err.code, 408 | 409 | 429)
            }
            OperatorError::KubeError(_) => true,
            _ => false,
        }
    }

    /// Whether this error is a terminal problem with the user's input rather
    /// than a transient failure worth retrying.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            OperatorError::NotFound { .. }
                | OperatorError::InvalidConfig(_)
                | OperatorError::ValidationError(_)
                | OperatorError::UpgradeRejected(_)
        )
    }
}

impl From<serde_json::Error> for OperatorError {
    fn from(err: serde_json::Error) -> Self {
        OperatorError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for OperatorError {
    fn from(err: serde_yaml::Error) -> Self {
        OperatorError::SerializationError(err.to_string())
    }
}

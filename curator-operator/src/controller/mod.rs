//! Kubernetes controller for ClusterCurator resources.
//!
//! - [`CuratorController`]: launches one curator Job per requested curation
//!   and mirrors its outcome into the ClusterCurator status
//!
//! # Usage with kube-runtime
//!
//! ```ignore
//! use curator_operator::controller::{CuratorController, error_policy};
//!
//! Controller::new(curators, watcher_config)
//!     .owns(jobs, watcher_config)
//!     .run(|curator, ctx| async move {
//!         CuratorController::new(ctx).reconcile(curator).await
//!     }, error_policy, context)
//!     .for_each(|_| futures::future::ready(()))
//!     .await;
//! ```

mod curator;

pub use curator::{CuratorController, JobOutcome, NextAction, error_policy, job_outcome, next_action};

use crate::config::OperatorConfig;

/// Shared context for controllers.
pub struct ControllerContext {
    /// Kubernetes client.
    pub client: kube::Client,
    /// Operator configuration.
    pub config: OperatorConfig,
}

impl ControllerContext {
    /// Create a new controller context.
    pub fn new(client: kube::Client, config: OperatorConfig) -> Self {
        Self { client, config }
    }
}

/// Result type for reconciliation actions.
#[derive(Debug, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Requeue after the specified duration.
    Requeue(std::time::Duration),
    /// Don't requeue (reconciliation complete).
    Done,
}

impl ReconcileAction {
    /// Requeue after 30 seconds (default for waiting on a running Job).
    pub fn requeue_medium() -> Self {
        Self::Requeue(std::time::Duration::from_secs(30))
    }

    /// Convert into the kube-runtime action.
    pub fn into_action(self) -> kube::runtime::controller::Action {
        match self {
            Self::Requeue(duration) => kube::runtime::controller::Action::requeue(duration),
            Self::Done => kube::runtime::controller::Action::await_change(),
        }
    }
}

//! Custom Resource Definitions used by the curator operator.
//!
//! - [`ClusterCurator`]: curation intent for one managed cluster (owned by this operator)
//! - [`AnsibleJob`]: automation hook launched by the curator
//! - [`external`]: dynamic descriptors for HostedCluster, NodePool,
//!   ClusterDeployment, ManagedClusterView and ManagedClusterAction

mod ansible_job;
mod curator;
pub mod external;

pub use ansible_job::{
    AnsibleJob, AnsibleJobOutcome, AnsibleJobResult, AnsibleJobSpec, AnsibleJobStatus,
};
pub use curator::{
    ALLOW_NOT_RECOMMENDED_ANNOTATION, CURATOR_JOB_CONDITION, ClusterCurator, ClusterCuratorSpec,
    ClusterCuratorStatus, ConditionState, Curation, CurationPhase, CuratorCondition, Hook,
    HookPhase, HookType, Hooks, REASON_EXECUTING, REASON_FAILED, REASON_FINISHED, UpgradeHooks,
};

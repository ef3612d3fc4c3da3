//! Cluster activation: lift the provisioning pause and wait for the cluster.
//!
//! Hosted clusters are paused through `spec.pausedUntil` on the HostedCluster
//! and its NodePools. Hive clusters are held back with
//! `spec.installAttemptsLimit: 0` on the ClusterDeployment.

use super::{StepRunner, minutes, poll_until};
use crate::audit::audit_logger;
use crate::crd::external::{
    cluster_deployment, condition_is_true, condition_message, hosted_cluster, node_pool,
    spec_field,
};
use crate::error::{OperatorError, OperatorResult};
use kube::api::{DynamicObject, ListParams, Patch, PatchParams};
use kube::{Api, ResourceExt};
use serde_json::{Value, json};

/// Kind of resource that provisions a managed cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterKind {
    /// HyperShift HostedCluster with NodePools.
    Hosted,
    /// Hive ClusterDeployment.
    Hive,
}

impl ClusterKind {
    /// Kubernetes kind of the provisioning resource.
    pub fn kind(&self) -> &'static str {
        match self {
            ClusterKind::Hosted => "HostedCluster",
            ClusterKind::Hive => "ClusterDeployment",
        }
    }
}

/// Provisioning state of a ClusterDeployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionState {
    /// `spec.installed` is true.
    Installed,
    /// Provisioning stopped, with the reported message.
    Stopped(String),
    /// Still provisioning.
    InProgress,
}

/// Classify a ClusterDeployment.
pub fn provision_state(cd: &DynamicObject) -> ProvisionState {
    if spec_field(cd, "installed").and_then(Value::as_bool) == Some(true) {
        return ProvisionState::Installed;
    }
    if condition_is_true(cd, "ProvisionStopped") {
        return ProvisionState::Stopped(
            condition_message(cd, "ProvisionStopped")
                .unwrap_or_else(|| "provisioning stopped".to_string()),
        );
    }
    ProvisionState::InProgress
}

/// NodePools that belong to the HostedCluster `cluster`.
pub fn owned_node_pools<'a>(
    pools: &'a [DynamicObject],
    cluster: &str,
) -> impl Iterator<Item = &'a DynamicObject> + 'a {
    let cluster = cluster.to_string();
    pools
        .iter()
        .filter(move |pool| {
            spec_field(pool, "clusterName").and_then(Value::as_str) == Some(cluster.as_str())
        })
}

fn is_paused(obj: &DynamicObject) -> bool {
    spec_field(obj, "pausedUntil").is_some_and(|v| !v.is_null())
}

/// Find out how the cluster is provisioned.
pub(super) async fn detect(runner: &StepRunner) -> OperatorResult<ClusterKind> {
    let hosted: Api<DynamicObject> =
        Api::namespaced_with(runner.client().clone(), runner.namespace(), &hosted_cluster());
    if hosted.get_opt(runner.cluster()).await?.is_some() {
        return Ok(ClusterKind::Hosted);
    }

    let hive: Api<DynamicObject> = Api::namespaced_with(
        runner.client().clone(),
        runner.namespace(),
        &cluster_deployment(),
    );
    if hive.get_opt(runner.cluster()).await?.is_some() {
        return Ok(ClusterKind::Hive);
    }

    Err(OperatorError::NotFound {
        kind: "HostedCluster or ClusterDeployment".to_string(),
        name: runner.cluster().to_string(),
        namespace: runner.namespace().to_string(),
    })
}

/// NodePools of the runner's hosted cluster.
pub(super) async fn node_pools(runner: &StepRunner) -> OperatorResult<Vec<DynamicObject>> {
    let api: Api<DynamicObject> =
        Api::namespaced_with(runner.client().clone(), runner.namespace(), &node_pool());
    let pools = api.list(&ListParams::default()).await?;
    Ok(owned_node_pools(&pools.items, runner.cluster())
        .cloned()
        .collect())
}

pub(super) async fn activate_and_monitor(runner: &StepRunner) -> OperatorResult<String> {
    let kind = detect(runner).await?;
    let timeout = minutes(runner.config().activate_timeout_minutes);
    let interval = runner.config().poll_interval;
    let cluster = runner.cluster().to_string();

    match kind {
        ClusterKind::Hosted => {
            let hosted: Api<DynamicObject> = Api::namespaced_with(
                runner.client().clone(),
                runner.namespace(),
                &hosted_cluster(),
            );
            let pools: Api<DynamicObject> =
                Api::namespaced_with(runner.client().clone(), runner.namespace(), &node_pool());
            let unpause = json!({ "spec": { "pausedUntil": null } });

            let hc = hosted.get(&cluster).await?;
            if is_paused(&hc) {
                hosted
                    .patch(&cluster, &PatchParams::default(), &Patch::Merge(&unpause))
                    .await?;
                tracing::info!(cluster = %cluster, "Unpaused HostedCluster");
            }
            for pool in node_pools(runner).await? {
                if is_paused(&pool) {
                    let name = pool.name_any();
                    pools
                        .patch(&name, &PatchParams::default(), &Patch::Merge(&unpause))
                        .await?;
                    tracing::info!(cluster = %cluster, node_pool = %name, "Unpaused NodePool");
                }
            }
            audit_logger().log_cluster_activated(&cluster, runner.namespace(), kind.kind());

            let what = format!("HostedCluster {} to become available", cluster);
            poll_until(&what, timeout, interval, || {
                let hosted = hosted.clone();
                let cluster = cluster.clone();
                async move {
                    let hc = hosted.get(&cluster).await?;
                    Ok(condition_is_true(&hc, "Available").then_some(()))
                }
            })
            .await?;

            Ok(format!("HostedCluster {} is available", cluster))
        }
        ClusterKind::Hive => {
            let hive: Api<DynamicObject> = Api::namespaced_with(
                runner.client().clone(),
                runner.namespace(),
                &cluster_deployment(),
            );

            let cd = hive.get(&cluster).await?;
            if spec_field(&cd, "installAttemptsLimit").and_then(Value::as_i64) == Some(0) {
                let patch = json!({ "spec": { "installAttemptsLimit": 1 } });
                hive.patch(&cluster, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
                tracing::info!(cluster = %cluster, "Released ClusterDeployment install attempts");
            }
            audit_logger().log_cluster_activated(&cluster, runner.namespace(), kind.kind());

            let what = format!("ClusterDeployment {} to finish installing", cluster);
            poll_until(&what, timeout, interval, || {
                let hive = hive.clone();
                let cluster = cluster.clone();
                async move {
                    let cd = hive.get(&cluster).await?;
                    match provision_state(&cd) {
                        ProvisionState::Installed => Ok(Some(())),
                        ProvisionState::InProgress => Ok(None),
                        ProvisionState::Stopped(reason) => {
                            Err(OperatorError::ProvisionFailed { cluster, reason })
                        }
                    }
                }
            })
            .await?;

            Ok(format!("ClusterDeployment {} is installed", cluster))
        }
    }
}

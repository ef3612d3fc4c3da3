//! Cluster destruction.

use super::activate::{ClusterKind, detect, node_pools};
use super::{StepRunner, audit_destroy, minutes, poll_until};
use crate::crd::external::{cluster_deployment, hosted_cluster, node_pool};
use crate::error::OperatorResult;
use kube::api::{DeleteParams, DynamicObject};
use kube::{Api, ResourceExt};

pub(super) async fn destroy_cluster(runner: &StepRunner) -> OperatorResult<String> {
    let kind = detect(runner).await?;
    let cluster = runner.cluster();
    let client = runner.client().clone();
    let namespace = runner.namespace();

    audit_destroy(runner, kind.kind());

    match kind {
        ClusterKind::Hosted => {
            let pools: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, &node_pool());
            for pool in node_pools(runner).await? {
                let name = pool.name_any();
                pools.delete(&name, &DeleteParams::background()).await?;
                tracing::info!(cluster = %cluster, node_pool = %name, "Deleting NodePool");
            }

            let hosted: Api<DynamicObject> =
                Api::namespaced_with(client, namespace, &hosted_cluster());
            hosted.delete(cluster, &DeleteParams::background()).await?;
            tracing::info!(cluster = %cluster, "Deleting HostedCluster");
        }
        ClusterKind::Hive => {
            let hive: Api<DynamicObject> =
                Api::namespaced_with(client, namespace, &cluster_deployment());
            hive.delete(cluster, &DeleteParams::background()).await?;
            tracing::info!(cluster = %cluster, "Deleting ClusterDeployment");
        }
    }

    Ok(format!("Deletion of {} {} requested", kind.kind(), cluster))
}

/// Wait until the HostedCluster, its NodePools and the ClusterDeployment are gone.
pub(super) async fn monitor_destroy(runner: &StepRunner) -> OperatorResult<String> {
    let client = runner.client().clone();
    let namespace = runner.namespace();
    let cluster = runner.cluster().to_string();

    let hosted: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, &hosted_cluster());
    let hive: Api<DynamicObject> = Api::namespaced_with(client, namespace, &cluster_deployment());

    let what = format!("cluster {} resources to be deleted", cluster);
    poll_until(
        &what,
        minutes(runner.config().destroy_timeout_minutes),
        runner.config().poll_interval,
        || {
            let hosted = hosted.clone();
            let hive = hive.clone();
            let cluster = cluster.clone();
            async move {
                let remaining = hosted.get_opt(&cluster).await?.is_some()
                    || hive.get_opt(&cluster).await?.is_some()
                    || !node_pools(runner).await?.is_empty();
                Ok((!remaining).then_some(()))
            }
        },
    )
    .await?;

    Ok(format!("Cluster {} resources deleted", cluster))
}

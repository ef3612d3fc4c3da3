//! Third-party kinds the curator reads and patches as dynamic objects.

use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use serde_json::Value;

/// `hypershift.openshift.io/v1beta1` HostedCluster.
pub fn hosted_cluster() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("hypershift.openshift.io", "v1beta1", "HostedCluster"),
        "hostedclusters",
    )
}

/// `hypershift.openshift.io/v1beta1` NodePool.
pub fn node_pool() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("hypershift.openshift.io", "v1beta1", "NodePool"),
        "nodepools",
    )
}

/// `hive.openshift.io/v1` ClusterDeployment.
pub fn cluster_deployment() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("hive.openshift.io", "v1", "ClusterDeployment"),
        "clusterdeployments",
    )
}

/// `view.open-cluster-management.io/v1beta1` ManagedClusterView.
pub fn managed_cluster_view() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(
            "view.open-cluster-management.io",
            "v1beta1",
            "ManagedClusterView",
        ),
        "managedclusterviews",
    )
}

/// `action.open-cluster-management.io/v1beta1` ManagedClusterAction.
pub fn managed_cluster_action() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(
            "action.open-cluster-management.io",
            "v1beta1",
            "ManagedClusterAction",
        ),
        "managedclusteractions",
    )
}

/// Look up a value under `spec`.
pub fn spec_field<'a>(obj: &'a DynamicObject, field: &str) -> Option<&'a Value> {
    obj.data.get("spec").and_then(|spec| spec.get(field))
}

/// Find a status condition of the given type.
pub fn condition<'a>(obj: &'a DynamicObject, condition_type: &str) -> Option<&'a Value> {
    obj.data
        .get("status")
        .and_then(|s| s.get("conditions"))
        .and_then(Value::as_array)
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|c| c.get("type").and_then(Value::as_str) == Some(condition_type))
        })
}

/// Whether the condition of the given type has status `True`.
pub fn condition_is_true(obj: &DynamicObject, condition_type: &str) -> bool {
    condition(obj, condition_type)
        .and_then(|c| c.get("status"))
        .and_then(Value::as_str)
        == Some("True")
}

/// Message of the condition of the given type.
pub fn condition_message(obj: &DynamicObject, condition_type: &str) -> Option<String> {
    condition(obj, condition_type)
        .and_then(|c| c.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

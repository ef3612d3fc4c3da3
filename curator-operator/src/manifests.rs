//! Install manifests: the ClusterCurator CRD and the RBAC pair.
//!
//! `cluster-curator-controller` is what the reconciler needs; it only creates
//! Jobs. `cluster-curator-job` is bound to the service account curator Jobs
//! run as and covers everything the steps touch.

use crate::crd::ClusterCurator;
use crate::error::OperatorResult;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::CustomResourceExt;

/// ClusterRole used by the controller.
pub const CONTROLLER_ROLE: &str = "cluster-curator-controller";

/// ClusterRole used by curator Jobs.
pub const JOB_ROLE: &str = "cluster-curator-job";

/// Namespace the operator is installed into.
pub const OPERATOR_NAMESPACE: &str = "open-cluster-management";

fn rule(groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    PolicyRule {
        api_groups: Some(strings(groups)),
        resources: Some(strings(resources)),
        verbs: strings(verbs),
        ..Default::default()
    }
}

const CURATOR_GROUP: &str = "cluster.open-cluster-management.io";
const READ_WRITE: &[&str] = &["get", "list", "watch", "create", "update", "patch", "delete"];

fn cluster_role(name: &str, rules: Vec<PolicyRule>) -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        rules: Some(rules),
        ..Default::default()
    }
}

/// ClusterRole for the reconciler.
pub fn controller_role() -> ClusterRole {
    cluster_role(
        CONTROLLER_ROLE,
        vec![
            rule(&[CURATOR_GROUP], &["clustercurators"], &["get", "list", "watch"]),
            rule(
                &[CURATOR_GROUP],
                &["clustercurators/status"],
                &["get", "update", "patch"],
            ),
            rule(&["batch"], &["jobs"], &["get", "list", "watch", "create"]),
            rule(&[""], &["secrets"], &["get"]),
        ],
    )
}

/// ClusterRole for curator Jobs.
pub fn job_role() -> ClusterRole {
    cluster_role(
        JOB_ROLE,
        vec![
            rule(&[CURATOR_GROUP], &["clustercurators"], &["get", "list", "watch"]),
            rule(
                &[CURATOR_GROUP],
                &["clustercurators/status"],
                &["get", "update", "patch"],
            ),
            rule(&["tower.ansible.com"], &["ansiblejobs"], READ_WRITE),
            rule(
                &["hypershift.openshift.io"],
                &["hostedclusters", "nodepools"],
                READ_WRITE,
            ),
            rule(&["hive.openshift.io"], &["clusterdeployments"], READ_WRITE),
            rule(
                &["view.open-cluster-management.io"],
                &["managedclusterviews"],
                READ_WRITE,
            ),
            rule(
                &["action.open-cluster-management.io"],
                &["managedclusteractions"],
                READ_WRITE,
            ),
            rule(&[""], &["secrets"], &["get"]),
        ],
    )
}

/// Binding of the controller role to the operator service account.
pub fn controller_binding() -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(CONTROLLER_ROLE.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: CONTROLLER_ROLE.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: CONTROLLER_ROLE.to_string(),
            namespace: Some(OPERATOR_NAMESPACE.to_string()),
            ..Default::default()
        }]),
    }
}

/// All manifests as one multi-document YAML stream.
pub fn render() -> OperatorResult<String> {
    let documents = [
        serde_yaml::to_string(&ClusterCurator::crd())?,
        serde_yaml::to_string(&controller_role())?,
        serde_yaml::to_string(&job_role())?,
        serde_yaml::to_string(&controller_binding())?,
    ];

    let mut out = String::new();
    for doc in documents {
        out.push_str("---\n");
        out.push_str(&doc);
    }
    Ok(out)
}

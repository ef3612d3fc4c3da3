//! Cluster upgrades.
//!
//! Hosted clusters are upgraded by patching the release image on the
//! HostedCluster and its NodePools. Other managed clusters are upgraded
//! remotely: a ManagedClusterView reads the cluster's `ClusterVersion`, and a
//! ManagedClusterAction updates it.

use super::activate::node_pools;
use super::{StepRunner, minutes, poll_until};
use crate::audit::audit_logger;
use crate::crd::external::{
    condition, hosted_cluster, managed_cluster_action, managed_cluster_view, node_pool,
};
use crate::crd::{ClusterCurator, UpgradeHooks};
use crate::error::{OperatorError, OperatorResult};
use kube::api::{DynamicObject, Patch, PatchParams, PostParams};
use kube::{Api, ResourceExt};
use serde::Deserialize;
use serde_json::{Map, Value, json};

/// Name of the ManagedClusterView reading `ClusterVersion/version`.
const CLUSTER_VERSION_VIEW: &str = "curator-clusterversion";

/// A release offered to a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Release {
    /// Version, e.g. `4.15.3`.
    #[serde(default)]
    pub version: String,
    /// Release image pull spec.
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConditionalUpdate {
    #[serde(default)]
    release: Release,
}

/// One entry of the cluster's update history, newest first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateHistory {
    /// `Completed` or `Partial`.
    #[serde(default)]
    pub state: String,
    /// Version of the entry.
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterVersionStatus {
    #[serde(default)]
    desired: Option<Release>,
    #[serde(default)]
    available_updates: Option<Vec<Release>>,
    #[serde(default)]
    conditional_updates: Option<Vec<ConditionalUpdate>>,
    #[serde(default)]
    history: Option<Vec<UpdateHistory>>,
}

/// The parts of a remote `ClusterVersion` the curator reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterVersionView {
    #[serde(default)]
    status: ClusterVersionStatus,
}

impl ClusterVersionView {
    /// Update history, newest first.
    pub fn history(&self) -> &[UpdateHistory] {
        self.status.history.as_deref().unwrap_or_default()
    }
}

/// Where an upgrade request lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeTarget {
    /// The cluster already targets the version.
    AlreadyDesired,
    /// Offered as a regular update.
    Recommended(Release),
    /// Offered only as a conditional update.
    NotRecommended(Release),
    /// Not offered at all; requested with `force`.
    Forced(String),
}

impl UpgradeTarget {
    /// Audit label for the target.
    pub fn recommendation(&self) -> &'static str {
        match self {
            UpgradeTarget::AlreadyDesired | UpgradeTarget::Recommended(_) => "recommended",
            UpgradeTarget::NotRecommended(_) => "not-recommended",
            UpgradeTarget::Forced(_) => "forced",
        }
    }

    /// `spec.desiredUpdate` for the ClusterVersion, if anything changes.
    fn desired_update(&self) -> Option<Value> {
        match self {
            UpgradeTarget::AlreadyDesired => None,
            UpgradeTarget::Recommended(release) | UpgradeTarget::NotRecommended(release) => {
                Some(json!({ "version": release.version, "image": release.image }))
            }
            UpgradeTarget::Forced(version) => Some(json!({ "version": version, "force": true })),
        }
    }
}

/// Decide how to request `version` given what the cluster offers.
///
/// Conditional and unknown versions need the not-recommended annotation.
pub fn resolve_upgrade_target(
    view: &ClusterVersionView,
    version: &str,
    allow_not_recommended: bool,
) -> OperatorResult<UpgradeTarget> {
    let status = &view.status;

    if status.desired.as_ref().map(|d| d.version.as_str()) == Some(version) {
        return Ok(UpgradeTarget::AlreadyDesired);
    }

    if let Some(release) = status
        .available_updates
        .iter()
        .flatten()
        .find(|r| r.version == version)
    {
        return Ok(UpgradeTarget::Recommended(release.clone()));
    }

    if let Some(update) = status
        .conditional_updates
        .iter()
        .flatten()
        .find(|u| u.release.version == version)
    {
        return if allow_not_recommended {
            Ok(UpgradeTarget::NotRecommended(update.release.clone()))
        } else {
            Err(OperatorError::UpgradeRejected(format!(
                "{} is only a conditional update; set the upgrade-allow-not-recommended-versions annotation to use it",
                version
            )))
        };
    }

    if allow_not_recommended {
        Ok(UpgradeTarget::Forced(version.to_string()))
    } else {
        Err(OperatorError::UpgradeRejected(format!(
            "{} is not an available update for this cluster",
            version
        )))
    }
}

/// Whether the newest history entry reports `version` as completed.
pub fn history_reports_version(history: &[UpdateHistory], version: &str) -> bool {
    history
        .first()
        .map(|h| h.version == version && h.state == "Completed")
        .unwrap_or(false)
}

/// Release image of a hosted cluster version.
pub fn hosted_release_image(repo: &str, version: &str) -> String {
    format!("{}:{}-multi", repo, version)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ActionState {
    Completed,
    Failed(String),
    Pending,
}

fn str_field<'a>(value: &'a Value, name: &str) -> &'a str {
    value.get(name).and_then(Value::as_str).unwrap_or_default()
}

fn action_state(action: &DynamicObject) -> ActionState {
    let Some(completed) = condition(action, "Completed") else {
        return ActionState::Pending;
    };
    let reason = str_field(completed, "reason");

    match str_field(completed, "status") {
        "True" => ActionState::Completed,
        "False" if reason.contains("Fail") => {
            let message = str_field(completed, "message");
            ActionState::Failed(if message.is_empty() {
                reason.to_string()
            } else {
                message.to_string()
            })
        }
        _ => ActionState::Pending,
    }
}

fn upgrade_section(curator: &ClusterCurator) -> OperatorResult<&UpgradeHooks> {
    curator.spec.upgrade.as_ref().ok_or_else(|| {
        OperatorError::InvalidConfig("desiredCuration upgrade requires an upgrade section".into())
    })
}

async fn is_hosted(runner: &StepRunner) -> OperatorResult<bool> {
    let hosted: Api<DynamicObject> =
        Api::namespaced_with(runner.client().clone(), runner.namespace(), &hosted_cluster());
    Ok(hosted.get_opt(runner.cluster()).await?.is_some())
}

pub(super) async fn upgrade_cluster(
    runner: &StepRunner,
    curator: &ClusterCurator,
) -> OperatorResult<String> {
    let upgrade = upgrade_section(curator)?;

    if is_hosted(runner).await? {
        upgrade_hosted(runner, upgrade).await
    } else {
        upgrade_managed(runner, curator, upgrade).await
    }
}

async fn upgrade_hosted(runner: &StepRunner, upgrade: &UpgradeHooks) -> OperatorResult<String> {
    let cluster = runner.cluster();
    let image = upgrade
        .desired_update
        .as_deref()
        .map(|v| hosted_release_image(&runner.config().release_image_repo, v));

    let mut spec = Map::new();
    if let Some(image) = &image {
        spec.insert("release".into(), json!({ "image": image }));
    }
    if let Some(channel) = &upgrade.channel {
        spec.insert("channel".into(), json!(channel));
    }
    if spec.is_empty() {
        return Ok("Nothing to change on HostedCluster".to_string());
    }

    audit_logger().log_upgrade_requested(
        cluster,
        runner.namespace(),
        upgrade.desired_update.as_deref(),
        upgrade.channel.as_deref(),
        "unverified",
    );

    let hosted: Api<DynamicObject> =
        Api::namespaced_with(runner.client().clone(), runner.namespace(), &hosted_cluster());
    hosted
        .patch(
            cluster,
            &PatchParams::default(),
            &Patch::Merge(&json!({ "spec": spec })),
        )
        .await?;
    tracing::info!(cluster = %cluster, image = ?image, channel = ?upgrade.channel, "Patched HostedCluster");

    if let Some(image) = &image {
        let pools: Api<DynamicObject> =
            Api::namespaced_with(runner.client().clone(), runner.namespace(), &node_pool());
        let patch = json!({ "spec": { "release": { "image": image } } });
        for pool in node_pools(runner).await? {
            let name = pool.name_any();
            pools
                .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
            tracing::info!(cluster = %cluster, node_pool = %name, "Patched NodePool release");
        }
    }

    Ok(match image {
        Some(image) => format!("HostedCluster {} upgrading to {}", cluster, image),
        None => format!("HostedCluster {} moved to a new channel", cluster),
    })
}

async fn upgrade_managed(
    runner: &StepRunner,
    curator: &ClusterCurator,
    upgrade: &UpgradeHooks,
) -> OperatorResult<String> {
    let cluster = runner.cluster();

    let desired_update = match &upgrade.desired_update {
        Some(version) => {
            let view = read_cluster_version(runner).await?;
            let target =
                resolve_upgrade_target(&view, version, curator.allows_not_recommended_upgrades())?;
            if target != UpgradeTarget::AlreadyDesired {
                audit_logger().log_upgrade_requested(
                    cluster,
                    runner.namespace(),
                    Some(version),
                    upgrade.channel.as_deref(),
                    target.recommendation(),
                );
            }
            target.desired_update()
        }
        None => None,
    };

    let mut spec = Map::new();
    if let Some(channel) = &upgrade.channel {
        spec.insert("channel".into(), json!(channel));
    }
    if let Some(upstream) = &upgrade.upstream {
        spec.insert("upstream".into(), json!(upstream));
    }
    if let Some(update) = desired_update {
        spec.insert("desiredUpdate".into(), update);
    }
    if spec.is_empty() {
        return Ok(format!("Cluster {} already targets the requested version", cluster));
    }

    let actions: Api<DynamicObject> = Api::namespaced_with(
        runner.client().clone(),
        runner.namespace(),
        &managed_cluster_action(),
    );
    let mut action = DynamicObject::new("", &managed_cluster_action())
        .within(runner.namespace())
        .data(json!({
            "spec": {
                "actionType": "Update",
                "kube": {
                    "resource": "clusterversion",
                    "name": "version",
                    "template": {
                        "apiVersion": "config.openshift.io/v1",
                        "kind": "ClusterVersion",
                        "metadata": { "name": "version" },
                        "spec": spec,
                    },
                },
            },
        }));
    action.metadata.name = None;
    action.metadata.generate_name = Some("curator-upgrade-".to_string());

    let created = actions.create(&PostParams::default(), &action).await?;
    let action_name = created.name_any();
    tracing::info!(cluster = %cluster, action = %action_name, "Created ManagedClusterAction");

    let what = format!("ManagedClusterAction {} to complete", action_name);
    poll_until(
        &what,
        minutes(u64::from(upgrade.hooks.job_monitor_timeout)),
        runner.config().poll_interval,
        || {
            let actions = actions.clone();
            let action_name = action_name.clone();
            async move {
                let action = actions.get(&action_name).await?;
                match action_state(&action) {
                    ActionState::Completed => Ok(Some(())),
                    ActionState::Pending => Ok(None),
                    ActionState::Failed(reason) => Err(OperatorError::UpgradeRejected(format!(
                        "ManagedClusterAction {} failed: {}",
                        action_name, reason
                    ))),
                }
            }
        },
    )
    .await?;

    Ok(format!("Upgrade requested on cluster {}", cluster))
}

/// Create the ClusterVersion view if needed and wait for its first result.
async fn read_cluster_version(runner: &StepRunner) -> OperatorResult<ClusterVersionView> {
    let views: Api<DynamicObject> = Api::namespaced_with(
        runner.client().clone(),
        runner.namespace(),
        &managed_cluster_view(),
    );

    if views.get_opt(CLUSTER_VERSION_VIEW).await?.is_none() {
        let view = DynamicObject::new(CLUSTER_VERSION_VIEW, &managed_cluster_view())
            .within(runner.namespace())
            .data(json!({
                "spec": {
                    "scope": {
                        "apiGroup": "config.openshift.io",
                        "version": "v1",
                        "kind": "ClusterVersion",
                        "name": "version",
                    },
                },
            }));
        views.create(&PostParams::default(), &view).await?;
        tracing::info!(cluster = %runner.cluster(), "Created ClusterVersion view");
    }

    let what = format!("ManagedClusterView {}", CLUSTER_VERSION_VIEW);
    poll_until(&what, minutes(5), runner.config().poll_interval, || {
        let views = views.clone();
        async move {
            let view = views.get(CLUSTER_VERSION_VIEW).await?;
            match view.data.get("status").and_then(|s| s.get("result")) {
                Some(result) if !result.is_null() => {
                    Ok(Some(serde_json::from_value::<ClusterVersionView>(result.clone())?))
                }
                _ => Ok(None),
            }
        }
    })
    .await
}

pub(super) async fn monitor_upgrade(
    runner: &StepRunner,
    curator: &ClusterCurator,
) -> OperatorResult<String> {
    let upgrade = upgrade_section(curator)?;
    let Some(version) = upgrade.desired_update.clone() else {
        return Ok("No version to monitor".to_string());
    };
    let timeout = minutes(u64::from(upgrade.monitor_timeout));
    let interval = runner.config().poll_interval;
    let what = format!("cluster {} to reach {}", runner.cluster(), version);

    if is_hosted(runner).await? {
        let hosted: Api<DynamicObject> =
            Api::namespaced_with(runner.client().clone(), runner.namespace(), &hosted_cluster());
        let cluster = runner.cluster().to_string();
        poll_until(&what, timeout, interval, || {
            let hosted = hosted.clone();
            let cluster = cluster.clone();
            let version = version.clone();
            async move {
                let hc = hosted.get(&cluster).await?;
                let history: Vec<UpdateHistory> = hc
                    .data
                    .get("status")
                    .and_then(|s| s.get("version"))
                    .and_then(|v| v.get("history"))
                    .cloned()
                    .map(serde_json::from_value::<Vec<UpdateHistory>>)
                    .transpose()?
                    .unwrap_or_default();
                Ok(history_reports_version(&history, &version).then_some(()))
            }
        })
        .await?;
    } else {
        poll_until(&what, timeout, interval, || {
            let version = version.clone();
            async move {
                let view = read_cluster_version(runner).await?;
                Ok(history_reports_version(view.history(), &version).then_some(()))
            }
        })
        .await?;
    }

    Ok(format!("Cluster {} upgraded to {}", runner.cluster(), version))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(value: Value) -> ClusterVersionView {
        serde_json::from_value(value).unwrap()
    }

    fn sample() -> ClusterVersionView {
        view(json!({
            "apiVersion": "config.openshift.io/v1",
            "kind": "ClusterVersion",
            "spec": {"channel": "stable-4.15"},
            "status": {
                "desired": {"version": "4.15.2", "image": "quay.io/ocp@sha256:aaa"},
                "availableUpdates": [
                    {"version": "4.15.3", "image": "quay.io/ocp@sha256:bbb"}
                ],
                "conditionalUpdates": [
                    {"release": {"version": "4.15.5", "image": "quay.io/ocp@sha256:ccc"},
                     "risks": [{"name": "SomeRisk"}]}
                ],
                "history": [
                    {"state": "Completed", "version": "4.15.2"},
                    {"state": "Completed", "version": "4.15.1"}
                ]
            }
        }))
    }

    #[test]
    fn recommended_target() {
        let target = resolve_upgrade_target(&sample(), "4.15.3", false).unwrap();
        assert_eq!(
            target.desired_update(),
            Some(json!({"version": "4.15.3", "image": "quay.io/ocp@sha256:bbb"}))
        );
        assert_eq!(target.recommendation(), "recommended");
    }

    #[test]
    fn conditional_target_requires_annotation() {
        let err = resolve_upgrade_target(&sample(), "4.15.5", false).unwrap_err();
        assert!(matches!(err, OperatorError::UpgradeRejected(_)));

        let target = resolve_upgrade_target(&sample(), "4.15.5", true).unwrap();
        assert_eq!(target.recommendation(), "not-recommended");
    }

    #[test]
    fn unknown_target_is_forced_only_with_annotation() {
        assert!(resolve_upgrade_target(&sample(), "4.16.0", false).is_err());

        let target = resolve_upgrade_target(&sample(), "4.16.0", true).unwrap();
        assert_eq!(target, UpgradeTarget::Forced("4.16.0".into()));
        assert_eq!(
            target.desired_update(),
            Some(json!({"version": "4.16.0", "force": true}))
        );
    }

    #[test]
    fn current_version_needs_no_update() {
        let target = resolve_upgrade_target(&sample(), "4.15.2", false).unwrap();
        assert_eq!(target, UpgradeTarget::AlreadyDesired);
        assert_eq!(target.desired_update(), None);
    }

    #[test]
    fn null_update_lists_are_tolerated() {
        let v = view(json!({"status": {"availableUpdates": null, "conditionalUpdates": null}}));
        assert!(resolve_upgrade_target(&v, "4.15.3", false).is_err());
        assert!(v.history().is_empty());
    }

    #[test]
    fn history_checks_newest_entry() {
        let history = sample();
        assert!(history_reports_version(history.history(), "4.15.2"));
        assert!(!history_reports_version(history.history(), "4.15.1"));

        let partial = vec![UpdateHistory {
            state: "Partial".into(),
            version: "4.15.3".into(),
        }];
        assert!(!history_reports_version(&partial, "4.15.3"));
    }

    #[test]
    fn hosted_release_image_uses_multi_arch_tag() {
        assert_eq!(
            hosted_release_image("quay.io/openshift-release-dev/ocp-release", "4.15.3"),
            "quay.io/openshift-release-dev/ocp-release:4.15.3-multi"
        );
    }

    #[test]
    fn action_states() {
        let ar = managed_cluster_action();
        let with = |conditions: Value| {
            DynamicObject::new("curator-upgrade-abcde", &ar)
                .within("cluster1")
                .data(json!({"status": {"conditions": conditions}}))
        };

        assert_eq!(action_state(&with(json!([]))), ActionState::Pending);
        assert_eq!(
            action_state(&with(json!([{"type": "Completed", "status": "True"}]))),
            ActionState::Completed
        );
        assert_eq!(
            action_state(&with(json!([{
                "type": "Completed",
                "status": "False",
                "reason": "ActionFailed",
                "message": "the server rejected our request"
            }]))),
            ActionState::Failed("the server rejected our request".into())
        );
        assert_eq!(
            action_state(&with(json!([{
                "type": "Completed",
                "status": "False",
                "reason": "ActionProcessing"
            }]))),
            ActionState::Pending
        );
    }
}

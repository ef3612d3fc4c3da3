//! ClusterCurator Custom Resource Definition.
//!
//! Expresses the automation and upgrade intent for one managed cluster. The
//! resource is named after the cluster and lives in the cluster's namespace.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Annotation that allows upgrades to versions the cluster does not recommend.
pub const ALLOW_NOT_RECOMMENDED_ANNOTATION: &str =
    "cluster.open-cluster-management.io/upgrade-allow-not-recommended-versions";

/// Condition type describing the curation as a whole.
pub const CURATOR_JOB_CONDITION: &str = "clustercurator-job";

/// Reason used while a step or curation is running.
pub const REASON_EXECUTING: &str = "Job_executing";

/// Reason used once a step or curation finished successfully.
pub const REASON_FINISHED: &str = "Job_has_finished";

/// Reason used when a step or curation failed.
pub const REASON_FAILED: &str = "Job_failed";

/// ClusterCurator is the Schema for the clustercurators API.
///
/// Setting `desiredCuration` makes the operator launch a curator Job that runs
/// the pre-hooks, the core action for that curation and the post-hooks, in
/// that order.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "cluster.open-cluster-management.io",
    version = "v1beta1",
    kind = "ClusterCurator",
    plural = "clustercurators",
    namespaced,
    status = "ClusterCuratorStatus",
    printcolumn = r#"{"name":"Curation", "type":"string", "jsonPath":".spec.desiredCuration"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Job", "type":"string", "jsonPath":".status.curatorJob"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCuratorSpec {
    /// Curation to run. Nothing happens while unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_curation: Option<Curation>,

    /// Automation platform inventory passed to every hook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<String>,

    /// Hooks run around cluster activation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<Hooks>,

    /// Hooks run for a scale curation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Hooks>,

    /// Hooks run around cluster destruction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destroy: Option<Hooks>,

    /// Upgrade target and the hooks run around it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade: Option<UpgradeHooks>,
}

/// Curation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Curation {
    /// Activate provisioning of a new cluster.
    Install,
    /// Upgrade the cluster to a new version or channel.
    Upgrade,
    /// Run scale hooks.
    Scale,
    /// Destroy the cluster.
    Destroy,
}

impl Curation {
    /// Lowercase name as used in `desiredCuration`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Curation::Install => "install",
            Curation::Upgrade => "upgrade",
            Curation::Scale => "scale",
            Curation::Destroy => "destroy",
        }
    }
}

impl fmt::Display for Curation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Curation {
    type Err = crate::error::OperatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "install" => Ok(Curation::Install),
            "upgrade" => Ok(Curation::Upgrade),
            "scale" => Ok(Curation::Scale),
            "destroy" => Ok(Curation::Destroy),
            other => Err(crate::error::OperatorError::InvalidConfig(format!(
                "Unknown curation: {}",
                other
            ))),
        }
    }
}

/// Pre- and post-hooks for one curation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Hooks {
    /// Secret in the cluster namespace holding the automation platform
    /// `host` and `token`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tower_auth_secret: Option<String>,

    /// Hooks run before the core action, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prehook: Vec<Hook>,

    /// Hooks run after the core action, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub posthook: Vec<Hook>,

    /// Minutes to wait for each hook to finish.
    #[serde(default = "default_job_monitor_timeout")]
    pub job_monitor_timeout: u32,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            tower_auth_secret: None,
            prehook: Vec::new(),
            posthook: Vec::new(),
            job_monitor_timeout: default_job_monitor_timeout(),
        }
    }
}

impl Hooks {
    /// Hooks for the given phase.
    pub fn for_phase(&self, phase: HookPhase) -> &[Hook] {
        match phase {
            HookPhase::Prehook => &self.prehook,
            HookPhase::Posthook => &self.posthook,
        }
    }

    /// Whether any hook is configured.
    pub fn has_hooks(&self) -> bool {
        !self.prehook.is_empty() || !self.posthook.is_empty()
    }
}

fn default_job_monitor_timeout() -> u32 {
    5
}

/// Upgrade intent plus hooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeHooks {
    /// Hooks run around the upgrade.
    #[serde(flatten)]
    pub hooks: Hooks,

    /// Version to upgrade to, e.g. `4.15.3`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_update: Option<String>,

    /// Update channel to switch to, e.g. `stable-4.15`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Update server URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,

    /// Minutes to wait for the upgrade to complete.
    #[serde(default = "default_monitor_timeout")]
    pub monitor_timeout: u32,
}

impl Default for UpgradeHooks {
    fn default() -> Self {
        Self {
            hooks: Hooks::default(),
            desired_update: None,
            channel: None,
            upstream: None,
            monitor_timeout: default_monitor_timeout(),
        }
    }
}

fn default_monitor_timeout() -> u32 {
    120
}

/// A job or workflow template run on the automation platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Hook {
    /// Template name.
    pub name: String,

    /// Extra variables passed to the template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub extra_vars: Option<serde_json::Value>,

    /// Whether `name` refers to a job template or a workflow template.
    #[serde(rename = "type", default)]
    pub hook_type: HookType,
}

/// Template type of a hook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum HookType {
    /// Job template.
    #[default]
    Job,
    /// Workflow template.
    Workflow,
}

/// Which side of the core action a hook runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    /// Before the core action.
    Prehook,
    /// After the core action.
    Posthook,
}

impl HookPhase {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HookPhase::Prehook => "prehook",
            HookPhase::Posthook => "posthook",
        }
    }
}

fn preserve_unknown_fields(_gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    let mut schema = schemars::schema::SchemaObject {
        instance_type: Some(schemars::schema::InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    schemars::schema::Schema::Object(schema)
}

/// ClusterCurator status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCuratorStatus {
    /// Current phase of the curation.
    #[serde(default)]
    pub phase: CurationPhase,

    /// Name of the Job running the current or last curation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curator_job: Option<String>,

    /// Curation the Job was launched for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_curation: Option<Curation>,

    /// Generation the current or last curation was launched for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Human-readable message about current state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Conditions for the curation and each of its steps.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<CuratorCondition>,
}

/// Curation phase.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum CurationPhase {
    /// No curation launched yet.
    #[default]
    Pending,
    /// A curator Job is running.
    Running,
    /// The last curation finished successfully.
    Succeeded,
    /// The last curation failed.
    Failed,
}

impl CurationPhase {
    /// Whether the phase ends a curation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CurationPhase::Succeeded | CurationPhase::Failed)
    }
}

/// Condition representing curation or step state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CuratorCondition {
    /// Condition type: `clustercurator-job` or a step name.
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Status of the condition (True, False, Unknown).
    pub status: String,

    /// Last time the condition transitioned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,

    /// Reason for the condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// State written into a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionState {
    /// Still running.
    Executing,
    /// Finished successfully.
    Finished,
    /// Failed.
    Failed,
}

impl ConditionState {
    fn status(&self) -> &'static str {
        match self {
            ConditionState::Executing => "False",
            ConditionState::Finished | ConditionState::Failed => "True",
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            ConditionState::Executing => REASON_EXECUTING,
            ConditionState::Finished => REASON_FINISHED,
            ConditionState::Failed => REASON_FAILED,
        }
    }
}

impl CuratorCondition {
    /// Build a condition stamped with the current time.
    pub fn new(condition_type: &str, state: ConditionState, message: impl Into<String>) -> Self {
        Self {
            condition_type: condition_type.to_string(),
            status: state.status().to_string(),
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
            reason: Some(state.reason().to_string()),
            message: Some(message.into()),
        }
    }

    /// State encoded by this condition, if it uses one of the curator reasons.
    pub fn state(&self) -> Option<ConditionState> {
        match self.reason.as_deref() {
            Some(REASON_EXECUTING) => Some(ConditionState::Executing),
            Some(REASON_FINISHED) => Some(ConditionState::Finished),
            Some(REASON_FAILED) => Some(ConditionState::Failed),
            _ => None,
        }
    }
}

impl ClusterCuratorStatus {
    /// Find a condition by type.
    pub fn condition(&self, condition_type: &str) -> Option<&CuratorCondition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Insert or replace the condition with the same type.
    ///
    /// The previous transition time is kept when status and reason are
    /// unchanged, so message-only updates do not look like transitions.
    pub fn set_condition(&mut self, mut condition: CuratorCondition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(existing) => {
                if existing.status == condition.status && existing.reason == condition.reason {
                    condition.last_transition_time = existing.last_transition_time.clone();
                }
                *existing = condition;
            }
            None => self.conditions.push(condition),
        }
    }
}

impl ClusterCuratorSpec {
    /// Hooks configured for a curation.
    pub fn hooks_for(&self, curation: Curation) -> Option<&Hooks> {
        match curation {
            Curation::Install => self.install.as_ref(),
            Curation::Scale => self.scale.as_ref(),
            Curation::Destroy => self.destroy.as_ref(),
            Curation::Upgrade => self.upgrade.as_ref().map(|u| &u.hooks),
        }
    }
}

impl ClusterCurator {
    /// Whether the not-recommended upgrade annotation is set to `true`.
    pub fn allows_not_recommended_upgrades(&self) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(ALLOW_NOT_RECOMMENDED_ANNOTATION))
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// Current phase, `Pending` when no status was written yet.
    pub fn phase(&self) -> CurationPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn parse_documented_install_example() {
        let yaml = r#"
desiredCuration: install
install:
  towerAuthSecret: toweraccess
  prehook:
    - name: Demo Job Template
      extra_vars:
        variable1: something-interesting
        variable2: 2
    - name: Demo Workflow
      type: Workflow
  posthook:
    - name: Demo Job Template
"#;
        let spec: ClusterCuratorSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.desired_curation, Some(Curation::Install));

        let install = spec.install.as_ref().unwrap();
        assert_eq!(install.tower_auth_secret.as_deref(), Some("toweraccess"));
        assert_eq!(install.job_monitor_timeout, 5);
        assert_eq!(install.prehook.len(), 2);
        assert_eq!(install.prehook[0].hook_type, HookType::Job);
        assert_eq!(install.prehook[1].hook_type, HookType::Workflow);
        assert_eq!(
            install.prehook[0].extra_vars.as_ref().unwrap()["variable2"],
            serde_json::json!(2)
        );
        assert_eq!(install.posthook.len(), 1);
    }

    #[test]
    fn parse_upgrade_section_with_flattened_hooks() {
        let yaml = r#"
desiredCuration: upgrade
upgrade:
  desiredUpdate: 4.15.3
  channel: stable-4.15
  towerAuthSecret: toweraccess
  posthook:
    - name: Notify
"#;
        let spec: ClusterCuratorSpec = serde_yaml::from_str(yaml).unwrap();
        let upgrade = spec.upgrade.as_ref().unwrap();
        assert_eq!(upgrade.desired_update.as_deref(), Some("4.15.3"));
        assert_eq!(upgrade.monitor_timeout, 120);
        assert_eq!(upgrade.hooks.posthook.len(), 1);
        assert_eq!(
            spec.hooks_for(Curation::Upgrade)
                .and_then(|h| h.tower_auth_secret.as_deref()),
            Some("toweraccess")
        );
    }

    #[test]
    fn set_condition_keeps_transition_time_on_message_change() {
        let mut status = ClusterCuratorStatus::default();
        let mut first =
            CuratorCondition::new("prehook-ansiblejob", ConditionState::Executing, "starting");
        first.last_transition_time = Some("2024-01-01T00:00:00Z".into());
        status.set_condition(first);

        status.set_condition(CuratorCondition::new(
            "prehook-ansiblejob",
            ConditionState::Executing,
            "AnsibleJob ns/prehookjob-abcde",
        ));
        let cond = status.condition("prehook-ansiblejob").unwrap();
        assert_eq!(
            cond.last_transition_time.as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
        assert_eq!(cond.message.as_deref(), Some("AnsibleJob ns/prehookjob-abcde"));
        assert_eq!(status.conditions.len(), 1);

        status.set_condition(CuratorCondition::new(
            "prehook-ansiblejob",
            ConditionState::Finished,
            "done",
        ));
        let cond = status.condition("prehook-ansiblejob").unwrap();
        assert_ne!(
            cond.last_transition_time.as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
        assert_eq!(cond.status, "True");
        assert_eq!(cond.state(), Some(ConditionState::Finished));
    }

    #[test]
    fn not_recommended_annotation() {
        let mut curator = ClusterCurator::new("cluster1", ClusterCuratorSpec::default());
        assert!(!curator.allows_not_recommended_upgrades());

        curator.metadata.annotations = Some(
            [(ALLOW_NOT_RECOMMENDED_ANNOTATION.to_string(), "true".to_string())]
                .into_iter()
                .collect(),
        );
        assert!(curator.allows_not_recommended_upgrades());
    }

    #[test]
    fn crd_preserves_extra_vars() {
        let crd = serde_json::to_string(&ClusterCurator::crd()).unwrap();
        assert!(crd.contains("x-kubernetes-preserve-unknown-fields"));
        assert!(crd.contains("clustercurators"));
    }

    #[test]
    fn curation_parses_case_insensitively() {
        assert_eq!("install".parse::<Curation>().unwrap(), Curation::Install);
        assert_eq!("Destroy".parse::<Curation>().unwrap(), Curation::Destroy);
        assert!("rollback".parse::<Curation>().is_err());
    }
}

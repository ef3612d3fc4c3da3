//! AnsibleJob resource of the automation platform resource operator.
//!
//! The operator only creates and reads these objects, so no schema is
//! generated for them.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// AnsibleJob runs a job or workflow template on the automation platform.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize)]
#[kube(
    group = "tower.ansible.com",
    version = "v1alpha1",
    kind = "AnsibleJob",
    plural = "ansiblejobs",
    namespaced,
    status = "AnsibleJobStatus",
    schema = "disabled"
)]
pub struct AnsibleJobSpec {
    /// Job template to launch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_template_name: Option<String>,

    /// Workflow template to launch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_template_name: Option<String>,

    /// Secret holding the platform host and token.
    pub tower_auth_secret: String,

    /// Inventory to run against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<String>,

    /// Extra variables for the template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_vars: Option<serde_json::Value>,
}

/// AnsibleJob status as reported by the resource operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnsibleJobStatus {
    /// Result of the platform job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ansible_job_result: Option<AnsibleJobResult>,

    /// Kubernetes Job used to launch the platform job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k8s_job: Option<serde_json::Value>,
}

/// Outcome of the platform job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnsibleJobResult {
    /// Platform job status (`pending`, `running`, `successful`, `failed`, ...).
    #[serde(default)]
    pub status: String,

    /// Start timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<String>,

    /// Finish timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<String>,

    /// Link to the platform job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Progress of an AnsibleJob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnsibleJobOutcome {
    /// Not finished yet.
    Running,
    /// Finished successfully.
    Successful,
    /// Finished unsuccessfully, with the reported status.
    Failed(String),
}

impl AnsibleJob {
    /// Classify the job from its status.
    pub fn outcome(&self) -> AnsibleJobOutcome {
        let status = self
            .status
            .as_ref()
            .and_then(|s| s.ansible_job_result.as_ref())
            .map(|r| r.status.to_ascii_lowercase())
            .unwrap_or_default();

        match status.as_str() {
            "successful" => AnsibleJobOutcome::Successful,
            "failed" | "error" | "canceled" => AnsibleJobOutcome::Failed(status),
            _ => AnsibleJobOutcome::Running,
        }
    }
}

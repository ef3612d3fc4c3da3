//! Curation progress reporting.
//!
//! Summarizes the per-step conditions written by the curator Job into a
//! single status message for `kubectl get clustercurator`.
//!
//! # Example
//!
//! ```ignore
//! let formatter = StatusFormatter::new();
//! let progress = formatter.compute_progress(Curation::Install, &steps, &status);
//! let message = formatter.format_message(&progress);
//! // message: "install running activate-and-monitor (1/3 steps complete)"
//! ```

use crate::crd::{ClusterCurator, ClusterCuratorStatus, ConditionState, Curation};
use crate::curation::{Step, tracked_steps};
use crate::error::{OperatorError, OperatorResult};
use kube::api::{Patch, PatchParams};
use kube::{Api, ResourceExt};
use serde_json::{Map, Value, json};

/// Attempts for a status write that keeps hitting conflicts.
const STATUS_WRITE_ATTEMPTS: usize = 5;

/// Progress of one curation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurationProgress {
    /// Curation being run.
    pub curation: Curation,
    /// Number of steps that report a condition.
    pub total_steps: usize,
    /// Steps finished successfully.
    pub finished_steps: usize,
    /// Step currently executing.
    pub running_step: Option<Step>,
    /// First failed step and its message.
    pub failed_step: Option<(Step, String)>,
}

/// Builds progress summaries from step conditions.
pub struct StatusFormatter;

impl StatusFormatter {
    /// Create a new status formatter.
    pub fn new() -> Self {
        Self
    }

    /// Compute progress for a plan from the recorded conditions.
    ///
    /// Steps without a condition have not started.
    pub fn compute_progress(
        &self,
        curation: Curation,
        steps: &[Step],
        status: &ClusterCuratorStatus,
    ) -> CurationProgress {
        let mut progress = CurationProgress {
            curation,
            total_steps: 0,
            finished_steps: 0,
            running_step: None,
            failed_step: None,
        };

        for step in tracked_steps(steps) {
            progress.total_steps += 1;
            let Some(condition) = status.condition(step.as_str()) else {
                continue;
            };
            match condition.state() {
                Some(ConditionState::Finished) => progress.finished_steps += 1,
                Some(ConditionState::Executing) => {
                    progress.running_step.get_or_insert(*step);
                }
                Some(ConditionState::Failed) => {
                    if progress.failed_step.is_none() {
                        let message = condition.message.clone().unwrap_or_default();
                        progress.failed_step = Some((*step, message));
                    }
                }
                None => {}
            }
        }

        progress
    }

    /// Build a human-readable status message from progress.
    ///
    /// - **Failed**: "install failed at prehook-ansiblejob: AnsibleJob ... failed"
    /// - **Complete**: "install complete (3/3 steps)"
    /// - **Running**: "install running activate-and-monitor (1/3 steps complete)"
    /// - **Not started**: "install pending (0/3 steps complete)"
    ///
    /// A plan with no tracked steps stays pending; the controller decides
    /// when such a curation is complete from the Job outcome.
    pub fn format_message(&self, progress: &CurationProgress) -> String {
        if let Some((step, message)) = &progress.failed_step {
            if message.is_empty() {
                format!("{} failed at {}", progress.curation, step)
            } else {
                format!("{} failed at {}: {}", progress.curation, step, message)
            }
        } else if progress.total_steps > 0 && progress.finished_steps == progress.total_steps {
            format!(
                "{} complete ({}/{} steps)",
                progress.curation, progress.finished_steps, progress.total_steps
            )
        } else if let Some(step) = progress.running_step {
            format!(
                "{} running {} ({}/{} steps complete)",
                progress.curation, step, progress.finished_steps, progress.total_steps
            )
        } else {
            format!(
                "{} pending ({}/{} steps complete)",
                progress.curation, progress.finished_steps, progress.total_steps
            )
        }
    }
}

impl Default for StatusFormatter {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-modify-write of a ClusterCurator status.
///
/// `update` edits a fresh copy of the status and returns the other status
/// fields to write next to its conditions. The patch carries the
/// `resourceVersion` it was computed from, so a concurrent writer makes the
/// API server answer with a conflict and the update is recomputed from the
/// newer object.
pub(crate) async fn update_status<F>(
    api: &Api<ClusterCurator>,
    name: &str,
    mut update: F,
) -> OperatorResult<()>
where
    F: FnMut(&mut ClusterCuratorStatus) -> Value,
{
    for attempt in 1..=STATUS_WRITE_ATTEMPTS {
        let mut curator = api.get(name).await?;
        let mut status = curator.status.take().unwrap_or_default();

        let mut fields = match update(&mut status) {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };
        fields.insert(
            "conditions".to_string(),
            serde_json::to_value(&status.conditions)?,
        );

        let patch = json!({
            "metadata": { "resourceVersion": curator.resource_version() },
            "status": fields,
        });

        match api
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => return Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                tracing::debug!(name = %name, attempt, "Conflict writing status, retrying");
            }
            Err(e) => {
                return Err(OperatorError::StatusUpdate {
                    name: name.to_string(),
                    cause: e.to_string(),
                });
            }
        }
    }

    Err(OperatorError::StatusUpdate {
        name: name.to_string(),
        cause: format!("still conflicting after {} attempts", STATUS_WRITE_ATTEMPTS),
    })
}

//! ClusterCurator controller.
//!
//! Launches a curator Job for the requested curation and mirrors the Job's
//! outcome into the ClusterCurator status. At most one curator Job runs per
//! cluster; spec changes made while a Job runs are picked up once it ends,
//! because `observedGeneration` then differs from the object's generation.

use super::{ControllerContext, ReconcileAction};
use crate::audit::audit_logger;
use crate::crd::{
    CURATOR_JOB_CONDITION, ClusterCurator, ClusterCuratorStatus, ConditionState, Curation,
    CurationPhase, CuratorCondition,
};
use crate::curation::{Step, needs_credentials, plan};
use crate::error::{OperatorError, OperatorResult};
use crate::resources::{CLUSTER_LABEL, build_curator_job};
use crate::security::TowerCredentialsResolver;
use crate::status::{StatusFormatter, update_status};
use crate::validation::validate_spec;
use k8s_openapi::api::batch::v1::Job;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, ResourceExt};
use serde_json::json;
use std::sync::Arc;

/// What a reconcile should do with a ClusterCurator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    /// No curation requested.
    Idle,
    /// A curator Job is running; follow it.
    Monitor {
        /// Name of the curator Job.
        job: String,
    },
    /// The current generation already finished.
    Settled,
    /// Launch a curator Job for the curation.
    Launch(Curation),
}

/// Decide the next action from the object alone.
pub fn next_action(curator: &ClusterCurator) -> NextAction {
    let Some(curation) = curator.spec.desired_curation else {
        return NextAction::Idle;
    };

    if let Some(status) = &curator.status {
        if status.phase == CurationPhase::Running {
            if let Some(job) = &status.curator_job {
                return NextAction::Monitor { job: job.clone() };
            }
        }
        if status.phase.is_terminal() && status.observed_generation == curator.metadata.generation
        {
            return NextAction::Settled;
        }
    }

    NextAction::Launch(curation)
}

/// Progress of a batch Job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Pods still running or pending.
    Running,
    /// The Job completed.
    Succeeded,
    /// The Job failed, with the reason Kubernetes reported.
    Failed(String),
}

/// Classify a batch Job from its status.
pub fn job_outcome(job: &Job) -> JobOutcome {
    let Some(status) = job.status.as_ref() else {
        return JobOutcome::Running;
    };
    let conditions = status.conditions.as_deref().unwrap_or_default();
    let condition_true = |condition_type: &str| {
        conditions
            .iter()
            .find(|c| c.type_ == condition_type && c.status == "True")
    };

    if let Some(failed) = condition_true("Failed") {
        return JobOutcome::Failed(
            failed
                .message
                .clone()
                .or_else(|| failed.reason.clone())
                .unwrap_or_else(|| "Job failed".to_string()),
        );
    }
    if condition_true("Complete").is_some() || status.succeeded.unwrap_or(0) > 0 {
        return JobOutcome::Succeeded;
    }
    if status.failed.unwrap_or(0) > 0 {
        return JobOutcome::Failed("Job pod failed".to_string());
    }
    JobOutcome::Running
}

/// Message for a failed curation, preferring the failing step's condition.
fn failure_message(curation: Curation, status: &ClusterCuratorStatus, job_reason: &str) -> String {
    let formatter = StatusFormatter::new();
    let progress = formatter.compute_progress(curation, &Step::ALL, status);
    if progress.failed_step.is_some() {
        formatter.format_message(&progress)
    } else {
        format!("{} failed: {}", curation, job_reason)
    }
}

/// Controller for ClusterCurator resources.
#[derive(Clone)]
pub struct CuratorController {
    ctx: Arc<ControllerContext>,
}

impl CuratorController {
    /// Create a new curator controller.
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx }
    }

    /// Reconcile a ClusterCurator resource.
    pub async fn reconcile(&self, curator: Arc<ClusterCurator>) -> OperatorResult<ReconcileAction> {
        let name = curator.name_any();
        let namespace = curator
            .namespace()
            .ok_or_else(|| OperatorError::InvalidConfig("ClusterCurator must be namespaced".into()))?;

        let curators: Api<ClusterCurator> = Api::namespaced(self.ctx.client.clone(), &namespace);

        match next_action(&curator) {
            NextAction::Idle => {
                tracing::debug!(name = %name, "No curation requested");
                Ok(ReconcileAction::Done)
            }
            NextAction::Settled => {
                tracing::debug!(
                    name = %name,
                    phase = ?curator.phase(),
                    "Curation already settled for this generation"
                );
                Ok(ReconcileAction::Done)
            }
            NextAction::Monitor { job } => {
                self.monitor(&curator, &curators, &namespace, &job).await
            }
            NextAction::Launch(curation) => {
                tracing::info!(
                    name = %name,
                    namespace = %namespace,
                    curation = %curation,
                    "Launching curation"
                );
                self.launch(&curator, &curators, &namespace, curation).await
            }
        }
    }

    /// Validate, check credentials and start a curator Job.
    async fn launch(
        &self,
        curator: &ClusterCurator,
        api: &Api<ClusterCurator>,
        namespace: &str,
        curation: Curation,
    ) -> OperatorResult<ReconcileAction> {
        let name = curator.name_any();

        if let Err(e) = validate_spec(&curator.spec) {
            tracing::warn!(name = %name, error = %e, "Rejecting invalid ClusterCurator");
            return self.fail_launch(curator, api, curation, &e.to_string()).await;
        }

        let steps = plan(&curator.spec, curation);
        if needs_credentials(&steps) {
            let secret = curator
                .spec
                .hooks_for(curation)
                .and_then(|h| h.tower_auth_secret.as_deref())
                .unwrap_or_default();
            let resolver = TowerCredentialsResolver::new(self.ctx.client.clone());
            match resolver.resolve(secret, namespace).await {
                Ok(_) => {}
                Err(e) if e.is_permanent() => {
                    tracing::warn!(name = %name, secret = %secret, error = %e, "Tower credentials unusable");
                    return self.fail_launch(curator, api, curation, &e.to_string()).await;
                }
                Err(e) => return Err(e),
            }
        }

        let jobs: Api<Job> = Api::namespaced(self.ctx.client.clone(), namespace);
        let job_name = match self.find_active_job(&jobs, &name).await? {
            Some(existing) => {
                tracing::info!(name = %name, job = %existing, "Adopting running curator job");
                existing
            }
            None => {
                // Step conditions of the previous curation go before the new
                // Job's pod can write its own.
                self.patch_status(api, &name, json!({ "conditions": [] }))
                    .await?;
                let job = build_curator_job(curator, curation, &self.ctx.config)?;
                let created = jobs.create(&PostParams::default(), &job).await?;
                created.name_any()
            }
        };

        let formatter = StatusFormatter::new();
        let generation = curator.metadata.generation;
        update_status(api, &name, |status| {
            status.set_condition(CuratorCondition::new(
                CURATOR_JOB_CONDITION,
                ConditionState::Executing,
                format!("Curator job {} executing {}", job_name, curation),
            ));
            let progress = formatter.compute_progress(curation, &steps, status);
            json!({
                "phase": CurationPhase::Running,
                "curatorJob": job_name,
                "lastCuration": curation,
                "observedGeneration": generation,
                "message": formatter.format_message(&progress),
            })
        })
        .await?;

        audit_logger().log_curation_launched(&name, namespace, curation.as_str(), &job_name);
        tracing::info!(name = %name, job = %job_name, curation = %curation, "Curator job started");

        Ok(ReconcileAction::requeue_medium())
    }

    /// Record a curation that failed before any Job was created.
    async fn fail_launch(
        &self,
        curator: &ClusterCurator,
        api: &Api<ClusterCurator>,
        curation: Curation,
        reason: &str,
    ) -> OperatorResult<ReconcileAction> {
        let name = curator.name_any();
        let message = format!("{} failed before launch: {}", curation, reason);
        let condition =
            CuratorCondition::new(CURATOR_JOB_CONDITION, ConditionState::Failed, reason);

        self.patch_status(
            api,
            &name,
            json!({
                "phase": CurationPhase::Failed,
                "curatorJob": null,
                "lastCuration": curation,
                "observedGeneration": curator.metadata.generation,
                "message": message,
                "conditions": [condition],
            }),
        )
        .await?;

        audit_logger().log_curation_finished(
            &name,
            &curator.namespace().unwrap_or_default(),
            curation.as_str(),
            "failed",
            &message,
        );

        Ok(ReconcileAction::Done)
    }

    /// Follow a running curator Job.
    async fn monitor(
        &self,
        curator: &ClusterCurator,
        api: &Api<ClusterCurator>,
        namespace: &str,
        job_name: &str,
    ) -> OperatorResult<ReconcileAction> {
        let name = curator.name_any();
        let status = curator.status.clone().unwrap_or_default();
        let curation = status
            .last_curation
            .or(curator.spec.desired_curation)
            .unwrap_or(Curation::Install);

        let jobs: Api<Job> = Api::namespaced(self.ctx.client.clone(), namespace);
        let outcome = jobs.get_opt(job_name).await?.map(|job| job_outcome(&job));

        match outcome {
            None => {
                let message = format!("{} failed: curator job {} no longer exists", curation, job_name);
                self.finish(api, curator, curation, CurationPhase::Failed, |_| message.clone())
                    .await
            }
            Some(JobOutcome::Succeeded) => {
                let message = format!("{} completed by curator job {}", curation, job_name);
                self.finish(api, curator, curation, CurationPhase::Succeeded, |_| {
                    message.clone()
                })
                .await
            }
            Some(JobOutcome::Failed(reason)) => {
                self.finish(api, curator, curation, CurationPhase::Failed, |status| {
                    failure_message(curation, status, &reason)
                })
                .await
            }
            Some(JobOutcome::Running) => {
                let formatter = StatusFormatter::new();
                let steps = plan(&curator.spec, curation);
                let message =
                    formatter.format_message(&formatter.compute_progress(curation, &steps, &status));

                if status.message.as_deref() != Some(message.as_str()) {
                    self.patch_status(api, &name, json!({ "message": message }))
                        .await?;
                }

                tracing::debug!(name = %name, job = %job_name, %message, "Curator job running");
                Ok(ReconcileAction::requeue_medium())
            }
        }
    }

    /// Write the terminal phase and the `clustercurator-job` condition.
    ///
    /// The status is re-read so step conditions the Job wrote after the
    /// cached copy was taken survive; `describe` builds the message from it.
    async fn finish<D>(
        &self,
        api: &Api<ClusterCurator>,
        curator: &ClusterCurator,
        curation: Curation,
        phase: CurationPhase,
        describe: D,
    ) -> OperatorResult<ReconcileAction>
    where
        D: Fn(&ClusterCuratorStatus) -> String,
    {
        let name = curator.name_any();
        let state = if phase == CurationPhase::Succeeded {
            ConditionState::Finished
        } else {
            ConditionState::Failed
        };

        let mut message = String::new();
        update_status(api, &name, |status| {
            message = describe(status);
            status.set_condition(CuratorCondition::new(
                CURATOR_JOB_CONDITION,
                state,
                message.clone(),
            ));
            json!({ "phase": phase, "message": message })
        })
        .await?;

        let outcome = if phase == CurationPhase::Succeeded {
            "success"
        } else {
            "failed"
        };
        audit_logger().log_curation_finished(
            &name,
            &curator.namespace().unwrap_or_default(),
            curation.as_str(),
            outcome,
            &message,
        );
        tracing::info!(name = %name, ?phase, %message, "Curation finished");

        Ok(ReconcileAction::Done)
    }

    /// Name of an unfinished curator Job for this cluster, if any.
    async fn find_active_job(&self, jobs: &Api<Job>, cluster: &str) -> OperatorResult<Option<String>> {
        let params = ListParams::default().labels(&format!("{}={}", CLUSTER_LABEL, cluster));
        let list = jobs.list(&params).await?;

        Ok(list
            .items
            .iter()
            .find(|job| {
                job.metadata.deletion_timestamp.is_none() && job_outcome(job) == JobOutcome::Running
            })
            .map(|job| job.name_any()))
    }

    /// Merge-patch the status subresource with the given fields only.
    async fn patch_status(
        &self,
        api: &Api<ClusterCurator>,
        name: &str,
        fields: serde_json::Value,
    ) -> OperatorResult<()> {
        let patch = json!({ "status": fields });

        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| OperatorError::StatusUpdate {
                name: name.to_string(),
                cause: e.to_string(),
            })?;

        Ok(())
    }
}

/// Handle errors during reconciliation.
pub fn error_policy(
    curator: Arc<ClusterCurator>,
    error: &OperatorError,
    _ctx: Arc<ControllerContext>,
) -> kube::runtime::controller::Action {
    tracing::error!(name = %curator.name_any(), error = %error, "Reconciliation error");
    kube::runtime::controller::Action::requeue(std::time::Duration::from_secs(30))
}

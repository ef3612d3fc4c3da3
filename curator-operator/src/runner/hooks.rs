//! Pre-hook and post-hook execution through AnsibleJobs.

use super::{StepRunner, minutes, poll_until};
use crate::audit::audit_logger;
use crate::crd::{AnsibleJob, AnsibleJobOutcome, ClusterCurator, Curation, HookPhase};
use crate::error::{OperatorError, OperatorResult};
use crate::resources::build_ansible_job;
use crate::security::TowerCredentialsResolver;
use kube::api::PostParams;
use kube::{Api, ResourceExt};

/// Run every hook of `phase` in order, waiting for each AnsibleJob.
pub(super) async fn run_hooks(
    runner: &StepRunner,
    curator: &ClusterCurator,
    curation: Curation,
    phase: HookPhase,
) -> OperatorResult<String> {
    let Some(hooks) = curator.spec.hooks_for(curation) else {
        return Ok(format!("No {} configured", phase.as_str()));
    };
    let entries = hooks.for_phase(phase);
    if entries.is_empty() {
        return Ok(format!("No {} configured", phase.as_str()));
    }

    let secret = hooks
        .tower_auth_secret
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| {
            OperatorError::InvalidConfig(format!(
                "{}.towerAuthSecret is required when hooks are configured",
                curation
            ))
        })?;

    TowerCredentialsResolver::new(runner.client().clone())
        .resolve(secret, runner.namespace())
        .await?;

    let jobs: Api<AnsibleJob> = Api::namespaced(runner.client().clone(), runner.namespace());
    let timeout = minutes(u64::from(hooks.job_monitor_timeout));
    let mut launched = Vec::with_capacity(entries.len());

    for hook in entries {
        let job = build_ansible_job(curator, curation, phase, hook, secret)?;
        let created = jobs.create(&PostParams::default(), &job).await?;
        let job_name = created.name_any();

        tracing::info!(
            cluster = %runner.cluster(),
            phase = phase.as_str(),
            hook = %hook.name,
            ansible_job = %job_name,
            "Created AnsibleJob"
        );
        audit_logger().log_hook(
            runner.cluster(),
            runner.namespace(),
            phase.as_str(),
            &hook.name,
            &job_name,
            "started",
        );

        let what = format!("AnsibleJob {} ({})", job_name, hook.name);
        let result = poll_until(&what, timeout, runner.config().poll_interval, || {
            let jobs = jobs.clone();
            let job_name = job_name.clone();
            let hook_name = hook.name.clone();
            async move {
                let job = jobs.get(&job_name).await?;
                match job.outcome() {
                    AnsibleJobOutcome::Successful => Ok(Some(())),
                    AnsibleJobOutcome::Running => Ok(None),
                    AnsibleJobOutcome::Failed(status) => Err(OperatorError::HookFailed {
                        hook: hook_name,
                        reason: format!("AnsibleJob {} finished with status {}", job_name, status),
                    }),
                }
            }
        })
        .await;

        let outcome = if result.is_ok() { "success" } else { "failed" };
        audit_logger().log_hook(
            runner.cluster(),
            runner.namespace(),
            phase.as_str(),
            &hook.name,
            &job_name,
            outcome,
        );
        result?;

        launched.push(job_name);
    }

    Ok(format!(
        "{} completed: {}",
        phase.as_str(),
        launched.join(", ")
    ))
}

//! Ordered step plans for each curation.
//!
//! A curator Job runs one container per step, in plan order. Hook steps are
//! left out when no hook is configured for that side of the core action.

use crate::crd::{ClusterCuratorSpec, Curation, HookPhase};
use crate::error::OperatorError;
use std::fmt;
use std::str::FromStr;

/// One unit of work inside a curator Job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Run the pre-hooks.
    PrehookAnsibleJob,
    /// Unpause provisioning and wait for the cluster to come up.
    ActivateAndMonitor,
    /// Request the upgrade on the managed cluster.
    UpgradeCluster,
    /// Wait for the upgrade to complete.
    MonitorUpgrade,
    /// Delete the cluster resources.
    DestroyCluster,
    /// Wait for the cluster resources to disappear.
    MonitorDestroy,
    /// Run the post-hooks.
    PosthookAnsibleJob,
    /// Final container of every curator Job.
    Done,
}

impl Step {
    /// Every step, in no particular plan.
    pub const ALL: [Step; 8] = [
        Step::PrehookAnsibleJob,
        Step::ActivateAndMonitor,
        Step::UpgradeCluster,
        Step::MonitorUpgrade,
        Step::DestroyCluster,
        Step::MonitorDestroy,
        Step::PosthookAnsibleJob,
        Step::Done,
    ];

    /// Kebab-case name, used for container names and condition types.
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::PrehookAnsibleJob => "prehook-ansiblejob",
            Step::ActivateAndMonitor => "activate-and-monitor",
            Step::UpgradeCluster => "upgrade-cluster",
            Step::MonitorUpgrade => "monitor-upgrade",
            Step::DestroyCluster => "destroy-cluster",
            Step::MonitorDestroy => "monitor-destroy",
            Step::PosthookAnsibleJob => "posthook-ansiblejob",
            Step::Done => "done",
        }
    }

    /// Hook phase for hook steps.
    pub fn hook_phase(&self) -> Option<HookPhase> {
        match self {
            Step::PrehookAnsibleJob => Some(HookPhase::Prehook),
            Step::PosthookAnsibleJob => Some(HookPhase::Posthook),
            _ => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Step {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Step::ALL
            .iter()
            .copied()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| OperatorError::InvalidConfig(format!("Unknown curation step: {}", s)))
    }
}

/// Build the ordered steps for a curation.
pub fn plan(spec: &ClusterCuratorSpec, curation: Curation) -> Vec<Step> {
    let hooks = spec.hooks_for(curation);
    let has_prehooks = hooks.map(|h| !h.prehook.is_empty()).unwrap_or(false);
    let has_posthooks = hooks.map(|h| !h.posthook.is_empty()).unwrap_or(false);

    let mut steps = Vec::with_capacity(6);
    if has_prehooks {
        steps.push(Step::PrehookAnsibleJob);
    }

    match curation {
        Curation::Install => steps.push(Step::ActivateAndMonitor),
        Curation::Upgrade => {
            steps.push(Step::UpgradeCluster);
            let has_version = spec
                .upgrade
                .as_ref()
                .and_then(|u| u.desired_update.as_ref())
                .is_some();
            if has_version {
                steps.push(Step::MonitorUpgrade);
            }
        }
        Curation::Destroy => {
            steps.push(Step::DestroyCluster);
            steps.push(Step::MonitorDestroy);
        }
        Curation::Scale => {}
    }

    if has_posthooks {
        steps.push(Step::PosthookAnsibleJob);
    }
    steps.push(Step::Done);
    steps
}

/// Whether a plan launches AnsibleJobs and so needs tower credentials.
pub fn needs_credentials(steps: &[Step]) -> bool {
    steps.iter().any(|s| s.hook_phase().is_some())
}

/// Steps that report progress through a condition.
pub fn tracked_steps(steps: &[Step]) -> impl Iterator<Item = &Step> {
    steps.iter().filter(|s| **s != Step::Done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Hook, HookType, Hooks, UpgradeHooks};

    fn hook(name: &str) -> Hook {
        Hook {
            name: name.to_string(),
            extra_vars: None,
            hook_type: HookType::Job,
        }
    }

    fn hooks(pre: usize, post: usize) -> Hooks {
        Hooks {
            tower_auth_secret: Some("toweraccess".into()),
            prehook: (0..pre).map(|i| hook(&format!("pre-{}", i))).collect(),
            posthook: (0..post).map(|i| hook(&format!("post-{}", i))).collect(),
            job_monitor_timeout: 5,
        }
    }

    #[test]
    fn install_plan_with_both_hooks() {
        let spec = ClusterCuratorSpec {
            install: Some(hooks(1, 2)),
            ..Default::default()
        };
        assert_eq!(
            plan(&spec, Curation::Install),
            vec![
                Step::PrehookAnsibleJob,
                Step::ActivateAndMonitor,
                Step::PosthookAnsibleJob,
                Step::Done
            ]
        );
    }

    #[test]
    fn install_plan_without_hooks_only_activates() {
        let spec = ClusterCuratorSpec::default();
        let steps = plan(&spec, Curation::Install);
        assert_eq!(steps, vec![Step::ActivateAndMonitor, Step::Done]);
        assert!(!needs_credentials(&steps));
    }

    #[test]
    fn upgrade_plan_monitors_only_with_version() {
        let mut spec = ClusterCuratorSpec {
            upgrade: Some(UpgradeHooks {
                channel: Some("stable-4.15".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            plan(&spec, Curation::Upgrade),
            vec![Step::UpgradeCluster, Step::Done]
        );

        if let Some(upgrade) = spec.upgrade.as_mut() {
            upgrade.desired_update = Some("4.15.3".into());
            upgrade.hooks = hooks(0, 1);
        }
        assert_eq!(
            plan(&spec, Curation::Upgrade),
            vec![
                Step::UpgradeCluster,
                Step::MonitorUpgrade,
                Step::PosthookAnsibleJob,
                Step::Done
            ]
        );
    }

    #[test]
    fn destroy_and_scale_plans() {
        let spec = ClusterCuratorSpec {
            destroy: Some(hooks(1, 0)),
            scale: Some(hooks(1, 1)),
            ..Default::default()
        };
        assert_eq!(
            plan(&spec, Curation::Destroy),
            vec![
                Step::PrehookAnsibleJob,
                Step::DestroyCluster,
                Step::MonitorDestroy,
                Step::Done
            ]
        );

        let scale = plan(&spec, Curation::Scale);
        assert_eq!(
            scale,
            vec![Step::PrehookAnsibleJob, Step::PosthookAnsibleJob, Step::Done]
        );
        assert!(needs_credentials(&scale));
        assert_eq!(tracked_steps(&scale).count(), 2);
    }

    #[test]
    fn step_names_round_trip() {
        for step in Step::ALL {
            assert_eq!(step.as_str().parse::<Step>().unwrap(), step);
        }
        assert!("monitor-everything".parse::<Step>().is_err());
    }
}

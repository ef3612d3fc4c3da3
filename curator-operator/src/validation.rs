//! ClusterCurator spec validation.
//!
//! Shared by the controller (before launching a curator Job) and the
//! admission webhook (before the object is stored).

use crate::crd::{ClusterCuratorSpec, Curation, Hook, Hooks};
use crate::error::{OperatorError, OperatorResult};
use once_cell::sync::Lazy;
use regex::Regex;

/// Matches release versions: `4.15.3`, `4.16.0-rc.1`, `4.14.0-ec.2`.
static VERSION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d+\.\d+\.\d+(-[0-9A-Za-z][0-9A-Za-z.\-]*)?$")
        .unwrap_or_else(|_| panic!("Static regex 'VERSION_PATTERN' failed to compile"))
});

/// Whether `version` looks like a release version.
pub fn is_release_version(version: &str) -> bool {
    VERSION_PATTERN.is_match(version)
}

/// Validate a ClusterCurator spec.
///
/// Every problem is collected so a single rejection lists all of them.
pub fn validate_spec(spec: &ClusterCuratorSpec) -> OperatorResult<()> {
    let mut problems = Vec::new();

    for (section, hooks) in [
        ("install", spec.install.as_ref()),
        ("scale", spec.scale.as_ref()),
        ("destroy", spec.destroy.as_ref()),
        ("upgrade", spec.upgrade.as_ref().map(|u| &u.hooks)),
    ] {
        if let Some(hooks) = hooks {
            check_hooks(section, hooks, &mut problems);
        }
    }

    if let Some(upgrade) = &spec.upgrade {
        if upgrade.monitor_timeout < 1 {
            problems.push("upgrade.monitorTimeout must be at least 1 minute".to_string());
        }
        if let Some(version) = &upgrade.desired_update {
            if !is_release_version(version) {
                problems.push(format!(
                    "upgrade.desiredUpdate '{}' is not a release version (expected MAJOR.MINOR.PATCH)",
                    version
                ));
            }
        }
    }

    if spec.desired_curation == Some(Curation::Upgrade) {
        let has_target = spec
            .upgrade
            .as_ref()
            .map(|u| u.desired_update.is_some() || u.channel.is_some() || u.upstream.is_some())
            .unwrap_or(false);
        if !has_target {
            problems.push(
                "desiredCuration upgrade requires upgrade.desiredUpdate, upgrade.channel or upgrade.upstream"
                    .to_string(),
            );
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(OperatorError::ValidationError(problems.join("; ")))
    }
}

fn check_hooks(section: &str, hooks: &Hooks, problems: &mut Vec<String>) {
    let secret_missing = hooks
        .tower_auth_secret
        .as_deref()
        .map(|s| s.trim().is_empty())
        .unwrap_or(true);

    if hooks.has_hooks() && secret_missing {
        problems.push(format!(
            "{}.towerAuthSecret is required when hooks are configured",
            section
        ));
    }

    if hooks.job_monitor_timeout < 1 {
        problems.push(format!(
            "{}.jobMonitorTimeout must be at least 1 minute",
            section
        ));
    }

    for (list, entries) in [("prehook", &hooks.prehook), ("posthook", &hooks.posthook)] {
        for (index, hook) in entries.iter().enumerate() {
            check_hook(&format!("{}.{}[{}]", section, list, index), hook, problems);
        }
    }
}

fn check_hook(path: &str, hook: &Hook, problems: &mut Vec<String>) {
    if hook.name.trim().is_empty() {
        problems.push(format!("{}.name must not be empty", path));
    }
    if let Some(vars) = &hook.extra_vars {
        if !vars.is_object() {
            problems.push(format!("{}.extra_vars must be an object", path));
        }
    }
}

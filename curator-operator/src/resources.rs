//! Kubernetes object builders.
//!
//! Pure functions from a ClusterCurator to the objects the operator creates.

use crate::config::OperatorConfig;
use crate::crd::{AnsibleJob, AnsibleJobSpec, ClusterCurator, Curation, Hook, HookPhase, HookType};
use crate::curation::{self, Step};
use crate::error::{OperatorError, OperatorResult};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, ObjectFieldSelector, PodSpec, PodTemplateSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Label carrying the managed cluster name.
pub const CLUSTER_LABEL: &str = "cluster-curator.open-cluster-management.io/cluster";

/// Label carrying the curation a Job runs.
pub const CURATION_LABEL: &str = "cluster-curator.open-cluster-management.io/curation";

/// Env var naming the managed cluster inside curator Job containers.
pub const CLUSTER_NAME_ENV: &str = "CLUSTER_NAME";

/// Env var naming the cluster namespace inside curator Job containers.
pub const CLUSTER_NAMESPACE_ENV: &str = "CLUSTER_NAMESPACE";

/// Env var naming the curation inside curator Job containers.
pub const CURATION_ENV: &str = "CURATION";

/// Prefix of generated curator Job names.
pub const CURATOR_JOB_PREFIX: &str = "curator-job-";

fn labels(curator: &ClusterCurator, curation: Curation) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "cluster-curator".to_string(),
    );
    labels.insert(CLUSTER_LABEL.to_string(), curator.name_any());
    labels.insert(CURATION_LABEL.to_string(), curation.to_string());
    labels
}

fn owner_reference(curator: &ClusterCurator) -> OperatorResult<OwnerReference> {
    curator.controller_owner_ref(&()).ok_or_else(|| {
        OperatorError::InvalidConfig(format!(
            "ClusterCurator {} has no uid, cannot own objects",
            curator.name_any()
        ))
    })
}

fn namespace_of(curator: &ClusterCurator) -> OperatorResult<String> {
    curator
        .namespace()
        .ok_or_else(|| OperatorError::InvalidConfig("ClusterCurator must be namespaced".into()))
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

/// Build the batch Job that runs a curation.
///
/// Every step of the plan but the last becomes an init container, so the pod
/// runs them one after another and stops at the first failure. The final
/// `done` step is the main container.
pub fn build_curator_job(
    curator: &ClusterCurator,
    curation: Curation,
    config: &OperatorConfig,
) -> OperatorResult<Job> {
    let namespace = namespace_of(curator)?;
    let steps = curation::plan(&curator.spec, curation);
    let labels = labels(curator, curation);

    let mut env_vars = vec![
        env(CLUSTER_NAME_ENV, curator.name_any()),
        EnvVar {
            name: CLUSTER_NAMESPACE_ENV.to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.namespace".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        env(CURATION_ENV, curation.as_str()),
    ];
    env_vars.extend(
        config
            .job_env()
            .into_iter()
            .map(|(name, value)| env(name, value)),
    );

    let container = |step: &Step| Container {
        name: step.as_str().to_string(),
        image: Some(config.image.clone()),
        image_pull_policy: Some(config.image_pull_policy.clone()),
        command: Some(vec![
            config.binary.clone(),
            "step".to_string(),
            step.as_str().to_string(),
        ]),
        env: Some(env_vars.clone()),
        ..Default::default()
    };

    let (last, leading) = steps.split_last().ok_or_else(|| {
        OperatorError::InvalidConfig(format!("Empty plan for {} curation", curation))
    })?;
    let init_containers: Vec<Container> = leading.iter().map(container).collect();

    Ok(Job {
        metadata: ObjectMeta {
            generate_name: Some(CURATOR_JOB_PREFIX.to_string()),
            namespace: Some(namespace),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(curator)?]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(config.job_service_account.clone()),
                    restart_policy: Some("Never".to_string()),
                    init_containers: if init_containers.is_empty() {
                        None
                    } else {
                        Some(init_containers)
                    },
                    containers: vec![container(last)],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Build the AnsibleJob for one hook.
pub fn build_ansible_job(
    curator: &ClusterCurator,
    curation: Curation,
    phase: HookPhase,
    hook: &Hook,
    tower_auth_secret: &str,
) -> OperatorResult<AnsibleJob> {
    let namespace = namespace_of(curator)?;
    let extra_vars = merge_extra_vars(
        hook.extra_vars.as_ref(),
        &curator.name_any(),
        &namespace,
        curation,
    );

    let (job_template_name, workflow_template_name) = match hook.hook_type {
        HookType::Job => (Some(hook.name.clone()), None),
        HookType::Workflow => (None, Some(hook.name.clone())),
    };

    Ok(AnsibleJob {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}job-", phase.as_str())),
            namespace: Some(namespace),
            labels: Some(labels(curator, curation)),
            owner_references: Some(vec![owner_reference(curator)?]),
            ..Default::default()
        },
        spec: AnsibleJobSpec {
            job_template_name,
            workflow_template_name,
            tower_auth_secret: tower_auth_secret.to_string(),
            inventory: curator.spec.inventory.clone(),
            extra_vars: Some(extra_vars),
        },
        status: None,
    })
}

/// Hook variables plus the cluster identity, without overriding keys the
/// hook already sets.
pub fn merge_extra_vars(
    hook_vars: Option<&Value>,
    cluster_name: &str,
    cluster_namespace: &str,
    curation: Curation,
) -> Value {
    let mut vars = match hook_vars {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };

    for (key, value) in [
        ("cluster_name", cluster_name),
        ("cluster_namespace", cluster_namespace),
        ("desired_curation", curation.as_str()),
    ] {
        vars.entry(key)
            .or_insert_with(|| Value::String(value.to_string()));
    }

    Value::Object(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ClusterCuratorSpec, Hooks};

    fn curator(spec: ClusterCuratorSpec) -> ClusterCurator {
        let mut curator = ClusterCurator::new("cluster1", spec);
        curator.metadata.namespace = Some("cluster1".into());
        curator.metadata.uid = Some("2b1f5c3e-0000-4000-8000-000000000001".into());
        curator
    }

    fn hooks() -> Hooks {
        Hooks {
            tower_auth_secret: Some("toweraccess".into()),
            prehook: vec![Hook {
                name: "Demo Job Template".into(),
                extra_vars: Some(serde_json::json!({"variable1": "something-interesting"})),
                hook_type: HookType::Job,
            }],
            posthook: vec![Hook {
                name: "Notify".into(),
                extra_vars: None,
                hook_type: HookType::Workflow,
            }],
            job_monitor_timeout: 5,
        }
    }

    #[test]
    fn curator_job_runs_steps_as_init_containers() {
        let curator = curator(ClusterCuratorSpec {
            desired_curation: Some(Curation::Install),
            install: Some(hooks()),
            ..Default::default()
        });
        let job = build_curator_job(&curator, Curation::Install, &OperatorConfig::default())
            .unwrap();

        assert_eq!(job.metadata.generate_name.as_deref(), Some("curator-job-"));
        let owners = job.metadata.owner_references.as_ref().unwrap();
        assert_eq!(owners[0].kind, "ClusterCurator");
        assert_eq!(owners[0].controller, Some(true));

        let spec = job.spec.as_ref().unwrap();
        assert_eq!(spec.backoff_limit, Some(0));
        let pod = spec.template.spec.as_ref().unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.service_account_name.as_deref(), Some("cluster-installer"));

        let init: Vec<&str> = pod
            .init_containers
            .as_ref()
            .unwrap()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(
            init,
            vec![
                "prehook-ansiblejob",
                "activate-and-monitor",
                "posthook-ansiblejob"
            ]
        );
        assert_eq!(pod.containers.len(), 1);
        assert_eq!(pod.containers[0].name, "done");
        assert_eq!(
            pod.containers[0].command.as_ref().unwrap(),
            &vec![
                "/usr/local/bin/curator-operator".to_string(),
                "step".to_string(),
                "done".to_string()
            ]
        );

        let env = pod.containers[0].env.as_ref().unwrap();
        let cluster = env.iter().find(|e| e.name == CLUSTER_NAME_ENV).unwrap();
        assert_eq!(cluster.value.as_deref(), Some("cluster1"));
        let namespace = env.iter().find(|e| e.name == CLUSTER_NAMESPACE_ENV).unwrap();
        assert!(namespace.value_from.is_some());
        assert!(env.iter().any(|e| e.name == "CURATOR_POLL_INTERVAL_SECONDS"));
    }

    #[test]
    fn curator_job_requires_uid() {
        let mut curator = curator(ClusterCuratorSpec::default());
        curator.metadata.uid = None;
        let err = build_curator_job(&curator, Curation::Install, &OperatorConfig::default());
        assert!(matches!(err, Err(OperatorError::InvalidConfig(_))));
    }

    #[test]
    fn ansible_job_uses_template_kind_and_secret() {
        let curator = curator(ClusterCuratorSpec {
            inventory: Some("Demo Inventory".into()),
            install: Some(hooks()),
            ..Default::default()
        });
        let install = hooks();

        let pre = build_ansible_job(
            &curator,
            Curation::Install,
            HookPhase::Prehook,
            &install.prehook[0],
            "toweraccess",
        )
        .unwrap();
        assert_eq!(pre.metadata.generate_name.as_deref(), Some("prehookjob-"));
        assert_eq!(pre.spec.job_template_name.as_deref(), Some("Demo Job Template"));
        assert_eq!(pre.spec.workflow_template_name, None);
        assert_eq!(pre.spec.tower_auth_secret, "toweraccess");
        assert_eq!(pre.spec.inventory.as_deref(), Some("Demo Inventory"));

        let post = build_ansible_job(
            &curator,
            Curation::Install,
            HookPhase::Posthook,
            &install.posthook[0],
            "toweraccess",
        )
        .unwrap();
        assert_eq!(post.metadata.generate_name.as_deref(), Some("posthookjob-"));
        assert_eq!(post.spec.workflow_template_name.as_deref(), Some("Notify"));
    }

    #[test]
    fn extra_vars_keep_hook_values() {
        let vars = merge_extra_vars(
            Some(&serde_json::json!({"cluster_name": "override", "size": 3})),
            "cluster1",
            "cluster1-ns",
            Curation::Scale,
        );
        assert_eq!(vars["cluster_name"], "override");
        assert_eq!(vars["cluster_namespace"], "cluster1-ns");
        assert_eq!(vars["desired_curation"], "scale");
        assert_eq!(vars["size"], 3);

        let vars = merge_extra_vars(None, "c", "ns", Curation::Destroy);
        assert_eq!(vars["cluster_name"], "c");
    }
}

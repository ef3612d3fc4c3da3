//! Integration tests for curation planning and the objects built from it.
//!
//! Everything here runs without a cluster: curators are parsed from the
//! YAML users apply and fed through the public API.

use curator_operator::admission::{AdmissionRequest, review};
use curator_operator::crd::{ClusterCurator, ClusterCuratorStatus, CurationPhase};
use curator_operator::curation::{needs_credentials, plan};
use curator_operator::resources::{CURATION_ENV, build_curator_job};
use curator_operator::validation::validate_spec;
use curator_operator::{Curation, OperatorConfig, OperatorError, Step, manifests};

const INSTALL_CURATOR: &str = r#"
apiVersion: cluster.open-cluster-management.io/v1beta1
kind: ClusterCurator
metadata:
  name: my-cluster
  namespace: my-cluster
  uid: 5c3f8a2e-1b7d-4e59-9a61-0d2c7b4e8f10
spec:
  desiredCuration: install
  install:
    towerAuthSecret: toweraccess
    prehook:
      - name: Demo Job Template
        extra_vars:
          variable1: something-interesting
    posthook:
      - name: Demo Workflow
        type: Workflow
"#;

const UPGRADE_CURATOR: &str = r#"
apiVersion: cluster.open-cluster-management.io/v1beta1
kind: ClusterCurator
metadata:
  name: my-cluster
  namespace: my-cluster
  uid: 0e8d1f4a-7c22-4b90-b3f5-61a9e2d7c0b4
spec:
  desiredCuration: upgrade
  upgrade:
    desiredUpdate: 4.15.3
    channel: stable-4.15
"#;

fn parse(yaml: &str) -> ClusterCurator {
    serde_yaml::from_str(yaml).unwrap()
}

fn container_names(curator: &ClusterCurator, curation: Curation) -> (Vec<String>, Vec<String>) {
    let job = build_curator_job(curator, curation, &OperatorConfig::default()).unwrap();
    let pod = job.spec.unwrap().template.spec.unwrap();
    let names = |containers: Vec<k8s_openapi::api::core::v1::Container>| {
        containers.into_iter().map(|c| c.name).collect::<Vec<_>>()
    };
    (
        names(pod.init_containers.unwrap_or_default()),
        names(pod.containers),
    )
}

#[test]
fn install_runs_hooks_around_activation() {
    let curator = parse(INSTALL_CURATOR);
    assert!(validate_spec(&curator.spec).is_ok());

    let steps = plan(&curator.spec, Curation::Install);
    assert_eq!(
        steps,
        vec![
            Step::PrehookAnsibleJob,
            Step::ActivateAndMonitor,
            Step::PosthookAnsibleJob,
            Step::Done,
        ]
    );
    assert!(needs_credentials(&steps));

    let (init, main) = container_names(&curator, Curation::Install);
    assert_eq!(
        init,
        vec!["prehook-ansiblejob", "activate-and-monitor", "posthook-ansiblejob"]
    );
    assert_eq!(main, vec!["done"]);
}

#[test]
fn upgrade_without_hooks_skips_hook_steps() {
    let curator = parse(UPGRADE_CURATOR);
    assert!(validate_spec(&curator.spec).is_ok());

    let steps = plan(&curator.spec, Curation::Upgrade);
    assert_eq!(
        steps,
        vec![Step::UpgradeCluster, Step::MonitorUpgrade, Step::Done]
    );
    assert!(!needs_credentials(&steps));
}

#[test]
fn curator_job_carries_curation_env() {
    let curator = parse(UPGRADE_CURATOR);
    let job = build_curator_job(&curator, Curation::Upgrade, &OperatorConfig::default()).unwrap();

    let pod = job.spec.unwrap().template.spec.unwrap();
    let env = pod.containers[0].env.clone().unwrap_or_default();
    let curation = env.iter().find(|e| e.name == CURATION_ENV).unwrap();
    assert_eq!(curation.value.as_deref(), Some("upgrade"));
}

#[test]
fn job_requires_owner_uid() {
    let mut curator = parse(INSTALL_CURATOR);
    curator.metadata.uid = None;

    let result = build_curator_job(&curator, Curation::Install, &OperatorConfig::default());
    assert!(matches!(result, Err(OperatorError::InvalidConfig(_))));
}

#[test]
fn hooks_without_secret_fail_validation() {
    let mut curator = parse(INSTALL_CURATOR);
    if let Some(install) = curator.spec.install.as_mut() {
        install.tower_auth_secret = None;
    }

    let err = validate_spec(&curator.spec).unwrap_err();
    assert!(matches!(err, OperatorError::ValidationError(_)));
    assert!(err.to_string().contains("install"));
}

#[test]
fn admission_blocks_switch_during_running_curation() {
    let mut old = parse(INSTALL_CURATOR);
    old.status = Some(ClusterCuratorStatus {
        phase: CurationPhase::Running,
        ..Default::default()
    });
    let mut new = old.clone();
    new.spec.desired_curation = Some(Curation::Destroy);

    let response = review(&AdmissionRequest {
        uid: "b1c2d3".into(),
        operation: "UPDATE".into(),
        namespace: Some("my-cluster".into()),
        object: Some(new),
        old_object: Some(old),
    });

    assert!(!response.allowed);
    assert_eq!(response.uid, "b1c2d3");
    assert_eq!(response.status.map(|s| s.code), Some(409));
}

#[test]
fn admission_review_round_trips_through_json() {
    let body = serde_json::json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "e911857d",
            "operation": "CREATE",
            "namespace": "my-cluster",
            "object": serde_yaml::from_str::<serde_json::Value>(UPGRADE_CURATOR).unwrap(),
        }
    });

    let incoming: curator_operator::admission::AdmissionReview =
        serde_json::from_value(body).unwrap();
    let response = review(incoming.request.as_ref().unwrap());
    let reply = serde_json::to_value(response.into_review()).unwrap();

    assert_eq!(reply["apiVersion"], "admission.k8s.io/v1");
    assert_eq!(reply["response"]["uid"], "e911857d");
    assert_eq!(reply["response"]["allowed"], true);
    assert!(reply.get("request").is_none());
}

#[test]
fn manifests_render_crd_and_rbac() {
    let yaml = manifests::render().unwrap();
    assert!(yaml.starts_with("---\n"));
    assert!(yaml.contains("kind: CustomResourceDefinition"));
    assert!(yaml.contains(manifests::CONTROLLER_ROLE));
    assert!(yaml.contains(manifests::JOB_ROLE));
}

//! Admission review for ClusterCurator objects.
//!
//! Rejects specs that fail validation and curation changes made while a
//! curator Job is running. The HTTP side lives in the `curator-webhook`
//! binary.

use crate::audit::audit_logger;
use crate::crd::{ClusterCurator, Curation, CurationPhase};
use crate::validation::validate_spec;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};

/// API version of admission reviews.
pub const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";

/// `admission.k8s.io/v1` AdmissionReview.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    /// Always `admission.k8s.io/v1`.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Always `AdmissionReview`.
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Set on requests from the API server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,
    /// Set on our replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

fn default_api_version() -> String {
    ADMISSION_API_VERSION.to_string()
}

fn default_kind() -> String {
    "AdmissionReview".to_string()
}

/// The request half of an AdmissionReview.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    /// Request identifier echoed in the response.
    pub uid: String,
    /// CREATE, UPDATE, DELETE or CONNECT.
    pub operation: String,
    /// Namespace of the object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// The object as it would be stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<ClusterCurator>,
    /// The stored object, for UPDATE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_object: Option<ClusterCurator>,
}

/// The response half of an AdmissionReview.
#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    /// Echo of the request uid.
    pub uid: String,
    /// Whether the request is admitted.
    pub allowed: bool,
    /// Reason for a denial.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AdmissionStatus>,
}

/// Denial details.
#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct AdmissionStatus {
    /// HTTP-style status code.
    pub code: i32,
    /// Human-readable reason.
    pub message: String,
}

impl AdmissionResponse {
    fn allow(uid: String) -> Self {
        Self {
            uid,
            allowed: true,
            status: None,
        }
    }

    fn deny(uid: String, code: i32, message: String) -> Self {
        Self {
            uid,
            allowed: false,
            status: Some(AdmissionStatus { code, message }),
        }
    }

    /// Wrap the response in an AdmissionReview envelope.
    pub fn into_review(self) -> AdmissionReview {
        AdmissionReview {
            api_version: default_api_version(),
            kind: default_kind(),
            request: None,
            response: Some(self),
        }
    }
}

/// Serialized section for a curation, for change detection.
fn section(curator: &ClusterCurator, curation: Option<Curation>) -> Option<serde_json::Value> {
    let spec = &curator.spec;
    let value = match curation? {
        Curation::Install => serde_json::to_value(&spec.install),
        Curation::Scale => serde_json::to_value(&spec.scale),
        Curation::Destroy => serde_json::to_value(&spec.destroy),
        Curation::Upgrade => serde_json::to_value(&spec.upgrade),
    };
    value.ok()
}

/// Decide whether a ClusterCurator request is admitted.
pub fn review(request: &AdmissionRequest) -> AdmissionResponse {
    let uid = request.uid.clone();

    if request.operation == "DELETE" {
        return AdmissionResponse::allow(uid);
    }
    let Some(curator) = &request.object else {
        tracing::warn!(operation = %request.operation, "No object in admission request");
        return AdmissionResponse::allow(uid);
    };

    let name = curator.name_any();
    let namespace = curator
        .namespace()
        .or_else(|| request.namespace.clone())
        .unwrap_or_default();

    if let Err(e) = validate_spec(&curator.spec) {
        let message = e.to_string();
        audit_logger().log_admission_denied(&name, &namespace, &message);
        return AdmissionResponse::deny(uid, 400, message);
    }

    if let Some(old) = &request.old_object {
        let running = old.phase() == CurationPhase::Running;
        let curation_changed = old.spec.desired_curation != curator.spec.desired_curation;
        let section_changed = section(old, old.spec.desired_curation)
            != section(curator, old.spec.desired_curation);

        if running && (curation_changed || section_changed) {
            let message = format!(
                "ClusterCurator {} is running a {} curation; wait for it to finish before changing it",
                name,
                old.spec
                    .desired_curation
                    .map(|c| c.as_str())
                    .unwrap_or("previous")
            );
            audit_logger().log_admission_denied(&name, &namespace, &message);
            return AdmissionResponse::deny(uid, 409, message);
        }
    }

    tracing::debug!(name = %name, namespace = %namespace, "ClusterCurator admitted");
    AdmissionResponse::allow(uid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ClusterCuratorSpec, ClusterCuratorStatus, Hook, HookType, Hooks};

    fn curator(curation: Option<Curation>, phase: CurationPhase) -> ClusterCurator {
        let mut curator = ClusterCurator::new(
            "cluster1",
            ClusterCuratorSpec {
                desired_curation: curation,
                ..Default::default()
            },
        );
        curator.metadata.namespace = Some("cluster1".into());
        curator.status = Some(ClusterCuratorStatus {
            phase,
            ..Default::default()
        });
        curator
    }

    fn request(
        operation: &str,
        object: Option<ClusterCurator>,
        old: Option<ClusterCurator>,
    ) -> AdmissionRequest {
        AdmissionRequest {
            uid: "705ab4f5-6393-11e8-b7cc-42010a800002".into(),
            operation: operation.into(),
            namespace: Some("cluster1".into()),
            object,
            old_object: old,
        }
    }

    #[test]
    fn deletes_and_empty_requests_are_allowed() {
        assert!(review(&request("DELETE", None, None)).allowed);
        assert!(review(&request("CREATE", None, None)).allowed);
    }

    #[test]
    fn invalid_spec_is_denied() {
        let mut c = curator(Some(Curation::Install), CurationPhase::Pending);
        c.spec.install = Some(Hooks {
            prehook: vec![Hook {
                name: "Demo".into(),
                extra_vars: None,
                hook_type: HookType::Job,
            }],
            ..Default::default()
        });

        let response = review(&request("CREATE", Some(c), None));
        assert!(!response.allowed);
        let status = response.status.unwrap();
        assert_eq!(status.code, 400);
        assert!(status.message.contains("towerAuthSecret"));
    }

    #[test]
    fn curation_change_while_running_is_denied() {
        let old = curator(Some(Curation::Install), CurationPhase::Running);
        let new = curator(Some(Curation::Destroy), CurationPhase::Running);

        let response = review(&request("UPDATE", Some(new.clone()), Some(old)));
        assert_eq!(response.status.map(|s| s.code), Some(409));

        let old = curator(Some(Curation::Install), CurationPhase::Succeeded);
        assert!(review(&request("UPDATE", Some(new), Some(old))).allowed);
    }

    #[test]
    fn section_change_while_running_is_denied() {
        let old = curator(Some(Curation::Scale), CurationPhase::Running);
        let mut new = old.clone();
        new.spec.scale = Some(Hooks {
            job_monitor_timeout: 10,
            ..Default::default()
        });
        assert!(!review(&request("UPDATE", Some(new), Some(old.clone()))).allowed);

        let mut unrelated = old.clone();
        unrelated.spec.inventory = Some("Demo Inventory".into());
        assert!(review(&request("UPDATE", Some(unrelated), Some(old))).allowed);
    }

    #[test]
    fn response_envelope_carries_type_meta() {
        let json = serde_json::to_value(
            AdmissionResponse::allow("abc".into()).into_review(),
        )
        .unwrap();
        assert_eq!(json["apiVersion"], "admission.k8s.io/v1");
        assert_eq!(json["kind"], "AdmissionReview");
        assert_eq!(json["response"]["uid"], "abc");
        assert!(json.get("request").is_none());
    }

    #[test]
    fn parses_api_server_request() {
        let body = serde_json::json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "abc",
                "kind": {"group": "cluster.open-cluster-management.io", "version": "v1beta1", "kind": "ClusterCurator"},
                "operation": "CREATE",
                "namespace": "cluster1",
                "object": {
                    "apiVersion": "cluster.open-cluster-management.io/v1beta1",
                    "kind": "ClusterCurator",
                    "metadata": {"name": "cluster1", "namespace": "cluster1"},
                    "spec": {"desiredCuration": "install"}
                }
            }
        });
        let review_in: AdmissionReview = serde_json::from_value(body).unwrap();
        let request = review_in.request.unwrap();
        assert!(review(&request).allowed);
    }
}

//! Audit logging for curation events.
//!
//! Provides structured audit logs for operations that change clusters or
//! touch credentials:
//! - Curator Job launch and completion
//! - AnsibleJob hooks
//! - Cluster activation, upgrade requests and destruction
//! - Tower credential Secret access
//! - Admission denials

use crate::manifests::{CONTROLLER_ROLE, OPERATOR_NAMESPACE};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Audit event types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A curator Job was created.
    CurationLaunched,
    /// A curator Job finished.
    CurationFinished,
    /// An AnsibleJob hook was created or finished.
    Hook,
    /// Cluster provisioning was unpaused.
    ClusterActivated,
    /// An upgrade was requested on a managed cluster.
    UpgradeRequested,
    /// Cluster resources were deleted.
    ClusterDestroyed,
    /// A credentials Secret was read.
    SecretAccess,
    /// Tower credentials were resolved from a Secret.
    CredentialResolve,
    /// The admission webhook rejected a ClusterCurator.
    AdmissionDenied,
}

/// Audit event severity levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    /// Informational event (routine operation).
    Info,
    /// Warning (unusual but not necessarily problematic).
    Warning,
    /// Failure of a cluster-changing operation.
    Critical,
}

/// Audit event metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Timestamp in RFC3339 format.
    pub timestamp: String,
    /// Event type.
    pub event_type: AuditEventType,
    /// Severity level.
    pub severity: AuditSeverity,
    /// Service account that performed the action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Resource being acted on (cluster name, secret name, ...).
    pub resource: String,
    /// Resource namespace.
    pub namespace: String,
    /// Object created or targeted by the operation (Job name, version, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Outcome of the operation (started, success, failed, denied).
    pub outcome: String,
    /// Additional context or error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Structured metadata for the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl AuditEvent {
    /// Create a new audit event.
    pub fn new(
        event_type: AuditEventType,
        severity: AuditSeverity,
        resource: String,
        namespace: String,
        outcome: String,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            event_type,
            severity,
            subject: None,
            resource,
            namespace,
            target: None,
            outcome,
            message: None,
            metadata: None,
        }
    }

    /// Set the subject.
    pub fn with_subject(mut self, subject: String) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Set the target.
    pub fn with_target(mut self, target: String) -> Self {
        self.target = Some(target);
        self
    }

    /// Set the message.
    pub fn with_message(mut self, message: String) -> Self {
        self.message = Some(message);
        self
    }

    /// Set structured metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Log the audit event as JSON on the `audit` target.
    pub fn log(&self) {
        let json = match serde_json::to_string(self) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize audit event");
                return;
            }
        };

        match self.severity {
            AuditSeverity::Info => {
                info!(
                    target: "audit",
                    event_type = ?self.event_type,
                    resource = %self.resource,
                    outcome = %self.outcome,
                    "{}",
                    json
                );
            }
            AuditSeverity::Warning => {
                warn!(
                    target: "audit",
                    event_type = ?self.event_type,
                    resource = %self.resource,
                    outcome = %self.outcome,
                    "{}",
                    json
                );
            }
            AuditSeverity::Critical => {
                tracing::error!(
                    target: "audit",
                    event_type = ?self.event_type,
                    resource = %self.resource,
                    outcome = %self.outcome,
                    "{}",
                    json
                );
            }
        }
    }
}

fn severity_for(outcome: &str) -> AuditSeverity {
    match outcome {
        "failed" => AuditSeverity::Critical,
        "denied" | "timeout" => AuditSeverity::Warning,
        _ => AuditSeverity::Info,
    }
}

/// Audit logger for the curator operator.
pub struct AuditLogger {
    service_account: String,
}

impl AuditLogger {
    /// Create a new audit logger.
    pub fn new(service_account: String) -> Self {
        Self { service_account }
    }

    /// Subject recorded on every event.
    pub fn subject(&self) -> &str {
        &self.service_account
    }

    fn event(
        &self,
        event_type: AuditEventType,
        severity: AuditSeverity,
        resource: &str,
        namespace: &str,
        outcome: &str,
    ) -> AuditEvent {
        AuditEvent::new(
            event_type,
            severity,
            resource.to_string(),
            namespace.to_string(),
            outcome.to_string(),
        )
        .with_subject(self.service_account.clone())
    }

    /// Log the launch of a curator Job.
    pub fn log_curation_launched(&self, cluster: &str, namespace: &str, curation: &str, job: &str) {
        self.event(
            AuditEventType::CurationLaunched,
            AuditSeverity::Info,
            cluster,
            namespace,
            "started",
        )
        .with_target(job.to_string())
        .with_metadata(serde_json::json!({ "curation": curation }))
        .with_message(format!("Launched {} curation in job {}", curation, job))
        .log();
    }

    /// Log the end of a curation.
    pub fn log_curation_finished(
        &self,
        cluster: &str,
        namespace: &str,
        curation: &str,
        outcome: &str,
        message: &str,
    ) {
        self.event(
            AuditEventType::CurationFinished,
            severity_for(outcome),
            cluster,
            namespace,
            outcome,
        )
        .with_metadata(serde_json::json!({ "curation": curation }))
        .with_message(message.to_string())
        .log();
    }

    /// Log an AnsibleJob hook transition.
    pub fn log_hook(
        &self,
        cluster: &str,
        namespace: &str,
        phase: &str,
        hook: &str,
        ansible_job: &str,
        outcome: &str,
    ) {
        self.event(
            AuditEventType::Hook,
            severity_for(outcome),
            cluster,
            namespace,
            outcome,
        )
        .with_target(ansible_job.to_string())
        .with_metadata(serde_json::json!({ "phase": phase, "hook": hook }))
        .with_message(format!("{} {} via AnsibleJob {}", phase, hook, ansible_job))
        .log();
    }

    /// Log cluster activation.
    pub fn log_cluster_activated(&self, cluster: &str, namespace: &str, kind: &str) {
        self.event(
            AuditEventType::ClusterActivated,
            AuditSeverity::Info,
            cluster,
            namespace,
            "success",
        )
        .with_target(kind.to_string())
        .with_message(format!("Unpaused provisioning of {} {}", kind, cluster))
        .log();
    }

    /// Log an upgrade request.
    ///
    /// Not-recommended and forced upgrades are logged as warnings.
    pub fn log_upgrade_requested(
        &self,
        cluster: &str,
        namespace: &str,
        version: Option<&str>,
        channel: Option<&str>,
        recommendation: &str,
    ) {
        let severity = if recommendation == "recommended" {
            AuditSeverity::Info
        } else {
            AuditSeverity::Warning
        };

        self.event(
            AuditEventType::UpgradeRequested,
            severity,
            cluster,
            namespace,
            "started",
        )
        .with_target(version.unwrap_or("-").to_string())
        .with_metadata(serde_json::json!({
            "channel": channel,
            "recommendation": recommendation,
        }))
        .with_message(format!(
            "Requested {} upgrade of {} to {}",
            recommendation,
            cluster,
            version.unwrap_or("current version")
        ))
        .log();
    }

    /// Log deletion of cluster resources.
    pub fn log_cluster_destroyed(&self, cluster: &str, namespace: &str, kind: &str) {
        self.event(
            AuditEventType::ClusterDestroyed,
            AuditSeverity::Warning,
            cluster,
            namespace,
            "started",
        )
        .with_target(kind.to_string())
        .with_message(format!("Deleting {} {}", kind, cluster))
        .log();
    }

    /// Log secret access.
    pub fn log_secret_access(
        &self,
        secret_name: &str,
        namespace: &str,
        outcome: &str,
        message: Option<String>,
    ) {
        self.event(
            AuditEventType::SecretAccess,
            AuditSeverity::Info,
            secret_name,
            namespace,
            outcome,
        )
        .with_message(message.unwrap_or_else(|| "Secret accessed".to_string()))
        .log();
    }

    /// Log credential resolution.
    pub fn log_credential_resolve(&self, secret_name: &str, namespace: &str, outcome: &str) {
        self.event(
            AuditEventType::CredentialResolve,
            severity_for(outcome),
            secret_name,
            namespace,
            outcome,
        )
        .with_metadata(serde_json::json!({ "credential_type": "tower" }))
        .with_message("Resolved tower credentials".to_string())
        .log();
    }

    /// Log an admission denial.
    pub fn log_admission_denied(&self, curator: &str, namespace: &str, reason: &str) {
        self.event(
            AuditEventType::AdmissionDenied,
            AuditSeverity::Warning,
            curator,
            namespace,
            "denied",
        )
        .with_message(reason.to_string())
        .log();
    }
}

/// Kubernetes username of a service account.
pub fn service_account_subject(namespace: &str, name: &str) -> String {
    format!("system:serviceaccount:{}:{}", namespace, name)
}

/// Global audit logger instance.
static AUDIT_LOGGER: OnceCell<AuditLogger> = OnceCell::new();

/// Set the subject events are attributed to.
///
/// Called once at startup: the controller and webhook run as the operator
/// service account, curator Jobs as the job service account. Later calls are
/// ignored with a warning.
pub fn init_audit_logger(subject: String) {
    if AUDIT_LOGGER.set(AuditLogger::new(subject)).is_err() {
        warn!(
            subject = %audit_logger().subject(),
            "Audit logger already initialized"
        );
    }
}

/// Get the global audit logger.
///
/// Falls back to the operator service account when never initialized.
pub fn audit_logger() -> &'static AuditLogger {
    AUDIT_LOGGER.get_or_init(|| {
        AuditLogger::new(service_account_subject(OPERATOR_NAMESPACE, CONTROLLER_ROLE))
    })
}

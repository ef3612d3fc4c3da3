//! Tower credential resolution from Kubernetes secrets.
//!
//! Hooks run through AnsibleJobs, which need the automation platform host and
//! an API token. Both live in a Secret named by `towerAuthSecret`.

use crate::audit::audit_logger;
use crate::error::{OperatorError, OperatorResult};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::Api;
use std::collections::BTreeMap;
use std::fmt;

/// Secret key holding the platform URL.
pub const HOST_KEY: &str = "host";

/// Secret key holding the platform API token.
pub const TOKEN_KEY: &str = "token";

/// Automation platform credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct TowerCredentials {
    /// Platform URL, e.g. `https://tower.example.com`.
    pub host: String,
    /// API token.
    pub token: String,
}

impl fmt::Debug for TowerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TowerCredentials")
            .field("host", &self.host)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Resolves tower credentials from Secrets.
pub struct TowerCredentialsResolver {
    client: kube::Client,
}

impl TowerCredentialsResolver {
    /// Create a new credentials resolver.
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Read and parse the tower Secret.
    ///
    /// A missing Secret is reported as `NotFound`, missing or non-UTF-8 keys
    /// as `InvalidConfig`.
    pub async fn resolve(
        &self,
        secret_name: &str,
        namespace: &str,
    ) -> OperatorResult<TowerCredentials> {
        tracing::debug!(
            secret = %secret_name,
            namespace = %namespace,
            "Resolving tower credentials"
        );

        audit_logger().log_secret_access(
            secret_name,
            namespace,
            "attempt",
            Some(format!("Reading tower secret {}", secret_name)),
        );

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets.get(secret_name).await.map_err(|e| {
            let err = OperatorError::from(e);
            if err.is_not_found() {
                OperatorError::NotFound {
                    kind: "Secret".to_string(),
                    name: secret_name.to_string(),
                    namespace: namespace.to_string(),
                }
            } else {
                err
            }
        })?;

        match parse_tower_secret(secret_name, secret.data.as_ref()) {
            Ok(credentials) => {
                audit_logger().log_credential_resolve(secret_name, namespace, "success");
                Ok(credentials)
            }
            Err(e) => {
                audit_logger().log_credential_resolve(secret_name, namespace, "failed");
                Err(e)
            }
        }
    }
}

/// Extract tower credentials from Secret data.
pub fn parse_tower_secret(
    secret_name: &str,
    data: Option<&BTreeMap<String, ByteString>>,
) -> OperatorResult<TowerCredentials> {
    let data = data.ok_or_else(|| {
        OperatorError::InvalidConfig(format!("Secret '{}' has no data field", secret_name))
    })?;

    let host = parse_secret_string(data, HOST_KEY, secret_name)?;
    let token = parse_secret_string(data, TOKEN_KEY, secret_name)?;

    Ok(TowerCredentials { host, token })
}

fn parse_secret_string(
    data: &BTreeMap<String, ByteString>,
    key: &str,
    secret_name: &str,
) -> OperatorResult<String> {
    let bytes = data
        .get(key)
        .ok_or_else(|| {
            OperatorError::InvalidConfig(format!(
                "Secret '{}' missing '{}' field",
                secret_name, key
            ))
        })?
        .0
        .clone();

    let value = String::from_utf8(bytes).map_err(|_| {
        OperatorError::InvalidConfig(format!(
            "Secret '{}' contains invalid UTF-8 in '{}' field",
            secret_name, key
        ))
    })?;

    if value.trim().is_empty() {
        return Err(OperatorError::InvalidConfig(format!(
            "Secret '{}' has an empty '{}' field",
            secret_name, key
        )));
    }

    Ok(value.trim().to_string())
}

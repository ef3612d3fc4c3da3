//! Curation steps executed inside the curator Job.
//!
//! Each Job container runs `curator-operator step <name>`, which lands in
//! [`StepRunner::run`]. The runner reports progress through a condition per
//! step on the ClusterCurator and exits non-zero on failure, so Kubernetes
//! stops the remaining init containers.

mod activate;
mod destroy;
mod hooks;
mod upgrade;

pub use activate::{ClusterKind, ProvisionState, owned_node_pools, provision_state};
pub use upgrade::{
    ClusterVersionView, Release, UpdateHistory, UpgradeTarget, history_reports_version,
    hosted_release_image, resolve_upgrade_target,
};

use crate::audit::audit_logger;
use crate::config::OperatorConfig;
use crate::crd::{ClusterCurator, ConditionState, Curation, CuratorCondition};
use crate::curation::Step;
use crate::error::{OperatorError, OperatorResult};
use crate::status::update_status;
use kube::Api;
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Runs curation steps for one cluster.
pub struct StepRunner {
    client: kube::Client,
    config: OperatorConfig,
    cluster: String,
    namespace: String,
    curation: Option<Curation>,
}

impl StepRunner {
    /// Create a runner for the ClusterCurator `cluster` in `namespace`.
    ///
    /// `curation` is the curation the Job was launched for; when absent it is
    /// read from the ClusterCurator.
    pub fn new(
        client: kube::Client,
        config: OperatorConfig,
        cluster: String,
        namespace: String,
        curation: Option<Curation>,
    ) -> Self {
        Self {
            client,
            config,
            cluster,
            namespace,
            curation,
        }
    }

    fn curators(&self) -> Api<ClusterCurator> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    async fn load_curator(&self) -> OperatorResult<ClusterCurator> {
        self.curators()
            .get_opt(&self.cluster)
            .await?
            .ok_or_else(|| OperatorError::NotFound {
                kind: "ClusterCurator".to_string(),
                name: self.cluster.clone(),
                namespace: self.namespace.clone(),
            })
    }

    fn curation_of(&self, curator: &ClusterCurator) -> OperatorResult<Curation> {
        self.curation
            .or_else(|| curator.status.as_ref().and_then(|s| s.last_curation))
            .or(curator.spec.desired_curation)
            .ok_or_else(|| {
                OperatorError::InvalidConfig(format!(
                    "ClusterCurator {} has no curation to run",
                    self.cluster
                ))
            })
    }

    /// Run one step and record its outcome as a condition.
    pub async fn run(&self, step: Step) -> OperatorResult<()> {
        let curator = self.load_curator().await?;
        let curation = self.curation_of(&curator)?;

        tracing::info!(
            cluster = %self.cluster,
            namespace = %self.namespace,
            curation = %curation,
            step = %step,
            "Running curation step"
        );

        if step == Step::Done {
            tracing::info!(cluster = %self.cluster, curation = %curation, "All curation steps finished");
            audit_logger().log_curation_finished(
                &self.cluster,
                &self.namespace,
                curation.as_str(),
                "success",
                "All curation steps finished in curator job",
            );
            return Ok(());
        }

        self.set_condition(step, ConditionState::Executing, format!("Executing {}", step))
            .await?;

        let result = self.execute(step, &curator, curation).await;

        match &result {
            Ok(message) => {
                self.set_condition(step, ConditionState::Finished, message.clone())
                    .await?;
                tracing::info!(cluster = %self.cluster, step = %step, %message, "Step finished");
            }
            Err(e) => {
                tracing::error!(cluster = %self.cluster, step = %step, error = %e, "Step failed");
                if let Err(write_err) = self
                    .set_condition(step, ConditionState::Failed, e.to_string())
                    .await
                {
                    tracing::error!(error = %write_err, "Failed to record step failure");
                }
            }
        }

        result.map(|_| ())
    }

    async fn execute(
        &self,
        step: Step,
        curator: &ClusterCurator,
        curation: Curation,
    ) -> OperatorResult<String> {
        match step {
            Step::PrehookAnsibleJob | Step::PosthookAnsibleJob => {
                let phase = step.hook_phase().ok_or_else(|| {
                    OperatorError::InvalidConfig(format!("{} is not a hook step", step))
                })?;
                hooks::run_hooks(self, curator, curation, phase).await
            }
            Step::ActivateAndMonitor => activate::activate_and_monitor(self).await,
            Step::UpgradeCluster => upgrade::upgrade_cluster(self, curator).await,
            Step::MonitorUpgrade => upgrade::monitor_upgrade(self, curator).await,
            Step::DestroyCluster => destroy::destroy_cluster(self).await,
            Step::MonitorDestroy => destroy::monitor_destroy(self).await,
            Step::Done => Ok("done".to_string()),
        }
    }

    /// Write a step condition, retrying when another writer got there first.
    async fn set_condition(
        &self,
        step: Step,
        state: ConditionState,
        message: String,
    ) -> OperatorResult<()> {
        update_status(&self.curators(), &self.cluster, |status| {
            status.set_condition(CuratorCondition::new(step.as_str(), state, message.clone()));
            json!({})
        })
        .await
    }

    pub(crate) fn client(&self) -> &kube::Client {
        &self.client
    }

    pub(crate) fn config(&self) -> &OperatorConfig {
        &self.config
    }

    pub(crate) fn cluster(&self) -> &str {
        &self.cluster
    }

    pub(crate) fn namespace(&self) -> &str {
        &self.namespace
    }
}

/// Run `check` until it yields a value or `timeout` elapses.
///
/// Sleeps `min(interval, remaining)` between checks. Transient API errors are
/// logged and polling goes on; any other error ends it immediately.
pub async fn poll_until<T, F, Fut>(
    what: &str,
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> OperatorResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = OperatorResult<Option<T>>>,
{
    let deadline = Instant::now() + timeout;

    loop {
        match check().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) if e.is_transient() => {
                tracing::warn!(what = %what, error = %e, "Transient error while waiting, retrying");
            }
            Err(e) => return Err(e),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(OperatorError::Timeout {
                what: what.to_string(),
                minutes: timeout.as_secs().div_ceil(60),
            });
        }

        tracing::debug!(what = %what, remaining = ?(deadline - now), "Still waiting");
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

/// Minutes as a duration.
pub(crate) fn minutes(minutes: u64) -> Duration {
    Duration::from_secs(minutes * 60)
}

/// Audit deletion of cluster resources.
pub(crate) fn audit_destroy(runner: &StepRunner, kind: &str) {
    audit_logger().log_cluster_destroyed(runner.cluster(), runner.namespace(), kind);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ClusterCuratorSpec;
    use crate::testing::mock_client;
    use hyper::Method;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn poll_returns_first_ready_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let value = poll_until("test", minutes(1), Duration::from_secs(10), move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(if n == 3 { Some(n) } else { None })
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_times_out() {
        let start = Instant::now();
        let err = poll_until("HostedCluster cluster1", minutes(2), Duration::from_secs(45), || async {
            Ok::<Option<()>, OperatorError>(None)
        })
        .await
        .unwrap_err();

        assert!(matches!(err, OperatorError::Timeout { minutes: 2, .. }));
        assert_eq!(
            err.to_string(),
            "Timed out after 2 minute(s) waiting for HostedCluster cluster1"
        );
        // 45s + 45s + 30s: the last sleep is capped at the remaining time.
        assert_eq!(Instant::now() - start, Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_stops_on_hook_failure() {
        let err = poll_until("job", minutes(5), Duration::from_secs(1), || async {
            Err::<Option<()>, _>(OperatorError::HookFailed {
                hook: "Demo".into(),
                reason: "failed".into(),
            })
        })
        .await
        .unwrap_err();
        assert!(matches!(err, OperatorError::HookFailed { .. }));
    }

    fn api_error(code: u16, reason: &str) -> OperatorError {
        OperatorError::KubeError(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".into(),
            message: "etcdserver: request timed out".into(),
            reason: reason.into(),
            code,
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn poll_rides_out_server_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let value = poll_until("HostedCluster cluster1", minutes(120), Duration::from_secs(30), move || {
            let counter = counter.clone();
            async move {
                match counter.fetch_add(1, Ordering::SeqCst) + 1 {
                    2 => Err(api_error(500, "InternalError")),
                    5 => Ok(Some("available")),
                    _ => Ok(None),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "available");
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_stops_on_missing_resource() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let err = poll_until("NodePool cluster1-workers", minutes(10), Duration::from_secs(30), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<Option<()>, _>(api_error(404, "NotFound")) }
        })
        .await
        .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    fn stored_curator(resource_version: &str) -> ClusterCurator {
        let mut curator = ClusterCurator::new("cluster1", ClusterCuratorSpec::default());
        curator.metadata.namespace = Some("cluster1".into());
        curator.metadata.resource_version = Some(resource_version.into());
        curator
    }

    #[tokio::test]
    async fn condition_write_retries_on_conflict() {
        const CURATOR_PATH: &str =
            "/apis/cluster.open-cluster-management.io/v1beta1/namespaces/cluster1/clustercurators/cluster1";
        const STATUS_PATH: &str =
            "/apis/cluster.open-cluster-management.io/v1beta1/namespaces/cluster1/clustercurators/cluster1/status";

        let (client, mut server) = mock_client();
        let runner = StepRunner::new(
            client,
            OperatorConfig::default(),
            "cluster1".into(),
            "cluster1".into(),
            Some(Curation::Install),
        );

        let api = async move {
            server
                .expect(Method::GET, CURATOR_PATH)
                .await
                .reply(&stored_curator("5"));
            let stale = server.expect(Method::PATCH, STATUS_PATH).await;
            assert_eq!(stale.body["metadata"]["resourceVersion"], "5");
            stale.fail(409, "Conflict");

            server
                .expect(Method::GET, CURATOR_PATH)
                .await
                .reply(&stored_curator("6"));
            let retry = server.expect(Method::PATCH, STATUS_PATH).await;
            assert_eq!(retry.body["metadata"]["resourceVersion"], "6");
            let condition = &retry.body["status"]["conditions"][0];
            assert_eq!(condition["type"], "prehook-ansiblejob");
            assert_eq!(condition["message"], "Executing prehook-ansiblejob");
            retry.reply(&stored_curator("7"));
        };

        let write = runner.set_condition(
            Step::PrehookAnsibleJob,
            ConditionState::Executing,
            "Executing prehook-ansiblejob".to_string(),
        );
        let (result, ()) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(write, api)
        })
        .await
        .expect("condition write did not finish");
        result.unwrap();
    }
}

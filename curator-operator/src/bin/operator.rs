//! Cluster Curator operator binary.
//!
//! `controller` runs the ClusterCurator reconciler, `step` runs one curation
//! step inside a curator Job, `manifests` prints the CRD and RBAC.

use anyhow::Context;
use clap::{Parser, Subcommand};
use curator_operator::audit::{init_audit_logger, service_account_subject};
use curator_operator::controller::{ControllerContext, CuratorController, error_policy};
use curator_operator::crd::{ClusterCurator, Curation};
use curator_operator::curation::Step;
use curator_operator::resources::{CLUSTER_NAME_ENV, CLUSTER_NAMESPACE_ENV, CURATION_ENV};
use curator_operator::runner::StepRunner;
use curator_operator::telemetry::{LogConfig, init_tracing};
use curator_operator::{OperatorConfig, manifests};
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::runtime::Controller;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client};
use std::sync::Arc;

/// Cluster Curator - automation around managed cluster lifecycle.
#[derive(Parser)]
#[command(name = "curator-operator")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ClusterCurator controller
    Controller,

    /// Run one curation step (used inside curator Jobs)
    Step {
        /// Step name, e.g. prehook-ansiblejob
        step: Step,

        /// ClusterCurator (and managed cluster) name
        #[arg(long, env = CLUSTER_NAME_ENV)]
        cluster: String,

        /// ClusterCurator namespace
        #[arg(long, env = CLUSTER_NAMESPACE_ENV)]
        namespace: String,

        /// Curation the Job was launched for
        #[arg(long, env = CURATION_ENV)]
        curation: Option<Curation>,
    },

    /// Print the CRD and RBAC manifests
    Manifests,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Manifests = cli.command {
        print!("{}", manifests::render()?);
        return Ok(());
    }

    init_tracing(&LogConfig::from_env())?;
    let config = OperatorConfig::from_env();

    match cli.command {
        Commands::Controller => run_controller(config).await,
        Commands::Step {
            step,
            cluster,
            namespace,
            curation,
        } => run_step(config, step, cluster, namespace, curation).await,
        Commands::Manifests => Ok(()),
    }
}

/// Run the ClusterCurator controller until a shutdown signal arrives.
async fn run_controller(config: OperatorConfig) -> anyhow::Result<()> {
    init_audit_logger(service_account_subject(
        manifests::OPERATOR_NAMESPACE,
        manifests::CONTROLLER_ROLE,
    ));
    tracing::info!(
        image = %config.image,
        watch_namespace = ?config.watch_namespace,
        "Starting Cluster Curator controller"
    );

    let client = Client::try_default()
        .await
        .context("Failed to connect to Kubernetes")?;
    tracing::info!("Connected to Kubernetes cluster");

    let (curators, jobs): (Api<ClusterCurator>, Api<Job>) = match &config.watch_namespace {
        Some(ns) => (
            Api::namespaced(client.clone(), ns),
            Api::namespaced(client.clone(), ns),
        ),
        None => (Api::all(client.clone()), Api::all(client.clone())),
    };

    let ctx = Arc::new(ControllerContext::new(client, config));
    let controller = CuratorController::new(ctx.clone());

    Controller::new(curators, WatcherConfig::default())
        .owns(jobs, WatcherConfig::default())
        .shutdown_on_signal()
        .run(
            move |curator, _ctx| {
                let controller = controller.clone();
                async move {
                    controller
                        .reconcile(curator)
                        .await
                        .map(|action| action.into_action())
                }
            },
            error_policy,
            ctx,
        )
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    tracing::debug!(
                        curator = %obj.name,
                        namespace = ?obj.namespace,
                        ?action,
                        "Reconciled ClusterCurator"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "ClusterCurator controller stream error");
                }
            }
        })
        .await;

    tracing::info!("Cluster Curator controller stopped");
    Ok(())
}

/// Run one step; a failure exits non-zero so the Job stops.
async fn run_step(
    config: OperatorConfig,
    step: Step,
    cluster: String,
    namespace: String,
    curation: Option<Curation>,
) -> anyhow::Result<()> {
    init_audit_logger(service_account_subject(&namespace, &config.job_service_account));

    let client = Client::try_default()
        .await
        .context("Failed to connect to Kubernetes")?;

    let runner = StepRunner::new(client, config, cluster.clone(), namespace.clone(), curation);
    runner
        .run(step)
        .await
        .with_context(|| format!("Step {} failed for {}/{}", step, namespace, cluster))
}

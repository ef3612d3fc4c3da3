//! Cluster Curator Kubernetes Operator
//!
//! Runs automation around the lifecycle of managed clusters. A `ClusterCurator`
//! named after a cluster requests a curation (install, upgrade, scale or
//! destroy); the operator launches a curator Job whose containers run the
//! pre-hooks, the core action and the post-hooks in order.
//!
//! # Custom Resource Definitions
//!
//! - **ClusterCurator**: curation intent and progress for one managed cluster
//! - **AnsibleJob**: automation hook created by curator Jobs
//!
//! # Example
//!
//! ```yaml
//! apiVersion: cluster.open-cluster-management.io/v1beta1
//! kind: ClusterCurator
//! metadata:
//!   name: my-cluster
//!   namespace: my-cluster
//! spec:
//!   desiredCuration: install
//!   install:
//!     towerAuthSecret: toweraccess
//!     prehook:
//!       - name: Demo Job Template
//!         extra_vars:
//!           variable1: something-interesting
//!     posthook:
//!       - name: Demo Job Template
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod admission;
pub mod audit;
pub mod config;
pub mod controller;
pub mod crd;
pub mod curation;
pub mod error;
pub mod manifests;
pub mod resources;
pub mod runner;
pub mod security;
pub mod status;
pub mod telemetry;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

pub use config::OperatorConfig;
pub use crd::{ClusterCurator, ClusterCuratorSpec, Curation};
pub use curation::Step;
pub use error::{OperatorError, OperatorResult};

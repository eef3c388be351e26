//! Kubernetes cluster health monitor.
//!
//! Periodically probes node readiness and namespace pod phases, scans pod
//! logs for known failure signatures, and publishes the result as one
//! immutable snapshot served over HTTP.
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────────┐   cycle   ┌──────────────┐  publish  ┌───────────────┐
//!  │  Scheduler   │──────────►│ probes +     │──────────►│ SnapshotStore │
//!  │ (fixed poll) │           │ PodInspector │           └───────┬───────┘
//!  └──────────────┘           └──────┬───────┘                   │
//!                                    │ ClusterQuery              │ StatusFacade
//!                                    ▼                           ▼
//!                          kube API / kubectl             axum /health /status
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use kubeseek::{InMemoryCluster, MonitorConfig, Scheduler, SnapshotStore};
//!
//! # async fn run() {
//! let cluster = InMemoryCluster::new().with_node("worker-1", true, "KubeletReady");
//! let store = Arc::new(SnapshotStore::new());
//! let scheduler = Scheduler::new(Arc::new(cluster), MonitorConfig::default(), store.clone());
//!
//! let snapshot = scheduler.run_once(1).await.unwrap();
//! assert!(snapshot.nodes["worker-1"].ready);
//! # }
//! ```

pub mod cluster;
pub mod config;
pub mod error;
pub mod inspector;
pub mod probe;
pub mod scheduler;
pub mod server;
pub mod signature;
pub mod store;
pub mod types;

pub use cluster::{
    ClusterQuery, InMemoryCluster, KubeCluster, KubectlCluster, LogRequest, PodPhase, PodSummary,
    ReadyCondition, TimeoutCluster,
};
pub use config::{MonitorConfig, ServerConfig};
pub use error::{ConfigError, MonitorError, QueryError};
pub use inspector::{InspectionOutcome, PodInspector};
pub use probe::{probe_namespace, probe_node};
pub use scheduler::Scheduler;
pub use store::{HealthView, SnapshotStore, StatusFacade, StatusView};
pub use types::{
    CycleStats, LogSource, NamespaceHealth, NodeHealth, PodIssue, PodIssueReport, Snapshot,
};

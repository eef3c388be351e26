//! Read-only access to the cluster.
//!
//! The reconciliation core only talks to a [`ClusterQuery`]. Backends:
//!
//! - [`KubeCluster`] - Kubernetes API via kube-rs (default)
//! - [`KubectlCluster`] - shells out to `kubectl`
//! - [`InMemoryCluster`] - scripted cluster for tests and local runs
//!
//! [`TimeoutCluster`] wraps any backend so a hung call cannot stall a cycle.

pub mod api;
pub mod kubectl;
pub mod memory;
pub mod timeout;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::types::LogSource;

pub use self::api::KubeCluster;
pub use self::kubectl::KubectlCluster;
pub use self::memory::InMemoryCluster;
pub use self::timeout::TimeoutCluster;

/// Pod lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Parse a phase as reported by the API. Anything unrecognized is `Unknown`.
    #[must_use]
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// Running and Succeeded pods count as healthy.
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Running | Self::Succeeded)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pod as returned by a namespace listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSummary {
    pub name: String,
    pub phase: PodPhase,
    /// Declared container names, in spec order.
    pub containers: Vec<String>,
}

impl PodSummary {
    pub fn new(name: impl Into<String>, phase: PodPhase) -> Self {
        Self {
            name: name.into(),
            phase,
            containers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_containers<I, S>(mut self, containers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.containers = containers.into_iter().map(Into::into).collect();
        self
    }
}

/// The `Ready` condition of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyCondition {
    pub ready: bool,
    /// Reason (or message) reported alongside the condition; may be empty.
    pub reason: String,
}

/// What log to read and how much of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRequest {
    pub namespace: String,
    pub pod: String,
    /// `None` targets the pod's default container.
    pub container: Option<String>,
    pub source: LogSource,
    pub max_lines: u32,
}

impl fmt::Display for LogRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.pod)?;
        if let Some(container) = &self.container {
            write!(f, "[{container}]")?;
        }
        write!(f, " {}", self.source)
    }
}

/// Keep the last `max_lines` lines of `text`.
pub(crate) fn tail_lines(text: &str, max_lines: u32) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let keep = usize::try_from(max_lines).unwrap_or(usize::MAX);
    let start = lines.len().saturating_sub(keep);
    lines[start..].join("\n")
}

/// Read-only cluster operations used by probes and the pod inspector.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterQuery: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    async fn list_namespaces(&self) -> Result<Vec<String>, QueryError>;

    async fn list_nodes(&self) -> Result<Vec<String>, QueryError>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodSummary>, QueryError>;

    /// `Ok(None)` when the node reports no Ready condition at all.
    async fn node_ready_condition(&self, node: &str)
        -> Result<Option<ReadyCondition>, QueryError>;

    async fn pod_phase(&self, namespace: &str, pod: &str) -> Result<PodPhase, QueryError>;

    /// Fetch the tail of a log. An empty log is `Ok(String::new())`; only a
    /// failed fetch is an error.
    async fn fetch_log_tail(&self, request: &LogRequest) -> Result<String, QueryError>;
}

//! Snapshot data model.
//!
//! Every record here is rebuilt from scratch each cycle; nothing is patched
//! in place once published.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// HTTP-style status code for a healthy record.
pub const STATUS_HEALTHY: u16 = 200;

/// HTTP-style status code for an unhealthy or unknown record.
pub const STATUS_UNHEALTHY: u16 = 500;

/// Message carried by healthy records.
pub const HEALTHY_MESSAGE: &str = "healthy";

/// Readiness of a single node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHealth {
    pub name: String,
    pub ready: bool,
    #[serde(rename = "status")]
    pub status_code: u16,
    pub message: String,
}

impl NodeHealth {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ready: true,
            status_code: STATUS_HEALTHY,
            message: HEALTHY_MESSAGE.to_string(),
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ready: false,
            status_code: STATUS_UNHEALTHY,
            message: message.into(),
        }
    }
}

/// Phase-based health of a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceHealth {
    pub name: String,
    pub healthy: bool,
    #[serde(rename = "status")]
    pub status_code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unhealthy_pods: Vec<String>,
}

impl NamespaceHealth {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            healthy: true,
            status_code: STATUS_HEALTHY,
            message: HEALTHY_MESSAGE.to_string(),
            unhealthy_pods: Vec::new(),
        }
    }

    pub fn unhealthy(
        name: impl Into<String>,
        message: impl Into<String>,
        unhealthy_pods: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            healthy: false,
            status_code: STATUS_UNHEALTHY,
            message: message.into(),
            unhealthy_pods,
        }
    }
}

/// Which log a matched line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    /// Kernel ring buffer as seen from inside the container.
    Dmesg,
    /// The application's own log file.
    ApplicationLog,
}

impl LogSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dmesg => "dmesg",
            Self::ApplicationLog => "application_log",
        }
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Matched lines from one log of one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodIssue {
    pub source: LogSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    pub lines: Vec<String>,
}

/// All issues found in a pod during one cycle. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodIssueReport {
    pub namespace: String,
    pub pod: String,
    pub issues: Vec<PodIssue>,
}

impl PodIssueReport {
    /// Issues from a given source.
    pub fn issues_from(&self, source: LogSource) -> impl Iterator<Item = &PodIssue> {
        self.issues.iter().filter(move |i| i.source == source)
    }
}

/// Counters for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleStats {
    pub nodes_probed: usize,
    pub namespaces_probed: usize,
    pub pods_inspected: usize,
    pub pods_skipped: usize,
    /// Log fetches that failed and were treated as empty.
    pub log_fetch_failures: usize,
    pub duration_ms: u64,
}

/// The complete result of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub nodes: BTreeMap<String, NodeHealth>,
    pub namespaces: BTreeMap<String, NamespaceHealth>,
    pub pod_issues: Vec<PodIssueReport>,
    /// `None` until the first cycle completes.
    pub generated_at: Option<DateTime<Utc>>,
    pub cycle: u64,
    pub stats: CycleStats,
}

impl Snapshot {
    /// The placeholder served before any cycle has completed.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether this snapshot came from a completed cycle.
    #[must_use]
    pub fn is_published(&self) -> bool {
        self.generated_at.is_some()
    }

    /// Issue report for a pod, if one was produced.
    #[must_use]
    pub fn issues_for(&self, namespace: &str, pod: &str) -> Option<&PodIssueReport> {
        self.pod_issues
            .iter()
            .find(|r| r.namespace == namespace && r.pod == pod)
    }
}

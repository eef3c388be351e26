//! Error types for the monitor.
//!
//! Errors are absorbed at the narrowest scope that can degrade: a
//! [`QueryError`] becomes an unhealthy record or an empty result, a
//! [`MonitorError`] abandons one cycle. Only [`ConfigError`] stops the process.

use std::time::Duration;

use thiserror::Error;

/// A failed read against the cluster.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Kubernetes API request failed.
    #[error("kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// An external command (kubectl, or a command exec'd in a pod) failed.
    #[error("command `{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    /// The query did not finish within its deadline.
    #[error("{operation} timed out after {}s", .timeout.as_secs())]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The response could not be interpreted.
    #[error("failed to parse {what}: {reason}")]
    Parse { what: String, reason: String },

    /// The requested object does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// I/O error talking to a subprocess or stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl QueryError {
    /// Build a parse error.
    pub fn parse(what: impl Into<String>, reason: impl ToString) -> Self {
        Self::Parse {
            what: what.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(e: serde_json::Error) -> Self {
        Self::parse("JSON output", e)
    }
}

/// Invalid monitor configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("poll interval must be greater than zero")]
    ZeroInterval,

    #[error("concurrency bound must be at least 1")]
    ZeroConcurrency,

    #[error("log tail line bound must be at least 1")]
    ZeroTailLines,

    #[error("{0} timeout must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("application log path must be absolute: {0}")]
    RelativeLogPath(String),
}

/// A cycle that could not complete.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The cycle task panicked or was aborted.
    #[error("cycle {cycle} aborted: {source}")]
    CycleAborted {
        cycle: u64,
        #[source]
        source: tokio::task::JoinError,
    },

    /// The cycle exceeded its overall deadline.
    #[error("cycle {cycle} exceeded {}s", .timeout.as_secs())]
    CycleTimeout { cycle: u64, timeout: Duration },
}
